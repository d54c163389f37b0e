//! VMOPS Bench - concurrent virtual memory operations benchmark engine
//!
//! The engine runs one worker thread per configured core. Workers are
//! pinned, synchronized at phase boundaries by a spinning barrier and drive
//! a [`VmBackend`](vmops_api::VmBackend) in a timed loop, optionally
//! recording rate-limited latency samples. The orchestrator owns the memory
//! objects, joins the workers and aggregates their results.
//!
//! # Architecture
//!
//! - **config**: scenario names, option flags and run validation
//! - **barrier**: reusable atomic rendezvous with leave and abort
//! - **sampler**: fixed-capacity, rate-limited latency sampling
//! - **worker**: per-thread phase machine and loop variants
//! - **orchestrator**: object lifecycle, thread fan-out, join
//! - **report**: aggregation, CSV, latency table and JSON output
//!
//! # Usage
//!
//! ```rust
//! use vmops_bench::{BenchConfig, Benchmark, Orchestrator};
//! use vmops_platform::{MonotonicClock, SimBackend};
//!
//! let benchmark: Benchmark = "mapunmap-shared".parse().unwrap();
//! let config = BenchConfig::new(benchmark, vec![0]).duration_ms(0).nops(100);
//! let backend = SimBackend::new();
//! let clock = MonotonicClock::new();
//! let outcome = Orchestrator::new(&backend, &clock)
//!     .pin_threads(false)
//!     .run(&config)
//!     .unwrap();
//! assert_eq!(outcome.aggregate.total_ops, 100);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod config;
pub mod orchestrator;
pub mod report;
pub mod sampler;
pub mod worker;

pub use barrier::SpinBarrier;
pub use config::{BenchConfig, BenchOptions, Benchmark, Operation, StatsConfig};
pub use orchestrator::{BenchOutcome, Orchestrator};
pub use report::AggregateResult;
pub use sampler::{LatencySample, LatencySampler};
pub use worker::{isolated_base, WorkerReport, WorkerStatus};
