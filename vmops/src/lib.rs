//! VMOPS - command-line front end of the virtual memory operations benchmark
//!
//! Parses the arguments, installs the logger, resolves the core list from
//! the NUMA topology and hands the run to [`vmops_bench::Orchestrator`].

pub mod app;
pub mod cli;
pub mod logger;

pub use app::run;
pub use cli::{Args, BackendKind, CoreList};
