//! Benchmark orchestrator
//!
//! Owns everything a run shares between workers: the validated
//! configuration, the memory objects and the phase barrier. Workers are
//! scoped threads borrowing these, so nothing outlives the run.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use log::{debug, error, info, warn};
use serde::Serialize;
use vmops_api::{Error, MemoryObject, Result, TimeSource, VmBackend};
use vmops_platform::pin_current_thread;

use crate::barrier::SpinBarrier;
use crate::config::BenchConfig;
use crate::report::AggregateResult;
use crate::sampler::{merge_samples, LatencySample, LatencySampler};
use crate::worker::{run_worker, WorkerContext, WorkerReport, WorkerStatus};

/// Everything a completed run produced
#[derive(Debug, Clone, Serialize)]
pub struct BenchOutcome {
    /// Configuration the run actually used
    pub config: BenchConfig,
    /// Per-worker results in worker order
    pub workers: Vec<WorkerReport>,
    /// Totals over all workers
    pub aggregate: AggregateResult,
    /// Samples of all workers ordered by elapsed time
    pub samples: Vec<LatencySample>,
}

/// Memory objects of one run; whatever is still held is destroyed on drop
struct ObjectSet<'a, B: VmBackend> {
    backend: &'a B,
    objects: Vec<B::Object>,
    shared: bool,
}

impl<'a, B: VmBackend> ObjectSet<'a, B> {
    /// Creates one shared object or one object per worker
    ///
    /// If creating object `k` fails, objects `0..k` are destroyed before
    /// the error is returned.
    fn create(backend: &'a B, config: &BenchConfig) -> Result<Self> {
        let shared = config.benchmark.is_shared();
        let count = if shared { 1 } else { config.ncores() };
        info!("creating {} memory objects of size {}", count, config.memsize);
        info!("total memory usage = {} kB", (count * config.memsize) >> 10);

        let mut set = ObjectSet { backend, objects: Vec::with_capacity(count), shared };
        for (i, &core) in config.cores.iter().take(count).enumerate() {
            let name = config.object_name(core);
            match backend.create(&name, config.memsize, config.benchmark.is_huge()) {
                Ok(object) => set.objects.push(object),
                Err(err) => {
                    error!("creation of memory object '{}' failed! [{} / {}]: {}", name, i, count, err);
                    return Err(err);
                }
            }
        }
        Ok(set)
    }

    fn for_worker(&self, tid: usize) -> &B::Object {
        if self.shared { &self.objects[0] } else { &self.objects[tid] }
    }

    fn destroy_all(&mut self) {
        for object in self.objects.drain(..) {
            let name = object.name().to_string();
            if let Err(err) = self.backend.destroy(object) {
                error!("failed to destroy memory object '{}': {}", name, err);
            }
        }
    }
}

impl<B: VmBackend> Drop for ObjectSet<'_, B> {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

/// Runs benchmarks against a backend and a time source
pub struct Orchestrator<'a, B: VmBackend, T: TimeSource> {
    backend: &'a B,
    clock: &'a T,
    pin: bool,
    spawn_limit: usize,
}

impl<'a, B: VmBackend, T: TimeSource> Orchestrator<'a, B, T> {
    /// Creates an orchestrator that pins workers to their cores
    pub fn new(backend: &'a B, clock: &'a T) -> Self {
        Self { backend, clock, pin: true, spawn_limit: usize::MAX }
    }

    /// Enables or disables CPU pinning of the workers
    pub fn pin_threads(mut self, pin: bool) -> Self {
        self.pin = pin;
        self
    }

    /// Refuses to start more than `limit` worker threads
    ///
    /// Starting worker `limit` fails like a rejected thread creation.
    pub fn spawn_limit(mut self, limit: usize) -> Self {
        self.spawn_limit = limit;
        self
    }

    /// Runs one benchmark to completion
    ///
    /// Configuration, object creation and thread start failures abort the
    /// whole run; failures inside a worker only degrade that worker's result.
    pub fn run(&self, config: &BenchConfig) -> Result<BenchOutcome> {
        let mut config = config.validate()?;
        info!("benchmark '{}': {}", config.benchmark, config.benchmark.describe());
        info!(
            "memsize={} ncores={} duration={}ms nops={}",
            config.memsize,
            config.ncores(),
            config.duration_ms,
            config.nops
        );

        let samplers = self.allocate_samplers(&mut config);
        let mut objects = ObjectSet::create(self.backend, &config)?;
        let barrier = SpinBarrier::new(config.ncores());
        let mut workers = self.spawn_and_join(&config, &objects, &barrier, samplers)?;
        objects.destroy_all();

        let samples = merge_samples(workers.iter_mut().map(|w| std::mem::take(&mut w.samples)));
        let aggregate = AggregateResult::from_reports(&workers);
        info!("benchmark done. ops = {}, throughput = {:.3}", aggregate.total_ops, aggregate.throughput);

        Ok(BenchOutcome { config, workers, aggregate, samples })
    }

    /// Reserves one sampler per worker
    ///
    /// If the buffers cannot be reserved, sampling is switched off in
    /// `config` and every worker gets a disabled sampler.
    fn allocate_samplers(&self, config: &mut BenchConfig) -> Vec<LatencySampler> {
        let ncores = config.ncores();
        if !config.stats.enabled() {
            return (0..ncores).map(|_| LatencySampler::disabled()).collect();
        }
        let bytes = ncores
            .saturating_mul(config.stats.slots)
            .saturating_mul(std::mem::size_of::<LatencySample>());
        info!("allocating stats. {} kB memory", bytes >> 10);

        let interval = self.clock.from_millis(config.stats.rate_ms);
        let samplers: Result<Vec<LatencySampler>> =
            (0..ncores).map(|_| LatencySampler::new(config.stats.slots, interval)).collect();
        samplers.unwrap_or_else(|err| {
            warn!("disabling statistics. failed to get memory! ({})", err);
            config.stats.slots = 0;
            (0..ncores).map(|_| LatencySampler::disabled()).collect()
        })
    }

    fn spawn_and_join(
        &self,
        config: &BenchConfig,
        objects: &ObjectSet<'_, B>,
        barrier: &SpinBarrier,
        samplers: Vec<LatencySampler>,
    ) -> Result<Vec<WorkerReport>> {
        let ncores = config.ncores();

        thread::scope(|scope| {
            info!("creating {} threads", ncores);
            let mut handles = Vec::with_capacity(ncores);
            let mut spawn_error = None;

            for ((tid, &core), sampler) in config.cores.iter().enumerate().zip(samplers) {
                let ctx = WorkerContext {
                    thread_id: tid,
                    core,
                    config,
                    object: objects.for_worker(tid),
                    barrier,
                    backend: self.backend,
                    clock: self.clock,
                    sampler,
                };
                let pin = self.pin;
                debug!("thread {} on core {}", tid, core);
                let builder = thread::Builder::new().name(format!("vmops-{}", tid));
                let spawned = if tid >= self.spawn_limit {
                    Err(io::Error::other("worker thread limit reached"))
                } else {
                    builder.spawn_scoped(scope, move || {
                        if pin {
                            if let Err(err) = pin_current_thread(core) {
                                warn!("thread {} not pinned to core {}: {}", tid, core, err);
                            }
                        }
                        panic::catch_unwind(AssertUnwindSafe(|| run_worker(ctx))).unwrap_or_else(|_| {
                            // Siblings may be parked on a barrier this worker will never reach
                            barrier.abort();
                            WorkerReport::empty(tid, core, WorkerStatus::Panicked)
                        })
                    })
                };
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        error!("failed to start threads! [{} / {}]", tid, ncores);
                        barrier.abort();
                        spawn_error = Some(Error::ThreadSpawn(format!("thread {}: {}", tid, err)));
                        break;
                    }
                }
            }

            let reports: Vec<WorkerReport> = handles
                .into_iter()
                .enumerate()
                .map(|(tid, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!("thread {} panicked", tid);
                        WorkerReport::empty(tid, config.cores[tid], WorkerStatus::Panicked)
                    })
                })
                .collect();

            match spawn_error {
                Some(err) => {
                    for report in &reports {
                        debug!("thread {} stopped: {}", report.thread_id, report.status);
                    }
                    Err(err)
                }
                None => Ok(reports),
            }
        })
    }
}
