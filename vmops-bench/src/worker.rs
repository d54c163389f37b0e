//! Benchmark worker
//!
//! Every worker walks the same phases:
//!
//! ```text
//! SETUP -> READY barrier -> MEASURE -> DONE barrier -> TEARDOWN
//! ```
//!
//! Setup cost is excluded from the measurement and no worker tears down
//! while a sibling is still measuring. The loop body is chosen by a
//! [`Variant`] derived from the configuration.

use core::fmt;

use log::{debug, error, warn};
use serde::{Serialize, Serializer};
use vmops_api::memory::layout;
use vmops_api::{CoreId, Error, Permission, Result, Size, Ticks, TimeSource, VirtAddr, VmBackend};

use crate::barrier::SpinBarrier;
use crate::config::{BenchConfig, Operation};
use crate::sampler::{LatencySample, LatencySampler};

/// Distance between the fixed address ranges of two isolated workers
pub const ADDRESS_OFFSET: Size = layout::GB512;

/// Fixed base address of isolated worker `tid`
///
/// Every worker owns the `ADDRESS_OFFSET` sized slot starting here; slot 0
/// is left to the rest of the process.
pub fn isolated_base(tid: usize) -> VirtAddr {
    VirtAddr::new(ADDRESS_OFFSET * (tid + 1))
}

/// Where mappings are placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The backend picks the address
    Default,
    /// Fixed addresses inside the worker's own slot
    Isolated,
}

/// How the region is mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One mapping of the whole region
    Bulk,
    /// One mapping per page slot
    Page,
}

/// Loop body selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    /// Address placement
    pub placement: Placement,
    /// Mapping granularity
    pub granularity: Granularity,
    /// Measured operation
    pub operation: Operation,
}

impl Variant {
    /// Derives the variant from the scenario flags
    pub fn from_config(config: &BenchConfig) -> Self {
        let b = &config.benchmark;
        Self {
            placement: if b.is_isolated() { Placement::Isolated } else { Placement::Default },
            granularity: if b.is_map4k() { Granularity::Page } else { Granularity::Bulk },
            operation: b.operation,
        }
    }
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    /// The loop ran until its budget was exhausted
    #[default]
    Completed,
    /// Setup failed; no operation was measured
    SetupFailed {
        /// Failed setup mapping
        error: Error,
    },
    /// An operation failed; the count is truncated
    OperationFailed {
        /// Error of the first failed operation
        error: Error,
    },
    /// The run was aborted before measuring started
    Aborted,
    /// The worker thread panicked
    Panicked,
}

impl WorkerStatus {
    /// Returns true if the worker measured its full budget
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkerStatus::Completed)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Completed => write!(f, "completed"),
            WorkerStatus::SetupFailed { error } => write!(f, "setup failed: {}", error),
            WorkerStatus::OperationFailed { error } => write!(f, "operation failed: {}", error),
            WorkerStatus::Aborted => write!(f, "aborted"),
            WorkerStatus::Panicked => write!(f, "panicked"),
        }
    }
}

impl Serialize for WorkerStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of one worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    /// Dense worker index
    pub thread_id: usize,
    /// Core the worker ran on
    pub core: CoreId,
    /// Completed operations
    pub ops: u64,
    /// Measured time in milliseconds
    pub duration_ms: f64,
    /// How the worker ended
    pub status: WorkerStatus,
    /// Accepted latency samples
    #[serde(skip)]
    pub samples: Vec<LatencySample>,
}

impl WorkerReport {
    /// Report of a worker that did nothing
    pub fn empty(thread_id: usize, core: CoreId, status: WorkerStatus) -> Self {
        Self { thread_id, core, ops: 0, duration_ms: 0.0, status, samples: Vec::new() }
    }
}

/// Everything one worker needs, borrowed from the orchestrator
pub struct WorkerContext<'a, B: VmBackend, T: TimeSource> {
    /// Dense worker index
    pub thread_id: usize,
    /// Assigned core
    pub core: CoreId,
    /// Validated configuration
    pub config: &'a BenchConfig,
    /// Shared or exclusive memory object
    pub object: &'a B::Object,
    /// Phase barrier
    pub barrier: &'a SpinBarrier,
    /// VM backend
    pub backend: &'a B,
    /// Time source
    pub clock: &'a T,
    /// Owned sample buffer
    pub sampler: LatencySampler,
}

/// Mappings established during setup
#[derive(Debug)]
enum Prepared {
    Nothing,
    Region(VirtAddr),
    Pages(Vec<Option<VirtAddr>>),
}

struct Measurement {
    ops: u64,
    elapsed: Ticks,
    failure: Option<Error>,
}

/// Next fixed address after `addr`, wrapping inside the slot at `base`
fn bump(addr: VirtAddr, step: Size, base: VirtAddr) -> VirtAddr {
    let next = addr + step;
    if next.as_usize() + step > base.as_usize() + ADDRESS_OFFSET { base } else { next }
}

impl<'a, B: VmBackend, T: TimeSource> WorkerContext<'a, B, T> {
    fn setup(&self, variant: Variant) -> Result<Prepared> {
        let memsize = self.config.memsize;
        let base = isolated_base(self.thread_id);
        match (variant.operation, variant.granularity) {
            (Operation::MapUnmap, Granularity::Page) | (Operation::Protect, Granularity::Page) => {
                let unit = self.config.page_unit();
                let mut pages = Vec::with_capacity(self.config.nmaps());
                for i in 0..self.config.nmaps() {
                    let mapped = match variant.placement {
                        Placement::Isolated => {
                            let addr = base + i * unit;
                            self.backend.map_fixed(addr, self.object, i * unit, unit).map(|_| addr)
                        }
                        Placement::Default => self.backend.map(self.object, i * unit, unit),
                    };
                    match mapped {
                        Ok(addr) => pages.push(Some(addr)),
                        Err(err) => {
                            self.teardown(Prepared::Pages(pages));
                            return Err(err);
                        }
                    }
                }
                Ok(Prepared::Pages(pages))
            }
            (Operation::Protect, Granularity::Bulk) => {
                let addr = match variant.placement {
                    Placement::Isolated => self.backend.map_fixed(base, self.object, 0, memsize).map(|_| base)?,
                    Placement::Default => self.backend.map(self.object, 0, memsize)?,
                };
                Ok(Prepared::Region(addr))
            }
            _ => Ok(Prepared::Nothing),
        }
    }

    fn teardown(&self, prepared: Prepared) {
        let result = match prepared {
            Prepared::Nothing => Ok(()),
            Prepared::Region(addr) => self.backend.unmap(addr, self.config.memsize),
            Prepared::Pages(pages) => {
                let unit = self.config.page_unit();
                pages
                    .into_iter()
                    .flatten()
                    .map(|addr| self.backend.unmap(addr, unit))
                    .fold(Ok(()), |acc, r| acc.and(r))
            }
        };
        if let Err(err) = result {
            error!("thread {}. failed to unmap memory: {}", self.thread_id, err);
        }
    }

    /// Timed loop shared by every variant
    fn measure<F>(&mut self, mut op: F) -> Measurement
    where
        F: FnMut() -> Result<()>,
    {
        let clock = self.clock;
        let budget = match self.config.duration_ms {
            0 => Ticks::MAX,
            ms => clock.from_millis(ms),
        };
        let nops = match self.config.nops {
            0 => u64::MAX,
            n => n,
        };
        let sampling = self.config.stats.enabled();

        let mut t_current = clock.now();
        let t_start = t_current;
        let t_end = t_start.saturating_add(budget);
        let mut counter = 0u64;
        let mut failure = None;
        while t_current < t_end && counter < nops {
            let t_op = t_current;
            if let Err(err) = op() {
                failure = Some(err);
                break;
            }
            t_current = clock.now();
            counter += 1;
            if sampling {
                self.sampler.offer(self.thread_id, counter, t_current - t_start, t_current - t_op);
            }
        }
        Measurement { ops: counter, elapsed: clock.now() - t_start, failure }
    }

    fn run_loop(&mut self, variant: Variant, prepared: &mut Prepared) -> Measurement {
        let backend = self.backend;
        let object = self.object;
        let memsize = self.config.memsize;
        let unit = self.config.page_unit();
        let nmaps = self.config.nmaps();
        let base = isolated_base(self.thread_id);
        let mut page = self.thread_id;
        let mut next_slot = move || {
            let idx = page % nmaps;
            page += 1;
            idx
        };

        match (variant.operation, variant.granularity, variant.placement) {
            (Operation::MapUnmap, Granularity::Bulk, Placement::Default) => self.measure(|| {
                let addr = backend.map(object, 0, memsize)?;
                backend.unmap(addr, memsize)
            }),
            (Operation::MapUnmap, Granularity::Bulk, Placement::Isolated) => self.measure(|| {
                backend.map_fixed(base, object, 0, memsize)?;
                backend.unmap(base, memsize)
            }),
            (Operation::MapUnmap, Granularity::Page, placement) => {
                let Prepared::Pages(pages) = prepared else {
                    return missing_setup();
                };
                self.measure(|| {
                    let idx = next_slot();
                    if let Some(addr) = pages[idx] {
                        backend.unmap(addr, unit)?;
                        pages[idx] = None;
                    }
                    let addr = match placement {
                        Placement::Isolated => {
                            let addr = base + idx * unit;
                            backend.map_fixed(addr, object, idx * unit, unit)?;
                            addr
                        }
                        Placement::Default => backend.map(object, idx * unit, unit)?,
                    };
                    pages[idx] = Some(addr);
                    Ok(())
                })
            }
            (Operation::MapOnly, Granularity::Bulk, Placement::Default) => {
                self.measure(|| backend.map(object, 0, memsize).map(|_| ()))
            }
            (Operation::MapOnly, Granularity::Bulk, Placement::Isolated) => {
                let mut addr = base;
                self.measure(|| {
                    backend.map_fixed(addr, object, 0, memsize)?;
                    addr = bump(addr, memsize, base);
                    Ok(())
                })
            }
            (Operation::MapOnly, Granularity::Page, Placement::Default) => self.measure(|| {
                let idx = next_slot();
                backend.map(object, idx * unit, unit).map(|_| ())
            }),
            (Operation::MapOnly, Granularity::Page, Placement::Isolated) => {
                let mut addr = base;
                self.measure(|| {
                    let idx = next_slot();
                    backend.map_fixed(addr, object, idx * unit, unit)?;
                    addr = bump(addr, unit, base);
                    Ok(())
                })
            }
            (Operation::Protect, Granularity::Bulk, _) => {
                let Prepared::Region(addr) = *prepared else {
                    return missing_setup();
                };
                self.measure(|| {
                    backend.protect(addr, memsize, Permission::RO)?;
                    backend.protect(addr, memsize, Permission::RW)
                })
            }
            (Operation::Protect, Granularity::Page, _) => {
                let Prepared::Pages(pages) = prepared else {
                    return missing_setup();
                };
                self.measure(|| {
                    let idx = next_slot();
                    let addr = pages[idx].ok_or(Error::ProtectFailed { addr: 0, errno: 0 })?;
                    backend.protect(addr, unit, Permission::RO)?;
                    backend.protect(addr, unit, Permission::RW)
                })
            }
        }
    }
}

fn missing_setup() -> Measurement {
    Measurement {
        ops: 0,
        elapsed: 0,
        failure: Some(Error::InvalidArguments("worker setup did not prepare mappings".to_string())),
    }
}

/// Runs one worker through all phases and returns its report
pub fn run_worker<B: VmBackend, T: TimeSource>(mut ctx: WorkerContext<'_, B, T>) -> WorkerReport {
    let tid = ctx.thread_id;
    let variant = Variant::from_config(ctx.config);

    let mut prepared = match ctx.setup(variant) {
        Ok(prepared) => prepared,
        Err(err) => {
            error!("thread {} failed to map memory. exiting: {}", tid, err);
            ctx.barrier.leave();
            return WorkerReport::empty(tid, ctx.core, WorkerStatus::SetupFailed { error: err });
        }
    };

    debug!("thread {} ready.", tid);
    if ctx.barrier.wait().is_err() {
        warn!("thread {} released by abort before measuring", tid);
        ctx.teardown(prepared);
        return WorkerReport::empty(tid, ctx.core, WorkerStatus::Aborted);
    }

    let measurement = ctx.run_loop(variant, &mut prepared);

    if ctx.barrier.wait().is_err() {
        warn!("thread {} released by abort after measuring", tid);
    }

    ctx.teardown(prepared);

    let duration_ms = ctx.clock.to_millis(measurement.elapsed);
    let status = match measurement.failure {
        Some(err) => {
            error!("thread {}. operation {} failed: {}", tid, measurement.ops + 1, err);
            WorkerStatus::OperationFailed { error: err }
        }
        None => WorkerStatus::Completed,
    };
    debug!("thread {} done. ops = {}, time={:.3}", tid, measurement.ops, duration_ms);

    WorkerReport {
        thread_id: tid,
        core: ctx.core,
        ops: measurement.ops,
        duration_ms,
        status,
        samples: ctx.sampler.into_samples(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Benchmark;
    use vmops_api::memory::{page_size, MemoryRegion};
    use vmops_platform::{ManualClock, SimBackend};

    fn context<'a>(
        config: &'a BenchConfig,
        object: &'a <SimBackend as VmBackend>::Object,
        barrier: &'a SpinBarrier,
        backend: &'a SimBackend,
        clock: &'a ManualClock,
    ) -> WorkerContext<'a, SimBackend, ManualClock> {
        WorkerContext {
            thread_id: 0,
            core: 0,
            config,
            object,
            barrier,
            backend,
            clock,
            sampler: LatencySampler::new(config.stats.slots, clock.from_millis(config.stats.rate_ms)).unwrap(),
        }
    }

    #[test]
    fn test_isolated_bases_are_slot_aligned() {
        assert_eq!(isolated_base(0).as_usize(), 512 << 30);
        assert_eq!(isolated_base(1).as_usize(), 1024 << 30);
        assert!(isolated_base(254).as_usize() + ADDRESS_OFFSET <= layout::USER_ADDR_LIMIT);
    }

    #[test]
    fn test_bump_wraps_inside_slot() {
        let base = isolated_base(3);
        let last = base + (ADDRESS_OFFSET - page_size::MB2);
        assert_eq!(bump(base, page_size::MB2, base), base + page_size::MB2);
        assert_eq!(bump(last, page_size::MB2, base), base);
    }

    #[test]
    fn test_variant_from_config() {
        let b: Benchmark = "protect-independent-isolated-4k".parse().unwrap();
        let v = Variant::from_config(&BenchConfig::new(b, vec![0]));
        assert_eq!(v.placement, Placement::Isolated);
        assert_eq!(v.granularity, Granularity::Page);
        assert_eq!(v.operation, Operation::Protect);
    }

    #[test]
    fn test_protect_page_worker_counts_and_cleans_up() {
        let b: Benchmark = "protect-4k".parse().unwrap();
        let config = BenchConfig::new(b, vec![0]).memsize(4 * page_size::KB4).duration_ms(0).nops(10);
        let sim = SimBackend::new();
        let obj = sim.create("obj", config.memsize, false).unwrap();
        let barrier = SpinBarrier::new(1);
        let clock = ManualClock::new(1);
        let report = run_worker(context(&config, &obj, &barrier, &sim, &clock));
        assert_eq!(report.ops, 10);
        assert!(report.status.is_completed());
        assert_eq!(sim.stats().protects, 20);
        assert_eq!(sim.mapping_count(), 0);
    }

    #[test]
    fn test_map_only_isolated_leaves_mappings() {
        let b: Benchmark = "maponly-isolated".parse().unwrap();
        let config = BenchConfig::new(b, vec![0]).duration_ms(0).nops(5);
        let sim = SimBackend::new();
        let obj = sim.create("obj", config.memsize, false).unwrap();
        let barrier = SpinBarrier::new(1);
        let clock = ManualClock::new(1);
        let report = run_worker(context(&config, &obj, &barrier, &sim, &clock));
        assert_eq!(report.ops, 5);
        let slot = MemoryRegion::new(isolated_base(0), 5 * config.memsize);
        assert_eq!(sim.mappings_in(slot).len(), 5);
    }

    #[test]
    fn test_setup_failure_leaves_barrier() {
        let b: Benchmark = "mapunmap-4k".parse().unwrap();
        let config = BenchConfig::new(b, vec![0, 1]).memsize(4 * page_size::KB4).nops(1);
        let sim = SimBackend::new().with_map_failure_after(2);
        let obj = sim.create("obj", config.memsize, false).unwrap();
        let barrier = SpinBarrier::new(2);
        let clock = ManualClock::new(1);
        let report = run_worker(context(&config, &obj, &barrier, &sim, &clock));
        assert!(matches!(report.status, WorkerStatus::SetupFailed { error: Error::MapFailed { .. } }));
        assert_eq!(report.ops, 0);
        assert_eq!(barrier.participants(), 1);
        // Partially established pages are rolled back
        assert_eq!(sim.mapping_count(), 0);
    }

    #[test]
    fn test_operation_failure_truncates_count() {
        let b: Benchmark = "mapunmap".parse().unwrap();
        let config = BenchConfig::new(b, vec![0]).duration_ms(0).nops(100);
        let sim = SimBackend::new().with_map_failure_after(7);
        let obj = sim.create("obj", config.memsize, false).unwrap();
        let barrier = SpinBarrier::new(1);
        let clock = ManualClock::new(1);
        let report = run_worker(context(&config, &obj, &barrier, &sim, &clock));
        assert_eq!(report.ops, 7);
        assert!(matches!(report.status, WorkerStatus::OperationFailed { error: Error::MapFailed { .. } }));
    }

    #[test]
    fn test_failed_page_unmap_is_retried_at_teardown() {
        let b: Benchmark = "mapunmap-4k".parse().unwrap();
        let config = BenchConfig::new(b, vec![0]).memsize(4 * page_size::KB4).duration_ms(0).nops(100);
        // First unmap is the first measured operation
        let sim = SimBackend::new().with_unmap_failure(0);
        let obj = sim.create("obj", config.memsize, false).unwrap();
        let barrier = SpinBarrier::new(1);
        let clock = ManualClock::new(1);
        let report = run_worker(context(&config, &obj, &barrier, &sim, &clock));
        assert_eq!(report.ops, 0);
        assert!(matches!(report.status, WorkerStatus::OperationFailed { error: Error::UnmapFailed { .. } }));
        assert_eq!(sim.stats().unmaps, 4);
        assert_eq!(sim.mapping_count(), 0);
    }

    #[test]
    fn test_sampling_in_loop() {
        let b: Benchmark = "mapunmap".parse().unwrap();
        let config = BenchConfig::new(b, vec![0]).duration_ms(0).nops(1000).stats(8, 1);
        let sim = SimBackend::new();
        let obj = sim.create("obj", config.memsize, false).unwrap();
        let barrier = SpinBarrier::new(1);
        // 100us per clock read, so a sample is admitted every 10 operations
        let clock = ManualClock::new(100_000);
        let report = run_worker(context(&config, &obj, &barrier, &sim, &clock));
        assert_eq!(report.samples.len(), 8);
        for pair in report.samples.windows(2) {
            assert!(pair[1].elapsed - pair[0].elapsed >= 1_000_000);
        }
    }
}
