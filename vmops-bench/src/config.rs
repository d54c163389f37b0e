//! Benchmark configuration
//!
//! A [`BenchConfig`] describes one run. It is built once (from the command
//! line or in code), corrected by [`BenchConfig::validate`] and then only
//! read while workers run.

use core::fmt;
use core::str::FromStr;

use log::warn;
use serde::{Serialize, Serializer};
use vmops_api::memory::{layout, page_size};
use vmops_api::{CoreId, Error, NumaPolicy, Result, Size};

bitflags::bitflags! {
    /// Scenario flags orthogonal to the measured operation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BenchOptions: u8 {
        /// One memory object for all workers instead of one per worker
        const SHARED = 0b0000_0001;
        /// Fixed per-worker virtual addresses instead of OS-chosen ones
        const ISOLATED = 0b0000_0010;
        /// Many page-sized mappings instead of one mapping of the region
        const MAP4K = 0b0000_0100;
        /// Huge page backed objects and mappings
        const MAPHUGE = 0b0000_1000;
    }
}

/// Operation sequence measured in the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Map then unmap
    MapUnmap,
    /// Map only; mappings are never removed
    MapOnly,
    /// Protect read-only then read-write
    Protect,
}

impl Operation {
    /// Name used in scenario strings
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::MapUnmap => "mapunmap",
            Operation::MapOnly => "maponly",
            Operation::Protect => "protect",
        }
    }
}

/// A named scenario: an operation plus its option flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Benchmark {
    /// Measured operation
    pub operation: Operation,
    /// Scenario flags
    pub options: BenchOptions,
}

/// Scenario names from the first release of the tool
const LEGACY_NAMES: &[(&str, &str)] = &[
    ("isolated", "mapunmap-independent-isolated"),
    ("independent", "mapunmap-independent"),
    ("shared-isolated", "mapunmap-shared-isolated"),
    ("shared-independent", "mapunmap-shared"),
    ("concurrent-protect", "protect-shared"),
];

impl Benchmark {
    /// Creates a scenario from its parts
    pub fn new(operation: Operation, options: BenchOptions) -> Self {
        Self { operation, options }
    }

    /// Returns true if all workers share one memory object
    pub fn is_shared(&self) -> bool {
        self.options.contains(BenchOptions::SHARED)
    }

    /// Returns true if workers map at fixed per-worker addresses
    pub fn is_isolated(&self) -> bool {
        self.options.contains(BenchOptions::ISOLATED)
    }

    /// Returns true for page-granularity scenarios
    pub fn is_map4k(&self) -> bool {
        self.options.contains(BenchOptions::MAP4K)
    }

    /// Returns true for huge page scenarios
    pub fn is_huge(&self) -> bool {
        self.options.contains(BenchOptions::MAPHUGE)
    }

    /// Canonical name, e.g. `mapunmap-shared-isolated-4k`
    pub fn scenario_name(&self) -> String {
        let mut name = String::from(self.operation.as_str());
        name.push_str(if self.is_shared() { "-shared" } else { "-independent" });
        if self.is_isolated() {
            name.push_str("-isolated");
        }
        if self.is_map4k() {
            name.push_str("-4k");
        }
        if self.is_huge() {
            name.push_str("-huge");
        }
        name
    }

    /// Human readable summary of the options
    pub fn describe(&self) -> String {
        format!(
            "{}{}, {}, {}{}",
            if self.operation == Operation::MapOnly { "nounmap, " } else { "" },
            if self.is_shared() { "shared" } else { "independent" },
            if self.is_isolated() { "isolated" } else { "default" },
            if self.is_map4k() { "many 4k mappings" } else { "one large mapping" },
            if self.is_huge() { ", huge pages" } else { "" },
        )
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scenario_name())
    }
}

impl Serialize for Benchmark {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.scenario_name())
    }
}

impl FromStr for Benchmark {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = LEGACY_NAMES
            .iter()
            .find(|(legacy, _)| *legacy == s)
            .map_or(s, |(_, canonical)| canonical);

        let mut parts = name.split('-');
        let operation = match parts.next().unwrap_or_default() {
            "mapunmap" => Operation::MapUnmap,
            "maponly" | "nounmap" => Operation::MapOnly,
            "protect" => Operation::Protect,
            other => return Err(Error::InvalidConfig(format!("unknown benchmark '{}'", other))),
        };

        let mut options = BenchOptions::empty();
        let mut independent = false;
        for opt in parts {
            match opt {
                "shared" => options |= BenchOptions::SHARED,
                "independent" => independent = true,
                "isolated" => options |= BenchOptions::ISOLATED,
                "4k" => options |= BenchOptions::MAP4K,
                "huge" => options |= BenchOptions::MAPHUGE,
                other => return Err(Error::InvalidConfig(format!("unknown option '{}'", other))),
            }
        }
        if independent && options.contains(BenchOptions::SHARED) {
            return Err(Error::InvalidConfig(
                "cannot enable options 'shared' and 'independent'".to_string(),
            ));
        }
        if !independent {
            options |= BenchOptions::SHARED;
        }
        Ok(Benchmark { operation, options })
    }
}

/// Latency sampling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsConfig {
    /// Samples kept per worker; 0 disables sampling
    pub slots: usize,
    /// Minimum time between two samples of one worker
    pub rate_ms: u64,
}

impl StatsConfig {
    /// Returns true if sampling is enabled
    pub fn enabled(&self) -> bool {
        self.slots > 0
    }
}

/// Description of one benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchConfig {
    /// Scenario to run
    pub benchmark: Benchmark,
    /// Cores to run workers on, one worker per entry
    pub cores: Vec<CoreId>,
    /// NUMA policy the core list was selected with
    pub numa_policy: NumaPolicy,
    /// Region size in bytes
    pub memsize: Size,
    /// Operations per worker; 0 means unbounded
    pub nops: u64,
    /// Measurement time per worker; 0 means unbounded
    pub duration_ms: u64,
    /// Latency sampling
    pub stats: StatsConfig,
}

/// Number of isolated 512GB slots below the user address-space ceiling
pub const MAX_ISOLATED_WORKERS: usize = layout::USER_ADDR_LIMIT / layout::GB512 - 1;

impl BenchConfig {
    /// Configuration with the defaults of the command-line tool
    pub fn new(benchmark: Benchmark, cores: Vec<CoreId>) -> Self {
        Self {
            benchmark,
            cores,
            numa_policy: NumaPolicy::Fill,
            memsize: page_size::KB4,
            nops: 0,
            duration_ms: 10,
            stats: StatsConfig::default(),
        }
    }

    /// Sets the region size
    pub fn memsize(mut self, memsize: Size) -> Self {
        self.memsize = memsize;
        self
    }

    /// Sets the operation limit
    pub fn nops(mut self, nops: u64) -> Self {
        self.nops = nops;
        self
    }

    /// Sets the time limit
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Enables latency sampling
    pub fn stats(mut self, slots: usize, rate_ms: u64) -> Self {
        self.stats = StatsConfig { slots, rate_ms };
        self
    }

    /// Records the NUMA policy
    pub fn numa_policy(mut self, policy: NumaPolicy) -> Self {
        self.numa_policy = policy;
        self
    }

    /// Number of workers
    pub fn ncores(&self) -> usize {
        self.cores.len()
    }

    /// Size of one mapping in page-granularity scenarios
    pub fn page_unit(&self) -> Size {
        if self.benchmark.is_huge() { page_size::MB2 } else { page_size::KB4 }
    }

    /// Number of page slots covering the region
    pub fn nmaps(&self) -> usize {
        self.memsize / self.page_unit()
    }

    /// Name of the memory object used by the worker on `core`
    pub fn object_name(&self, core: CoreId) -> String {
        if self.benchmark.is_shared() {
            "vmops_bench_shared".to_string()
        } else {
            format!("vmops_bench_independent_{}", core)
        }
    }

    /// Checks the configuration and returns the corrected copy a run uses
    ///
    /// Huge page scenarios get their region size raised to one huge page.
    /// Validating an already validated configuration returns it unchanged.
    pub fn validate(&self) -> Result<BenchConfig> {
        let mut cfg = self.clone();

        if cfg.cores.is_empty() {
            return Err(Error::InvalidConfig("empty core list".to_string()));
        }
        for (i, core) in cfg.cores.iter().enumerate() {
            if cfg.cores[..i].contains(core) {
                return Err(Error::InvalidConfig(format!("core {} listed twice", core)));
            }
        }

        if !cfg.memsize.is_power_of_two() || cfg.memsize < page_size::KB4 {
            return Err(Error::InvalidConfig(format!(
                "memsize {} must be a power of two and at least {}",
                cfg.memsize,
                page_size::KB4
            )));
        }
        if cfg.benchmark.is_huge() && cfg.memsize < page_size::MB2 {
            warn!("raising memsize from {} to the huge page size {}", cfg.memsize, page_size::MB2);
            cfg.memsize = page_size::MB2;
        }

        if cfg.duration_ms == 0 && cfg.nops == 0 {
            return Err(Error::InvalidConfig(
                "either a duration or an operation count must be set".to_string(),
            ));
        }

        if cfg.benchmark.is_isolated() {
            if cfg.memsize > layout::GB512 {
                return Err(Error::InvalidConfig(format!(
                    "memsize {} exceeds the isolated slot size {}",
                    cfg.memsize,
                    layout::GB512
                )));
            }
            if cfg.ncores() > MAX_ISOLATED_WORKERS {
                return Err(Error::InvalidConfig(format!(
                    "isolated scenarios support at most {} cores",
                    MAX_ISOLATED_WORKERS
                )));
            }
        }

        Ok(cfg)
    }
}
