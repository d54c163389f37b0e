//! Command-line arguments

use core::str::FromStr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use vmops_api::error::invalid_config;
use vmops_api::{CoreId, NumaPolicy, Size};
use vmops_bench::{BenchConfig, Benchmark};
use vmops_platform::parse_cpulist;

/// Explicit core list such as `1,2,4-7`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreList(pub Vec<CoreId>);

impl FromStr for CoreList {
    type Err = vmops_api::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cores = parse_cpulist(s)?;
        if cores.is_empty() {
            return Err(invalid_config("empty core list"));
        }
        Ok(CoreList(cores))
    }
}

/// VM backend selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// memfd objects and real mmap/munmap/mprotect calls (Linux)
    Memfd,
    /// In-process simulated address space
    Sim,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse().map_err(|_| format!("unknown log level '{}'", s))
}

/// Virtual memory operations benchmark
#[derive(Parser, Debug)]
#[command(name = "vmops", version, about = "Virtual memory operations benchmark")]
pub struct Args {
    /// Scenario, e.g. mapunmap-independent-isolated-4k or protect-shared-huge
    #[arg(short = 'b', long, env = "VMOPS_BENCHMARK", default_value = "mapunmap-independent")]
    pub benchmark: Benchmark,

    /// Cores to run on, e.g. 1,2,4-7
    #[arg(short = 'c', long, env = "VMOPS_CORES", conflicts_with = "ncores")]
    pub cores: Option<CoreList>,

    /// Number of cores taken from the topology (default 1)
    #[arg(short = 'p', long, env = "VMOPS_NCORES")]
    pub ncores: Option<usize>,

    /// Interleave cores across NUMA nodes instead of filling nodes
    #[arg(short = 'i', long, env = "VMOPS_INTERLEAVE")]
    pub interleave: bool,

    /// Region size in bytes
    #[arg(short = 'm', long, env = "VMOPS_MEMSIZE", default_value_t = 4096)]
    pub memsize: Size,

    /// Measurement time per worker in ms (0 = bounded by --nops)
    #[arg(short = 't', long = "time", env = "VMOPS_TIME", default_value_t = 10)]
    pub time_ms: u64,

    /// Operations per worker (0 = bounded by --time)
    #[arg(short = 'n', long, env = "VMOPS_NOPS", default_value_t = 0)]
    pub nops: u64,

    /// Latency samples kept per worker (0 disables sampling)
    #[arg(short = 's', long, env = "VMOPS_STATS", default_value_t = 0)]
    pub stats: usize,

    /// Minimum time between two latency samples in ms
    #[arg(short = 'r', long, env = "VMOPS_RATE", default_value_t = 1)]
    pub rate_ms: u64,

    /// VM backend
    #[arg(long, env = "VMOPS_BACKEND", value_enum, default_value_t = BackendKind::Memfd)]
    pub backend: BackendKind,

    /// Print the per-worker CSV block
    #[arg(long, env = "VMOPS_CSV")]
    pub csv: bool,

    /// Write the full outcome as JSON to this file
    #[arg(long, env = "VMOPS_JSON")]
    pub json: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Log level when neither -v nor -q is given
    #[arg(long = "log-level", value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,
}

impl Args {
    /// Log level requested on the command line, if any
    pub fn level(&self) -> Option<LevelFilter> {
        if self.quiet {
            return Some(LevelFilter::Warn);
        }
        match self.verbose {
            0 => self.log_level,
            1 => Some(LevelFilter::Debug),
            _ => Some(LevelFilter::Trace),
        }
    }

    /// NUMA policy for topology-selected cores
    pub fn numa_policy(&self) -> NumaPolicy {
        if self.interleave { NumaPolicy::Interleave } else { NumaPolicy::Fill }
    }

    /// Run configuration on the resolved cores
    pub fn bench_config(&self, cores: Vec<CoreId>) -> BenchConfig {
        BenchConfig::new(self.benchmark, cores)
            .numa_policy(self.numa_policy())
            .memsize(self.memsize)
            .duration_ms(self.time_ms)
            .nops(self.nops)
            .stats(self.stats, self.rate_ms)
    }
}
