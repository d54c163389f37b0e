//! Run driver behind the command line

use std::fs;
use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use vmops_api::{CoreId, CorePolicy, TimeSource, TopologyProvider, VmBackend};
use vmops_bench::{report, BenchConfig, BenchOutcome, Orchestrator};
use vmops_platform::{MonotonicClock, SimBackend, SysfsTopology};

use crate::cli::{Args, BackendKind};

/// Picks the cores to run on: the explicit list, or the first `-p` cores of the topology
pub fn resolve_cores<P: TopologyProvider>(args: &Args, topology: &P) -> Result<Vec<CoreId>> {
    if let Some(list) = &args.cores {
        return Ok(list.0.clone());
    }

    let mut cores = topology
        .cores(args.numa_policy(), CorePolicy::Interleave)
        .context("could not get the core list")?;
    let wanted = args.ncores.unwrap_or(1).max(1);
    if wanted > cores.len() {
        warn!("requested {} cores, but only {} are available", wanted, cores.len());
    } else {
        cores.truncate(wanted);
    }
    if cores.is_empty() {
        bail!("no cores available");
    }
    Ok(cores)
}

/// `Using Cores: [ 0, 1, 2 ]`
pub fn cores_line(cores: &[CoreId]) -> String {
    let list: Vec<String> = cores.iter().map(|c| c.to_string()).collect();
    format!("Using Cores: [ {} ]", list.join(", "))
}

fn execute<B: VmBackend, T: TimeSource>(backend: &B, clock: &T, config: &BenchConfig) -> Result<BenchOutcome> {
    Orchestrator::new(backend, clock)
        .run(config)
        .with_context(|| format!("benchmark '{}' failed", config.benchmark))
}

/// Runs the configured benchmark on the selected backend
pub fn run_benchmark(backend: BackendKind, config: &BenchConfig) -> Result<BenchOutcome> {
    let clock = MonotonicClock::new();
    match backend {
        BackendKind::Sim => execute(&SimBackend::new(), &clock, config),
        #[cfg(target_os = "linux")]
        BackendKind::Memfd => execute(&vmops_platform::MemfdBackend::new(), &clock, config),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Memfd => bail!("the memfd backend requires Linux; use --backend sim"),
    }
}

/// Writes the summary and the enabled result tables
pub fn write_results<W: Write>(args: &Args, outcome: &BenchOutcome, mut out: W) -> Result<()> {
    writeln!(out, "+VMOPS RESULT [[ {} ]]", report::summary_line(outcome))?;
    if args.csv {
        report::write_csv(outcome, &mut out)?;
    }
    report::write_latencies(outcome, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Runs the tool with parsed arguments
pub fn run(args: &Args) -> Result<()> {
    println!("+ VMOPS Benchmark");
    let cores = resolve_cores(args, &SysfsTopology::default())?;
    println!("{}", cores_line(&cores));

    let config = args.bench_config(cores);
    let outcome = run_benchmark(args.backend, &config)?;

    let degraded = outcome.workers.iter().filter(|w| !w.status.is_completed()).count();
    if degraded > 0 {
        warn!("{} of {} workers did not complete; results are partial", degraded, outcome.workers.len());
    }

    write_results(args, &outcome, io::stdout().lock())?;

    if let Some(path) = &args.json {
        let json = report::to_json(&outcome)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote {}", path.display());
    }
    Ok(())
}
