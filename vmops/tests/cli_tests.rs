//! Command-line tests

use clap::Parser;
use log::LevelFilter;
use vmops::app::{cores_line, resolve_cores, run_benchmark, write_results};
use vmops::{Args, BackendKind};
use vmops_api::{CoreId, CorePolicy, NumaPolicy, Result, TopologyProvider};
use vmops_bench::report::CSV_BEGIN;

fn parse(args: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("vmops").chain(args.iter().copied())).unwrap()
}

/// Fixed topology of two nodes
struct TwoNodes;

impl TopologyProvider for TwoNodes {
    fn cores(&self, numa: NumaPolicy, _cores: CorePolicy) -> Result<Vec<CoreId>> {
        Ok(match numa {
            NumaPolicy::Fill => vec![0, 1, 2, 3],
            NumaPolicy::Interleave => vec![0, 2, 1, 3],
        })
    }
}

#[test]
fn test_defaults() {
    let args = parse(&[]);
    assert_eq!(args.benchmark.scenario_name(), "mapunmap-independent");
    assert_eq!(args.memsize, 4096);
    assert_eq!(args.time_ms, 10);
    assert_eq!(args.nops, 0);
    assert_eq!(args.backend, BackendKind::Memfd);
    assert!(args.cores.is_none());
    assert_eq!(args.level(), None);
}

#[test]
fn test_full_flag_set() {
    let args = parse(&[
        "-b", "protect-shared-4k", "-c", "0,2-3", "-m", "16384", "-t", "0", "-n", "50", "-s", "64", "-r", "2",
        "--backend", "sim", "--csv",
    ]);
    assert_eq!(args.cores.as_ref().unwrap().0, vec![0, 2, 3]);
    let config = args.bench_config(vec![0, 2, 3]);
    assert_eq!(config.benchmark.scenario_name(), "protect-shared-4k");
    assert_eq!(config.memsize, 16384);
    assert_eq!(config.nops, 50);
    assert_eq!(config.duration_ms, 0);
    assert_eq!(config.stats.slots, 64);
    assert_eq!(config.stats.rate_ms, 2);
    assert!(args.csv);
}

#[test]
fn test_rejected_arguments() {
    // A core list and a core count are mutually exclusive
    assert!(Args::try_parse_from(["vmops", "-c", "0,1", "-p", "2"]).is_err());
    assert!(Args::try_parse_from(["vmops", "-b", "remap"]).is_err());
    assert!(Args::try_parse_from(["vmops", "-c", "1-x"]).is_err());
    assert!(Args::try_parse_from(["vmops", "-v", "-q"]).is_err());
    assert!(Args::try_parse_from(["vmops", "--backend", "xen"]).is_err());
}

#[test]
fn test_log_levels() {
    assert_eq!(parse(&["-q"]).level(), Some(LevelFilter::Warn));
    assert_eq!(parse(&["-v"]).level(), Some(LevelFilter::Debug));
    assert_eq!(parse(&["-vv"]).level(), Some(LevelFilter::Trace));
    assert_eq!(parse(&["--log-level", "error"]).level(), Some(LevelFilter::Error));
    assert_eq!(parse(&["-v", "--log-level", "error"]).level(), Some(LevelFilter::Debug));
}

#[test]
fn test_resolve_cores() {
    let topo = TwoNodes;
    assert_eq!(resolve_cores(&parse(&[]), &topo).unwrap(), vec![0]);
    assert_eq!(resolve_cores(&parse(&["-p", "3"]), &topo).unwrap(), vec![0, 1, 2]);
    assert_eq!(resolve_cores(&parse(&["-p", "2", "-i"]), &topo).unwrap(), vec![0, 2]);
    // More than available falls back to all cores
    assert_eq!(resolve_cores(&parse(&["-p", "16"]), &topo).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(resolve_cores(&parse(&["-c", "7,5"]), &topo).unwrap(), vec![7, 5]);
}

#[test]
fn test_cores_line() {
    assert_eq!(cores_line(&[0, 4, 8]), "Using Cores: [ 0, 4, 8 ]");
}

#[test]
fn test_sim_run_output() {
    let args = parse(&["-b", "protect-independent", "-c", "0,1", "-t", "0", "-n", "100", "--backend", "sim", "--csv"]);
    let config = args.bench_config(vec![0, 1]);
    let outcome = run_benchmark(BackendKind::Sim, &config).unwrap();
    assert_eq!(outcome.aggregate.total_ops, 200);

    let mut buf = Vec::new();
    write_results(&args, &outcome, &mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let mut lines = text.lines();
    let summary = lines.next().unwrap();
    assert!(summary.starts_with("+VMOPS RESULT [[ benchmark=protect-independent, memsize=4096,"));
    assert!(summary.contains("ncores=2, ops=200"));
    assert_eq!(lines.next(), Some(CSV_BEGIN));
}

#[test]
fn test_invalid_config_is_an_error() {
    let args = parse(&["-m", "3000", "-c", "0", "--backend", "sim"]);
    let err = run_benchmark(BackendKind::Sim, &args.bench_config(vec![0])).unwrap_err();
    assert!(format!("{err:#}").contains("memsize 3000"));
}

#[test]
fn test_run_writes_json() {
    let path = std::env::temp_dir().join(format!("vmops_cli_test_{}.json", std::process::id()));
    let path_arg = path.to_string_lossy().into_owned();
    let args = parse(&["-b", "mapunmap-shared", "-c", "0", "-t", "0", "-n", "25", "--backend", "sim", "--json", &path_arg]);
    vmops::run(&args).unwrap();

    let json = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["aggregate"]["total_ops"], 25);
    assert_eq!(value["workers"][0]["status"], "completed");
    std::fs::remove_file(&path).unwrap();
}
