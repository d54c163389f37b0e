//! Result aggregation and output formats

use std::io::Write;

use serde::Serialize;
use vmops_api::{Error, Result, Ticks};

use crate::orchestrator::BenchOutcome;
use crate::worker::WorkerReport;

/// Banner opening the CSV block
pub const CSV_BEGIN: &str = "===================== BEGIN CSV =====================";
/// Banner closing the CSV block
pub const CSV_END: &str = "====================== END CSV ======================";
/// Banner opening the latency table
pub const STATS_BEGIN: &str = "==================== BEGIN STATS ====================";
/// Banner closing the latency table
pub const STATS_END: &str = "===================== END STATS =====================";

/// Totals over all workers of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateResult {
    /// Number of workers
    pub workers: usize,
    /// Sum of the per-worker operation counts
    pub total_ops: u64,
    /// Sum of the per-worker measured times
    pub total_duration_ms: f64,
    /// Mean per-worker measured time
    pub avg_duration_ms: f64,
    /// Operations per second of worker time
    pub throughput: f64,
}

impl AggregateResult {
    /// Aggregates the worker reports
    pub fn from_reports(reports: &[WorkerReport]) -> Self {
        let workers = reports.len();
        let total_ops: u64 = reports.iter().map(|r| r.ops).sum();
        let total_duration_ms: f64 = reports.iter().map(|r| r.duration_ms).sum();
        let avg_duration_ms = if workers == 0 { 0.0 } else { total_duration_ms / workers as f64 };
        let throughput = if total_duration_ms > 0.0 {
            total_ops as f64 * 1000.0 / total_duration_ms
        } else {
            0.0
        };
        Self { workers, total_ops, total_duration_ms, avg_duration_ms, throughput }
    }
}

/// One row of the CSV block
#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    thread_id: usize,
    scenario: &'a str,
    core: usize,
    ncores: usize,
    memsize: usize,
    topology: &'static str,
    granularity: &'static str,
    pagesize: &'static str,
    sharing: &'static str,
    placement: &'static str,
    duration: String,
    operations: u64,
}

/// One row of the latency table
#[derive(Debug, Serialize)]
struct LatencyRecord {
    sample_index: usize,
    thread_id: usize,
    elapsed: Ticks,
    operation: u64,
    latency: Ticks,
}

fn csv_error(err: csv::Error) -> Error {
    Error::Io(err.to_string())
}

/// The one-line result summary
pub fn summary_line(outcome: &BenchOutcome) -> String {
    let agg = &outcome.aggregate;
    format!(
        "benchmark={}, memsize={}, time={:.3}, ncores={}, ops={}, throughput={:.3}",
        outcome.config.benchmark,
        outcome.config.memsize,
        agg.total_duration_ms,
        outcome.config.ncores(),
        agg.total_ops,
        agg.throughput
    )
}

/// Writes the per-worker CSV block, framed by its banners
pub fn write_csv<W: Write>(outcome: &BenchOutcome, mut out: W) -> Result<()> {
    let config = &outcome.config;
    let b = &config.benchmark;
    let scenario = b.scenario_name();

    writeln!(out, "{}", CSV_BEGIN)?;
    {
        let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(&mut out);
        for worker in &outcome.workers {
            writer
                .serialize(CsvRecord {
                    thread_id: worker.thread_id,
                    scenario: &scenario,
                    core: worker.core,
                    ncores: config.ncores(),
                    memsize: config.memsize,
                    topology: config.numa_policy.as_str(),
                    granularity: if b.is_map4k() { "4k" } else { "bulk" },
                    pagesize: if b.is_huge() { "huge" } else { "base" },
                    sharing: if b.is_shared() { "shared" } else { "independent" },
                    placement: if b.is_isolated() { "isolated" } else { "default" },
                    duration: format!("{:.3}", worker.duration_ms),
                    operations: worker.ops,
                })
                .map_err(csv_error)?;
        }
        writer.flush()?;
    }
    writeln!(out, "{}", CSV_END)?;
    Ok(())
}

/// Writes the merged latency samples; nothing when sampling was disabled
pub fn write_latencies<W: Write>(outcome: &BenchOutcome, mut out: W) -> Result<()> {
    if !outcome.config.stats.enabled() {
        return Ok(());
    }
    writeln!(out, "{}", STATS_BEGIN)?;
    {
        let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(&mut out);
        for (i, sample) in outcome.samples.iter().enumerate() {
            writer
                .serialize(LatencyRecord {
                    sample_index: i,
                    thread_id: sample.thread_id,
                    elapsed: sample.elapsed,
                    operation: sample.op_seq,
                    latency: sample.latency,
                })
                .map_err(csv_error)?;
        }
        writer.flush()?;
    }
    writeln!(out, "{}", STATS_END)?;
    Ok(())
}

/// Serializes the whole outcome as pretty-printed JSON
pub fn to_json(outcome: &BenchOutcome) -> Result<String> {
    serde_json::to_string_pretty(outcome).map_err(|e| Error::Io(e.to_string()))
}
