//! Result rendering: a human summary, machine-readable CI lines, and JSON.

use drover_core::{RunOutcome, RunStatus};
use drover_history::DeviationReport;
use serde_json::json;

use crate::cli::OutputFormat;

pub fn emit(format: OutputFormat, outcome: &RunOutcome, deviation: Option<&DeviationReport>) {
    match format {
        OutputFormat::Human => human(outcome, deviation),
        OutputFormat::Ci => ci(outcome, deviation),
        OutputFormat::Json => json_line(outcome, deviation),
    }
}

fn passed(outcome: &RunOutcome) -> bool {
    outcome.result.judged_passed && outcome.result.status == RunStatus::Completed
}

fn human(outcome: &RunOutcome, deviation: Option<&DeviationReport>) {
    let r = &outcome.result;

    println!(
        "scenario {}: {} ({} impact, {:.1}s)",
        r.test_name, r.status, r.impact, r.duration_seconds
    );
    println!(
        "  requests   {} total, {} ok, {} failed ({:.2}% errors)",
        r.total_requests, r.successful_requests, r.failed_requests, r.error_rate_percent
    );
    println!(
        "  latency    avg {:.1} ms  min {:.1}  max {:.1}  p50 {:.1}  p95 {:.1}  p99 {:.1}",
        r.average_response_time_ms,
        r.min_response_time_ms,
        r.max_response_time_ms,
        r.p50_response_time_ms,
        r.p95_response_time_ms,
        r.p99_response_time_ms
    );
    println!(
        "  throughput {:.1} req/s   host cpu {:.1}%  mem {:.1}%",
        r.requests_per_second, r.cpu_usage_percent, r.memory_usage_percent
    );

    if outcome.snapshot.units.len() > 1 {
        for unit in &outcome.snapshot.units {
            println!(
                "  step {}  {} requests, {} failed, avg {:.1} ms",
                unit.name,
                unit.total,
                unit.failed(),
                unit.average_ms
            );
        }
    }

    if let Some(message) = &r.error_message {
        println!("  failed: {message}");
    }
    if let Some(err) = &outcome.persistence_error {
        println!("  warning: history not persisted ({err})");
    }

    if let Some(dev) = deviation {
        println!(
            "  baseline   avg {:.1} ms -> {:+.1}% latency, {:+.1}% errors, {:+.1}% throughput",
            dev.baseline_average_ms,
            dev.latency_deviation_percent,
            dev.error_rate_deviation_percent,
            dev.throughput_deviation_percent
        );
        println!(
            "  regression score {:.1} (signed {:+.1}), trend {}, confidence {}% over {} runs",
            dev.overall_score,
            dev.signed_score,
            dev.trend,
            dev.confidence_percent,
            dev.sample_size
        );
        for recommendation in &dev.recommendations {
            println!("  - {recommendation}");
        }
    }
}

/// One tagged outcome line plus `key=value` statistic lines per scenario.
fn ci(outcome: &RunOutcome, deviation: Option<&DeviationReport>) {
    let r = &outcome.result;
    let name = &r.test_name;
    let verdict = if passed(outcome) { "SUCCESS" } else { "FAILURE" };

    println!("[drover] {name}: {verdict}");
    println!("[drover] {name}: TotalRequests={}", r.total_requests);
    println!("[drover] {name}: SuccessfulRequests={}", r.successful_requests);
    println!("[drover] {name}: FailedRequests={}", r.failed_requests);
    println!("[drover] {name}: ErrorRatePercent={:.2}", r.error_rate_percent);
    println!(
        "[drover] {name}: AverageResponseTimeMs={:.2}",
        r.average_response_time_ms
    );
    println!("[drover] {name}: P95ResponseTimeMs={:.2}", r.p95_response_time_ms);
    println!("[drover] {name}: P99ResponseTimeMs={:.2}", r.p99_response_time_ms);
    println!("[drover] {name}: RequestsPerSecond={:.2}", r.requests_per_second);
    println!("[drover] {name}: CpuUsagePercent={:.2}", r.cpu_usage_percent);
    println!("[drover] {name}: MemoryUsagePercent={:.2}", r.memory_usage_percent);
    println!("[drover] {name}: PerformanceImpact={}", r.impact);

    if let Some(dev) = deviation {
        println!("[drover] {name}: DeviationScore={:.2}", dev.overall_score);
        println!("[drover] {name}: Trend={}", dev.trend);
    }
}

fn json_line(outcome: &RunOutcome, deviation: Option<&DeviationReport>) {
    let line = json!({
        "kind": "result",
        "result": &outcome.result,
        "steps": &outcome.snapshot.units,
        "persistenceError": &outcome.persistence_error,
        "deviation": deviation,
    });
    println!("{line}");
}
