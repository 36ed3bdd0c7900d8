//! Baseline comparison: per-metric deviations, a weighted overall score,
//! trend classification, and the recommendation strings reports surface.

use serde::{Deserialize, Serialize};

use drover_core::RunResult;

use crate::record::HistoryRecord;
use crate::store::HistoryStore;
use crate::Result;

/// Signed percentage difference against a baseline; zero when the baseline
/// itself is zero.
#[must_use]
pub fn deviation(current: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    (current - baseline) / baseline * 100.0
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum TrendDirection {
    Stable,
    Improving,
    Degrading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviationReport {
    pub test_name: String,

    pub baseline_average_ms: f64,
    pub baseline_error_rate_percent: f64,
    pub baseline_requests_per_second: f64,
    pub current_average_ms: f64,
    pub current_error_rate_percent: f64,
    pub current_requests_per_second: f64,

    pub latency_deviation_percent: f64,
    pub error_rate_deviation_percent: f64,
    pub throughput_deviation_percent: f64,
    pub cpu_deviation_percent: f64,
    pub memory_deviation_percent: f64,

    /// Absolute-weighted overall score (the primary variant).
    pub overall_score: f64,
    /// Signed legacy variant, kept for reporting.
    pub signed_score: f64,

    pub trend: TrendDirection,
    pub confidence_percent: u8,
    pub sample_size: usize,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeviationAnalyzer {
    /// Completed records averaged into the baseline.
    pub baseline_samples: usize,
    /// Recent records inspected for the trend split.
    pub trend_window: usize,
}

impl Default for DeviationAnalyzer {
    fn default() -> Self {
        Self {
            baseline_samples: 10,
            trend_window: 10,
        }
    }
}

impl DeviationAnalyzer {
    /// Compare a fresh result against the store's baseline. `None` (not an
    /// error) while the test has too little history.
    pub async fn analyze(
        &self,
        store: &dyn HistoryStore,
        current: &RunResult,
    ) -> Result<Option<DeviationReport>> {
        let Some(baseline) = store
            .baseline(&current.test_name, self.baseline_samples)
            .await?
        else {
            return Ok(None);
        };

        let recent = store.recent(&current.test_name, self.trend_window).await?;
        Ok(Some(build_report(current, &baseline, &recent)))
    }
}

/// Pure comparison, exposed for callers that already hold the records.
/// `recent` is newest-first, as the stores return it.
#[must_use]
pub fn build_report(
    current: &RunResult,
    baseline: &HistoryRecord,
    recent: &[HistoryRecord],
) -> DeviationReport {
    let latency = deviation(
        current.average_response_time_ms,
        baseline.average_response_time_ms,
    );
    let error_rate = deviation(current.error_rate_percent, baseline.error_rate_percent);
    let throughput = deviation(
        current.requests_per_second,
        baseline.requests_per_second,
    );
    let cpu = deviation(current.cpu_usage_percent, baseline.cpu_usage_percent);
    let memory = deviation(current.memory_usage_percent, baseline.memory_usage_percent);

    let overall_score = 0.3 * latency.abs()
        + 0.25 * error_rate.abs()
        + 0.25 * throughput.abs()
        + 0.1 * cpu.abs()
        + 0.1 * memory.abs();
    let signed_score = 0.5 * latency + 0.3 * error_rate + 0.2 * throughput;

    DeviationReport {
        test_name: current.test_name.clone(),
        baseline_average_ms: baseline.average_response_time_ms,
        baseline_error_rate_percent: baseline.error_rate_percent,
        baseline_requests_per_second: baseline.requests_per_second,
        current_average_ms: current.average_response_time_ms,
        current_error_rate_percent: current.error_rate_percent,
        current_requests_per_second: current.requests_per_second,
        latency_deviation_percent: latency,
        error_rate_deviation_percent: error_rate,
        throughput_deviation_percent: throughput,
        cpu_deviation_percent: cpu,
        memory_deviation_percent: memory,
        overall_score,
        signed_score,
        trend: classify_trend(recent),
        confidence_percent: confidence(latency),
        sample_size: recent.len(),
        recommendations: recommend(latency, error_rate, throughput, cpu, memory),
    }
}

/// Split the window into an older and a newer half; both latency and error
/// rate must move by more than 10% of the older half's mean to leave Stable.
fn classify_trend(recent_newest_first: &[HistoryRecord]) -> TrendDirection {
    if recent_newest_first.len() < 3 {
        return TrendDirection::Stable;
    }

    let mut chronological: Vec<&HistoryRecord> = recent_newest_first.iter().collect();
    chronological.reverse();

    let split = chronological.len() / 2;
    let (older, newer) = chronological.split_at(split);

    let mean = |records: &[&HistoryRecord], f: fn(&HistoryRecord) -> f64| {
        records.iter().map(|r| f(r)).sum::<f64>() / records.len().max(1) as f64
    };

    let old_latency = mean(older, |r| r.average_response_time_ms);
    let new_latency = mean(newer, |r| r.average_response_time_ms);
    let old_errors = mean(older, |r| r.error_rate_percent);
    let new_errors = mean(newer, |r| r.error_rate_percent);

    let improved = |old: f64, new: f64| new < old - 0.1 * old.abs();
    let degraded = |old: f64, new: f64| new > old + 0.1 * old.abs();

    if improved(old_latency, new_latency) && improved(old_errors, new_errors) {
        TrendDirection::Improving
    } else if degraded(old_latency, new_latency) && degraded(old_errors, new_errors) {
        TrendDirection::Degrading
    } else {
        TrendDirection::Stable
    }
}

fn confidence(latency_deviation_percent: f64) -> u8 {
    match latency_deviation_percent.abs() {
        dev if dev < 5.0 => 95,
        dev if dev < 10.0 => 85,
        dev if dev < 20.0 => 75,
        dev if dev < 50.0 => 60,
        _ => 50,
    }
}

fn recommend(latency: f64, error_rate: f64, throughput: f64, cpu: f64, memory: f64) -> Vec<String> {
    let mut out = Vec::new();

    if latency > 20.0 {
        out.push(
            "Response time degraded; investigate slow queries, caching, and scaling.".to_string(),
        );
    } else if latency < -20.0 {
        out.push(
            "Response time improved versus baseline; capture what changed.".to_string(),
        );
    }
    if error_rate > 10.0 {
        out.push("Error rate rose; inspect application logs and backend stability.".to_string());
    }
    if throughput < -20.0 {
        out.push("Throughput dropped; consider load balancing or scaling out.".to_string());
    }
    if cpu > 25.0 {
        out.push("CPU usage rose noticeably; profile hot paths.".to_string());
    }
    if memory > 25.0 {
        out.push("Memory usage rose noticeably; check for leaks or cache growth.".to_string());
    }

    if out.is_empty() {
        out.push("Within normal range; continue monitoring.".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HistoryStore, MemoryHistoryStore};
    use chrono::{TimeDelta, Utc};
    use drover_core::{ImpactLevel, RunStatus, Thresholds};
    use uuid::Uuid;

    fn run_result(avg_ms: f64, error_rate: f64, rps: f64) -> RunResult {
        let ended = Utc::now();
        RunResult {
            id: Uuid::new_v4(),
            test_name: "t".to_string(),
            started_at: ended - TimeDelta::seconds(10),
            ended_at: ended,
            duration_seconds: 10.0,
            total_requests: 1_000,
            successful_requests: 990,
            failed_requests: 10,
            error_rate_percent: error_rate,
            average_response_time_ms: avg_ms,
            min_response_time_ms: 1.0,
            max_response_time_ms: avg_ms * 4.0,
            p50_response_time_ms: avg_ms,
            p95_response_time_ms: avg_ms * 1.5,
            p99_response_time_ms: avg_ms * 2.0,
            requests_per_second: rps,
            cpu_usage_percent: 0.0,
            memory_usage_percent: 0.0,
            status: RunStatus::Completed,
            impact: ImpactLevel::None,
            judged_passed: true,
            error_message: None,
            thresholds: Thresholds {
                max_error_rate_percent: 5.0,
                max_average_ms: 1_000.0,
                max_p95_ms: 1_500.0,
                max_p99_ms: 2_000.0,
                min_requests_per_second: None,
            },
        }
    }

    fn record(avg_ms: f64, error_rate: f64, minutes_ago: i64) -> HistoryRecord {
        let mut r = HistoryRecord::from(&run_result(avg_ms, error_rate, 50.0));
        r.execution_date = Utc::now() - TimeDelta::minutes(minutes_ago);
        r
    }

    #[test]
    fn deviation_formula_handles_zero_baseline() {
        assert_eq!(deviation(150.0, 100.0), 50.0);
        assert_eq!(deviation(50.0, 100.0), -50.0);
        assert_eq!(deviation(42.0, 0.0), 0.0);
    }

    #[tokio::test]
    async fn fifty_percent_latency_regression_scores_fifteen() {
        let store = MemoryHistoryStore::new();
        for _ in 0..10 {
            store
                .append(&run_result(100.0, 1.0, 50.0))
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }

        let current = run_result(150.0, 1.0, 50.0);
        let report = DeviationAnalyzer::default()
            .analyze(&store, &current)
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("expected a report"));

        assert_eq!(report.baseline_average_ms, 100.0);
        assert_eq!(report.latency_deviation_percent, 50.0);
        assert_eq!(report.error_rate_deviation_percent, 0.0);
        assert_eq!(report.throughput_deviation_percent, 0.0);
        // 0.3*50 + 0.25*0 + 0.25*0 + 0.1*0 + 0.1*0
        assert_eq!(report.overall_score, 15.0);
        assert_eq!(report.signed_score, 25.0);
        assert_eq!(report.confidence_percent, 50);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("Response time degraded")));
    }

    #[tokio::test]
    async fn analyzer_is_absent_without_enough_history() {
        let store = MemoryHistoryStore::new();
        store
            .append(&run_result(100.0, 1.0, 50.0))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let report = DeviationAnalyzer::default()
            .analyze(&store, &run_result(100.0, 1.0, 50.0))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(report.is_none());
    }

    #[test]
    fn confidence_steps_down_with_deviation() {
        assert_eq!(confidence(0.0), 95);
        assert_eq!(confidence(-7.0), 85);
        assert_eq!(confidence(15.0), 75);
        assert_eq!(confidence(-35.0), 60);
        assert_eq!(confidence(50.0), 50);
        assert_eq!(confidence(220.0), 50);
    }

    #[test]
    fn trend_requires_both_metrics_to_move() {
        // Latency halves but the error rate holds: still Stable.
        let latency_only = vec![
            record(50.0, 1.0, 10),
            record(50.0, 1.0, 20),
            record(100.0, 1.0, 30),
            record(100.0, 1.0, 40),
        ];
        assert_eq!(classify_trend(&latency_only), TrendDirection::Stable);

        let both_improve = vec![
            record(50.0, 0.2, 10),
            record(50.0, 0.2, 20),
            record(100.0, 2.0, 30),
            record(100.0, 2.0, 40),
        ];
        assert_eq!(classify_trend(&both_improve), TrendDirection::Improving);

        let both_degrade = vec![
            record(200.0, 5.0, 10),
            record(200.0, 5.0, 20),
            record(100.0, 1.0, 30),
            record(100.0, 1.0, 40),
        ];
        assert_eq!(classify_trend(&both_degrade), TrendDirection::Degrading);

        assert_eq!(classify_trend(&[record(1.0, 1.0, 1)]), TrendDirection::Stable);
    }

    #[test]
    fn quiet_report_recommends_monitoring_only() {
        let baseline = record(100.0, 1.0, 60);
        let report = build_report(&run_result(101.0, 1.0, 50.0), &baseline, &[]);
        assert_eq!(report.trend, TrendDirection::Stable);
        assert_eq!(
            report.recommendations,
            vec!["Within normal range; continue monitoring.".to_string()]
        );
    }
}
