use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_core::{ImpactLevel, RunResult, RunStatus};

/// Projection of a [`RunResult`] sufficient for baseline computation. Mirrors
/// the persisted history schema one-to-one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub test_name: String,
    pub execution_date: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub error_rate_percent: f64,
    pub average_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub requests_per_second: f64,
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub impact: ImpactLevel,
    pub status: RunStatus,
    pub test_configuration_id: Option<Uuid>,
    pub test_result_id: Option<Uuid>,
}

impl From<&RunResult> for HistoryRecord {
    fn from(result: &RunResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_name: result.test_name.clone(),
            execution_date: result.ended_at,
            duration_seconds: result.duration_seconds,
            total_requests: result.total_requests as i64,
            successful_requests: result.successful_requests as i64,
            failed_requests: result.failed_requests as i64,
            error_rate_percent: result.error_rate_percent,
            average_response_time_ms: result.average_response_time_ms,
            min_response_time_ms: result.min_response_time_ms,
            max_response_time_ms: result.max_response_time_ms,
            p95_response_time_ms: result.p95_response_time_ms,
            p99_response_time_ms: result.p99_response_time_ms,
            requests_per_second: result.requests_per_second,
            cpu_usage_percent: result.cpu_usage_percent,
            memory_usage_percent: result.memory_usage_percent,
            impact: result.impact,
            status: result.status,
            test_configuration_id: None,
            test_result_id: Some(result.id),
        }
    }
}

/// Fold recent Completed records into a synthetic baseline: arithmetic means
/// for the numeric fields, the modal value for impact. The caller guarantees
/// `records` is non-empty.
#[must_use]
pub fn synthesize_baseline(test_name: &str, records: &[HistoryRecord]) -> HistoryRecord {
    let n = records.len().max(1) as f64;
    let sum = |f: fn(&HistoryRecord) -> f64| records.iter().map(f).sum::<f64>() / n;
    let sum_i = |f: fn(&HistoryRecord) -> i64| {
        (records.iter().map(f).sum::<i64>() as f64 / n).round() as i64
    };

    let mut impact_counts: HashMap<ImpactLevel, usize> = HashMap::new();
    for r in records {
        *impact_counts.entry(r.impact).or_insert(0) += 1;
    }
    let impact = impact_counts
        .into_iter()
        .max_by_key(|&(level, count)| (count, std::cmp::Reverse(level.as_i32())))
        .map(|(level, _)| level)
        .unwrap_or(ImpactLevel::None);

    let execution_date = records
        .iter()
        .map(|r| r.execution_date)
        .max()
        .unwrap_or_else(Utc::now);

    HistoryRecord {
        id: Uuid::new_v4(),
        test_name: test_name.to_string(),
        execution_date,
        duration_seconds: sum(|r| r.duration_seconds),
        total_requests: sum_i(|r| r.total_requests),
        successful_requests: sum_i(|r| r.successful_requests),
        failed_requests: sum_i(|r| r.failed_requests),
        error_rate_percent: sum(|r| r.error_rate_percent),
        average_response_time_ms: sum(|r| r.average_response_time_ms),
        min_response_time_ms: sum(|r| r.min_response_time_ms),
        max_response_time_ms: sum(|r| r.max_response_time_ms),
        p95_response_time_ms: sum(|r| r.p95_response_time_ms),
        p99_response_time_ms: sum(|r| r.p99_response_time_ms),
        requests_per_second: sum(|r| r.requests_per_second),
        cpu_usage_percent: sum(|r| r.cpu_usage_percent),
        memory_usage_percent: sum(|r| r.memory_usage_percent),
        impact,
        status: RunStatus::Completed,
        test_configuration_id: None,
        test_result_id: None,
    }
}
