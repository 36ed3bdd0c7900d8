//! The immutable record of a finished run, and the rules that judge it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::AggregateSnapshot;
use crate::scenario::{ScenarioSettings, ThresholdOverrides};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[repr(i32)]
pub enum RunStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl RunStatus {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_i32(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Pending),
            1 => Some(Self::Running),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            4 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Five-bucket rating of how much the system under test degraded.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[repr(i32)]
pub enum ImpactLevel {
    None = 0,
    Minor = 1,
    Moderate = 2,
    Major = 3,
    Critical = 4,
}

impl ImpactLevel {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_i32(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Minor),
            2 => Some(Self::Moderate),
            3 => Some(Self::Major),
            4 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Derive the impact bucket from the observed error rate and how far the
    /// average sits above the expected response time.
    #[must_use]
    pub fn derive(error_rate_percent: f64, average_ms: f64, expected_ms: f64) -> Self {
        if error_rate_percent > 10.0 {
            return Self::Critical;
        }
        if expected_ms <= 0.0 {
            return Self::None;
        }
        if average_ms > 2.0 * expected_ms {
            Self::Major
        } else if average_ms > 1.5 * expected_ms {
            Self::Moderate
        } else if average_ms > expected_ms {
            Self::Minor
        } else {
            Self::None
        }
    }
}

/// The threshold set a run is judged against, fully resolved: unset overrides
/// fall back to the scenario's own expectations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_error_rate_percent: f64,
    pub max_average_ms: f64,
    pub max_p95_ms: f64,
    pub max_p99_ms: f64,
    /// Unset means not enforced.
    pub min_requests_per_second: Option<f64>,
}

impl Thresholds {
    #[must_use]
    pub fn resolve(overrides: &ThresholdOverrides, settings: &ScenarioSettings) -> Self {
        let max_average = overrides
            .max_average_ms
            .unwrap_or(settings.expected_response_time_ms);
        Self {
            max_error_rate_percent: overrides
                .max_error_rate_percent
                .unwrap_or(settings.max_error_rate_percent),
            max_average_ms: max_average,
            max_p95_ms: overrides.max_p95_ms.unwrap_or(1.5 * max_average),
            max_p99_ms: overrides.max_p99_ms.unwrap_or(2.0 * max_average),
            min_requests_per_second: overrides.min_requests_per_second,
        }
    }

    /// Human-readable descriptions of every exceeded threshold. Empty means
    /// the run passed. Maxima fail on `value > threshold`, the rps floor on
    /// `value < threshold`.
    #[must_use]
    pub fn violations(&self, snapshot: &AggregateSnapshot, rps: f64) -> Vec<String> {
        let mut out = Vec::new();

        let error_rate = snapshot.error_rate_percent();
        if error_rate > self.max_error_rate_percent {
            out.push(format!(
                "error rate {error_rate:.2}% exceeds {:.2}%",
                self.max_error_rate_percent
            ));
        }
        if snapshot.average_ms > self.max_average_ms {
            out.push(format!(
                "average {:.1} ms exceeds {:.1} ms",
                snapshot.average_ms, self.max_average_ms
            ));
        }
        if snapshot.p95_ms > self.max_p95_ms {
            out.push(format!(
                "p95 {:.1} ms exceeds {:.1} ms",
                snapshot.p95_ms, self.max_p95_ms
            ));
        }
        if snapshot.p99_ms > self.max_p99_ms {
            out.push(format!(
                "p99 {:.1} ms exceeds {:.1} ms",
                snapshot.p99_ms, self.max_p99_ms
            ));
        }
        if let Some(min_rps) = self.min_requests_per_second
            && rps < min_rps
        {
            out.push(format!("throughput {rps:.1} rps below {min_rps:.1} rps"));
        }

        out
    }
}

/// Immutable summary of one run, created once at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: Uuid,
    pub test_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate_percent: f64,

    pub average_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub requests_per_second: f64,

    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,

    pub status: RunStatus,
    pub impact: ImpactLevel,
    /// Threshold verdict, independent of `status`.
    pub judged_passed: bool,
    pub error_message: Option<String>,
    pub thresholds: Thresholds,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregateSnapshot;

    fn snapshot(total: u64, failed: u64, avg: f64, p95: f64, p99: f64) -> AggregateSnapshot {
        AggregateSnapshot {
            total,
            ok: total - failed,
            fail_request: failed,
            fail_transport: 0,
            average_ms: avg,
            min_ms: 0.0,
            max_ms: p99,
            p50_ms: avg,
            p95_ms: p95,
            p99_ms: p99,
            units: Vec::new(),
            dropped_samples: 0,
        }
    }

    #[test]
    fn impact_buckets_follow_the_ladder() {
        assert_eq!(ImpactLevel::derive(15.0, 10.0, 100.0), ImpactLevel::Critical);
        assert_eq!(ImpactLevel::derive(1.0, 250.0, 100.0), ImpactLevel::Major);
        assert_eq!(ImpactLevel::derive(1.0, 160.0, 100.0), ImpactLevel::Moderate);
        assert_eq!(ImpactLevel::derive(1.0, 110.0, 100.0), ImpactLevel::Minor);
        assert_eq!(ImpactLevel::derive(1.0, 90.0, 100.0), ImpactLevel::None);
    }

    #[test]
    fn thresholds_resolve_from_scenario_defaults() {
        let settings = ScenarioSettings {
            max_error_rate_percent: 2.0,
            expected_response_time_ms: 200.0,
            ..ScenarioSettings::default()
        };
        let t = Thresholds::resolve(&ThresholdOverrides::default(), &settings);

        assert_eq!(t.max_error_rate_percent, 2.0);
        assert_eq!(t.max_average_ms, 200.0);
        assert_eq!(t.max_p95_ms, 300.0);
        assert_eq!(t.max_p99_ms, 400.0);
        assert_eq!(t.min_requests_per_second, None);
    }

    #[test]
    fn overrides_win_over_scenario_defaults() {
        let overrides = ThresholdOverrides {
            max_average_ms: Some(50.0),
            min_requests_per_second: Some(10.0),
            ..ThresholdOverrides::default()
        };
        let t = Thresholds::resolve(&overrides, &ScenarioSettings::default());

        assert_eq!(t.max_average_ms, 50.0);
        assert_eq!(t.max_p95_ms, 75.0);
        assert_eq!(t.min_requests_per_second, Some(10.0));
    }

    #[test]
    fn violations_are_empty_for_a_passing_run() {
        let t = Thresholds::resolve(&ThresholdOverrides::default(), &ScenarioSettings::default());
        let snap = snapshot(100, 0, 50.0, 80.0, 120.0);
        assert!(t.violations(&snap, 50.0).is_empty());
    }

    #[test]
    fn lowering_a_threshold_is_monotone() {
        let settings = ScenarioSettings::default();
        let snap = snapshot(100, 2, 400.0, 600.0, 900.0);

        let loose = Thresholds::resolve(
            &ThresholdOverrides {
                max_average_ms: Some(1_000.0),
                ..ThresholdOverrides::default()
            },
            &settings,
        );
        let tight = Thresholds::resolve(
            &ThresholdOverrides {
                max_average_ms: Some(300.0),
                ..ThresholdOverrides::default()
            },
            &settings,
        );

        let loose_violations = loose.violations(&snap, 50.0).len();
        let tight_violations = tight.violations(&snap, 50.0).len();
        assert!(tight_violations >= loose_violations);
    }

    #[test]
    fn min_rps_fails_only_below_the_floor() {
        let t = Thresholds {
            max_error_rate_percent: 100.0,
            max_average_ms: f64::MAX,
            max_p95_ms: f64::MAX,
            max_p99_ms: f64::MAX,
            min_requests_per_second: Some(40.0),
        };
        let snap = snapshot(100, 0, 10.0, 10.0, 10.0);

        assert!(t.violations(&snap, 39.0).len() == 1);
        assert!(t.violations(&snap, 40.0).is_empty());
    }

    #[test]
    fn run_result_round_trips_through_json() {
        let result = RunResult {
            id: Uuid::new_v4(),
            test_name: "smoke".to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration_seconds: 10.0,
            total_requests: 500,
            successful_requests: 500,
            failed_requests: 0,
            error_rate_percent: 0.0,
            average_response_time_ms: 4.2,
            min_response_time_ms: 1.0,
            max_response_time_ms: 20.0,
            p50_response_time_ms: 4.0,
            p95_response_time_ms: 9.0,
            p99_response_time_ms: 15.0,
            requests_per_second: 50.0,
            cpu_usage_percent: 12.0,
            memory_usage_percent: 40.0,
            status: RunStatus::Completed,
            impact: ImpactLevel::None,
            judged_passed: true,
            error_message: None,
            thresholds: Thresholds {
                max_error_rate_percent: 5.0,
                max_average_ms: 200.0,
                max_p95_ms: 300.0,
                max_p99_ms: 400.0,
                min_requests_per_second: None,
            },
        };

        let text = serde_json::to_string(&result).unwrap_or_else(|e| panic!("{e}"));
        let back: RunResult = serde_json::from_str(&text).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(result, back);
    }
}
