//! Run orchestration: sampler around driver, result assembly, judgment.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use drover_sysmon::ResourceSampler;

use crate::aggregator::{AggregateSnapshot, OutcomeAggregator};
use crate::cancel::CancelSignal;
use crate::dispatch::{LiveDispatch, StepDispatch};
use crate::driver::{DriverConfig, UnitPlan, run_load};
use crate::error::{Error, Result};
use crate::loader::ScenarioSet;
use crate::result::{ImpactLevel, RunResult, RunStatus, Thresholds};
use crate::scenario::Scenario;

/// Downstream hook invoked with every finished result (history persistence).
/// A failing observer is surfaced on the outcome; it never corrupts the run.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn run_completed(&self, result: &RunResult) -> std::result::Result<(), String>;
}

/// Everything a caller may want from one run: the persisted summary plus the
/// per-unit detail that only exists until the aggregator is dropped.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    pub snapshot: AggregateSnapshot,
    pub usage: drover_sysmon::HostUsage,
    pub persistence_error: Option<String>,
}

pub struct Orchestrator {
    set: ScenarioSet,
    dispatch: Arc<dyn StepDispatch>,
    sampler: ResourceSampler,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(set: ScenarioSet) -> Self {
        Self {
            set,
            dispatch: Arc::new(LiveDispatch::new()),
            sampler: ResourceSampler::default(),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Arc<dyn StepDispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn scenarios(&self) -> &ScenarioSet {
        &self.set
    }

    pub async fn execute_by_name(&self, name: &str, cancel: CancelSignal) -> Result<RunOutcome> {
        let scenario = self
            .set
            .get(name)
            .ok_or_else(|| Error::ConfigurationNotFound(name.to_string()))?
            .clone();
        self.execute(&scenario, cancel).await
    }

    pub async fn execute(&self, scenario: &Scenario, cancel: CancelSignal) -> Result<RunOutcome> {
        let run_duration = scenario
            .load_profile
            .duration()
            .max(scenario.settings.duration);

        tracing::info!(
            scenario = %scenario.name,
            mode = %scenario.execution_mode,
            profile = %scenario.load_profile.kind(),
            duration_secs = run_duration.as_secs(),
            "starting run"
        );

        let sampler_handle = self.sampler.start();
        let started_at = Utc::now();

        let plan = UnitPlan::build(scenario);
        let aggregator = Arc::new(OutcomeAggregator::new(plan.unit_names()));
        let scenario_arc = Arc::new(scenario.clone());

        let driver_res = run_load(
            scenario_arc,
            plan,
            self.dispatch.clone(),
            aggregator.clone(),
            cancel.clone(),
            DriverConfig::from_global(self.set.global()),
            run_duration,
        )
        .await;

        let usage = sampler_handle.stop().await;
        let ended_at = Utc::now();
        let snapshot = aggregator.snapshot();

        // Engine failure and pre-deadline cancellation trump the threshold
        // verdict; a clean finish starts out Completed.
        let (mut status, mut error_message) = match &driver_res {
            Err(err) => (RunStatus::Failed, Some(err.to_string())),
            Ok(report) => {
                let cancelled_early = cancel
                    .cancelled_at()
                    .is_some_and(|at| at < report.started_at + run_duration);
                if cancelled_early {
                    (RunStatus::Cancelled, None)
                } else {
                    (RunStatus::Completed, None)
                }
            }
        };

        let duration_seconds = match &driver_res {
            Ok(report) => report
                .ended_at
                .duration_since(report.started_at)
                .as_secs_f64(),
            Err(_) => (ended_at - started_at).as_seconds_f64().max(0.0),
        };
        let requests_per_second = if duration_seconds > 0.0 {
            snapshot.total as f64 / duration_seconds
        } else {
            0.0
        };

        let thresholds = Thresholds::resolve(
            &self.set.global().thresholds,
            &scenario.settings,
        );
        let violations = thresholds.violations(&snapshot, requests_per_second);
        let judged_passed = violations.is_empty();
        if status == RunStatus::Completed && !judged_passed {
            status = RunStatus::Failed;
            error_message = Some(violations.join("; "));
        }

        let impact = ImpactLevel::derive(
            snapshot.error_rate_percent(),
            snapshot.average_ms,
            scenario.settings.expected_response_time_ms,
        );

        let result = RunResult {
            id: Uuid::new_v4(),
            test_name: scenario.name.clone(),
            started_at,
            ended_at,
            duration_seconds,
            total_requests: snapshot.total,
            successful_requests: snapshot.ok,
            failed_requests: snapshot.failed(),
            error_rate_percent: snapshot.error_rate_percent(),
            average_response_time_ms: snapshot.average_ms,
            min_response_time_ms: snapshot.min_ms,
            max_response_time_ms: snapshot.max_ms,
            p50_response_time_ms: snapshot.p50_ms,
            p95_response_time_ms: snapshot.p95_ms,
            p99_response_time_ms: snapshot.p99_ms,
            requests_per_second,
            cpu_usage_percent: usage.cpu_avg_percent,
            memory_usage_percent: usage.memory_avg_percent,
            status,
            impact,
            judged_passed,
            error_message,
            thresholds,
        };

        let persistence_error = match &self.observer {
            Some(observer) => match observer.run_completed(&result).await {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(%err, "failed to persist run result");
                    Some(err)
                }
            },
            None => None,
        };

        tracing::info!(
            scenario = %scenario.name,
            status = %result.status,
            total = result.total_requests,
            error_rate = result.error_rate_percent,
            rps = result.requests_per_second,
            "run finished"
        );

        Ok(RunOutcome {
            result,
            snapshot,
            usage,
            persistence_error,
        })
    }
}
