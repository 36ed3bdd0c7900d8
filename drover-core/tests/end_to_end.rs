//! End-to-end runs against a local HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};

use drover_core::{
    CancelSignal, ExecutionMode, ImpactLevel, Orchestrator, OutcomeAggregator, RunStatus,
    ScenarioSet, UnitPlan, run_load,
};

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<AtomicU64>,
}

async fn spawn_server() -> SocketAddr {
    let state = ServerState::default();

    let app = Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route(
            "/flaky",
            get(|State(state): State<ServerState>| async move {
                // Deterministic 20% failure rate.
                let hit = state.hits.fetch_add(1, Ordering::Relaxed);
                if hit % 5 == 0 {
                    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                } else {
                    (StatusCode::OK, "ok")
                }
            }),
        )
        .route("/auth", post(|| async { "token" }))
        .route("/profile", get(|| async { "profile" }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let addr = listener.local_addr().unwrap_or_else(|e| panic!("{e}"));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn parse_set(text: &str) -> ScenarioSet {
    ScenarioSet::parse(text).unwrap_or_else(|e| panic!("{e}"))
}

#[tokio::test]
async fn constant_rate_smoke_completes_cleanly() {
    let addr = spawn_server().await;
    let set = parse_set(&format!(
        r#"{{ "testScenarios": [{{
            "name": "smoke",
            "loadSimulation": {{ "type": "ConstantRate", "rate": 50, "durationSeconds": 4,
                                 "rampUpSeconds": 1, "maxConcurrentUsers": 10 }},
            "steps": [
                {{ "name": "ok", "type": "HttpApi",
                   "configuration": {{ "method": "GET", "url": "http://{addr}/ok" }} }}
            ]
        }}] }}"#
    ));

    let orchestrator = Orchestrator::new(set);
    let outcome = orchestrator
        .execute_by_name("smoke", CancelSignal::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let r = &outcome.result;
    // Integral of the paced rate: ~25 during the 1 s ramp, then 50/s for 3 s.
    assert!(
        (100..=250).contains(&r.total_requests),
        "unexpected request volume: {}",
        r.total_requests
    );
    assert_eq!(r.error_rate_percent, 0.0);
    assert_eq!(r.status, RunStatus::Completed);
    assert_eq!(r.impact, ImpactLevel::None);
    assert!(r.judged_passed);
    assert_eq!(
        r.successful_requests + r.failed_requests,
        r.total_requests
    );
    assert!(r.average_response_time_ms > 0.0);
}

#[tokio::test]
async fn failing_backend_breaches_the_error_threshold() {
    let addr = spawn_server().await;
    let set = parse_set(&format!(
        r#"{{ "testScenarios": [{{
            "name": "flaky",
            "loadSimulation": {{ "type": "ConstantRate", "rate": 50, "durationSeconds": 3,
                                 "maxConcurrentUsers": 10 }},
            "steps": [
                {{ "name": "flaky", "type": "HttpApi",
                   "configuration": {{ "method": "GET", "url": "http://{addr}/flaky" }} }}
            ],
            "settings": {{ "maxErrorRatePercent": 5 }}
        }}] }}"#
    ));

    let orchestrator = Orchestrator::new(set);
    let outcome = orchestrator
        .execute_by_name("flaky", CancelSignal::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let r = &outcome.result;
    assert!(
        (15.0..=25.0).contains(&r.error_rate_percent),
        "error rate {}",
        r.error_rate_percent
    );
    assert_eq!(r.status, RunStatus::Failed);
    assert!(!r.judged_passed);
    assert_eq!(r.impact, ImpactLevel::Critical);
}

#[tokio::test]
async fn sequential_composition_visits_steps_evenly() {
    let addr = spawn_server().await;
    let workers = 4i64;
    let set = parse_set(&format!(
        r#"{{ "testScenarios": [{{
            "name": "seq",
            "executionMode": "Sequential",
            "loadSimulation": {{ "type": "ConstantRate", "rate": 20, "durationSeconds": 3,
                                 "maxConcurrentUsers": {workers} }},
            "steps": [
                {{ "name": "auth", "type": "HttpApi",
                   "configuration": {{ "method": "POST", "url": "http://{addr}/auth" }} }},
                {{ "name": "profile", "type": "HttpApi",
                   "configuration": {{ "method": "GET", "url": "http://{addr}/profile" }} }}
            ]
        }}] }}"#
    ));

    let orchestrator = Orchestrator::new(set);
    let outcome = orchestrator
        .execute_by_name("seq", CancelSignal::new())
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(outcome.result.error_rate_percent, 0.0);
    let auth = outcome.snapshot.units[0].total as i64;
    let profile = outcome.snapshot.units[1].total as i64;
    assert!(auth > 5, "too few observations: {auth}");
    assert!(
        (auth - profile).abs() <= workers,
        "uneven split: auth={auth} profile={profile}"
    );
}

#[tokio::test]
async fn weighted_distribution_approaches_weight_shares() {
    // Unpaced and without I/O so ten thousand draws take milliseconds.
    let set = parse_set(
        r#"{ "testScenarios": [{
            "name": "weighted",
            "executionMode": "Weighted",
            "loadSimulation": { "type": "Stress", "durationSeconds": 30,
                                "parameters": { "maxConcurrency": 4 } },
            "steps": [
                { "name": "a", "type": "Wait", "weight": 3, "configuration": { "durationMs": 0 } },
                { "name": "b", "type": "Wait", "weight": 1, "configuration": { "durationMs": 0 } }
            ]
        }] }"#,
    );
    let scenario = Arc::new(
        set.get("weighted")
            .unwrap_or_else(|| panic!("missing scenario"))
            .clone(),
    );

    let plan = UnitPlan::build(&scenario);
    let aggregator = Arc::new(OutcomeAggregator::new(plan.unit_names()));
    let cancel = CancelSignal::new();

    // Stop by cancellation once enough observations accumulated.
    let watcher = {
        let aggregator = aggregator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                if aggregator.total() >= 10_000 {
                    cancel.cancel();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    run_load(
        scenario,
        plan,
        Arc::new(drover_core::LiveDispatch::new()),
        aggregator.clone(),
        cancel,
        drover_core::DriverConfig::default(),
        Duration::from_secs(30),
    )
    .await
    .unwrap_or_else(|e| panic!("{e}"));
    watcher.await.unwrap_or_else(|e| panic!("{e}"));

    let snapshot = aggregator.snapshot();
    assert!(snapshot.total >= 10_000, "total {}", snapshot.total);
    let share_a = snapshot.units[0].total as f64 / snapshot.total as f64;
    let share_b = snapshot.units[1].total as f64 / snapshot.total as f64;
    assert!((0.70..=0.80).contains(&share_a), "a-share {share_a}");
    assert!((0.20..=0.30).contains(&share_b), "b-share {share_b}");
}

#[tokio::test]
async fn cancellation_stops_the_run_within_grace() {
    let addr = spawn_server().await;
    let set = parse_set(&format!(
        r#"{{ "testScenarios": [{{
            "name": "long",
            "loadSimulation": {{ "type": "ConstantRate", "rate": 50, "durationSeconds": 60,
                                 "maxConcurrentUsers": 10 }},
            "steps": [
                {{ "name": "ok", "type": "HttpApi",
                   "configuration": {{ "method": "GET", "url": "http://{addr}/ok" }} }}
            ]
        }}] }}"#
    ));

    let orchestrator = Orchestrator::new(set);
    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }

    let begin = Instant::now();
    let outcome = orchestrator
        .execute_by_name("long", cancel)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert!(
        begin.elapsed() < Duration::from_secs(1) + drover_core::CANCEL_GRACE + Duration::from_secs(2),
        "run did not drain promptly: {:?}",
        begin.elapsed()
    );
    let r = &outcome.result;
    assert_eq!(r.status, RunStatus::Cancelled);
    assert!(r.total_requests > 0);
    // Cancellation must never masquerade as a protocol failure.
    assert_eq!(outcome.snapshot.fail_request, 0);
}

#[tokio::test]
async fn execution_mode_is_reflected_in_the_loaded_scenario() {
    let set = parse_set(
        r#"{ "testScenarios": [{
            "name": "grouped",
            "executionMode": "grouped",
            "steps": [
                { "name": "w", "type": "Wait", "configuration": { "durationMs": 1 } },
                { "name": "s", "type": "Script", "enabled": false,
                  "configuration": { "script": "noop" } }
            ]
        }] }"#,
    );
    let s = set.get("grouped").unwrap_or_else(|| panic!("missing"));
    assert_eq!(s.execution_mode, ExecutionMode::Grouped);
    assert_eq!(s.enabled_steps().count(), 1);
}
