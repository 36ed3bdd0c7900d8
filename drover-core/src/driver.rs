//! The load driver: a fixed pool of cooperative workers issuing scenario
//! steps against the protocol adapters, paced by the load profile.
//!
//! Workers spawn first and block on a barrier so setup stays out of the
//! measured window; a start signal opens the gate and anchors the shared run
//! clock. Every worker observes the cancellation signal between iterations
//! and while a dispatch is in flight.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng as _;
use rand::SeedableRng as _;
use rand::rngs::SmallRng;
use tokio::sync::Barrier;

use crate::aggregator::{Outcome, OutcomeAggregator};
use crate::cancel::{CancelSignal, StartSignal};
use crate::dispatch::{DispatchError, StepDispatch};
use crate::error::{Error, Result};
use crate::rate::{RateSchedule, worker_count};
use crate::scenario::{ExecutionMode, GlobalSettings, Scenario, Step, StepAction, StepKind};

/// How long an in-flight request may keep running after cancellation before
/// it is recorded as a transport failure.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Re-check cadence while the target rate is zero (early ramp-up).
const RATE_RECHECK: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub default_timeout: Duration,
    pub default_retry_count: u32,
    pub grace: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_retry_count: 0,
            grace: CANCEL_GRACE,
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub fn from_global(global: &GlobalSettings) -> Self {
        Self {
            default_timeout: global.default_timeout,
            default_retry_count: global.default_retry_count,
            grace: CANCEL_GRACE,
        }
    }
}

/// One pacing unit: a single step, or a `combinedWithPrevious` chain issued
/// back-to-back with a single observed outcome.
#[derive(Debug, Clone)]
pub struct StepUnit {
    pub name: String,
    /// Indices into `scenario.steps`, in issue order.
    pub steps: Vec<usize>,
    pub weight: u32,
    pub kind: StepKind,
}

/// The scenario's enabled steps folded into pacing units, plus the type
/// buckets Grouped mode sequences through.
#[derive(Debug, Clone)]
pub struct UnitPlan {
    pub units: Vec<StepUnit>,
    pub buckets: Vec<(StepKind, Vec<usize>)>,
}

impl UnitPlan {
    #[must_use]
    pub fn build(scenario: &Scenario) -> Self {
        let mut units: Vec<StepUnit> = Vec::new();
        for (idx, step) in scenario.steps.iter().enumerate() {
            if !step.enabled {
                continue;
            }
            if step.combined_with_previous
                && let Some(last) = units.last_mut()
            {
                last.name = format!("{}+{}", last.name, step.name);
                last.steps.push(idx);
                // The trailing step decides the unit's weight and bucket.
                last.weight = step.weight;
                last.kind = step.action.kind();
                continue;
            }
            units.push(StepUnit {
                name: step.name.clone(),
                steps: vec![idx],
                weight: step.weight,
                kind: step.action.kind(),
            });
        }

        let mut buckets: Vec<(StepKind, Vec<usize>)> = Vec::new();
        for (unit_idx, unit) in units.iter().enumerate() {
            match buckets.iter_mut().find(|(kind, _)| *kind == unit.kind) {
                Some((_, members)) => members.push(unit_idx),
                None => buckets.push((unit.kind, vec![unit_idx])),
            }
        }

        Self { units, buckets }
    }

    #[must_use]
    pub fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriverReport {
    pub workers: u64,
    pub started_at: Instant,
    pub ended_at: Instant,
}

struct Shared {
    scenario: Arc<Scenario>,
    plan: UnitPlan,
    dispatch: Arc<dyn StepDispatch>,
    aggregator: Arc<OutcomeAggregator>,
    cancel: CancelSignal,
    schedule: RateSchedule,
    cfg: DriverConfig,
    workers: u64,
    run_duration: Duration,
    started: OnceLock<Instant>,
    ready: Barrier,
    start: StartSignal,
    warned_not_supported: AtomicBool,
}

/// Run the scenario until the deadline elapses or cancellation fires, then
/// drain the workers. Returns only after every worker has stopped.
pub async fn run_load(
    scenario: Arc<Scenario>,
    plan: UnitPlan,
    dispatch: Arc<dyn StepDispatch>,
    aggregator: Arc<OutcomeAggregator>,
    cancel: CancelSignal,
    cfg: DriverConfig,
    run_duration: Duration,
) -> Result<DriverReport> {
    if plan.units.is_empty() {
        return Err(Error::EngineFatal("unit plan is empty".to_string()));
    }
    if plan.units.len() != aggregator.unit_count() {
        return Err(Error::EngineFatal(format!(
            "aggregator registered {} units, plan has {}",
            aggregator.unit_count(),
            plan.units.len()
        )));
    }

    let workers = worker_count(&scenario);
    let shared = Arc::new(Shared {
        schedule: RateSchedule::for_scenario(&scenario),
        scenario,
        plan,
        dispatch,
        aggregator,
        cancel,
        cfg,
        workers,
        run_duration,
        started: OnceLock::new(),
        ready: Barrier::new(workers as usize + 1),
        start: StartSignal::new(),
        warned_not_supported: AtomicBool::new(false),
    });

    let mut handles = Vec::with_capacity(workers as usize);
    for worker_idx in 0..workers {
        let shared = shared.clone();
        handles.push(tokio::spawn(worker_loop(shared, worker_idx)));
    }

    shared.ready.wait().await;
    let started = Instant::now();
    let _ = shared.started.set(started);
    shared.start.start();

    for handle in handles {
        handle.await??;
    }

    Ok(DriverReport {
        workers,
        started_at: started,
        ended_at: Instant::now(),
    })
}

async fn worker_loop(shared: Arc<Shared>, worker_idx: u64) -> Result<()> {
    shared.ready.wait().await;
    shared.start.wait().await;

    let started = shared.started.get().copied().unwrap_or_else(Instant::now);
    let deadline = started + shared.run_duration;

    let mut selector = Selector::new(&shared, worker_idx);
    let mut rng = SmallRng::from_os_rng();
    let mut last_issue: Option<Instant> = None;

    loop {
        if shared.cancel.is_cancelled() || Instant::now() >= deadline {
            break;
        }

        let elapsed = Instant::now().saturating_duration_since(started);
        match shared.schedule.rate_at(elapsed) {
            // Unpaced (Stress): issue immediately.
            None => {}
            Some(rate) if rate <= 1e-9 => {
                // Early ramp-up: nothing due yet.
                if !sleep_with_cancel(&shared.cancel, RATE_RECHECK).await {
                    break;
                }
                continue;
            }
            Some(rate) => {
                // The due time is re-derived from the previous issue with the
                // CURRENT rate on every pass, so a ramping schedule shortens
                // (or stretches) the wait while we are asleep. Sleeping in
                // bounded slices keeps the re-evaluation going.
                let per_worker = (shared.workers as f64 / rate).min(3_600.0);
                let interval = Duration::from_secs_f64(per_worker);
                let due = match last_issue {
                    Some(at) => at + interval,
                    None => started,
                };

                let now = Instant::now();
                if due > now {
                    let wake = due.min(now + RATE_RECHECK).min(deadline);
                    if !sleep_until_with_cancel(&shared.cancel, wake).await {
                        break;
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                    if Instant::now() < due {
                        continue;
                    }
                }

                // Advance along the schedule; cap the backlog at one interval
                // so a slow stretch doesn't turn into a burst.
                let now = Instant::now();
                let floor = now.checked_sub(interval).unwrap_or(now);
                last_issue = Some(due.max(floor));
            }
        }

        let elapsed = Instant::now().saturating_duration_since(started);
        let unit_idx = selector.next(elapsed, &mut rng);
        let (latency, outcome) = issue_unit(&shared, unit_idx, deadline).await;
        shared.aggregator.observe(unit_idx, latency, outcome);

        if !shared.schedule.is_paced() {
            // Suspension point so cancellation is observable under full load.
            tokio::task::yield_now().await;
        }
    }

    Ok(())
}

/// Issue every step of the unit back-to-back. The first failure ends the unit
/// and the whole unit records a single failed outcome.
async fn issue_unit(shared: &Shared, unit_idx: usize, deadline: Instant) -> (Duration, Outcome) {
    let unit = &shared.plan.units[unit_idx];
    let begin = Instant::now();
    let mut outcome = Outcome::Ok;

    for &step_idx in &unit.steps {
        let step = &shared.scenario.steps[step_idx];
        if let Err(err) = dispatch_step(shared, step, deadline).await {
            if matches!(err, DispatchError::NotSupported)
                && !shared.warned_not_supported.swap(true, Ordering::Relaxed)
            {
                tracing::warn!(step = %step.name, "step type has no adapter; counting as request failure");
            }
            outcome = err.outcome();
            break;
        }
    }

    (begin.elapsed(), outcome)
}

async fn dispatch_step(shared: &Shared, step: &Step, deadline: Instant) -> std::result::Result<(), DispatchError> {
    let retries = if step.retry_count > 0 {
        step.retry_count
    } else {
        shared.cfg.default_retry_count
    };

    let mut attempt = 0u32;
    loop {
        // Adapter timeouts never extend past the run deadline (plus the
        // cancellation grace the in-flight rule already allows).
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .saturating_add(shared.cfg.grace);
        let configured = configured_timeout(&step.action).unwrap_or(shared.cfg.default_timeout);
        let timeout = configured.min(remaining);

        let res = tokio::select! {
            res = shared.dispatch.dispatch(&step.action, Some(timeout)) => res,
            _ = shared.cancel.cancelled_then(shared.cfg.grace) => {
                Err(DispatchError::Transport("cancelled before completion".to_string()))
            }
        };

        match res {
            Err(err) if err.is_transport() && attempt < retries && !shared.cancel.is_cancelled() => {
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn configured_timeout(action: &StepAction) -> Option<Duration> {
    match action {
        StepAction::HttpApi(c) => c.timeout,
        StepAction::SqlProcedure(c) => c.timeout,
        StepAction::SqlQuery(c) => c.timeout,
        StepAction::DatabaseConnection(c) => c.timeout,
        StepAction::Wait(_) | StepAction::CustomScript(_) | StepAction::FileOperation(_) => None,
    }
}

async fn sleep_with_cancel(cancel: &CancelSignal, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

async fn sleep_until_with_cancel(cancel: &CancelSignal, at: Instant) -> bool {
    tokio::select! {
        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Per-worker step choice for one execution mode.
enum Selector {
    Pinned {
        unit: usize,
    },
    Sequential {
        cursor: usize,
        len: usize,
    },
    Weighted {
        cumulative: Vec<u64>,
        total: u64,
    },
    /// Buckets take equal slices of the run window, in order; within the
    /// active bucket this worker is pinned.
    Grouped {
        pinned: Vec<usize>,
        window: Duration,
    },
}

impl Selector {
    fn new(shared: &Shared, worker_idx: u64) -> Self {
        let units = &shared.plan.units;
        match shared.scenario.execution_mode {
            ExecutionMode::Parallel => Self::Pinned {
                unit: (worker_idx as usize) % units.len(),
            },
            ExecutionMode::Sequential => Self::Sequential {
                cursor: 0,
                len: units.len(),
            },
            ExecutionMode::Weighted => {
                let mut cumulative = Vec::with_capacity(units.len());
                let mut total = 0u64;
                for unit in units {
                    total += u64::from(unit.weight.max(1));
                    cumulative.push(total);
                }
                Self::Weighted { cumulative, total }
            }
            ExecutionMode::Grouped => {
                let buckets = &shared.plan.buckets;
                let pinned = buckets
                    .iter()
                    .map(|(_, members)| members[(worker_idx as usize) % members.len()])
                    .collect();
                let window = shared.run_duration / buckets.len().max(1) as u32;
                Self::Grouped { pinned, window }
            }
        }
    }

    fn next(&mut self, elapsed: Duration, rng: &mut SmallRng) -> usize {
        match self {
            Self::Pinned { unit } => *unit,
            Self::Sequential { cursor, len } => {
                let unit = *cursor;
                *cursor = (*cursor + 1) % *len;
                unit
            }
            Self::Weighted { cumulative, total } => {
                let draw = rng.random_range(0..*total);
                cumulative
                    .iter()
                    .position(|&edge| draw < edge)
                    .unwrap_or(cumulative.len() - 1)
            }
            Self::Grouped { pinned, window } => {
                let bucket = if window.is_zero() {
                    0
                } else {
                    ((elapsed.as_nanos() / window.as_nanos()) as usize).min(pinned.len() - 1)
                };
                pinned[bucket]
            }
        }
    }
}
