//! Scenario-driven load generation: model + loader, the worker-pool driver,
//! latency/outcome aggregation, and run orchestration.

mod aggregator;
mod cancel;
mod dispatch;
mod driver;
mod error;
mod loader;
mod orchestrator;
mod rate;
mod result;
mod scenario;

pub use aggregator::{
    AggregateSnapshot, Outcome, OutcomeAggregator, RESERVOIR_CAPACITY, UnitSnapshot, percentile,
};
pub use cancel::{CancelSignal, StartSignal};
pub use dispatch::{DispatchError, LiveDispatch, StepDispatch};
pub use driver::{CANCEL_GRACE, DriverConfig, DriverReport, StepUnit, UnitPlan, run_load};
pub use error::{Error, Result};
pub use loader::ScenarioSet;
pub use orchestrator::{Orchestrator, RunObserver, RunOutcome};
pub use rate::{RateSchedule, worker_count};
pub use result::{ImpactLevel, RunResult, RunStatus, Thresholds};
pub use scenario::{
    CustomScriptConfig, DatabaseConnectionConfig, ExecutionMode, FileOperationConfig,
    GlobalSettings, HttpStepConfig, LoadProfile, ProfileKind, Scenario, ScenarioSettings,
    SqlProcedureConfig, SqlQueryConfig, Step, StepAction, StepKind, ThresholdOverrides, WaitConfig,
};
pub use drover_sysmon::{HostSample, HostUsage, ResourceSampler, SamplerHandle};
