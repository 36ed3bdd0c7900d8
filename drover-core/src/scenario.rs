use std::time::Duration;

/// How a scenario's steps are spread across the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum ExecutionMode {
    /// Workers are pinned to steps; all steps progress at once.
    #[strum(to_string = "Parallel", serialize = "Concurrent")]
    Parallel,

    /// Each worker walks the step list in order, wrapping at the end.
    #[strum(to_string = "Sequential", serialize = "Serial")]
    Sequential,

    /// Steps bucketed by type; buckets run one after another.
    Grouped,

    /// Steps drawn per iteration with probability proportional to weight.
    Weighted,
}

/// Step kind as written in scenario documents. Parsing is tolerant of the
/// synonyms older documents use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum StepKind {
    #[strum(to_string = "HttpApi", serialize = "Http", serialize = "Api")]
    HttpApi,

    #[strum(to_string = "SqlProcedure", serialize = "StoredProcedure", serialize = "Procedure")]
    SqlProcedure,

    #[strum(to_string = "SqlQuery", serialize = "Query")]
    SqlQuery,

    #[strum(to_string = "Wait", serialize = "Delay", serialize = "Sleep")]
    Wait,

    #[strum(
        to_string = "DatabaseConnection",
        serialize = "DbConnection",
        serialize = "Connection"
    )]
    DatabaseConnection,

    #[strum(to_string = "CustomScript", serialize = "Script")]
    CustomScript,

    #[strum(to_string = "FileOperation", serialize = "File")]
    FileOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum ProfileKind {
    #[strum(to_string = "ConstantRate", serialize = "Constant")]
    ConstantRate,

    #[strum(to_string = "RampUp", serialize = "Ramp")]
    RampUp,

    Spike,
    Stress,
    Soak,
}

/// Request arrival shape over the run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProfile {
    ConstantRate {
        rate: f64,
        duration: Duration,
    },
    RampUp {
        start_rate: f64,
        end_rate: f64,
        duration: Duration,
    },
    Spike {
        base_rate: f64,
        spike_rate: f64,
        /// Defaults to `duration / 2` when absent.
        spike_start: Option<Duration>,
        spike_duration: Duration,
        duration: Duration,
    },
    /// No pacing; workers issue as fast as the adapters permit.
    Stress {
        max_concurrency: u64,
        duration: Duration,
    },
    /// Same pacing as ConstantRate; kept distinct for history tagging.
    Soak {
        rate: f64,
        duration: Duration,
    },
}

impl LoadProfile {
    #[must_use]
    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::ConstantRate { .. } => ProfileKind::ConstantRate,
            Self::RampUp { .. } => ProfileKind::RampUp,
            Self::Spike { .. } => ProfileKind::Spike,
            Self::Stress { .. } => ProfileKind::Stress,
            Self::Soak { .. } => ProfileKind::Soak,
        }
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Self::ConstantRate { duration, .. }
            | Self::RampUp { duration, .. }
            | Self::Spike { duration, .. }
            | Self::Stress { duration, .. }
            | Self::Soak { duration, .. } => *duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpStepConfig {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlProcedureConfig {
    pub connection_string: String,
    pub procedure: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlQueryConfig {
    pub connection_string: String,
    pub query: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitConfig {
    pub duration: Duration,
    /// Uniform jitter applied around `duration` per issue.
    pub variation: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConnectionConfig {
    pub connection_string: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomScriptConfig {
    pub script: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileOperationConfig {
    pub path: String,
    pub operation: String,
}

/// Typed projection of a step's free-form `configuration` map. The raw map is
/// not kept past load.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    HttpApi(HttpStepConfig),
    SqlProcedure(SqlProcedureConfig),
    SqlQuery(SqlQueryConfig),
    Wait(WaitConfig),
    DatabaseConnection(DatabaseConnectionConfig),
    CustomScript(CustomScriptConfig),
    FileOperation(FileOperationConfig),
}

impl StepAction {
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::HttpApi(_) => StepKind::HttpApi,
            Self::SqlProcedure(_) => StepKind::SqlProcedure,
            Self::SqlQuery(_) => StepKind::SqlQuery,
            Self::Wait(_) => StepKind::Wait,
            Self::DatabaseConnection(_) => StepKind::DatabaseConnection,
            Self::CustomScript(_) => StepKind::CustomScript,
            Self::FileOperation(_) => StepKind::FileOperation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    pub weight: u32,
    pub enabled: bool,
    /// This step and its predecessor are issued back-to-back as one pacing
    /// unit with a single observed outcome.
    pub combined_with_previous: bool,
    /// Transport-failure retries within the same pacing unit.
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioSettings {
    pub duration: Duration,
    pub ramp_up: Duration,
    pub concurrent_users: u64,
    pub max_error_rate_percent: f64,
    pub expected_response_time_ms: f64,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(60),
            ramp_up: Duration::ZERO,
            concurrent_users: 10,
            max_error_rate_percent: 5.0,
            expected_response_time_ms: 1_000.0,
        }
    }
}

/// A validated, immutable workload description.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub execution_mode: ExecutionMode,
    pub load_profile: LoadProfile,
    pub steps: Vec<Step>,
    pub settings: ScenarioSettings,
}

impl Scenario {
    pub fn enabled_steps(&self) -> impl Iterator<Item = (usize, &Step)> {
        self.steps.iter().enumerate().filter(|(_, s)| s.enabled)
    }
}

/// Document-level defaults shared by every scenario in a file.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSettings {
    pub default_timeout: Duration,
    pub default_retry_count: u32,
    pub thresholds: ThresholdOverrides,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_retry_count: 0,
            thresholds: ThresholdOverrides::default(),
        }
    }
}

/// Optional document-level threshold values; unset fields fall back to the
/// scenario defaults when a run is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThresholdOverrides {
    pub max_error_rate_percent: Option<f64>,
    pub max_average_ms: Option<f64>,
    pub max_p95_ms: Option<f64>,
    pub max_p99_ms: Option<f64>,
    pub min_requests_per_second: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_mode_parses_synonyms_case_insensitively() {
        assert_eq!("parallel".parse(), Ok(ExecutionMode::Parallel));
        assert_eq!("SERIAL".parse(), Ok(ExecutionMode::Sequential));
        assert_eq!("weighted".parse(), Ok(ExecutionMode::Weighted));
        assert!("roundrobin".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn step_kind_parses_synonyms() {
        assert_eq!("http".parse(), Ok(StepKind::HttpApi));
        assert_eq!("Api".parse(), Ok(StepKind::HttpApi));
        assert_eq!("storedprocedure".parse(), Ok(StepKind::SqlProcedure));
        assert_eq!("delay".parse(), Ok(StepKind::Wait));
        assert_eq!("dbconnection".parse(), Ok(StepKind::DatabaseConnection));
    }

    #[test]
    fn profile_kind_parses_synonyms() {
        assert_eq!("constant".parse(), Ok(ProfileKind::ConstantRate));
        assert_eq!("ramp".parse(), Ok(ProfileKind::RampUp));
        assert_eq!("SOAK".parse(), Ok(ProfileKind::Soak));
    }

    #[test]
    fn profile_duration_is_uniform_across_variants() {
        let p = LoadProfile::Spike {
            base_rate: 10.0,
            spike_rate: 50.0,
            spike_start: None,
            spike_duration: Duration::from_secs(5),
            duration: Duration::from_secs(30),
        };
        assert_eq!(p.duration(), Duration::from_secs(30));
        assert_eq!(p.kind(), ProfileKind::Spike);
    }
}
