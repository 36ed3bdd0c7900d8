//! Scenario document loader.
//!
//! The wire format is JSON with case-insensitive keys, so parsing walks
//! `serde_json::Value` instead of deriving the document shape. Unknown keys
//! are ignored with a warning; enum values accept the synonyms older
//! documents use. All structural validation happens here: a loaded
//! [`Scenario`] never fails validation at run time.

use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::scenario::{
    CustomScriptConfig, DatabaseConnectionConfig, ExecutionMode, FileOperationConfig,
    GlobalSettings, HttpStepConfig, LoadProfile, ProfileKind, Scenario, ScenarioSettings,
    SqlProcedureConfig, SqlQueryConfig, Step, StepAction, StepKind, ThresholdOverrides, WaitConfig,
};

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// A parsed, validated scenario document: the loader handle the orchestrator
/// resolves names through.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSet {
    scenarios: Vec<Scenario>,
    global: GlobalSettings,
}

impl ScenarioSet {
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(text)?;
        let root = doc
            .as_object()
            .ok_or_else(|| Error::invalid_spec("document", "top level must be an object"))?;
        warn_unknown_keys(root, &["testScenarios", "globalSettings"], "document");

        let global = match field(root, "globalSettings").and_then(Value::as_object) {
            Some(obj) => parse_global_settings(obj),
            None => GlobalSettings::default(),
        };

        let raw_scenarios = field(root, "testScenarios")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::invalid_spec("document", "missing `testScenarios` array"))?;

        let mut scenarios: Vec<Scenario> = Vec::with_capacity(raw_scenarios.len());
        for (idx, raw) in raw_scenarios.iter().enumerate() {
            let scenario = parse_scenario(raw, idx)?;
            if let Some(pos) = scenarios.iter().position(|s| s.name == scenario.name) {
                tracing::warn!(name = %scenario.name, "duplicate scenario name; last definition wins");
                scenarios[pos] = scenario;
            } else {
                scenarios.push(scenario);
            }
        }

        Ok(Self { scenarios, global })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    #[must_use]
    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.iter().map(|s| s.name.as_str())
    }

    /// Canonical (camelCase) document form; `parse(to_document().to_string())`
    /// reproduces this set.
    #[must_use]
    pub fn to_document(&self) -> Value {
        json!({
            "testScenarios": self.scenarios.iter().map(scenario_to_value).collect::<Vec<_>>(),
            "globalSettings": global_to_value(&self.global),
        })
    }
}

fn parse_scenario(raw: &Value, idx: usize) -> Result<Scenario> {
    let fallback_scope = format!("testScenarios[{idx}]");
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::invalid_spec(&fallback_scope, "scenario must be an object"))?;

    let name = str_field(obj, "name")
        .ok_or_else(|| Error::invalid_spec(&fallback_scope, "missing `name`"))?;
    let scope = format!("scenario `{name}`");

    warn_unknown_keys(
        obj,
        &[
            "name",
            "description",
            "executionMode",
            "loadSimulation",
            "steps",
            "settings",
        ],
        &scope,
    );

    let description = str_field(obj, "description");

    let execution_mode = match str_field(obj, "executionMode") {
        Some(raw_mode) => raw_mode
            .parse::<ExecutionMode>()
            .map_err(|_| Error::invalid_spec(&scope, format!("unknown executionMode `{raw_mode}`")))?,
        None => ExecutionMode::Parallel,
    };

    let mut settings = match field(obj, "settings").and_then(Value::as_object) {
        Some(s) => parse_settings(s, &scope),
        None => ScenarioSettings::default(),
    };

    let load_profile = parse_load_profile(
        field(obj, "loadSimulation").and_then(Value::as_object),
        &mut settings,
        &scope,
    )?;

    let raw_steps = field(obj, "steps")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::invalid_spec(&scope, "missing `steps` array"))?;
    if raw_steps.is_empty() {
        return Err(Error::invalid_spec(&scope, "`steps` must not be empty"));
    }

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (step_idx, raw_step) in raw_steps.iter().enumerate() {
        if let Some(step) = parse_step(raw_step, step_idx, &scope)? {
            steps.push(step);
        }
    }

    if !steps.iter().any(|s| s.enabled) {
        return Err(Error::invalid_spec(&scope, "no enabled steps"));
    }
    if let Some(first) = steps.first_mut()
        && first.combined_with_previous
    {
        tracing::warn!(scenario = %name, "first step cannot combine with a previous step; flag ignored");
        first.combined_with_previous = false;
    }
    if execution_mode == ExecutionMode::Weighted {
        let total: u64 = steps
            .iter()
            .filter(|s| s.enabled)
            .map(|s| u64::from(s.weight))
            .sum();
        if total == 0 {
            return Err(Error::invalid_spec(&scope, "weighted mode needs a positive weight sum"));
        }
    }

    Ok(Scenario {
        name,
        description,
        execution_mode,
        load_profile,
        steps,
        settings,
    })
}

fn parse_settings(obj: &Map<String, Value>, scope: &str) -> ScenarioSettings {
    warn_unknown_keys(
        obj,
        &[
            "durationSeconds",
            "rampUpSeconds",
            "concurrentUsers",
            "maxErrorRatePercent",
            "expectedResponseTimeMs",
        ],
        &format!("{scope}.settings"),
    );

    let defaults = ScenarioSettings::default();
    ScenarioSettings {
        duration: secs_field(obj, "durationSeconds").unwrap_or(defaults.duration),
        ramp_up: secs_field(obj, "rampUpSeconds").unwrap_or(defaults.ramp_up),
        concurrent_users: u64_field(obj, "concurrentUsers").unwrap_or(defaults.concurrent_users),
        max_error_rate_percent: f64_field(obj, "maxErrorRatePercent")
            .unwrap_or(defaults.max_error_rate_percent),
        expected_response_time_ms: f64_field(obj, "expectedResponseTimeMs")
            .unwrap_or(defaults.expected_response_time_ms),
    }
}

fn parse_load_profile(
    obj: Option<&Map<String, Value>>,
    settings: &mut ScenarioSettings,
    scope: &str,
) -> Result<LoadProfile> {
    let Some(obj) = obj else {
        // No simulation block: a constant trickle over the scenario duration.
        return Ok(LoadProfile::ConstantRate {
            rate: settings.concurrent_users as f64,
            duration: settings.duration,
        });
    };

    let scope = format!("{scope}.loadSimulation");
    warn_unknown_keys(
        obj,
        &[
            "type",
            "rate",
            "durationSeconds",
            "rampUpSeconds",
            "maxConcurrentUsers",
            "parameters",
        ],
        &scope,
    );

    // loadSimulation-level ramp-up and user cap take precedence over `settings`.
    if let Some(ramp) = secs_field(obj, "rampUpSeconds") {
        settings.ramp_up = ramp;
    }
    if let Some(users) = u64_field(obj, "maxConcurrentUsers") {
        settings.concurrent_users = users;
    }

    let kind = match str_field(obj, "type") {
        Some(raw_kind) => raw_kind
            .parse::<ProfileKind>()
            .map_err(|_| Error::invalid_spec(&scope, format!("unknown load profile `{raw_kind}`")))?,
        None => ProfileKind::ConstantRate,
    };

    let duration = secs_field(obj, "durationSeconds").unwrap_or(settings.duration);
    if duration.is_zero() {
        return Err(Error::invalid_spec(&scope, "`durationSeconds` must be positive"));
    }

    let rate = f64_field(obj, "rate").unwrap_or(settings.concurrent_users as f64);
    let params = field(obj, "parameters").and_then(Value::as_object);
    let param_f64 = |key: &str| params.and_then(|p| f64_field(p, key));
    let param_secs = |key: &str| params.and_then(|p| secs_field(p, key));

    let check_rate = |value: f64, key: &str| -> Result<f64> {
        if value < 0.0 || !value.is_finite() {
            return Err(Error::invalid_spec(&scope, format!("`{key}` must be >= 0")));
        }
        Ok(value)
    };

    let profile = match kind {
        ProfileKind::ConstantRate => LoadProfile::ConstantRate {
            rate: check_rate(rate, "rate")?,
            duration,
        },
        ProfileKind::Soak => LoadProfile::Soak {
            rate: check_rate(rate, "rate")?,
            duration,
        },
        ProfileKind::RampUp => {
            let start_rate = param_f64("startRps").or_else(|| param_f64("startRate")).unwrap_or(0.0);
            let end_rate = param_f64("endRps")
                .or_else(|| param_f64("endRate"))
                .or_else(|| param_f64("targetRps"))
                .unwrap_or(rate);
            LoadProfile::RampUp {
                start_rate: check_rate(start_rate, "startRps")?,
                end_rate: check_rate(end_rate, "endRps")?,
                duration,
            }
        }
        ProfileKind::Spike => {
            let base_rate = param_f64("baseRps").or_else(|| param_f64("baseRate")).unwrap_or(rate);
            let spike_rate = param_f64("spikeRps")
                .or_else(|| param_f64("spikeRate"))
                .unwrap_or(base_rate * 5.0);
            let spike_duration =
                param_secs("spikeDurationSeconds").unwrap_or_else(|| duration / 10);
            let spike_start = param_secs("spikeStartSeconds");

            if spike_duration > duration {
                return Err(Error::invalid_spec(
                    &scope,
                    "`spikeDurationSeconds` must not exceed `durationSeconds`",
                ));
            }
            LoadProfile::Spike {
                base_rate: check_rate(base_rate, "baseRps")?,
                spike_rate: check_rate(spike_rate, "spikeRps")?,
                spike_start,
                spike_duration,
                duration,
            }
        }
        ProfileKind::Stress => {
            let max_concurrency = params
                .and_then(|p| u64_field(p, "maxConcurrency"))
                .unwrap_or(settings.concurrent_users)
                .max(1);
            LoadProfile::Stress {
                max_concurrency,
                duration,
            }
        }
    };

    Ok(profile)
}

fn parse_step(raw: &Value, idx: usize, scenario_scope: &str) -> Result<Option<Step>> {
    let scope = format!("{scenario_scope}.steps[{idx}]");
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::invalid_spec(&scope, "step must be an object"))?;

    warn_unknown_keys(
        obj,
        &[
            "name",
            "type",
            "configuration",
            "weight",
            "enabled",
            "combinedWithPrevious",
            "retryCount",
        ],
        &scope,
    );

    let name =
        str_field(obj, "name").ok_or_else(|| Error::invalid_spec(&scope, "missing `name`"))?;
    let raw_kind =
        str_field(obj, "type").ok_or_else(|| Error::invalid_spec(&scope, "missing `type`"))?;
    let kind = raw_kind
        .parse::<StepKind>()
        .map_err(|_| Error::invalid_spec(&scope, format!("unknown step type `{raw_kind}`")))?;

    let enabled = bool_field(obj, "enabled").unwrap_or(true);
    let weight = u64_field(obj, "weight").unwrap_or(1);
    if weight == 0 {
        return Err(Error::invalid_spec(&scope, "`weight` must be >= 1"));
    }

    let empty = Map::new();
    let config = field(obj, "configuration")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let action = match project_step_config(kind, config, &scope) {
        Ok(action) => action,
        Err(err) if !enabled => {
            // Disabled steps may carry stale configuration; they never run.
            tracing::warn!(step = %name, %err, "dropping disabled step with invalid configuration");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    Ok(Some(Step {
        name,
        action,
        weight: u32::try_from(weight).unwrap_or(u32::MAX),
        enabled,
        combined_with_previous: bool_field(obj, "combinedWithPrevious").unwrap_or(false),
        retry_count: u64_field(obj, "retryCount").map(|v| v.min(10) as u32).unwrap_or(0),
    }))
}

fn project_step_config(
    kind: StepKind,
    config: &Map<String, Value>,
    scope: &str,
) -> Result<StepAction> {
    let timeout = ms_field(config, "timeoutMs");
    let conn = || {
        str_field(config, "connectionString")
            .ok_or_else(|| Error::invalid_spec(scope, "missing `connectionString`"))
    };

    let action = match kind {
        StepKind::HttpApi => {
            let raw_method = str_field(config, "method")
                .ok_or_else(|| Error::invalid_spec(scope, "missing `method`"))?
                .to_ascii_uppercase();
            if !ALLOWED_METHODS.contains(&raw_method.as_str()) {
                return Err(Error::invalid_spec(
                    scope,
                    format!("unsupported http method `{raw_method}`"),
                ));
            }
            let method: http::Method = raw_method
                .parse()
                .map_err(|_| Error::invalid_spec(scope, format!("invalid http method `{raw_method}`")))?;

            let raw_url = str_field(config, "url")
                .or_else(|| str_field(config, "endpoint"))
                .ok_or_else(|| Error::invalid_spec(scope, "missing `url`"))?;
            let parsed = url::Url::parse(&raw_url)
                .map_err(|_| Error::invalid_spec(scope, format!("`url` is not absolute: {raw_url}")))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(Error::invalid_spec(
                    scope,
                    format!("`url` must be http(s): {raw_url}"),
                ));
            }

            let headers = field(config, "headers")
                .and_then(Value::as_object)
                .map(|h| {
                    h.iter()
                        .filter_map(|(k, v)| Some((k.clone(), scalar_to_string(v)?)))
                        .collect()
                })
                .unwrap_or_default();

            StepAction::HttpApi(HttpStepConfig {
                method,
                url: raw_url,
                headers,
                body: str_field(config, "body"),
                timeout,
            })
        }
        StepKind::SqlProcedure => {
            let procedure = str_field(config, "procedure")
                .or_else(|| str_field(config, "procedureName"))
                .ok_or_else(|| Error::invalid_spec(scope, "missing `procedure`"))?;
            let args = field(config, "parameters")
                .and_then(Value::as_array)
                .map(|vals| vals.iter().filter_map(scalar_to_string).collect())
                .unwrap_or_default();
            StepAction::SqlProcedure(SqlProcedureConfig {
                connection_string: conn()?,
                procedure,
                args,
                timeout,
            })
        }
        StepKind::SqlQuery => {
            let query = str_field(config, "query")
                .or_else(|| str_field(config, "sql"))
                .or_else(|| str_field(config, "commandText"))
                .ok_or_else(|| Error::invalid_spec(scope, "missing `query`"))?;
            StepAction::SqlQuery(SqlQueryConfig {
                connection_string: conn()?,
                query,
                timeout,
            })
        }
        StepKind::Wait => {
            let duration = ms_field(config, "durationMs")
                .or_else(|| secs_field(config, "durationSeconds"))
                .ok_or_else(|| Error::invalid_spec(scope, "missing `durationMs`"))?;
            let variation = ms_field(config, "randomVariationMs").unwrap_or(Duration::ZERO);
            StepAction::Wait(WaitConfig {
                duration,
                variation,
            })
        }
        StepKind::DatabaseConnection => StepAction::DatabaseConnection(DatabaseConnectionConfig {
            connection_string: conn()?,
            timeout,
        }),
        StepKind::CustomScript => StepAction::CustomScript(CustomScriptConfig {
            script: str_field(config, "script").unwrap_or_default(),
        }),
        StepKind::FileOperation => StepAction::FileOperation(FileOperationConfig {
            path: str_field(config, "path").unwrap_or_default(),
            operation: str_field(config, "operation").unwrap_or_else(|| "read".to_string()),
        }),
    };

    Ok(action)
}

fn parse_global_settings(obj: &Map<String, Value>) -> GlobalSettings {
    warn_unknown_keys(
        obj,
        &["defaultTimeout", "defaultRetryCount", "performanceThresholds"],
        "globalSettings",
    );

    let defaults = GlobalSettings::default();
    let thresholds = match field(obj, "performanceThresholds").and_then(Value::as_object) {
        Some(t) => {
            warn_unknown_keys(
                t,
                &[
                    "maxErrorRatePercent",
                    "maxAverageResponseTimeMs",
                    "maxP95ResponseTimeMs",
                    "maxP99ResponseTimeMs",
                    "minRequestsPerSecond",
                ],
                "globalSettings.performanceThresholds",
            );
            ThresholdOverrides {
                max_error_rate_percent: f64_field(t, "maxErrorRatePercent"),
                max_average_ms: f64_field(t, "maxAverageResponseTimeMs"),
                max_p95_ms: f64_field(t, "maxP95ResponseTimeMs"),
                max_p99_ms: f64_field(t, "maxP99ResponseTimeMs"),
                min_requests_per_second: f64_field(t, "minRequestsPerSecond"),
            }
        }
        None => ThresholdOverrides::default(),
    };

    GlobalSettings {
        default_timeout: ms_field(obj, "defaultTimeout").unwrap_or(defaults.default_timeout),
        default_retry_count: u64_field(obj, "defaultRetryCount")
            .map(|v| v.min(10) as u32)
            .unwrap_or(defaults.default_retry_count),
        thresholds,
    }
}

// ---- canonical serialization ----

fn scenario_to_value(s: &Scenario) -> Value {
    let mut out = Map::new();
    out.insert("name".into(), json!(s.name));
    if let Some(desc) = &s.description {
        out.insert("description".into(), json!(desc));
    }
    out.insert("executionMode".into(), json!(s.execution_mode.to_string()));
    out.insert("loadSimulation".into(), profile_to_value(&s.load_profile, s.settings.ramp_up));
    out.insert(
        "steps".into(),
        Value::Array(s.steps.iter().map(step_to_value).collect()),
    );
    out.insert(
        "settings".into(),
        json!({
            "durationSeconds": s.settings.duration.as_secs(),
            "concurrentUsers": s.settings.concurrent_users,
            "maxErrorRatePercent": s.settings.max_error_rate_percent,
            "expectedResponseTimeMs": s.settings.expected_response_time_ms,
        }),
    );
    Value::Object(out)
}

fn profile_to_value(profile: &LoadProfile, ramp_up: Duration) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), json!(profile.kind().to_string()));
    out.insert("durationSeconds".into(), json!(profile.duration().as_secs()));
    out.insert("rampUpSeconds".into(), json!(ramp_up.as_secs()));

    match profile {
        LoadProfile::ConstantRate { rate, .. } | LoadProfile::Soak { rate, .. } => {
            out.insert("rate".into(), json!(rate));
        }
        LoadProfile::RampUp {
            start_rate,
            end_rate,
            ..
        } => {
            out.insert(
                "parameters".into(),
                json!({ "startRps": start_rate, "endRps": end_rate }),
            );
        }
        LoadProfile::Spike {
            base_rate,
            spike_rate,
            spike_start,
            spike_duration,
            ..
        } => {
            let mut params = Map::new();
            params.insert("baseRps".into(), json!(base_rate));
            params.insert("spikeRps".into(), json!(spike_rate));
            params.insert("spikeDurationSeconds".into(), json!(spike_duration.as_secs()));
            if let Some(start) = spike_start {
                params.insert("spikeStartSeconds".into(), json!(start.as_secs()));
            }
            out.insert("parameters".into(), Value::Object(params));
        }
        LoadProfile::Stress {
            max_concurrency, ..
        } => {
            out.insert(
                "parameters".into(),
                json!({ "maxConcurrency": max_concurrency }),
            );
        }
    }

    Value::Object(out)
}

fn step_to_value(step: &Step) -> Value {
    let configuration = match &step.action {
        StepAction::HttpApi(c) => {
            let mut cfg = Map::new();
            cfg.insert("method".into(), json!(c.method.as_str()));
            cfg.insert("url".into(), json!(c.url));
            if !c.headers.is_empty() {
                let headers: Map<String, Value> = c
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                cfg.insert("headers".into(), Value::Object(headers));
            }
            if let Some(body) = &c.body {
                cfg.insert("body".into(), json!(body));
            }
            insert_timeout(&mut cfg, c.timeout);
            Value::Object(cfg)
        }
        StepAction::SqlProcedure(c) => {
            let mut cfg = Map::new();
            cfg.insert("connectionString".into(), json!(c.connection_string));
            cfg.insert("procedure".into(), json!(c.procedure));
            if !c.args.is_empty() {
                cfg.insert("parameters".into(), json!(c.args));
            }
            insert_timeout(&mut cfg, c.timeout);
            Value::Object(cfg)
        }
        StepAction::SqlQuery(c) => {
            let mut cfg = Map::new();
            cfg.insert("connectionString".into(), json!(c.connection_string));
            cfg.insert("query".into(), json!(c.query));
            insert_timeout(&mut cfg, c.timeout);
            Value::Object(cfg)
        }
        StepAction::Wait(c) => json!({
            "durationMs": c.duration.as_millis() as u64,
            "randomVariationMs": c.variation.as_millis() as u64,
        }),
        StepAction::DatabaseConnection(c) => {
            let mut cfg = Map::new();
            cfg.insert("connectionString".into(), json!(c.connection_string));
            insert_timeout(&mut cfg, c.timeout);
            Value::Object(cfg)
        }
        StepAction::CustomScript(c) => json!({ "script": c.script }),
        StepAction::FileOperation(c) => json!({ "path": c.path, "operation": c.operation }),
    };

    let mut out = Map::new();
    out.insert("name".into(), json!(step.name));
    out.insert("type".into(), json!(step.action.kind().to_string()));
    out.insert("configuration".into(), configuration);
    out.insert("weight".into(), json!(step.weight));
    out.insert("enabled".into(), json!(step.enabled));
    if step.combined_with_previous {
        out.insert("combinedWithPrevious".into(), json!(true));
    }
    if step.retry_count > 0 {
        out.insert("retryCount".into(), json!(step.retry_count));
    }
    Value::Object(out)
}

fn global_to_value(global: &GlobalSettings) -> Value {
    let mut thresholds = Map::new();
    let t = &global.thresholds;
    if let Some(v) = t.max_error_rate_percent {
        thresholds.insert("maxErrorRatePercent".into(), json!(v));
    }
    if let Some(v) = t.max_average_ms {
        thresholds.insert("maxAverageResponseTimeMs".into(), json!(v));
    }
    if let Some(v) = t.max_p95_ms {
        thresholds.insert("maxP95ResponseTimeMs".into(), json!(v));
    }
    if let Some(v) = t.max_p99_ms {
        thresholds.insert("maxP99ResponseTimeMs".into(), json!(v));
    }
    if let Some(v) = t.min_requests_per_second {
        thresholds.insert("minRequestsPerSecond".into(), json!(v));
    }

    json!({
        "defaultTimeout": global.default_timeout.as_millis() as u64,
        "defaultRetryCount": global.default_retry_count,
        "performanceThresholds": Value::Object(thresholds),
    })
}

fn insert_timeout(cfg: &mut Map<String, Value>, timeout: Option<Duration>) {
    if let Some(t) = timeout {
        cfg.insert("timeoutMs".into(), json!(t.as_millis() as u64));
    }
}

// ---- case-insensitive field access ----

fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn warn_unknown_keys(obj: &Map<String, Value>, known: &[&str], scope: &str) {
    for key in obj.keys() {
        if !known.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            tracing::warn!(%scope, %key, "ignoring unknown key");
        }
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    field(obj, key).and_then(|v| v.as_str()).map(str::to_string)
}

fn f64_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let v = field(obj, key)?;
    match v {
        Value::Number(n) => n.as_f64(),
        // Tolerate number-valued strings from hand-edited documents.
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    let v = f64_field(obj, key)?;
    if v < 0.0 || !v.is_finite() {
        return None;
    }
    Some(v as u64)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> Option<bool> {
    match field(obj, key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn secs_field(obj: &Map<String, Value>, key: &str) -> Option<Duration> {
    f64_field(obj, key)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}

fn ms_field(obj: &Map<String, Value>, key: &str) -> Option<Duration> {
    f64_field(obj, key)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(scenarios: &str) -> String {
        format!(r#"{{ "testScenarios": [{scenarios}] }}"#)
    }

    const SMOKE: &str = r#"{
        "name": "smoke",
        "executionMode": "Sequential",
        "loadSimulation": { "type": "ConstantRate", "rate": 50, "durationSeconds": 10, "rampUpSeconds": 2, "maxConcurrentUsers": 10 },
        "steps": [
            { "name": "ok", "type": "HttpApi",
              "configuration": { "method": "get", "url": "http://localhost:18080/ok" } }
        ],
        "settings": { "maxErrorRatePercent": 5, "expectedResponseTimeMs": 200 }
    }"#;

    #[test]
    fn parses_a_minimal_document() {
        let set = ScenarioSet::parse(&doc(SMOKE)).unwrap_or_else(|e| panic!("{e}"));
        let s = set.get("smoke").unwrap_or_else(|| panic!("missing scenario"));

        assert_eq!(s.execution_mode, ExecutionMode::Sequential);
        assert_eq!(s.settings.concurrent_users, 10);
        assert_eq!(s.settings.ramp_up, Duration::from_secs(2));
        assert!(matches!(
            s.load_profile,
            LoadProfile::ConstantRate { rate, duration }
                if rate == 50.0 && duration == Duration::from_secs(10)
        ));
        assert_eq!(s.steps.len(), 1);
        assert!(matches!(
            &s.steps[0].action,
            StepAction::HttpApi(c) if c.method == http::Method::GET
        ));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let text = r#"{
            "TESTSCENARIOS": [{
                "NAME": "ci",
                "Steps": [
                    { "Name": "w", "TYPE": "wait", "Configuration": { "DurationMs": 5 } }
                ]
            }]
        }"#;
        let set = ScenarioSet::parse(text).unwrap_or_else(|e| panic!("{e}"));
        let s = set.get("ci").unwrap_or_else(|| panic!("missing scenario"));
        assert!(matches!(
            s.steps[0].action,
            StepAction::Wait(WaitConfig { duration, .. }) if duration == Duration::from_millis(5)
        ));
    }

    #[test]
    fn unknown_step_type_is_invalid_spec() {
        let text = doc(
            r#"{ "name": "bad", "steps": [ { "name": "x", "type": "Carrier" } ] }"#,
        );
        let err = ScenarioSet::parse(&text).unwrap_err();
        assert!(matches!(err, Error::InvalidSpec { .. }), "got {err}");
    }

    #[test]
    fn http_step_requires_absolute_http_url() {
        let text = doc(
            r#"{ "name": "bad", "steps": [
                { "name": "x", "type": "HttpApi",
                  "configuration": { "method": "GET", "url": "/relative" } }
            ] }"#,
        );
        assert!(ScenarioSet::parse(&text).is_err());

        let text = doc(
            r#"{ "name": "bad", "steps": [
                { "name": "x", "type": "HttpApi",
                  "configuration": { "method": "GET", "url": "ftp://host/x" } }
            ] }"#,
        );
        assert!(ScenarioSet::parse(&text).is_err());
    }

    #[test]
    fn http_method_outside_allowed_set_is_rejected() {
        let text = doc(
            r#"{ "name": "bad", "steps": [
                { "name": "x", "type": "HttpApi",
                  "configuration": { "method": "TRACE", "url": "http://h/x" } }
            ] }"#,
        );
        assert!(ScenarioSet::parse(&text).is_err());
    }

    #[test]
    fn disabled_step_with_bad_config_is_dropped() {
        let text = doc(
            r#"{ "name": "s", "steps": [
                { "name": "dead", "type": "HttpApi", "enabled": false, "configuration": {} },
                { "name": "w", "type": "Wait", "configuration": { "durationMs": 1 } }
            ] }"#,
        );
        let set = ScenarioSet::parse(&text).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(set.get("s").map(|s| s.steps.len()), Some(1));
    }

    #[test]
    fn duplicate_scenario_names_last_wins() {
        let text = doc(&format!(
            r#"{SMOKE},
            {{ "name": "smoke", "executionMode": "Weighted",
               "steps": [ {{ "name": "w", "type": "Wait", "configuration": {{ "durationMs": 1 }} }} ] }}"#
        ));
        let set = ScenarioSet::parse(&text).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(set.scenarios().len(), 1);
        assert_eq!(
            set.get("smoke").map(|s| s.execution_mode),
            Some(ExecutionMode::Weighted)
        );
    }

    #[test]
    fn spike_duration_must_fit_inside_run() {
        let text = doc(
            r#"{ "name": "s",
                "loadSimulation": { "type": "Spike", "rate": 10, "durationSeconds": 10,
                                    "parameters": { "spikeRps": 100, "spikeDurationSeconds": 30 } },
                "steps": [ { "name": "w", "type": "Wait", "configuration": { "durationMs": 1 } } ] }"#,
        );
        assert!(ScenarioSet::parse(&text).is_err());
    }

    #[test]
    fn round_trip_preserves_structure() {
        let text = format!(
            r#"{{
            "testScenarios": [{SMOKE}],
            "globalSettings": {{
                "defaultTimeout": 15000,
                "defaultRetryCount": 2,
                "performanceThresholds": {{ "maxErrorRatePercent": 1.5, "minRequestsPerSecond": 10 }}
            }}
        }}"#
        );
        let first = ScenarioSet::parse(&text).unwrap_or_else(|e| panic!("{e}"));
        let rendered = first.to_document().to_string();
        let second = ScenarioSet::parse(&rendered).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_steps_is_invalid() {
        let text = doc(r#"{ "name": "s", "steps": [] }"#);
        assert!(ScenarioSet::parse(&text).is_err());
    }
}
