use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use serde_json::json;

use drover_core::{
    CancelSignal, LoadProfile, Orchestrator, RunStatus, Scenario, ScenarioSet,
};
use drover_history::{
    DeviationReport, HistorySink, HistoryStore, MemoryHistoryStore, SqliteHistoryStore,
    build_report,
};

use crate::cli::{RunArgs, TestType};
use crate::exit_codes::ExitCode;
use crate::output;

pub async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let set = match &args.scenario_file {
        Some(path) => ScenarioSet::load(path)
            .await
            .with_context(|| format!("failed to load scenario file: {}", path.display()))?,
        None => ad_hoc_set(&args)?,
    };

    if args.list_scenarios {
        for scenario in set.scenarios() {
            match &scenario.description {
                Some(desc) => println!("{}  - {desc}", scenario.name),
                None => println!("{}", scenario.name),
            }
        }
        return Ok(ExitCode::Success);
    }

    let selected: Vec<Scenario> = match &args.scenario {
        Some(name) => vec![
            set.get(name)
                .with_context(|| format!("scenario not found: `{name}`"))?
                .clone(),
        ],
        None => set.scenarios().to_vec(),
    };

    let store: Arc<dyn HistoryStore> = match &args.history_db {
        Some(path) => Arc::new(
            SqliteHistoryStore::open(path)
                .await
                .with_context(|| format!("failed to open history db: {}", path.display()))?,
        ),
        None => Arc::new(MemoryHistoryStore::new()),
    };

    let orchestrator =
        Orchestrator::new(set).with_observer(Arc::new(HistorySink::new(store.clone())));

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling run");
                cancel.cancel();
            }
        });
    }

    for scenario in &selected {
        let mut scenario = scenario.clone();
        apply_overrides(&mut scenario, &args);

        // The reference window must predate this run, so fetch it first.
        let baseline = store
            .baseline(&scenario.name, args.baseline_samples)
            .await
            .unwrap_or_default();
        let recent = match &baseline {
            Some(_) => store.recent(&scenario.name, 10).await.unwrap_or_default(),
            None => Vec::new(),
        };

        let outcome = orchestrator.execute(&scenario, cancel.clone()).await?;
        let deviation: Option<DeviationReport> =
            baseline.map(|b| build_report(&outcome.result, &b, &recent));

        output::emit(args.output, &outcome, deviation.as_ref());

        if outcome.result.status == RunStatus::Cancelled {
            break;
        }
    }

    // Retention sweep failures are logged and swallowed.
    match store.cleanup(args.retention_days).await {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(deleted, "history retention sweep");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "history cleanup failed"),
    }

    Ok(ExitCode::Success)
}

/// Assemble a scenario straight from CLI flags, then run it through the same
/// parser/validator a scenario file goes through.
fn ad_hoc_set(args: &RunArgs) -> anyhow::Result<ScenarioSet> {
    // A lone --sql-connection with the default test type clearly means SQL.
    let test_type = match (args.test_type, &args.endpoint, &args.sql_connection) {
        (TestType::Api, None, Some(_)) => TestType::Sql,
        (t, _, _) => t,
    };

    let mut steps = Vec::new();
    if matches!(test_type, TestType::Api | TestType::Combined) {
        let endpoint = args
            .endpoint
            .as_ref()
            .context("--endpoint is required for an ad-hoc api run")?;
        steps.push(json!({
            "name": "api",
            "type": "HttpApi",
            "configuration": { "method": args.method, "url": endpoint }
        }));
    }
    if matches!(test_type, TestType::Sql | TestType::Combined) {
        let conn = args
            .sql_connection
            .as_ref()
            .context("--sql-connection is required for an ad-hoc sql run")?;
        let procedure = args
            .sql_procedure
            .as_ref()
            .context("--sql-procedure is required for an ad-hoc sql run")?;
        steps.push(json!({
            "name": "sql",
            "type": "SqlProcedure",
            "configuration": { "connectionString": conn, "procedure": procedure }
        }));
    }
    if steps.is_empty() {
        bail!("nothing to run: provide a scenario file, or --endpoint/--sql-connection");
    }

    let duration = args.duration.unwrap_or(60);
    let users = args.users.unwrap_or(10);
    let mode = if steps.len() > 1 { "Sequential" } else { "Parallel" };

    let doc = json!({
        "testScenarios": [{
            "name": "adhoc",
            "executionMode": mode,
            "loadSimulation": {
                "type": "ConstantRate",
                "rate": users,
                "durationSeconds": duration,
                "maxConcurrentUsers": users
            },
            "steps": steps
        }]
    });

    ScenarioSet::parse(&doc.to_string()).context("invalid ad-hoc scenario")
}

fn apply_overrides(scenario: &mut Scenario, args: &RunArgs) {
    if let Some(secs) = args.duration {
        let duration = Duration::from_secs(secs);
        scenario.settings.duration = duration;
        match &mut scenario.load_profile {
            LoadProfile::ConstantRate { duration: d, .. }
            | LoadProfile::RampUp { duration: d, .. }
            | LoadProfile::Spike { duration: d, .. }
            | LoadProfile::Stress { duration: d, .. }
            | LoadProfile::Soak { duration: d, .. } => *d = duration,
        }
    }
    if let Some(users) = args.users {
        scenario.settings.concurrent_users = users.max(1);
        if let LoadProfile::Stress {
            max_concurrency, ..
        } = &mut scenario.load_profile
        {
            *max_concurrency = users.max(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn args(argv: &[&str]) -> RunArgs {
        let cli = crate::cli::Cli::try_parse_from(argv).unwrap_or_else(|e| panic!("{e}"));
        let crate::cli::Command::Run(args) = cli.command;
        args
    }

    #[test]
    fn ad_hoc_api_scenario_validates() {
        let set = ad_hoc_set(&args(&[
            "drover",
            "run",
            "--endpoint",
            "http://localhost:9/ping",
            "--users",
            "5",
            "--duration",
            "15",
        ]))
        .unwrap_or_else(|e| panic!("{e:#}"));

        let s = set.get("adhoc").unwrap_or_else(|| panic!("missing adhoc"));
        assert_eq!(s.settings.concurrent_users, 5);
        assert_eq!(s.load_profile.duration(), Duration::from_secs(15));
        assert_eq!(s.steps.len(), 1);
    }

    #[test]
    fn lone_sql_connection_implies_sql_test_type() {
        let set = ad_hoc_set(&args(&[
            "drover",
            "run",
            "--sql-connection",
            "sqlite::memory:",
            "--sql-procedure",
            "usp_Ping",
        ]))
        .unwrap_or_else(|e| panic!("{e:#}"));

        let s = set.get("adhoc").unwrap_or_else(|| panic!("missing adhoc"));
        assert_eq!(s.steps.len(), 1);
        assert_eq!(s.steps[0].name, "sql");
    }

    #[test]
    fn no_flags_and_no_file_is_an_error() {
        let err = ad_hoc_set(&args(&["drover", "run"])).unwrap_err();
        assert!(err.to_string().contains("nothing to run"));
    }

    #[test]
    fn overrides_rewrite_profile_and_settings() {
        let set = ad_hoc_set(&args(&[
            "drover",
            "run",
            "--endpoint",
            "http://localhost:9/ping",
        ]))
        .unwrap_or_else(|e| panic!("{e:#}"));
        let mut scenario = set
            .get("adhoc")
            .unwrap_or_else(|| panic!("missing adhoc"))
            .clone();

        let run_args = args(&["drover", "run", "--duration", "5", "--users", "3"]);
        apply_overrides(&mut scenario, &run_args);

        assert_eq!(scenario.settings.duration, Duration::from_secs(5));
        assert_eq!(scenario.load_profile.duration(), Duration::from_secs(5));
        assert_eq!(scenario.settings.concurrent_users, 3);
    }
}
