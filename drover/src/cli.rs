use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    Human,
    /// Machine-readable key=value lines for CI.
    Ci,
    /// One JSON document per scenario result.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TestType {
    Api,
    Sql,
    Combined,
}

#[derive(Debug, Parser)]
#[command(
    name = "drover",
    author,
    version,
    about = "Scenario-driven performance testing engine",
    long_about = "drover drives HTTP endpoints and SQL workloads at a configured rate or \
concurrency, aggregates latency and outcome statistics, samples host resources, and compares \
each run against its recorded history to flag regressions.\n\nA scenario file declares named \
test scenarios (steps, execution mode, load profile); quick one-off runs can be assembled \
straight from flags with --endpoint or --sql-connection.",
    after_help = "Examples:\n  drover run scenarios.json\n  drover run scenarios.json --scenario checkout --duration 120\n  drover run --endpoint http://localhost:8080/health --users 20 --duration 30\n  drover run scenarios.json --output ci --history-db perf-history.db"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute scenarios and report results
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario file (JSON)
    pub scenario_file: Option<PathBuf>,

    /// Run only the named scenario (default: every scenario in the file)
    #[arg(long)]
    pub scenario: Option<String>,

    /// Override the run duration, in seconds
    #[arg(long, value_name = "SEC")]
    pub duration: Option<u64>,

    /// Override the concurrent-user cap
    #[arg(long, value_name = "N")]
    pub users: Option<u64>,

    /// Build an ad-hoc HTTP scenario against this URL (no file needed)
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// HTTP method for --endpoint
    #[arg(long, value_name = "M", default_value = "GET")]
    pub method: String,

    /// Build an ad-hoc SQL scenario against this connection string
    #[arg(long = "sql-connection", value_name = "S")]
    pub sql_connection: Option<String>,

    /// Stored procedure for --sql-connection
    #[arg(long = "sql-procedure", value_name = "P")]
    pub sql_procedure: Option<String>,

    /// Which ad-hoc steps to assemble from the flags above
    #[arg(long = "test-type", value_enum, default_value_t = TestType::Api)]
    pub test_type: TestType,

    /// List the scenarios in the file and exit
    #[arg(long = "list-scenarios")]
    pub list_scenarios: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    /// Persist run history to this SQLite database (default: in-memory)
    #[arg(long = "history-db", value_name = "PATH")]
    pub history_db: Option<PathBuf>,

    /// Completed runs averaged into the regression baseline
    #[arg(long = "baseline-samples", value_name = "N", default_value_t = 10)]
    pub baseline_samples: usize,

    /// Drop history records older than this many days
    #[arg(long = "retention-days", value_name = "N", default_value_t = 90)]
    pub retention_days: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "drover",
            "run",
            "scenarios.json",
            "--scenario",
            "checkout",
            "--duration",
            "120",
            "--users",
            "25",
            "--output",
            "ci",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        let Command::Run(args) = cli.command;
        assert_eq!(args.scenario_file, Some(PathBuf::from("scenarios.json")));
        assert_eq!(args.scenario.as_deref(), Some("checkout"));
        assert_eq!(args.duration, Some(120));
        assert_eq!(args.users, Some(25));
        assert_eq!(args.output, OutputFormat::Ci);
        assert!(!args.list_scenarios);
    }

    #[test]
    fn parses_ad_hoc_sql_run() {
        let parsed = Cli::try_parse_from([
            "drover",
            "run",
            "--sql-connection",
            "postgres://perf@db/x",
            "--sql-procedure",
            "usp_Checkout",
            "--test-type",
            "sql",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        let Command::Run(args) = cli.command;
        assert_eq!(args.scenario_file, None);
        assert_eq!(args.sql_procedure.as_deref(), Some("usp_Checkout"));
        assert_eq!(args.test_type, TestType::Sql);
        assert_eq!(args.method, "GET");
    }
}
