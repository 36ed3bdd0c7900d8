//! Run history persistence and baseline/regression analysis.

mod analyzer;
mod record;
mod sqlite;
mod store;

pub use analyzer::{DeviationAnalyzer, DeviationReport, TrendDirection, build_report, deviation};
pub use record::{HistoryRecord, synthesize_baseline};
pub use sqlite::SqliteHistoryStore;
pub use store::{
    DEFAULT_RETENTION_DAYS, HistorySink, HistoryStore, MIN_BASELINE_RECORDS, MemoryHistoryStore,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("history persistence error: {0}")]
    Persistence(String),

    #[error("corrupt history row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
