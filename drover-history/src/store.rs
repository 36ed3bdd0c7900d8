use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use drover_core::{RunResult, RunStatus};

use crate::record::{HistoryRecord, synthesize_baseline};
use crate::Result;

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Baselines need at least this many Completed records to be meaningful.
pub const MIN_BASELINE_RECORDS: usize = 3;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, result: &RunResult) -> Result<HistoryRecord>;

    /// All records for a test, newest first.
    async fn list_by_test(&self, name: &str) -> Result<Vec<HistoryRecord>>;

    /// The most recent `n` records, newest first.
    async fn recent(&self, name: &str, n: usize) -> Result<Vec<HistoryRecord>>;

    async fn by_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>>;

    /// Synthetic mean-over-recent-Completed baseline; `None` while fewer than
    /// [`MIN_BASELINE_RECORDS`] Completed records exist for the test.
    async fn baseline(&self, name: &str, sample_size: usize) -> Result<Option<HistoryRecord>>;

    /// Delete records older than the retention window; returns how many.
    async fn cleanup(&self, retention_days: u32) -> Result<u64>;
}

/// Adapts a history store to the orchestrator's completion hook.
pub struct HistorySink {
    store: Arc<dyn HistoryStore>,
}

impl HistorySink {
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl drover_core::RunObserver for HistorySink {
    async fn run_completed(&self, result: &RunResult) -> std::result::Result<(), String> {
        self.store
            .append(result)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// The default backend: everything lives in process memory.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, result: &RunResult) -> Result<HistoryRecord> {
        let record = HistoryRecord::from(result);
        self.records.write().push(record.clone());
        Ok(record)
    }

    async fn list_by_test(&self, name: &str) -> Result<Vec<HistoryRecord>> {
        let mut out: Vec<HistoryRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.test_name == name)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        Ok(out)
    }

    async fn recent(&self, name: &str, n: usize) -> Result<Vec<HistoryRecord>> {
        let mut out = self.list_by_test(name).await?;
        out.truncate(n);
        Ok(out)
    }

    async fn by_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>> {
        let mut out: Vec<HistoryRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.test_name == name && r.execution_date >= from && r.execution_date <= to)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        Ok(out)
    }

    async fn baseline(&self, name: &str, sample_size: usize) -> Result<Option<HistoryRecord>> {
        let completed: Vec<HistoryRecord> = self
            .list_by_test(name)
            .await?
            .into_iter()
            .filter(|r| r.status == RunStatus::Completed)
            .collect();

        if completed.len() < MIN_BASELINE_RECORDS {
            return Ok(None);
        }
        let window = &completed[..completed.len().min(sample_size.max(1))];
        Ok(Some(synthesize_baseline(name, window)))
    }

    async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.execution_date >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
