//! Relational history backend (SQLite).
//!
//! Column names are shared with the other backends of the original tooling,
//! so they stay exactly as-is. Baseline synthesis happens in the application
//! tier over the top-N recent Completed rows, same as the memory backend.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row as _;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use uuid::Uuid;

use drover_core::{ImpactLevel, RunResult, RunStatus};

use crate::record::{HistoryRecord, synthesize_baseline};
use crate::store::{HistoryStore, MIN_BASELINE_RECORDS};
use crate::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS TestResultHistory (
    Id TEXT PRIMARY KEY,
    TestName TEXT NOT NULL,
    ExecutionDate TEXT NOT NULL,
    DurationSeconds REAL NOT NULL,
    TotalRequests INTEGER NOT NULL,
    SuccessfulRequests INTEGER NOT NULL,
    FailedRequests INTEGER NOT NULL,
    ErrorRatePercent REAL NOT NULL,
    AverageResponseTimeMs REAL NOT NULL,
    MinResponseTimeMs REAL NOT NULL,
    MaxResponseTimeMs REAL NOT NULL,
    P95ResponseTimeMs REAL NOT NULL,
    P99ResponseTimeMs REAL NOT NULL,
    RequestsPerSecond REAL NOT NULL,
    CpuUsagePercent REAL NOT NULL,
    MemoryUsagePercent REAL NOT NULL,
    PerformanceImpact INTEGER NOT NULL,
    Status INTEGER NOT NULL,
    TestConfigurationId TEXT,
    TestResultId TEXT
);
CREATE INDEX IF NOT EXISTS IX_TestResultHistory_TestName_ExecutionDate
    ON TestResultHistory (TestName, ExecutionDate);
CREATE INDEX IF NOT EXISTS IX_TestResultHistory_TestName
    ON TestResultHistory (TestName);
"#;

#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (creating if missing) a database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::connect(&url).await
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, result: &RunResult) -> Result<HistoryRecord> {
        let record = HistoryRecord::from(result);

        sqlx::query(
            r#"INSERT INTO TestResultHistory (
                Id, TestName, ExecutionDate, DurationSeconds,
                TotalRequests, SuccessfulRequests, FailedRequests, ErrorRatePercent,
                AverageResponseTimeMs, MinResponseTimeMs, MaxResponseTimeMs,
                P95ResponseTimeMs, P99ResponseTimeMs, RequestsPerSecond,
                CpuUsagePercent, MemoryUsagePercent, PerformanceImpact, Status,
                TestConfigurationId, TestResultId
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.test_name)
        .bind(record.execution_date.to_rfc3339())
        .bind(record.duration_seconds)
        .bind(record.total_requests)
        .bind(record.successful_requests)
        .bind(record.failed_requests)
        .bind(record.error_rate_percent)
        .bind(record.average_response_time_ms)
        .bind(record.min_response_time_ms)
        .bind(record.max_response_time_ms)
        .bind(record.p95_response_time_ms)
        .bind(record.p99_response_time_ms)
        .bind(record.requests_per_second)
        .bind(record.cpu_usage_percent)
        .bind(record.memory_usage_percent)
        .bind(record.impact.as_i32())
        .bind(record.status.as_i32())
        .bind(record.test_configuration_id.map(|id| id.to_string()))
        .bind(record.test_result_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_by_test(&self, name: &str) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM TestResultHistory WHERE TestName = ? ORDER BY ExecutionDate DESC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn recent(&self, name: &str, n: usize) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM TestResultHistory WHERE TestName = ? \
             ORDER BY ExecutionDate DESC LIMIT ?",
        )
        .bind(name)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn by_range(
        &self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM TestResultHistory \
             WHERE TestName = ? AND ExecutionDate >= ? AND ExecutionDate <= ? \
             ORDER BY ExecutionDate DESC",
        )
        .bind(name)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn baseline(&self, name: &str, sample_size: usize) -> Result<Option<HistoryRecord>> {
        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM TestResultHistory WHERE TestName = ? AND Status = ?",
        )
        .bind(name)
        .bind(RunStatus::Completed.as_i32())
        .fetch_one(&self.pool)
        .await?;

        if (completed as usize) < MIN_BASELINE_RECORDS {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT * FROM TestResultHistory WHERE TestName = ? AND Status = ? \
             ORDER BY ExecutionDate DESC LIMIT ?",
        )
        .bind(name)
        .bind(RunStatus::Completed.as_i32())
        .bind(sample_size.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let window: Vec<HistoryRecord> = rows.iter().map(row_to_record).collect::<Result<_>>()?;
        Ok(Some(synthesize_baseline(name, &window)))
    }

    async fn cleanup(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let done = sqlx::query("DELETE FROM TestResultHistory WHERE ExecutionDate < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

fn row_to_record(row: &SqliteRow) -> Result<HistoryRecord> {
    let parse_date = |raw: String| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| Error::Corrupt(format!("ExecutionDate `{raw}`: {e}")))
    };
    let parse_uuid = |raw: Option<String>| -> Result<Option<Uuid>> {
        raw.map(|s| Uuid::parse_str(&s).map_err(|e| Error::Corrupt(format!("uuid `{s}`: {e}"))))
            .transpose()
    };

    let impact_raw: i32 = row.try_get("PerformanceImpact")?;
    let status_raw: i32 = row.try_get("Status")?;

    Ok(HistoryRecord {
        id: Uuid::parse_str(&row.try_get::<String, _>("Id")?)
            .map_err(|e| Error::Corrupt(format!("Id: {e}")))?,
        test_name: row.try_get("TestName")?,
        execution_date: parse_date(row.try_get("ExecutionDate")?)?,
        duration_seconds: row.try_get("DurationSeconds")?,
        total_requests: row.try_get("TotalRequests")?,
        successful_requests: row.try_get("SuccessfulRequests")?,
        failed_requests: row.try_get("FailedRequests")?,
        error_rate_percent: row.try_get("ErrorRatePercent")?,
        average_response_time_ms: row.try_get("AverageResponseTimeMs")?,
        min_response_time_ms: row.try_get("MinResponseTimeMs")?,
        max_response_time_ms: row.try_get("MaxResponseTimeMs")?,
        p95_response_time_ms: row.try_get("P95ResponseTimeMs")?,
        p99_response_time_ms: row.try_get("P99ResponseTimeMs")?,
        requests_per_second: row.try_get("RequestsPerSecond")?,
        cpu_usage_percent: row.try_get("CpuUsagePercent")?,
        memory_usage_percent: row.try_get("MemoryUsagePercent")?,
        impact: ImpactLevel::from_i32(impact_raw)
            .ok_or_else(|| Error::Corrupt(format!("PerformanceImpact {impact_raw}")))?,
        status: RunStatus::from_i32(status_raw)
            .ok_or_else(|| Error::Corrupt(format!("Status {status_raw}")))?,
        test_configuration_id: parse_uuid(row.try_get("TestConfigurationId")?)?,
        test_result_id: parse_uuid(row.try_get("TestResultId")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::Thresholds;

    async fn temp_store() -> (tempfile::TempDir, SqliteHistoryStore) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = SqliteHistoryStore::open(&dir.path().join("history.db"))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        (dir, store)
    }

    fn run_result(name: &str, status: RunStatus, avg_ms: f64) -> RunResult {
        let ended = Utc::now();
        RunResult {
            id: Uuid::new_v4(),
            test_name: name.to_string(),
            started_at: ended - Duration::seconds(10),
            ended_at: ended,
            duration_seconds: 10.0,
            total_requests: 500,
            successful_requests: 495,
            failed_requests: 5,
            error_rate_percent: 1.0,
            average_response_time_ms: avg_ms,
            min_response_time_ms: 0.4,
            max_response_time_ms: 87.5,
            p50_response_time_ms: avg_ms,
            p95_response_time_ms: avg_ms * 1.5,
            p99_response_time_ms: avg_ms * 2.0,
            requests_per_second: 50.0,
            cpu_usage_percent: 17.5,
            memory_usage_percent: 42.25,
            status,
            impact: ImpactLevel::Minor,
            judged_passed: true,
            error_message: None,
            thresholds: Thresholds {
                max_error_rate_percent: 5.0,
                max_average_ms: 1_000.0,
                max_p95_ms: 1_500.0,
                max_p99_ms: 2_000.0,
                min_requests_per_second: None,
            },
        }
    }

    #[tokio::test]
    async fn persisted_record_rehydrates_identically() {
        let (_dir, store) = temp_store().await;
        let appended = store
            .append(&run_result("smoke", RunStatus::Completed, 12.5))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let listed = store
            .list_by_test("smoke")
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(listed.len(), 1);
        // Numeric fields must round-trip exactly; the timestamp survives at
        // RFC 3339 precision.
        let got = &listed[0];
        assert_eq!(got.id, appended.id);
        assert_eq!(got.total_requests, appended.total_requests);
        assert_eq!(got.average_response_time_ms, appended.average_response_time_ms);
        assert_eq!(got.cpu_usage_percent, appended.cpu_usage_percent);
        assert_eq!(got.memory_usage_percent, appended.memory_usage_percent);
        assert_eq!(got.impact, appended.impact);
        assert_eq!(got.status, appended.status);
        assert_eq!(got.test_result_id, appended.test_result_id);
    }

    #[tokio::test]
    async fn baseline_matches_memory_backend_semantics() {
        let (_dir, store) = temp_store().await;
        for avg in [100.0, 110.0] {
            store
                .append(&run_result("t", RunStatus::Completed, avg))
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
        assert!(
            store
                .baseline("t", 10)
                .await
                .unwrap_or_else(|e| panic!("{e}"))
                .is_none()
        );

        store
            .append(&run_result("t", RunStatus::Completed, 120.0))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let baseline = store
            .baseline("t", 10)
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("expected baseline"));
        assert_eq!(baseline.average_response_time_ms, 110.0);
    }

    #[tokio::test]
    async fn cleanup_reports_deleted_rows() {
        let (_dir, store) = temp_store().await;
        store
            .append(&run_result("t", RunStatus::Completed, 100.0))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        // Nothing is older than the retention window yet.
        let deleted = store.cleanup(90).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(deleted, 0);

        // Retention of zero days expires everything already persisted.
        let deleted = store.cleanup(0).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(deleted, 1);
        assert!(
            store
                .list_by_test("t")
                .await
                .unwrap_or_else(|e| panic!("{e}"))
                .is_empty()
        );
    }
}
