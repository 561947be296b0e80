//! Durable document store for sensor reports.
//!
//! Every report is appended as a new document; nothing is updated or deleted.
//! Lookups return documents newest first (by report timestamp, then by
//! insertion order for equal timestamps) and can be filtered by batch.

use async_trait::async_trait;
use chrono::Utc;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::types::{FindWindow, ReportFilter, SensorReport, StoredReport};

/// Durable store capability used by the ingestion pipeline and historical queries.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Append a report as a new document, returning its id.
    ///
    /// No uniqueness is enforced: inserting the same report twice yields two
    /// documents.
    async fn insert(&self, report: &SensorReport) -> Result<i64, StorageError>;

    /// Append a report tagged with `source_key`, unless a document with that
    /// key already exists. Returns the id of the new or the existing document.
    ///
    /// Repeating a call whose outcome was never observed (a timed-out write
    /// that still went through) therefore stores the report once.
    async fn insert_once(&self, source_key: &str, report: &SensorReport)
    -> Result<i64, StorageError>;

    /// Documents matching `filter`, newest first, sliced by `window`.
    async fn find(
        &self,
        filter: &ReportFilter,
        window: FindWindow,
    ) -> Result<Vec<StoredReport>, StorageError>;

    /// Number of documents matching `filter`.
    async fn count(&self, filter: &ReportFilter) -> Result<u64, StorageError>;

    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// SQLite-backed document store over the `sensor_reports` table.
#[derive(Clone)]
pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteReportStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteReportStore").finish_non_exhaustive()
    }
}

impl SqliteReportStore {
    /// Wrap a pool whose schema has already been initialized.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_sql_int(value: u64, what: &str) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::InvalidData(format!("{what} out of range")))
}

#[async_trait]
impl DurableStore for SqliteReportStore {
    async fn insert(&self, report: &SensorReport) -> Result<i64, StorageError> {
        let document = serde_json::to_string(report)?;
        let result = sqlx::query(
            "INSERT INTO sensor_reports (ts, batch_id, document, ingested_at) VALUES (?, ?, ?, ?)",
        )
        .bind(report.timestamp.timestamp_micros())
        .bind(&report.batch_id)
        .bind(document)
        .bind(Utc::now().timestamp_micros())
        .execute(self.pool.inner())
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn insert_once(
        &self,
        source_key: &str,
        report: &SensorReport,
    ) -> Result<i64, StorageError> {
        let document = serde_json::to_string(report)?;
        let result = sqlx::query(
            "INSERT INTO sensor_reports (ts, batch_id, document, ingested_at, source_key) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(report.timestamp.timestamp_micros())
        .bind(&report.batch_id)
        .bind(document)
        .bind(Utc::now().timestamp_micros())
        .bind(source_key)
        .execute(self.pool.inner())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(result.last_insert_rowid());
        }

        let id = sqlx::query_scalar("SELECT id FROM sensor_reports WHERE source_key = ?")
            .bind(source_key)
            .fetch_one(self.pool.inner())
            .await?;
        tracing::debug!(source_key, id, "Report already stored for this source");
        Ok(id)
    }

    async fn find(
        &self,
        filter: &ReportFilter,
        window: FindWindow,
    ) -> Result<Vec<StoredReport>, StorageError> {
        let mut sql = String::from("SELECT id, document FROM sensor_reports");
        if filter.batch_id.is_some() {
            sql.push_str(" WHERE batch_id = ?");
        }
        // SQLite needs a LIMIT to accept an OFFSET; -1 means unbounded.
        sql.push_str(" ORDER BY ts DESC, id DESC LIMIT ? OFFSET ?");

        let limit = match window.limit {
            Some(limit) => to_sql_int(limit, "limit")?,
            None => -1,
        };
        let offset = to_sql_int(window.offset, "offset")?;

        let mut query = sqlx::query_as::<_, (i64, String)>(&sql);
        if let Some(ref batch_id) = filter.batch_id {
            query = query.bind(batch_id);
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.inner())
            .await?;

        rows.into_iter()
            .map(|(id, document)| {
                let report: SensorReport = serde_json::from_str(&document)?;
                Ok(StoredReport { id, report })
            })
            .collect()
    }

    async fn count(&self, filter: &ReportFilter) -> Result<u64, StorageError> {
        let count: i64 = match filter.batch_id {
            Some(ref batch_id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM sensor_reports WHERE batch_id = ?")
                    .bind(batch_id)
                    .fetch_one(self.pool.inner())
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM sensor_reports")
                    .fetch_one(self.pool.inner())
                    .await?
            }
        };
        u64::try_from(count).map_err(|_| StorageError::InvalidData(format!("negative count {count}")))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }
}
