//! Database schema definitions.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// SQL statement for creating the sensor_reports table (document table).
///
/// `ts` holds the report timestamp as Unix microseconds for ordering and
/// range scans; `document` holds the full JSON report including extra fields.
/// No uniqueness is enforced on `ts`: equal timestamps from different files
/// are kept as separate documents. `source_key` identifies the file arrival a
/// document came from and is unique when present.
pub const SENSOR_REPORTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sensor_reports (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts          INTEGER NOT NULL,
    batch_id    TEXT NOT NULL,
    document    TEXT NOT NULL,
    ingested_at INTEGER NOT NULL,
    source_key  TEXT
);
"#;

/// Unique source index; NULL keys never conflict.
pub const SENSOR_REPORTS_SOURCE_INDEX_DDL: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_sensor_reports_source ON sensor_reports (source_key);
"#;

/// Descending timestamp index for newest-first scans.
pub const SENSOR_REPORTS_TS_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sensor_reports_ts ON sensor_reports (ts DESC, id DESC);
"#;

/// Composite index for batch-filtered newest-first scans.
pub const SENSOR_REPORTS_BATCH_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sensor_reports_batch_ts
    ON sensor_reports (batch_id, ts DESC, id DESC);
"#;

/// SQL statement for creating the cache_entries table (SQLite cache backend).
///
/// `expires_at` is Unix microseconds; rows at or past it are invisible.
pub const CACHE_ENTRIES_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

/// Expiry index so purges and scans skip dead rows cheaply.
pub const CACHE_ENTRIES_EXPIRY_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries (expires_at);
"#;

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(SENSOR_REPORTS_TABLE_DDL)
        .execute(pool.inner())
        .await?;
    add_source_key_column(pool).await?;

    for ddl in [
        SENSOR_REPORTS_SOURCE_INDEX_DDL,
        SENSOR_REPORTS_TS_INDEX_DDL,
        SENSOR_REPORTS_BATCH_INDEX_DDL,
        CACHE_ENTRIES_TABLE_DDL,
        CACHE_ENTRIES_EXPIRY_INDEX_DDL,
    ] {
        sqlx::query(ddl).execute(pool.inner()).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}

/// Databases created before `source_key` existed get the column added.
async fn add_source_key_column(pool: &SqlitePool) -> Result<(), StorageError> {
    let present: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('sensor_reports') WHERE name = 'source_key'",
    )
    .fetch_one(pool.inner())
    .await?;
    if present == 0 {
        sqlx::query("ALTER TABLE sensor_reports ADD COLUMN source_key TEXT")
            .execute(pool.inner())
            .await?;
        tracing::info!("Added source_key column to sensor_reports");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table_count(pool: &SqlitePool, kind: &str, name: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = ? AND name = ?")
            .bind(kind)
            .bind(name)
            .fetch_one(pool.inner())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        assert_eq!(table_count(&pool, "table", "sensor_reports").await, 1);
        assert_eq!(table_count(&pool, "table", "cache_entries").await, 1);
        assert_eq!(table_count(&pool, "index", "idx_sensor_reports_ts").await, 1);
        assert_eq!(
            table_count(&pool, "index", "idx_sensor_reports_batch_ts").await,
            1
        );
    }

    #[tokio::test]
    async fn test_schema_initialization_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();

        assert_eq!(table_count(&pool, "table", "sensor_reports").await, 1);
    }

    #[tokio::test]
    async fn test_source_key_added_to_existing_table() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE sensor_reports (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             ts INTEGER NOT NULL, batch_id TEXT NOT NULL, document TEXT NOT NULL, \
             ingested_at INTEGER NOT NULL)",
        )
        .execute(pool.inner())
        .await
        .unwrap();

        init_schema(&pool).await.unwrap();

        let columns: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('sensor_reports') WHERE name = 'source_key'",
        )
        .fetch_one(pool.inner())
        .await
        .unwrap();
        assert_eq!(columns, 1);
        assert_eq!(
            table_count(&pool, "index", "idx_sensor_reports_source").await,
            1
        );
    }

    #[tokio::test]
    async fn test_newest_first_scan_uses_index() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        let plan: Vec<(i64, i64, i64, String)> = sqlx::query_as(
            "EXPLAIN QUERY PLAN SELECT document FROM sensor_reports ORDER BY ts DESC, id DESC",
        )
        .fetch_all(pool.inner())
        .await
        .unwrap();

        let detail = plan
            .iter()
            .map(|row| row.3.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        assert!(detail.contains("idx_sensor_reports_ts"), "plan: {detail}");
        assert!(!detail.contains("TEMP B-TREE"), "plan: {detail}");
    }
}
