//! Table-backed cache store.
//!
//! Entries live in `cache_entries` with an absolute `expires_at` deadline in
//! Unix microseconds (wall clock). Expired rows stay on disk until
//! [`CacheStore::purge_expired`] runs, but every read filters them out.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::storage::StorageError;
use crate::storage::cache::CacheStore;
use crate::storage::db::SqlitePool;

/// Cache store persisted in SQLite.
#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache").finish_non_exhaustive()
    }
}

impl SqliteCache {
    /// Wrap a pool whose schema has already been initialized.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn deadline_micros(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
    now_micros().saturating_add(ttl)
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(deadline_micros(ttl))
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM cache_entries WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now_micros())
        .fetch_optional(self.pool.inner())
        .await?;
        Ok(value)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM cache_entries
             WHERE substr(key, 1, length(?)) = ? AND expires_at > ?",
        )
        .bind(prefix)
        .bind(prefix)
        .bind(now_micros())
        .fetch_all(self.pool.inner())
        .await?;
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now_micros())
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
