//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing the cache and document stores.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::StorageError;
use crate::storage::cache::{CacheStore, MemoryCache};
use crate::storage::db::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
use crate::storage::report_store::{DurableStore, SqliteReportStore};
use crate::storage::schema::init_schema;
use crate::storage::sqlite_cache::SqliteCache;

/// Which backend holds the realtime cache.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CacheBackend {
    /// In-process map; entries are lost on restart.
    #[default]
    Memory,
    /// `cache_entries` table in the same database as the document store.
    Sqlite,
}

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    url: String,
    max_connections: u32,
    cache_backend: CacheBackend,
}

impl StorageBuilder {
    /// Create a new storage builder for a sqlx SQLite URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cache_backend: CacheBackend::default(),
        }
    }

    /// Set the maximum number of pooled database connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Select the cache backend.
    pub fn cache_backend(mut self, backend: CacheBackend) -> Self {
        self.cache_backend = backend;
        self
    }

    /// Connect, initialize the schema and return handles.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(path) = sqlite_file_path(&self.url)
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect_with(&self.url, self.max_connections).await?;
        init_schema(&pool).await?;

        let cache: Arc<dyn CacheStore> = match self.cache_backend {
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
            CacheBackend::Sqlite => Arc::new(SqliteCache::new(pool.clone())),
        };
        let reports: Arc<dyn DurableStore> = Arc::new(SqliteReportStore::new(pool.clone()));

        tracing::info!(cache = cache.backend(), "Storage initialized");

        Ok(StorageHandles {
            cache,
            reports,
            pool,
        })
    }
}

/// Handles to the storage layer.
#[derive(Clone)]
pub struct StorageHandles {
    /// Realtime cache store.
    pub cache: Arc<dyn CacheStore>,
    /// Durable document store.
    pub reports: Arc<dyn DurableStore>,
    pool: SqlitePool,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles")
            .field("cache", &self.cache.backend())
            .finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Close the database pool. Outstanding store handles fail afterwards.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.pool.close().await;
        tracing::info!("Storage closed");
        Ok(())
    }
}

/// Filesystem path behind a SQLite URL, if it names a file.
fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}
