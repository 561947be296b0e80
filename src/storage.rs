//! Storage Layer
//!
//! Two heterogeneous stores behind async traits:
//! - **Cache**: key-value entries with per-key expiration, holding recent reports
//! - **Document store**: append-only report history, indexed newest first
//!
//! # Components
//!
//! - [`CacheStore`]: Cache capability, implemented by [`MemoryCache`] and [`SqliteCache`]
//! - [`DurableStore`]: Document store capability, implemented by [`SqliteReportStore`]
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management
//! - [`spawn_cache_janitor`]: Background purge of expired cache entries

mod builder;
mod cache;
pub mod db;
mod error;
mod janitor;
mod report_store;
mod schema;
mod sqlite_cache;
mod types;

pub use builder::{CacheBackend, StorageBuilder, StorageHandles};
pub use cache::{CacheStore, MemoryCache};
pub use error::{StorageError, with_deadline};
pub use janitor::spawn_cache_janitor;
pub use report_store::{DurableStore, SqliteReportStore};
pub use sqlite_cache::SqliteCache;
pub use types::{
    CACHE_KEY_PREFIX, DOCUMENT_ID_FIELD, FindWindow, ReportFilter, SensorReport, StoredReport,
};
