//! Read-side services.
//!
//! - [`RealtimeQueryService`]: newest reports from the cache store
//! - [`HistoricalQueryService`]: paginated, filterable reads from the document store
//!
//! Neither service writes or holds mutable state. Every store call runs under
//! [`QueryConfig::store_timeout`]; errors and timeouts surface as
//! [`QueryError`] and are never retried here.

mod historical;
mod realtime;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

pub use historical::{HistoricalQuery, HistoricalQueryService, Page, PageRequest};
pub use realtime::RealtimeQueryService;

fn default_realtime_limit() -> usize {
    20
}

fn default_page_size() -> u64 {
    50
}

fn default_max_page_size() -> u64 {
    1000
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Configuration shared by the query services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Reports returned by the realtime query (default: 20).
    #[serde(default = "default_realtime_limit")]
    pub realtime_limit: usize,
    /// Page size when none is requested (default: 50).
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    /// Upper bound for requested page sizes (default: 1000).
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
    /// Deadline for one query's store calls (default: 5s).
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            realtime_limit: default_realtime_limit(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            store_timeout: default_store_timeout(),
        }
    }
}

/// Errors returned by the query services.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The backing store failed or returned unreadable data.
    #[error("store error: {0}")]
    Store(#[source] StorageError),

    /// The backing store did not answer in time.
    #[error("store did not respond within {0:?}")]
    Timeout(Duration),
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout(limit) => Self::Timeout(limit),
            other => Self::Store(other),
        }
    }
}
