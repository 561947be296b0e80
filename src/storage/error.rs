//! Storage-specific error types.
//!
//! All cache and document store operations return [`StorageError`] on failure,
//! which can be matched to determine the underlying cause (database, encoding,
//! timeout, etc.).

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store call did not complete within the configured deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal error (e.g., directory creation failure).
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid data in the store (e.g., out-of-range timestamp).
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Run a store call under a deadline, mapping elapse to [`StorageError::Timeout`].
pub async fn with_deadline<T, F>(limit: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StorageError::Timeout(limit))?
}
