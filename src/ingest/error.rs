//! Ingestion error types.
//!
//! Apart from the startup variants (`WatchDir`, `Watch`), every variant is
//! scoped to a single report file and never stops the watcher.

use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::validator::ValidationError;
use crate::storage::StorageError;

/// Errors raised while committing one report file.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Source file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content is not a valid report.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Cache store rejected the write (or timed out).
    #[error("cache write failed for key '{key}': {source}")]
    CacheWrite {
        key: String,
        #[source]
        source: StorageError,
    },

    /// Document store rejected the insert (or timed out).
    #[error("durable write failed for batch '{batch_id}': {source}")]
    DurableWrite {
        batch_id: String,
        #[source]
        source: StorageError,
    },

    /// Both writes succeeded but the source file could not be removed.
    #[error("failed to remove committed file '{}': {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File could not be moved into the quarantine directory.
    #[error("failed to quarantine '{}': {source}", path.display())]
    Quarantine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Watched directory could not be created.
    #[error("failed to prepare watch directory '{}': {source}", path.display())]
    WatchDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem notification setup failed.
    #[error("directory watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl IngestError {
    /// Name of the store involved, for log context.
    pub fn store(&self) -> Option<&'static str> {
        match self {
            Self::CacheWrite { .. } => Some("cache"),
            Self::DurableWrite { .. } => Some("durable"),
            _ => None,
        }
    }

    /// Whether a later attempt on the same file could succeed.
    ///
    /// Validation failures are final except for truncated content, which a
    /// producer still writing the file would also show. Such a file is retried
    /// and quarantined once the attempt limit is reached.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(e) => e.is_incomplete(),
            Self::Read { .. } | Self::CacheWrite { .. } | Self::DurableWrite { .. } => true,
            Self::Remove { .. }
            | Self::Quarantine { .. }
            | Self::WatchDir { .. }
            | Self::Watch(_) => false,
        }
    }
}
