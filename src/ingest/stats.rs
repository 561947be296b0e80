//! Ingestion counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running totals since process start. Shared between workers and the API.
#[derive(Debug, Default)]
pub struct IngestStats {
    processed: AtomicU64,
    quarantined: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    /// Files committed to both stores and removed.
    pub processed: u64,
    /// Files moved into the quarantine directory.
    pub quarantined: u64,
    /// Attempts that failed and left the file in place.
    pub failed: u64,
    /// Attempts on a file that had failed before.
    pub retried: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_quarantined(&self) {
        self.quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}
