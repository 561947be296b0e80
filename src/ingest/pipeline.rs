//! Per-file commit logic.
//!
//! [`IngestPipeline::process_file`] takes one report file through
//! read → validate → cache write → durable write → delete. The source file is
//! the commit marker: it only disappears once both stores have accepted the
//! report. Anything that cannot be committed is either left in place for a
//! later attempt or moved to quarantine.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::ingest::error::IngestError;
use crate::ingest::quarantine::Quarantine;
use crate::ingest::stats::IngestStats;
use crate::ingest::validator::validate_report;
use crate::storage::{CacheStore, DurableStore, StorageError, with_deadline};

/// Default cache entry lifetime (3 days).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Default deadline for a single store write (5 seconds).
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of attempts before a file is quarantined.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Result of one [`IngestPipeline::process_file`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Report written to both stores and the source file removed.
    Committed { key: String, id: i64 },
    /// Attempt failed; file left in place for a later retry.
    Deferred { attempts: u32 },
    /// File moved to quarantine.
    Quarantined { target: PathBuf },
    /// File vanished before it could be handled.
    Skipped,
    /// File could neither be committed nor quarantined.
    Failed,
}

/// Commits report files into the cache and document stores.
pub struct IngestPipeline {
    cache: Arc<dyn CacheStore>,
    reports: Arc<dyn DurableStore>,
    quarantine: Quarantine,
    cache_ttl: Duration,
    write_timeout: Duration,
    max_attempts: u32,
    attempts: Mutex<HashMap<PathBuf, u32>>,
    stats: Arc<IngestStats>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("cache", &self.cache.backend())
            .field("quarantine", &self.quarantine.dir())
            .field("cache_ttl", &self.cache_ttl)
            .field("write_timeout", &self.write_timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    /// Create a pipeline with default TTL, write timeout and attempt limit.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        reports: Arc<dyn DurableStore>,
        quarantine_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            reports,
            quarantine: Quarantine::new(quarantine_dir),
            cache_ttl: DEFAULT_CACHE_TTL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempts: Mutex::new(HashMap::new()),
            stats: Arc::new(IngestStats::new()),
        }
    }

    /// Set the cache entry lifetime.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the per-write store deadline.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the attempt limit. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn quarantine_dir(&self) -> &Path {
        self.quarantine.dir()
    }

    /// Take one file through the commit sequence.
    ///
    /// Never returns an error: every failure is logged, counted and turned
    /// into an [`IngestOutcome`].
    pub async fn process_file(&self, path: &Path) -> IngestOutcome {
        if self.previous_attempts(path) > 0 {
            self.stats.record_retried();
        }

        match self.commit(path).await {
            Ok((key, id)) => {
                self.forget(path);
                self.stats.record_processed();
                tracing::info!(path = %path.display(), key = %key, id, "Report committed");
                IngestOutcome::Committed { key, id }
            }
            Err(IngestError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                self.forget(path);
                tracing::debug!(path = %path.display(), "File gone before processing");
                IngestOutcome::Skipped
            }
            Err(e) => self.handle_failure(path, e).await,
        }
    }

    async fn commit(&self, path: &Path) -> Result<(String, i64), IngestError> {
        let read_failure = |source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        };
        let modified = tokio::fs::metadata(path)
            .await
            .map_err(read_failure)?
            .modified()
            .ok();
        let bytes = tokio::fs::read(path).await.map_err(read_failure)?;
        let report = validate_report(&bytes)?;
        let source_key = source_key(path, modified, &bytes);

        // Cache before document store. A retry after a failed insert only
        // rewrites this key.
        let key = report.cache_key();
        let cache_failure = |source: StorageError| IngestError::CacheWrite {
            key: key.clone(),
            source,
        };
        let value = serde_json::to_string(&report).map_err(|e| cache_failure(e.into()))?;
        with_deadline(
            self.write_timeout,
            self.cache.set(&key, &value, self.cache_ttl),
        )
        .await
        .map_err(cache_failure)?;

        // A timed-out insert may still land; the source key makes the retry
        // find it instead of storing a second copy.
        let id = with_deadline(
            self.write_timeout,
            self.reports.insert_once(&source_key, &report),
        )
        .await
        .map_err(|source| IngestError::DurableWrite {
            batch_id: report.batch_id.clone(),
            source,
        })?;

        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(IngestError::Remove {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }

        Ok((key, id))
    }

    async fn handle_failure(&self, path: &Path, err: IngestError) -> IngestOutcome {
        let attempts = self.record_attempt(path);

        if err.is_retryable() && attempts < self.max_attempts {
            self.stats.record_failed();
            if matches!(&err, IngestError::Validation(v) if v.is_incomplete()) {
                tracing::debug!(
                    path = %path.display(),
                    attempt = attempts,
                    "Report incomplete, waiting for writer"
                );
            } else {
                tracing::warn!(
                    path = %path.display(),
                    store = err.store().unwrap_or("-"),
                    attempt = attempts,
                    max_attempts = self.max_attempts,
                    error = %err,
                    "Report not committed, will retry"
                );
            }
            return IngestOutcome::Deferred { attempts };
        }

        self.forget(path);
        let reason = if attempts > 1 {
            format!("{err} (after {attempts} attempts)")
        } else {
            err.to_string()
        };

        match self.quarantine.admit(path, &reason).await {
            Ok(target) => {
                self.stats.record_quarantined();
                tracing::warn!(
                    path = %path.display(),
                    target = %target.display(),
                    reason = %reason,
                    "Report quarantined"
                );
                IngestOutcome::Quarantined { target }
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "File gone before quarantine");
                IngestOutcome::Skipped
            }
            Err(source) => {
                self.stats.record_failed();
                let err = IngestError::Quarantine {
                    path: path.to_path_buf(),
                    source,
                };
                tracing::error!(error = %err, reason = %reason, "Report left in place");
                IngestOutcome::Failed
            }
        }
    }

    fn previous_attempts(&self, path: &Path) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    fn record_attempt(&self, path: &Path) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = attempts.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        *count
    }

    fn forget(&self, path: &Path) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

/// Identity of one arrival of a report file.
///
/// Hashes the file name, modification time and content. Retries of the same
/// arrival share a key; the same file dropped again later gets a new one.
fn source_key(path: &Path, modified: Option<SystemTime>, bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    let name = path.file_name().map(|n| n.as_encoded_bytes());
    hasher.update(name.unwrap_or_default());
    let nanos = modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}


#[cfg(test)]
mod tests {
    use super::testing::{FlakyStore, LingeringStore};
    use super::*;
    use crate::storage::{CACHE_KEY_PREFIX, FindWindow, MemoryCache, ReportFilter, StorageBuilder};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        dir: TempDir,
        cache: Arc<MemoryCache>,
        reports: Arc<FlakyStore>,
        pipeline: IngestPipeline,
    }

    async fn fixture(durable_failures: u32) -> Fixture {
        let dir = tempdir().unwrap();
        let storage = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        let cache = Arc::new(MemoryCache::new());
        let reports = Arc::new(FlakyStore::new(storage.reports, durable_failures));
        let pipeline = IngestPipeline::new(
            cache.clone(),
            reports.clone(),
            dir.path().join("quarantine"),
        )
        .with_max_attempts(3);
        Fixture {
            dir,
            cache,
            reports,
            pipeline,
        }
    }

    fn report_json(ts: &str, batch: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "timestamp": ts,
            "batch_id": batch,
            "temperature_celsius": 20.5,
            "pressure_psi": 14.7,
            "co2_vol": 2.4
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_good_file_committed_and_removed() {
        let fx = fixture(0).await;
        let path = fx.dir.path().join("report_1.json");
        tokio::fs::write(&path, report_json("2024-05-01T12:00:00Z", "B001-LAGER"))
            .await
            .unwrap();

        let outcome = fx.pipeline.process_file(&path).await;
        let IngestOutcome::Committed { key, .. } = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(key, "sensor_data:2024-05-01T12:00:00.000000Z");
        assert!(!path.exists());

        assert_eq!(fx.cache.scan(CACHE_KEY_PREFIX).await.unwrap(), vec![key]);
        let stored = fx
            .reports
            .find(&ReportFilter::default(), FindWindow::all())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].report.batch_id, "B001-LAGER");
        assert_eq!(fx.pipeline.stats().snapshot().processed, 1);
    }

    #[tokio::test]
    async fn test_malformed_file_quarantined_without_writes() {
        let fx = fixture(0).await;
        let path = fx.dir.path().join("bad.json");
        tokio::fs::write(&path, b"{\"timestamp\": oops}").await.unwrap();

        let outcome = fx.pipeline.process_file(&path).await;
        assert_eq!(
            outcome,
            IngestOutcome::Quarantined {
                target: fx.dir.path().join("quarantine/bad.json")
            }
        );
        assert!(!path.exists());
        assert!(fx.dir.path().join("quarantine/bad.json.error").exists());
        assert!(fx.cache.is_empty().await);
        assert_eq!(fx.reports.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(fx.pipeline.stats().snapshot().quarantined, 1);
    }

    #[tokio::test]
    async fn test_missing_field_quarantined() {
        let fx = fixture(0).await;
        let path = fx.dir.path().join("partial.json");
        tokio::fs::write(&path, br#"{"timestamp": "2024-05-01T12:00:00Z", "batch_id": "B1"}"#)
            .await
            .unwrap();

        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Quarantined { .. }
        ));
        let reason =
            tokio::fs::read_to_string(fx.dir.path().join("quarantine/partial.json.error"))
                .await
                .unwrap();
        assert!(reason.contains("temperature_celsius"));
    }

    #[tokio::test]
    async fn test_durable_failure_keeps_file_then_retry_commits_once() {
        let fx = fixture(1).await;
        let path = fx.dir.path().join("report_2.json");
        tokio::fs::write(&path, report_json("2024-05-01T12:00:01Z", "B002-STOUT"))
            .await
            .unwrap();

        assert_eq!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Deferred { attempts: 1 }
        );
        assert!(path.exists());
        // cache was written before the durable failure
        assert_eq!(fx.cache.len().await, 1);

        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Committed { .. }
        ));
        assert!(!path.exists());
        assert_eq!(fx.cache.len().await, 1);
        assert_eq!(fx.reports.count(&ReportFilter::default()).await.unwrap(), 1);

        let stats = fx.pipeline.stats().snapshot();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_quarantined_after_max_attempts() {
        let fx = fixture(u32::MAX).await;
        let path = fx.dir.path().join("report_3.json");
        tokio::fs::write(&path, report_json("2024-05-01T12:00:02Z", "B1"))
            .await
            .unwrap();

        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Deferred { attempts: 1 }
        ));
        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Deferred { attempts: 2 }
        ));
        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Quarantined { .. }
        ));
        let reason =
            tokio::fs::read_to_string(fx.dir.path().join("quarantine/report_3.json.error"))
                .await
                .unwrap();
        assert!(reason.contains("durable write failed"));
        assert!(reason.contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn test_incomplete_file_deferred() {
        let fx = fixture(0).await;
        let path = fx.dir.path().join("writing.json");
        tokio::fs::write(&path, b"{\"timestamp\": \"2024-05-01T12:00:00Z\",")
            .await
            .unwrap();

        assert_eq!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Deferred { attempts: 1 }
        );
        assert!(path.exists());

        tokio::fs::write(&path, report_json("2024-05-01T12:00:00Z", "B1"))
            .await
            .unwrap();
        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Committed { .. }
        ));
    }

    #[tokio::test]
    async fn test_vanished_file_skipped() {
        let fx = fixture(0).await;
        let outcome = fx
            .pipeline
            .process_file(&fx.dir.path().join("never_existed.json"))
            .await;
        assert_eq!(outcome, IngestOutcome::Skipped);
        assert_eq!(fx.pipeline.stats().snapshot(), Default::default());
    }

    #[tokio::test]
    async fn test_duplicate_content_duplicates_document_not_cache_entry() {
        let fx = fixture(0).await;
        for name in ["a.json", "b.json"] {
            let path = fx.dir.path().join(name);
            tokio::fs::write(&path, report_json("2024-05-01T12:00:00Z", "B1"))
                .await
                .unwrap();
            fx.pipeline.process_file(&path).await;
        }
        assert_eq!(fx.cache.len().await, 1);
        assert_eq!(fx.reports.count(&ReportFilter::default()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_timed_out_write_that_lands_is_not_duplicated() {
        let dir = tempdir().unwrap();
        let storage = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        let reports = Arc::new(LingeringStore::new(
            storage.reports.clone(),
            Duration::from_millis(100),
        ));
        let pipeline = IngestPipeline::new(
            Arc::new(MemoryCache::new()),
            reports.clone(),
            dir.path().join("quarantine"),
        )
        .with_write_timeout(Duration::from_millis(20));

        let path = dir.path().join("slow.json");
        tokio::fs::write(&path, report_json("2024-05-01T12:00:03Z", "B1"))
            .await
            .unwrap();

        assert_eq!(
            pipeline.process_file(&path).await,
            IngestOutcome::Deferred { attempts: 1 }
        );
        // let the abandoned write finish
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(reports.count(&ReportFilter::default()).await.unwrap(), 1);

        let IngestOutcome::Committed { id, .. } = pipeline.process_file(&path).await else {
            panic!("retry did not commit");
        };
        let stored = reports
            .find(&ReportFilter::default(), FindWindow::all())
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_same_file_dropped_again_is_a_new_document() {
        let fx = fixture(0).await;
        let path = fx.dir.path().join("again.json");
        for minute in [1, 2] {
            tokio::fs::write(&path, report_json("2024-05-01T12:00:04Z", "B1"))
                .await
                .unwrap();
            let mtime = UNIX_EPOCH + Duration::from_secs(1_714_564_800 + minute * 60);
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
            assert!(matches!(
                fx.pipeline.process_file(&path).await,
                IngestOutcome::Committed { .. }
            ));
        }
        assert_eq!(fx.reports.count(&ReportFilter::default()).await.unwrap(), 2);
    }

    #[test]
    fn test_source_key_identifies_one_arrival() {
        let t1 = Some(UNIX_EPOCH + Duration::from_secs(100));
        let t2 = Some(UNIX_EPOCH + Duration::from_secs(101));
        let key = |name: &str, t, body: &[u8]| source_key(Path::new(name), t, body);

        assert_eq!(key("/in/a.json", t1, b"{}"), key("/in/a.json", t1, b"{}"));
        assert_ne!(key("/in/a.json", t1, b"{}"), key("/in/a.json", t2, b"{}"));
        assert_ne!(key("/in/a.json", t1, b"{}"), key("/in/b.json", t1, b"{}"));
        assert_ne!(key("/in/a.json", t1, b"{}"), key("/in/a.json", t1, b"[]"));
    }

    #[tokio::test]
    async fn test_incomplete_file_quarantined_at_attempt_limit() {
        let fx = fixture(0).await;
        let path = fx.dir.path().join("stuck.json");
        tokio::fs::write(&path, b"").await.unwrap();

        for attempt in 1..3 {
            assert_eq!(
                fx.pipeline.process_file(&path).await,
                IngestOutcome::Deferred { attempts: attempt }
            );
        }
        assert!(matches!(
            fx.pipeline.process_file(&path).await,
            IngestOutcome::Quarantined { .. }
        ));
        let reason = tokio::fs::read_to_string(fx.dir.path().join("quarantine/stuck.json.error"))
            .await
            .unwrap();
        assert!(reason.contains("incomplete"));
        assert!(reason.contains("after 3 attempts"));
    }
}
