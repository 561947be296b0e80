//! Ingestion runtime: watcher, sweeper and worker tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::ingest::error::IngestError;
use crate::ingest::pipeline::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WRITE_TIMEOUT, IngestPipeline};
use crate::ingest::queue::{Submit, WorkQueue};
use crate::ingest::stats::IngestStats;
use crate::ingest::watcher::{scan_dir, watch_dir};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the quarantine directory created inside the watched directory
/// when none is configured.
pub const DEFAULT_QUARANTINE_DIR_NAME: &str = "quarantine";

fn default_watch_dir() -> PathBuf {
    PathBuf::from("incoming_reports")
}

fn default_extension() -> String {
    "json".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_write_timeout() -> Duration {
    DEFAULT_WRITE_TIMEOUT
}

/// Configuration for the ingestion runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Directory watched for report files (default: "incoming_reports").
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    /// Report file extension, matched case-insensitively (default: "json").
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Where rejected files go (default: `<watch_dir>/quarantine`).
    #[serde(default)]
    pub quarantine_dir: Option<PathBuf>,
    /// Worker tasks draining the queue (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum queued paths (default: 256).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Interval between directory sweeps (default: 30s).
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Attempts before a file is quarantined (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Deadline for each store write (default: 5s).
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::new(default_watch_dir())
    }
}

impl IngestConfig {
    /// Create a configuration watching `watch_dir` with default settings.
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            extension: default_extension(),
            quarantine_dir: None,
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            retry_interval: default_retry_interval(),
            max_attempts: default_max_attempts(),
            write_timeout: default_write_timeout(),
        }
    }

    /// Effective quarantine directory.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.quarantine_dir
            .clone()
            .unwrap_or_else(|| self.watch_dir.join(DEFAULT_QUARANTINE_DIR_NAME))
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the sweep interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the quarantine directory.
    pub fn with_quarantine_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.quarantine_dir = Some(dir.into());
        self
    }
}

/// Entry point for the ingestion runtime.
#[derive(Debug)]
pub struct IngestService {
    config: IngestConfig,
    pipeline: Arc<IngestPipeline>,
}

impl IngestService {
    pub fn new(config: IngestConfig, pipeline: IngestPipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Spawn the watcher, the sweeper and the workers.
    ///
    /// Creates the watched directory if needed. Files already present are
    /// picked up by the first sweep, which runs immediately.
    pub async fn start(self) -> Result<IngestHandle, IngestError> {
        let Self { config, pipeline } = self;

        tokio::fs::create_dir_all(&config.watch_dir)
            .await
            .map_err(|source| IngestError::WatchDir {
                path: config.watch_dir.clone(),
                source,
            })?;

        let (queue, rx) = WorkQueue::new(config.queue_capacity);
        let watcher = watch_dir(&config.watch_dir, &config.extension, queue.clone())?;

        let cancel = CancellationToken::new();
        let rx = Arc::new(Mutex::new(rx));
        let mut tasks = JoinSet::new();

        let workers = config.workers.max(1);
        for worker in 0..workers {
            tasks.spawn(run_worker(
                worker,
                Arc::clone(&rx),
                queue.clone(),
                Arc::clone(&pipeline),
                cancel.clone(),
            ));
        }
        tasks.spawn(run_sweeper(
            config.watch_dir.clone(),
            config.extension.clone(),
            config.retry_interval,
            queue,
            cancel.clone(),
        ));

        tracing::info!(
            dir = %config.watch_dir.display(),
            quarantine = %pipeline.quarantine_dir().display(),
            workers,
            queue_capacity = config.queue_capacity,
            retry_interval = ?config.retry_interval,
            "Ingestion started"
        );

        Ok(IngestHandle {
            cancel,
            tasks,
            watcher: Some(watcher),
            stats: pipeline.stats(),
        })
    }
}

/// Handle to a running ingestion runtime.
pub struct IngestHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    watcher: Option<RecommendedWatcher>,
    stats: Arc<IngestStats>,
}

impl std::fmt::Debug for IngestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestHandle")
            .field("tasks", &self.tasks.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl IngestHandle {
    /// Shared ingestion counters.
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Stop everything with the default timeout.
    pub async fn shutdown(self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Stop watching, let in-flight files finish, then stop the tasks.
    ///
    /// Tasks still running after `timeout` are aborted.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) {
        drop(self.watcher.take());
        self.cancel.cancel();

        let drained = tokio::time::timeout(timeout, async {
            while let Some(res) = self.tasks.join_next().await {
                if let Err(e) = res
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "Ingest task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "Ingestion shutdown timed out");
            self.tasks.abort_all();
        } else {
            tracing::info!("Ingestion shutdown complete");
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    queue: WorkQueue,
    pipeline: Arc<IngestPipeline>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            path = async { rx.lock().await.recv().await } => path,
        };
        let Some(path) = next else {
            break;
        };

        let outcome = pipeline.process_file(&path).await;
        tracing::trace!(worker, path = %path.display(), ?outcome, "File handled");

        if queue.finish(&path) && file_exists(&path).await {
            // Another event arrived mid-attempt; give the file one more pass.
            // A full queue leaves it to the next sweep.
            let _ = queue.try_submit(path);
        }
    }
    tracing::debug!(worker, "Ingest worker stopped");
}

async fn run_sweeper(
    dir: PathBuf,
    extension: String,
    interval: Duration,
    queue: WorkQueue,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let paths = match scan_dir(&dir, &extension).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Directory sweep failed");
                continue;
            }
        };
        if paths.is_empty() {
            continue;
        }

        let found = paths.len();
        let mut queued = 0usize;
        for path in paths {
            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                submitted = queue.submit(path) => submitted,
            };
            match submitted {
                Submit::Queued => queued += 1,
                Submit::Coalesced | Submit::Full => {}
                Submit::Closed => return,
            }
        }
        tracing::debug!(dir = %dir.display(), found, queued, "Directory swept");
    }
    tracing::debug!("Directory sweeper stopped");
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
