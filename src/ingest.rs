//! Report Ingestion
//!
//! Turns report files dropped into a watched directory into cache entries and
//! durable documents.
//!
//! # Components
//!
//! - [`validate_report`]: Payload parsing and validation
//! - [`IngestPipeline`]: Per-file commit (cache → durable store → delete) with quarantine
//! - [`IngestService`] / [`IngestHandle`]: Watcher, sweeper and worker tasks
//! - [`IngestStats`]: Counters exposed over HTTP

mod error;
mod pipeline;
mod quarantine;
mod queue;
mod service;
mod stats;
mod validator;
mod watcher;

pub use error::IngestError;
pub use pipeline::{
    DEFAULT_CACHE_TTL, DEFAULT_MAX_ATTEMPTS, DEFAULT_WRITE_TIMEOUT, IngestOutcome, IngestPipeline,
};
pub use quarantine::Quarantine;
pub use queue::{Submit, WorkQueue};
pub use service::{DEFAULT_SHUTDOWN_TIMEOUT, IngestConfig, IngestHandle, IngestService};
pub use stats::{IngestStats, IngestStatsSnapshot};
pub use validator::{ValidationError, validate_report};
pub use watcher::{is_report_file, scan_dir, watch_dir};
