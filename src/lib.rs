//! brewlog - Brewing Sensor Report Ingestion
//!
//! This crate provides the core functionality for the brewlog service. It can
//! be used as a library, or run as a standalone binary with the `brewlog`
//! executable.
//!
//! # Architecture
//!
//! - **Ingest**: Directory watcher, validator and commit pipeline with quarantine
//! - **Storage**: TTL cache (memory or SQLite) and SQLite document store
//! - **Query**: Realtime (cache) and paginated historical (document store) reads
//! - **Server**: JSON API over the query services
//!
//! # Example
//!
//! ```rust,no_run
//! use brewlog::{IngestConfig, IngestPipeline, IngestService, StorageBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = StorageBuilder::new("sqlite:data/brewlog.db?mode=rwc")
//!         .build()
//!         .await?;
//!
//!     let config = IngestConfig::new("incoming_reports");
//!     let pipeline = IngestPipeline::new(
//!         storage.cache.clone(),
//!         storage.reports.clone(),
//!         config.quarantine_dir(),
//!     );
//!     let ingest = IngestService::new(config, pipeline).start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     ingest.shutdown().await;
//!     storage.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ingest;
pub mod query;
pub mod server;
pub mod storage;

pub use config::{AppConfig, ConfigError};
pub use ingest::{
    IngestConfig, IngestError, IngestHandle, IngestPipeline, IngestService, IngestStats,
    ValidationError, validate_report,
};
pub use query::{
    HistoricalQuery, HistoricalQueryService, Page, QueryConfig, QueryError, RealtimeQueryService,
};
pub use storage::{
    CacheBackend, CacheStore, DurableStore, SensorReport, StorageBuilder, StorageError,
    StorageHandles, StoredReport,
};
