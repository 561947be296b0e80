//! brewlog Binary Entry Point
//!
//! Runs the report watcher, the cache janitor and the query API in one process.
//! Core functionality is provided by the `brewlog` library crate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use brewlog::{
    config::{AppConfig, parse_duration},
    ingest::{IngestHandle, IngestPipeline, IngestService},
    query::{HistoricalQueryService, RealtimeQueryService},
    server::{AppState, create_router},
    storage::{StorageBuilder, StorageHandles, spawn_cache_janitor},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// brewlog - Brewing Sensor Report Ingestion
#[derive(Parser, Debug)]
#[command(name = "brewlog", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "BREWLOG_CONFIG"
    )]
    config: PathBuf,

    /// Server bind address (overrides config file)
    #[arg(long, env = "BREWLOG_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "BREWLOG_SERVER_PORT")]
    server_port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(long, env = "BREWLOG_DB_URL")]
    db_url: Option<String>,

    /// Directory watched for report files (overrides config file)
    #[arg(long, env = "BREWLOG_WATCH_DIR")]
    watch_dir: Option<PathBuf>,

    /// Cache entry lifetime, e.g. "3d" or "12h" (overrides config file)
    #[arg(long, env = "BREWLOG_CACHE_TTL", value_parser = parse_duration)]
    cache_ttl: Option<Duration>,
}

impl Cli {
    /// Apply CLI/env overrides (CLI > ENV > config file).
    fn apply(self, config: &mut AppConfig) {
        if let Some(bind) = self.server_bind {
            config.server.bind = bind;
        }
        if let Some(port) = self.server_port {
            config.server.port = port;
        }
        if let Some(url) = self.db_url {
            config.database.url = url;
        }
        if let Some(dir) = self.watch_dir {
            config.ingest.watch_dir = dir;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache.ttl = ttl;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,brewlog=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("brewlog - Brewing Sensor Report Ingestion");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    tracing::info!(path = %cli.config.display(), "Loading configuration");
    let mut config = AppConfig::load_or_default(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!(
        server = %format!("{}:{}", config.server.bind, config.server.port),
        database = %config.database.url,
        cache = %config.cache.backend,
        watch_dir = %config.ingest.watch_dir.display(),
        "Configuration loaded"
    );

    // Build storage layer
    let handles = StorageBuilder::new(&config.database.url)
        .max_connections(config.database.max_connections)
        .cache_backend(config.cache.backend)
        .build()
        .await?;

    // Background tasks
    let cancel = CancellationToken::new();
    let janitor = spawn_cache_janitor(
        handles.cache.clone(),
        config.cache.purge_interval,
        cancel.clone(),
    );

    let pipeline = IngestPipeline::new(
        handles.cache.clone(),
        handles.reports.clone(),
        config.ingest.quarantine_dir(),
    )
    .with_cache_ttl(config.cache.ttl)
    .with_write_timeout(config.ingest.write_timeout)
    .with_max_attempts(config.ingest.max_attempts);
    let ingest = IngestService::new(config.ingest.clone(), pipeline)
        .start()
        .await?;

    // Create web server state
    let app_state = AppState {
        realtime: RealtimeQueryService::new(handles.cache.clone(), &config.query),
        historical: HistoricalQueryService::new(handles.reports.clone(), &config.query),
        reports: handles.reports.clone(),
        ingest_stats: ingest.stats(),
    };

    // Build Axum router
    let app = create_router(app_state);

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ingest, cancel))
        .await?;

    if let Err(e) = janitor.await {
        tracing::warn!(error = %e, "Cache janitor did not stop cleanly");
    }
    shutdown_storage(handles).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then stop ingestion and background tasks.
async fn shutdown_signal(ingest: IngestHandle, cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Shutting down ingestion...");
    ingest.shutdown().await;
    cancel.cancel();
}

async fn shutdown_storage(handles: StorageHandles) {
    tracing::info!("Shutting down storage...");
    if let Err(e) = handles.shutdown().await {
        tracing::error!("Failed to shutdown storage: {}", e);
    }
}
