//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ingest::{DEFAULT_CACHE_TTL, IngestConfig};
use crate::query::QueryConfig;
use crate::storage::CacheBackend;
use crate::storage::db::DEFAULT_MAX_CONNECTIONS;

use super::validation::{ConfigError, ensure, ensure_nonzero, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/brewlog.db?mode=rwc";

/// Default interval between expired cache entry purges (1 minute).
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_purge_interval() -> Duration {
    DEFAULT_PURGE_INTERVAL
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL. `${VAR}` and `${VAR:-default}` are expanded on load.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Connection pool size (default: 5).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Realtime cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache backend (default: memory).
    #[serde(default)]
    pub backend: CacheBackend,

    /// Lifetime of each cached report (default: 3d).
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// How often expired entries are purged (default: 1m).
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl: default_cache_ttl(),
            purge_interval: default_purge_interval(),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
///
/// Every section is optional; an empty document yields the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server configuration.
    pub server: ServerConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// Realtime cache configuration.
    pub cache: CacheConfig,

    /// Report ingestion configuration.
    pub ingest: IngestConfig,

    /// Query service configuration.
    pub query: QueryConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Load configuration, falling back to defaults if the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse, expand and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.database.url = expand_env_vars(&config.database.url)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Server
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;
        ensure(self.server.port != 0, "server port must be non-zero")?;

        // Database
        ensure(
            self.database.url.starts_with("sqlite:"),
            format!(
                "database url must be a sqlite URL, got '{}'",
                self.database.url
            ),
        )?;
        ensure(
            self.database.max_connections > 0,
            "database max_connections must be positive",
        )?;

        // Cache
        ensure_nonzero(self.cache.ttl, "cache ttl")?;
        ensure_nonzero(self.cache.purge_interval, "cache purge_interval")?;

        // Ingest
        let ingest = &self.ingest;
        ensure(
            !ingest.watch_dir.as_os_str().is_empty(),
            "ingest watch_dir must not be empty",
        )?;
        ensure(
            !ingest.extension.is_empty() && !ingest.extension.contains('.'),
            format!(
                "ingest extension must be a bare extension like 'json', got '{}'",
                ingest.extension
            ),
        )?;
        ensure(
            ingest.quarantine_dir() != ingest.watch_dir,
            "ingest quarantine_dir must differ from watch_dir",
        )?;
        ensure(ingest.workers > 0, "ingest workers must be positive")?;
        ensure(
            ingest.queue_capacity > 0,
            "ingest queue_capacity must be positive",
        )?;
        ensure(
            ingest.max_attempts > 0,
            "ingest max_attempts must be positive",
        )?;
        ensure_nonzero(ingest.retry_interval, "ingest retry_interval")?;
        ensure_nonzero(ingest.write_timeout, "ingest write_timeout")?;

        // Query
        let query = &self.query;
        ensure(
            query.realtime_limit > 0,
            "query realtime_limit must be positive",
        )?;
        ensure(
            query.max_page_size > 0,
            "query max_page_size must be positive",
        )?;
        ensure(
            (1..=query.max_page_size).contains(&query.default_page_size),
            format!(
                "query default_page_size must be between 1 and max_page_size ({})",
                query.max_page_size
            ),
        )?;
        ensure_nonzero(query.store_timeout, "query store_timeout")?;

        Ok(())
    }
}
