//! Configuration module for brewlog.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (URL, pool size)
//! - Cache settings (backend, TTL, janitor interval)
//! - Ingestion settings (watched directory, workers, retries, quarantine)
//! - Query settings (realtime limit, page sizes, store timeout)

mod app;
mod validation;

pub use app::{AppConfig, CacheConfig, DatabaseConfig, ServerConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_DATABASE_URL, DEFAULT_PURGE_INTERVAL};
