//! Configuration validation utilities.

use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a human-readable, non-zero duration such as `30s`, `12h` or `3d`.
///
/// Used for CLI and environment overrides of the YAML duration fields, which
/// accept the same syntax.
///
/// ```
/// use brewlog::config::parse_duration;
///
/// assert_eq!(parse_duration("3d").unwrap().as_secs(), 259_200);
/// assert_eq!(parse_duration("1h 30m").unwrap().as_secs(), 5_400);
/// assert!(parse_duration("0s").is_err());
/// ```
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    let duration = humantime::parse_duration(trimmed)
        .map_err(|e| ConfigError::ValidationError(format!("invalid duration '{trimmed}': {e}")))?;
    ensure_nonzero(duration, &format!("duration '{trimmed}'"))?;
    Ok(duration)
}

/// Fail with a validation error unless `condition` holds.
pub(crate) fn ensure(condition: bool, message: impl Into<String>) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(message.into()))
    }
}

/// Fail unless `value` is a non-zero duration.
pub(crate) fn ensure_nonzero(value: Duration, name: &str) -> Result<(), ConfigError> {
    ensure(
        !value.is_zero(),
        format!("{name} must be greater than zero"),
    )
}

fn env_placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("placeholder pattern is valid")
    })
}

/// Substitute `${VAR}` and `${VAR:-default}` placeholders from the environment.
///
/// A variable that is unset and has no default is an error rather than an
/// empty string, so a database URL never silently loses its path.
pub fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();
    let expanded = env_placeholder()
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match (std::env::var(name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        })
        .into_owned();

    ensure(
        missing.is_empty(),
        format!("environment variable not set: {}", missing.join(", ")),
    )?;
    Ok(expanded)
}
