//! Report payload validation.
//!
//! Turns raw file bytes into a [`SensorReport`], checking that `timestamp`,
//! `batch_id` and every measurement field are present and well typed.
//! Measurement values are not range-checked. Unknown fields are kept.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::{DOCUMENT_ID_FIELD, SensorReport};

/// Why a report payload was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Payload ends early (empty or truncated file). The file may still be
    /// being written, so the pipeline retries it (up to its attempt limit)
    /// before quarantining it. Every other variant is quarantined at once.
    #[error("report content is incomplete: {0}")]
    Incomplete(#[source] serde_json::Error),

    /// Payload is not valid JSON.
    #[error("malformed report: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("report must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A required field is absent or null.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A required field has the wrong type or an unusable value.
    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// Payload uses a field name reserved for the stored document.
    #[error("field '{0}' is reserved")]
    ReservedField(&'static str),

    /// `timestamp` is not an ISO-8601 instant with a timezone.
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

impl ValidationError {
    /// Whether the payload looked cut short rather than wrong.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete(_))
    }
}

/// Parse and validate a raw report payload.
///
/// # Example
///
/// ```
/// use brewlog::ingest::validate_report;
///
/// let raw = br#"{
///     "timestamp": "2024-05-01T14:00:00.250000+02:00",
///     "batch_id": "B001-LAGER",
///     "temperature_celsius": 19.8,
///     "pressure_psi": 14.9,
///     "co2_vol": 2.41
/// }"#;
/// let report = validate_report(raw).unwrap();
/// assert_eq!(report.cache_key(), "sensor_data:2024-05-01T12:00:00.250000Z");
/// ```
pub fn validate_report(bytes: &[u8]) -> Result<SensorReport, ValidationError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        if e.is_eof() {
            ValidationError::Incomplete(e)
        } else {
            ValidationError::Malformed(e)
        }
    })?;

    let mut fields = match value {
        Value::Object(map) => map,
        other => return Err(ValidationError::NotAnObject(json_type_name(&other))),
    };
    if fields.contains_key(DOCUMENT_ID_FIELD) {
        return Err(ValidationError::ReservedField(DOCUMENT_ID_FIELD));
    }

    let timestamp = match take_required(&mut fields, "timestamp")? {
        Value::String(raw) => parse_timestamp(&raw)?,
        _ => {
            return Err(ValidationError::InvalidField {
                field: "timestamp",
                expected: "an ISO-8601 string",
            });
        }
    };

    let batch_id = match take_required(&mut fields, "batch_id")? {
        Value::String(batch) if !batch.trim().is_empty() => batch,
        _ => {
            return Err(ValidationError::InvalidField {
                field: "batch_id",
                expected: "a non-empty string",
            });
        }
    };

    let temperature_celsius = take_number(&mut fields, "temperature_celsius")?;
    let pressure_psi = take_number(&mut fields, "pressure_psi")?;
    let co2_vol = take_number(&mut fields, "co2_vol")?;

    Ok(SensorReport {
        timestamp,
        batch_id,
        temperature_celsius,
        pressure_psi,
        co2_vol,
        extra: fields,
    })
}

fn take_required(
    fields: &mut Map<String, Value>,
    name: &'static str,
) -> Result<Value, ValidationError> {
    match fields.remove(name) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

fn take_number(
    fields: &mut Map<String, Value>,
    name: &'static str,
) -> Result<f64, ValidationError> {
    take_required(fields, name)?
        .as_f64()
        .ok_or(ValidationError::InvalidField {
            field: name,
            expected: "a number",
        })
}

/// Parse an ISO-8601 timestamp that carries a timezone, normalized to UTC.
///
/// Accepts strict RFC 3339 as well as the common variant with a space between
/// date and time. Timestamps without an offset are rejected, since they do not
/// name an absolute instant.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    let parsed =
        DateTime::parse_from_rfc3339(raw).or_else(|_| raw.parse::<DateTime<FixedOffset>>());

    match parsed {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(e) => {
            let reason = if raw.parse::<NaiveDateTime>().is_ok() {
                "missing timezone offset".to_string()
            } else {
                e.to_string()
            };
            Err(ValidationError::InvalidTimestamp {
                value: raw.to_string(),
                reason,
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
