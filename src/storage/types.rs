//! Core data types for the storage layer.
//!
//! - [`SensorReport`]: One validated sensor reading, the unit flowing through the system
//! - [`StoredReport`]: A report as persisted in the document store, with its row id
//! - [`ReportFilter`]: Equality predicates for document store lookups
//! - [`FindWindow`]: Offset/limit slice over an ordered result set

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key namespace for reports held in the cache store.
pub const CACHE_KEY_PREFIX: &str = "sensor_data:";

/// Name under which a stored report carries its document id. Report payloads
/// may not use it.
pub const DOCUMENT_ID_FIELD: &str = "_id";

/// A validated sensor report.
///
/// Measurements are not range-checked; out-of-range readings are stored as-is.
/// Fields beyond the required set are preserved in `extra` and written back out
/// unchanged.
///
/// # Example
///
/// ```
/// use brewlog::SensorReport;
/// use chrono::{TimeZone, Utc};
///
/// let report = SensorReport::new(
///     Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
///     "B001-LAGER",
///     20.1,
///     14.9,
///     2.4,
/// );
/// assert_eq!(report.cache_key(), "sensor_data:2024-05-01T12:00:00.000000Z");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    /// Instant the reading was taken, normalized to UTC.
    pub timestamp: DateTime<Utc>,
    /// Brewing batch the reading belongs to.
    pub batch_id: String,
    /// Wort/beer temperature in °C.
    pub temperature_celsius: f64,
    /// Vessel pressure in psi.
    pub pressure_psi: f64,
    /// Dissolved CO2 in volumes.
    pub co2_vol: f64,
    /// Additional fields carried through from the source payload.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SensorReport {
    /// Create a report with no extra fields.
    pub fn new(
        timestamp: DateTime<Utc>,
        batch_id: impl Into<String>,
        temperature_celsius: f64,
        pressure_psi: f64,
        co2_vol: f64,
    ) -> Self {
        Self {
            timestamp,
            batch_id: batch_id.into(),
            temperature_celsius,
            pressure_psi,
            co2_vol,
            extra: Map::new(),
        }
    }

    /// Cache key for this report: `sensor_data:` followed by the RFC 3339 timestamp.
    ///
    /// The timestamp is rendered with a fixed microsecond precision and a `Z`
    /// suffix, so keys sort lexicographically in time order and the same instant
    /// written with different offsets maps to a single key.
    ///
    /// Keys resolve to the microsecond. Reports less than a microsecond apart
    /// share a key and the later write replaces the earlier one in the cache;
    /// both are still kept in the document store.
    pub fn cache_key(&self) -> String {
        format!(
            "{}{}",
            CACHE_KEY_PREFIX,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

/// A report as read back from the document store.
///
/// Serializes as the report's own fields plus `_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    /// Store-assigned document id (insertion order).
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(flatten)]
    pub report: SensorReport,
}

/// Equality filter for document store lookups. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub batch_id: Option<String>,
}

impl ReportFilter {
    /// Filter on a single batch.
    pub fn batch(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
        }
    }

    /// Whether a report satisfies this filter.
    pub fn matches(&self, report: &SensorReport) -> bool {
        self.batch_id
            .as_deref()
            .is_none_or(|batch| batch == report.batch_id)
    }
}

/// Slice of an ordered result set. `limit: None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindWindow {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl FindWindow {
    /// Every matching document.
    pub fn all() -> Self {
        Self::default()
    }

    /// A page-sized slice starting at `offset`.
    pub fn slice(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}
