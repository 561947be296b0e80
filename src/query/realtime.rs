//! Realtime query over the cache store.

use std::sync::Arc;
use std::time::Duration;

use crate::query::{QueryConfig, QueryError};
use crate::storage::{CACHE_KEY_PREFIX, CacheStore, SensorReport, StorageError, with_deadline};

/// Serves the most recent reports still held in the cache.
///
/// The read is a scan followed by batch fetches; entries that expire in
/// between are skipped, so the result is a best-effort snapshot rather than a
/// consistent one.
#[derive(Clone)]
pub struct RealtimeQueryService {
    cache: Arc<dyn CacheStore>,
    limit: usize,
    timeout: Duration,
}

impl std::fmt::Debug for RealtimeQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeQueryService")
            .field("cache", &self.cache.backend())
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RealtimeQueryService {
    pub fn new(cache: Arc<dyn CacheStore>, config: &QueryConfig) -> Self {
        Self {
            cache,
            limit: config.realtime_limit,
            timeout: config.store_timeout,
        }
    }

    /// Up to `realtime_limit` cached reports, newest first.
    ///
    /// An empty cache yields an empty list. A store failure, a timeout or an
    /// undecodable cached value yields an error, never a partial list.
    pub async fn latest(&self) -> Result<Vec<SensorReport>, QueryError> {
        with_deadline(self.timeout, self.collect_latest())
            .await
            .map_err(QueryError::from)
    }

    async fn collect_latest(&self) -> Result<Vec<SensorReport>, StorageError> {
        if self.limit == 0 {
            return Ok(Vec::new());
        }

        let mut keys = self.cache.scan(CACHE_KEY_PREFIX).await?;
        // Keys embed a fixed-width UTC timestamp, so reverse lexical order is
        // newest first. Fetch in limit-sized chunks until enough are live.
        keys.sort_unstable_by(|a, b| b.cmp(a));

        let mut reports = Vec::with_capacity(self.limit.min(keys.len()));
        for chunk in keys.chunks(self.limit) {
            let values = self.cache.get_many(chunk).await?;
            for (key, value) in chunk.iter().zip(values) {
                let Some(value) = value else {
                    continue;
                };
                let report: SensorReport = serde_json::from_str(&value).map_err(|e| {
                    StorageError::InvalidData(format!("cached value under '{key}': {e}"))
                })?;
                reports.push(report);
            }
            if reports.len() >= self.limit {
                break;
            }
        }

        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        reports.truncate(self.limit);
        Ok(reports)
    }
}
