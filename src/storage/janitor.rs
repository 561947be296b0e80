//! Periodic purge of expired cache entries.
//!
//! Expired entries are already invisible to readers; the janitor only bounds
//! memory and table growth.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::cache::CacheStore;

/// Spawn a task calling [`CacheStore::purge_expired`] every `interval` until
/// `cancel` fires.
pub fn spawn_cache_janitor(
    cache: Arc<dyn CacheStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => {
                    tracing::debug!(backend = cache.backend(), purged, "Expired cache entries purged")
                }
                Err(e) => tracing::warn!(backend = cache.backend(), error = %e, "Cache purge failed"),
            }
        }
        tracing::debug!("Cache janitor stopped");
    })
}
