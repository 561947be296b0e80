//! Key-value cache with per-key expiration.
//!
//! The cache holds serialized recent reports under `sensor_data:<timestamp>`
//! keys. Every entry carries its own deadline; once past it the entry is
//! invisible to `get`, `get_many` and `scan` even before it is purged.
//!
//! Backends:
//! - [`MemoryCache`]: in-process map, the default
//! - [`SqliteCache`](crate::storage::SqliteCache): table-backed, shareable across processes

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::storage::StorageError;

/// Cache store capability used by the ingestion pipeline and realtime queries.
///
/// Operations are independent per key; there is no ordering or transactional
/// guarantee across keys.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Store `value` under `key`, replacing any previous value and deadline.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Fetch the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Fetch several keys at once. The result is positionally aligned with
    /// `keys`; absent or expired keys yield `None`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// List all unexpired keys starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Drop expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, StorageError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process cache backed by a `RwLock<HashMap>`.
///
/// Deadlines use `tokio::time::Instant`, so tests can drive expiry with a
/// paused runtime clock.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let expires_at = Instant::now() + ttl;
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok((before - entries.len()) as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("sensor_data:a", "one", TTL).await.unwrap();

        assert_eq!(
            cache.get("sensor_data:a").await.unwrap().as_deref(),
            Some("one")
        );
        assert_eq!(cache.get("sensor_data:missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites_value() {
        let cache = MemoryCache::new();
        cache.set("k", "first", TTL).await.unwrap();
        cache.set("k", "second", TTL).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("second"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.scan("").await.unwrap(), vec!["k".to_string()]);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.scan("").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_resets_deadline() {
        let cache = MemoryCache::new();
        cache.set("k", "v1", TTL).await.unwrap();
        tokio::time::advance(TTL / 2).await;
        cache.set("k", "v2", TTL).await.unwrap();
        tokio::time::advance(TTL / 2 + Duration::from_secs(1)).await;

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_scan_filters_by_prefix() {
        let cache = MemoryCache::new();
        cache.set("sensor_data:1", "a", TTL).await.unwrap();
        cache.set("sensor_data:2", "b", TTL).await.unwrap();
        cache.set("session:1", "c", TTL).await.unwrap();

        let mut keys = cache.scan("sensor_data:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["sensor_data:1", "sensor_data:2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_many_preserves_positions() {
        let cache = MemoryCache::new();
        cache.set("a", "1", TTL).await.unwrap();
        cache.set("short", "2", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let keys = vec!["a".to_string(), "short".to_string(), "nope".to_string()];
        let values = cache.get_many(&keys).await.unwrap();
        assert_eq!(values, vec![Some("1".to_string()), None, None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set("old", "x", Duration::from_secs(1)).await.unwrap();
        cache.set("new", "y", TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }
}
