//! Data Cache
//!
//! Key-value cache with TTL used for query results of models declared with
//! `caching: "always"`. The core consumes it through the `DataCache` trait;
//! `MemoryDataCache` is the default in-process implementation.
//!
//! # Cache Invalidation
//!
//! - **Time-based**: entries expire after their TTL (configuration default
//!   `cacheTtlSecs`)
//! - **Event-driven**: after.save / after.remove drop every key of the model
//!   (`remove_prefix`)

use crate::services::DataError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Key-value cache capability
#[async_trait]
pub trait DataCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store a value; `None` uses the cache's default TTL
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), DataError>;

    async fn remove(&self, key: &str) -> Result<(), DataError>;

    /// Remove every key starting with `prefix`; returns the number removed
    async fn remove_prefix(&self, prefix: &str) -> Result<usize, DataError>;

    async fn clear(&self) -> Result<(), DataError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process `DataCache` backed by a `tokio::sync::RwLock<HashMap>`
#[derive(Debug, Clone)]
pub struct MemoryDataCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    default_ttl: Duration,
}

impl MemoryDataCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Number of live (non-expired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DataCache for MemoryDataCache {
    async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it
        let mut entries = self.entries.write().await;
        entries.remove(key);
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), DataError> {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), DataError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, DataError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<(), DataError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_set_get_remove() {
        let cache = MemoryDataCache::new(Duration::from_secs(60));
        assert_ok!(cache.set("/Person/a", json!([1]), None).await);
        assert_eq!(cache.get("/Person/a").await, Some(json!([1])));

        assert_ok!(cache.remove("/Person/a").await);
        assert_eq!(cache.get("/Person/a").await, None);
    }

    #[test]
    fn test_clear_drops_every_entry() {
        let cache = MemoryDataCache::new(Duration::from_secs(60));
        tokio_test::block_on(async {
            assert_ok!(cache.set("/Person/a", json!(1), None).await);
            assert_ok!(cache.set("/Order/a", json!(2), None).await);
            assert_eq!(cache.len().await, 2);

            assert_ok!(cache.clear().await);
            assert!(cache.is_empty().await);
        });
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MemoryDataCache::new(Duration::from_secs(60));
        cache
            .set("/Person/a", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("/Person/a").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let cache = MemoryDataCache::new(Duration::from_secs(60));
        cache.set("/Person/a", json!(1), None).await.unwrap();
        cache.set("/Person/b", json!(2), None).await.unwrap();
        cache.set("/Order/a", json!(3), None).await.unwrap();

        assert_eq!(cache.remove_prefix("/Person/").await.unwrap(), 2);
        assert_eq!(cache.len().await, 1);
    }
}
