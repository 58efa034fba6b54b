//! In-process cache: a keyed map with absolute per-entry expiry and a
//! background sweep. Serves only the current process; multi-instance
//! deployments that need shared invalidations use the Redis adapter.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{
    metrics::set_cache_hit_ratio,
    ports::cache::{Cache, CacheResult},
};

struct Entry {
    value: String,
    expires_at: Instant,
}

pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a cache and, when a Tokio runtime is available, spawn the
    /// background sweep removing expired entries every `cleanup_interval`.
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries: Arc<RwLock<HashMap<String, Entry>>> = Arc::new(RwLock::new(HashMap::new()));

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sweep_entries = entries.clone();
            handle.spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval.max(Duration::from_secs(1)));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let now = Instant::now();
                    let mut map = sweep_entries.write().expect("cache lock poisoned");
                    let before = map.len();
                    map.retain(|_, entry| entry.expires_at > now);
                    let swept = before - map.len();
                    if swept > 0 {
                        tracing::debug!(swept, "memory cache sweep");
                    }
                }
            });
        }

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        set_cache_hit_ratio("memory", hits, self.misses.load(Ordering::Relaxed));
    }

    fn record_miss(&self) {
        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        set_cache_hit_ratio("memory", self.hits.load(Ordering::Relaxed), misses);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        let expired = {
            let map = self.entries.read().expect("cache lock poisoned");
            match map.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    self.record_hit();
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut map = self.entries.write().expect("cache lock poisoned");
            map.remove(key);
        }

        self.record_miss();
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut map = self.entries.write().expect("cache lock poisoned");
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut map = self.entries.write().expect("cache lock poisoned");
        map.remove(key);
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut map = self.entries.write().expect("cache lock poisoned");
        map.clear();
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        // Memory is always reachable.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::cache::{get_json, set_json};

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache
            .set_raw("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache
            .set_raw("k", "v".to_string(), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get_raw("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache
            .set_raw("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        for i in 0..5 {
            cache
                .set_raw(&format!("k{i}"), "v".to_string(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        cache.clear().await.unwrap();
        assert_eq!(cache.get_raw("k0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_structured_values_roundtrip_through_json() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let value = vec!["GET".to_string(), "POST".to_string()];

        set_json(&cache, "methods", &value, Duration::from_secs(60))
            .await
            .unwrap();
        let loaded: Option<Vec<String>> = get_json(&cache, "methods").await.unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported_as_hit_with_error() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        cache
            .set_raw("broken", "not-json{".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let result: CacheResult<Option<Vec<String>>> = get_json(&cache, "broken").await;
        assert!(matches!(
            result,
            Err(crate::ports::cache::CacheError::Decode { .. })
        ));
    }
}
