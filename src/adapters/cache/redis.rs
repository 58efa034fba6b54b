//! Shared cache backed by Redis, so multiple gateway instances observe the
//! same entries and invalidations.
//!
//! Keys are namespaced under a fixed prefix; `clear` walks that namespace
//! with SCAN rather than flushing the database, since the same Redis may
//! also back the rate limiter.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    metrics::set_cache_hit_ratio,
    ports::cache::{Cache, CacheError, CacheResult},
};

const KEY_PREFIX: &str = "gantry:cache:";

pub struct RedisCache {
    manager: ConnectionManager,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisCache {
    /// Connect and verify the connection with a ping.
    pub async fn connect(address: &str, password: &str, db: i64) -> CacheResult<Self> {
        let url = if password.is_empty() {
            format!("redis://{address}/{db}")
        } else {
            format!("redis://:{password}@{address}/{db}")
        };

        let client =
            redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let cache = Self {
            manager,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        cache.ping().await?;

        tracing::info!(address, db, "connected to Redis cache");
        Ok(cache)
    }

    /// Build directly from an existing connection manager.
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self {
            manager,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn full_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        set_cache_hit_ratio(
            "redis",
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        );
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn
            .get(Self::full_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        self.record(value.is_some());
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(Self::full_key(key), value, ttl_secs)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .del(Self::full_key(key))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let pattern = format!("{KEY_PREFIX}*");
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            if !keys.is_empty() {
                let _: i64 = conn
                    .del(keys)
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply: {pong}")))
        }
    }
}
