//! Disabled-cache implementation: every read is a miss, writes are
//! discarded, ping always succeeds. Selected when caching is turned off in
//! configuration so the rest of the gateway never special-cases "no cache".

use std::time::Duration;

use async_trait::async_trait;

use crate::ports::cache::{Cache, CacheResult};

pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get_raw(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set_raw(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
