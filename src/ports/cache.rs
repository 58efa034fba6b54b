use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// A `Decode` error is special: it means the key was present (a hit) but the
/// stored payload could not be turned back into the requested type. Callers
/// are expected to invalidate the key and recompute from the source of truth.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CacheError {
    /// The backing store failed (connection, protocol, IO).
    #[error("cache backend error: {0}")]
    Backend(String),

    /// The key was found but its payload failed to deserialize.
    #[error("cache decode error for key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The value could not be serialized for storage.
    #[error("cache encode error for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache defines the port for key/value caching with per-entry expiry.
///
/// Three adapters implement it: an in-process map, a shared Redis store and
/// a no-op used when caching is disabled. The cache is only ever a negative
/// cache of "recently seen": a miss means "consult the source of truth", and
/// writers must invalidate after mutating the underlying store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the raw serialized payload for a key. `Ok(None)` is a miss.
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a payload under a key with an absolute time-to-live.
    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Remove a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Drop every entry owned by this cache.
    async fn clear(&self) -> CacheResult<()>;

    /// Verify the backing store is reachable.
    async fn ping(&self) -> CacheResult<()>;
}

/// Fetch and deserialize a structured value.
///
/// Returns `Ok(None)` on a miss and `Err(CacheError::Decode { .. })` on a hit
/// whose payload no longer parses, so the caller can distinguish the two.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> CacheResult<Option<T>> {
    match cache.get_raw(key).await? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(source) => Err(CacheError::Decode {
                key: key.to_string(),
                source,
            }),
        },
        None => Ok(None),
    }
}

/// Serialize and store a structured value.
pub async fn set_json<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> CacheResult<()> {
    let raw = serde_json::to_string(value).map_err(|source| CacheError::Encode {
        key: key.to_string(),
        source,
    })?;
    cache.set_raw(key, raw, ttl).await
}
