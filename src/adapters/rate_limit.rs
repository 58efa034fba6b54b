//! Store-backed rate limiter: per-window counters kept in Redis so every
//! gateway replica enforces the same budget.
//!
//! The increment and the conditional expiry-set are one atomic server-side
//! script; two racing callers can never observe a bucket without its expiry.

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};

use crate::core::rate_limit::{
    RateDecision, RateLimitError, RateLimitQuota, RateLimiter, validate_quota, window_bounds,
};

/// INCR the bucket and pin its expiry to the window end on first increment.
const ALLOW_SCRIPT: &str = r"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local expire_at = tonumber(ARGV[2])

    local count = redis.call('INCR', key)
    if count == 1 then
        redis.call('EXPIREAT', key, expire_at)
    end

    return {count, limit - count}
";

pub struct RedisRateLimiter {
    manager: ConnectionManager,
    script: Script,
}

impl RedisRateLimiter {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            script: Script::new(ALLOW_SCRIPT),
        }
    }

    /// Connect and verify the connection with a ping.
    pub async fn connect(address: &str, password: &str, db: i64) -> Result<Self, RateLimitError> {
        let url = if password.is_empty() {
            format!("redis://{address}/{db}")
        } else {
            format!("redis://:{password}@{address}/{db}")
        };

        let client =
            redis::Client::open(url).map_err(|e| RateLimitError::Backend(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        tracing::info!(address, db, "connected to Redis rate limit store");
        Ok(Self::new(manager))
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(
        &self,
        key: &str,
        quota: RateLimitQuota,
    ) -> (RateDecision, Option<RateLimitError>) {
        let (window_start, reset_after) = window_bounds(quota.window);

        if let Some(err) = validate_quota(&quota) {
            return (RateDecision::fail_open(quota.limit, reset_after), Some(err));
        }

        let bucket_key = format!("gantry:ratelimit:{key}");
        let expire_at = window_start + quota.window.as_secs().max(1);
        let mut conn = self.manager.clone();

        let result: Result<(i64, i64), redis::RedisError> = self
            .script
            .key(&bucket_key)
            .arg(quota.limit)
            .arg(expire_at)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok((count, remaining)) => {
                let decision = RateDecision {
                    admitted: count <= quota.burst_limit(),
                    limit: quota.limit,
                    remaining,
                    reset_after,
                };
                (decision, None)
            }
            Err(err) => {
                // Never fail closed because the limiter's store is down.
                (
                    RateDecision::fail_open(quota.limit, reset_after),
                    Some(RateLimitError::Backend(err.to_string())),
                )
            }
        }
    }
}
