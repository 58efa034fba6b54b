//! The windowed rate-limiting primitive shared by every limiting policy.
//!
//! A window is a fixed-size bucket aligned to the epoch:
//! `[floor(now/window)·window, +window)`. Each call increments the bucket
//! counter for `(key, current window)`; admission allows up to
//! `floor(limit · burst)` increments per window. `remaining` is reported as
//! `limit − count` and may go negative, which higher layers use for runaway
//! detection.
//!
//! Failure policy is fail-open throughout: a backing-store error or an
//! invalid quota still admits the request, with the error handed back so the
//! caller can log it. Rejecting traffic because the limiter's store is down
//! would turn a soft dependency into an outage.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use thiserror::Error;

/// Soft cap on tracked in-process buckets before stale ones are swept.
const BUCKET_SWEEP_THRESHOLD: usize = 8192;

/// Errors surfaced alongside a (fail-open) decision.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RateLimitError {
    /// The quota itself is unusable (non-positive limit or window).
    #[error("invalid rate limit quota: {0}")]
    InvalidQuota(String),

    /// The backing store failed; the decision fell open.
    #[error("rate limit backend error: {0}")]
    Backend(String),
}

/// The quota applied to one limiter key.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitQuota {
    /// Nominal request budget per window.
    pub limit: i64,
    /// Window length.
    pub window: Duration,
    /// Burst multiplier: admission allows `floor(limit · burst)` per window.
    pub burst_factor: f64,
}

impl RateLimitQuota {
    pub fn new(limit: i64, window: Duration, burst_factor: f64) -> Self {
        Self {
            limit,
            window,
            burst_factor,
        }
    }

    /// The effective per-window admission ceiling.
    pub fn burst_limit(&self) -> i64 {
        let factor = if self.burst_factor <= 0.0 {
            1.0
        } else {
            self.burst_factor
        };
        (self.limit as f64 * factor).floor() as i64
    }
}

/// The outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub admitted: bool,
    pub limit: i64,
    /// `limit − count`; negative once the nominal budget is exhausted.
    pub remaining: i64,
    /// Time until the current window ends and the counter resets.
    pub reset_after: Duration,
}

impl RateDecision {
    /// A decision that admits unconditionally, used when failing open.
    pub fn fail_open(limit: i64, reset_after: Duration) -> Self {
        Self {
            admitted: true,
            limit,
            remaining: limit,
            reset_after,
        }
    }
}

/// RateLimiter defines the admission contract.
///
/// The decision is always usable; the optional error is advisory and means
/// the decision was produced in a degraded (fail-open) mode.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str, quota: RateLimitQuota)
        -> (RateDecision, Option<RateLimitError>);
}

/// Epoch-aligned window bounds for "now": `(window_start, reset_after)`.
pub(crate) fn window_bounds(window: Duration) -> (u64, Duration) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let period = window.as_secs().max(1);
    let window_start = now - (now % period);
    let reset_after = Duration::from_secs(window_start + period - now);
    (window_start, reset_after)
}

pub(crate) fn validate_quota(quota: &RateLimitQuota) -> Option<RateLimitError> {
    if quota.limit <= 0 {
        return Some(RateLimitError::InvalidQuota(
            "limit must be greater than zero".to_string(),
        ));
    }
    if quota.window.is_zero() {
        return Some(RateLimitError::InvalidQuota(
            "window must be greater than zero".to_string(),
        ));
    }
    None
}

struct Bucket {
    window_start: u64,
    count: i64,
}

/// In-process limiter: a mutex-guarded map of per-key window counters.
///
/// Serves only the current process; a fleet of gateways sharing limits needs
/// the store-backed implementation. The increment and window-reset pair are
/// atomic under the map lock.
pub struct MemoryRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(
        &self,
        key: &str,
        quota: RateLimitQuota,
    ) -> (RateDecision, Option<RateLimitError>) {
        let (window_start, reset_after) = window_bounds(quota.window);

        if let Some(err) = validate_quota(&quota) {
            return (RateDecision::fail_open(quota.limit, reset_after), Some(err));
        }

        let mut buckets = self.buckets.lock().expect("bucket lock poisoned");

        if buckets.len() > BUCKET_SWEEP_THRESHOLD {
            buckets.retain(|_, bucket| bucket.window_start == window_start);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            window_start,
            count: 0,
        });
        if bucket.window_start != window_start {
            bucket.window_start = window_start;
            bucket.count = 0;
        }
        bucket.count += 1;

        let decision = RateDecision {
            admitted: bucket.count <= quota.burst_limit(),
            limit: quota.limit,
            remaining: quota.limit - bucket.count,
            reset_after,
        };
        (decision, None)
    }
}

/// Wraps a shared-store limiter with an in-process approximation.
///
/// When the shared store errors the decision still fails open there, but the
/// in-process limiter is consulted so traffic stays bounded per replica
/// instead of becoming unlimited.
pub struct FallbackRateLimiter {
    primary: Box<dyn RateLimiter>,
    fallback: MemoryRateLimiter,
}

impl FallbackRateLimiter {
    pub fn new(primary: Box<dyn RateLimiter>) -> Self {
        Self {
            primary,
            fallback: MemoryRateLimiter::new(),
        }
    }
}

#[async_trait]
impl RateLimiter for FallbackRateLimiter {
    async fn allow(
        &self,
        key: &str,
        quota: RateLimitQuota,
    ) -> (RateDecision, Option<RateLimitError>) {
        let (decision, err) = self.primary.allow(key, quota).await;
        match err {
            Some(err @ RateLimitError::Backend(_)) => {
                tracing::warn!(error = %err, key, "rate limit store degraded, using in-process limiter");
                let (local_decision, _) = self.fallback.allow(key, quota).await;
                (local_decision, Some(err))
            }
            other => (decision, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(limit: i64, window_secs: u64, burst: f64) -> RateLimitQuota {
        RateLimitQuota::new(limit, Duration::from_secs(window_secs), burst)
    }

    #[tokio::test]
    async fn test_admits_exactly_floor_of_limit_times_burst() {
        let limiter = MemoryRateLimiter::new();
        let q = quota(100, 3600, 1.5);

        // floor(100 * 1.5) = 150 admitted, the 151st rejected.
        for i in 1..=150 {
            let (decision, err) = limiter.allow("client", q).await;
            assert!(err.is_none());
            assert!(decision.admitted, "request {i} should be admitted");
            assert_eq!(decision.remaining, 100 - i);
        }

        let (decision, err) = limiter.allow("client", q).await;
        assert!(err.is_none());
        assert!(!decision.admitted);
        assert_eq!(decision.remaining, -51);
        assert!(decision.reset_after > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = MemoryRateLimiter::new();
        let q = quota(1, 3600, 1.0);

        let (a, _) = limiter.allow("a", q).await;
        let (b, _) = limiter.allow("b", q).await;
        assert!(a.admitted);
        assert!(b.admitted);

        let (a2, _) = limiter.allow("a", q).await;
        assert!(!a2.admitted);
    }

    #[tokio::test]
    async fn test_window_rollover_resets_counter() {
        let limiter = MemoryRateLimiter::new();
        let q = quota(1, 1, 1.0);

        let (first, _) = limiter.allow("k", q).await;
        assert!(first.admitted);
        let (second, _) = limiter.allow("k", q).await;
        assert!(!second.admitted);

        // Wait past the window end; reset_after tells us exactly how long.
        tokio::time::sleep(second.reset_after + Duration::from_millis(50)).await;

        let (third, _) = limiter.allow("k", q).await;
        assert!(third.admitted);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn test_invalid_quota_fails_open() {
        let limiter = MemoryRateLimiter::new();

        let (decision, err) = limiter.allow("k", quota(0, 60, 1.0)).await;
        assert!(decision.admitted);
        assert!(matches!(err, Some(RateLimitError::InvalidQuota(_))));

        let (decision, err) = limiter.allow("k", quota(10, 0, 1.0)).await;
        assert!(decision.admitted);
        assert!(matches!(err, Some(RateLimitError::InvalidQuota(_))));
    }

    #[tokio::test]
    async fn test_non_positive_burst_factor_defaults_to_one() {
        let limiter = MemoryRateLimiter::new();
        let q = quota(2, 3600, 0.0);

        let (a, _) = limiter.allow("k", q).await;
        let (b, _) = limiter.allow("k", q).await;
        let (c, _) = limiter.allow("k", q).await;
        assert!(a.admitted);
        assert!(b.admitted);
        assert!(!c.admitted);
    }

    struct BrokenLimiter;

    #[async_trait]
    impl RateLimiter for BrokenLimiter {
        async fn allow(
            &self,
            _key: &str,
            quota: RateLimitQuota,
        ) -> (RateDecision, Option<RateLimitError>) {
            (
                RateDecision::fail_open(quota.limit, Duration::from_secs(1)),
                Some(RateLimitError::Backend("store down".to_string())),
            )
        }
    }

    #[tokio::test]
    async fn test_fallback_limiter_degrades_to_in_process() {
        let limiter = FallbackRateLimiter::new(Box::new(BrokenLimiter));
        let q = quota(1, 3600, 1.0);

        // First request passes through the in-process approximation.
        let (decision, err) = limiter.allow("k", q).await;
        assert!(decision.admitted);
        assert!(matches!(err, Some(RateLimitError::Backend(_))));

        // The approximation still enforces the quota locally.
        let (decision, _) = limiter.allow("k", q).await;
        assert!(!decision.admitted);
    }
}
