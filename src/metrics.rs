//! Lightweight metrics helpers for Gantry.
//!
//! This module exposes a small set of convenience functions and RAII timers
//! wrapping the `metrics` crate macros. It intentionally avoids embedding a
//! concrete exporter (the application can initialize any compatible recorder
//! externally) while still documenting and describing Gantry-specific metric
//! names.
//!
//! Provided metrics (labels vary by family):
//! * `gantry_requests_total` (counter)
//! * `gantry_request_duration_seconds` (histogram)
//! * `gantry_requests_in_flight` (gauge)
//! * `gantry_request_size_bytes` / `gantry_response_size_bytes` (histograms)
//! * `gantry_errors_total` (counter, typed by error kind)
//! * `gantry_rate_limit_exceeded_total` (counter, by limiter)
//! * `gantry_upstream_duration_seconds` (histogram per service)
//! * `gantry_circuit_breaker_open` (gauge per service)
//! * `gantry_cache_hit_ratio` (gauge per cache backend)
//!
//! The `RequestTimer` leverages `Drop` to record durations safely even when
//! early returns or errors occur.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::Instant,
};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const GANTRY_REQUESTS_TOTAL: &str = "gantry_requests_total";
pub const GANTRY_REQUEST_DURATION_SECONDS: &str = "gantry_request_duration_seconds";
pub const GANTRY_REQUESTS_IN_FLIGHT: &str = "gantry_requests_in_flight";
pub const GANTRY_REQUEST_SIZE_BYTES: &str = "gantry_request_size_bytes";
pub const GANTRY_RESPONSE_SIZE_BYTES: &str = "gantry_response_size_bytes";
pub const GANTRY_ERRORS_TOTAL: &str = "gantry_errors_total";
pub const GANTRY_RATE_LIMIT_EXCEEDED_TOTAL: &str = "gantry_rate_limit_exceeded_total";
pub const GANTRY_UPSTREAM_DURATION_SECONDS: &str = "gantry_upstream_duration_seconds";
pub const GANTRY_CIRCUIT_BREAKER_OPEN: &str = "gantry_circuit_breaker_open";
pub const GANTRY_CACHE_HIT_RATIO: &str = "gantry_cache_hit_ratio";

static IN_FLIGHT: AtomicI64 = AtomicI64::new(0);

/// One-time registration of metric descriptions.
static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        GANTRY_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        GANTRY_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_gauge!(
        GANTRY_REQUESTS_IN_FLIGHT,
        "Number of requests currently being processed."
    );
    describe_histogram!(
        GANTRY_REQUEST_SIZE_BYTES,
        Unit::Bytes,
        "Size of inbound request bodies."
    );
    describe_histogram!(
        GANTRY_RESPONSE_SIZE_BYTES,
        Unit::Bytes,
        "Size of outbound response bodies."
    );
    describe_counter!(
        GANTRY_ERRORS_TOTAL,
        Unit::Count,
        "Total failed requests, labelled with a typed error kind."
    );
    describe_counter!(
        GANTRY_RATE_LIMIT_EXCEEDED_TOTAL,
        Unit::Count,
        "Requests rejected by a rate limiting policy."
    );
    describe_histogram!(
        GANTRY_UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of calls forwarded to upstream services."
    );
    describe_gauge!(
        GANTRY_CIRCUIT_BREAKER_OPEN,
        "Whether the circuit breaker for an upstream is open (1) or closed (0)."
    );
    describe_gauge!(
        GANTRY_CACHE_HIT_RATIO,
        "Fraction of cache reads served without consulting the store."
    );
});

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
    tracing::info!("Gantry metrics registered");
}

/// Increment the total request counter for a completed request.
pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        GANTRY_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed request's duration.
pub fn record_request_duration(path: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        GANTRY_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Track one more request in flight. Pair with [`decrement_in_flight`].
pub fn increment_in_flight() {
    let current = IN_FLIGHT.fetch_add(1, Ordering::Relaxed) + 1;
    gauge!(GANTRY_REQUESTS_IN_FLIGHT).set(current as f64);
}

pub fn decrement_in_flight() {
    let current = IN_FLIGHT.fetch_sub(1, Ordering::Relaxed) - 1;
    gauge!(GANTRY_REQUESTS_IN_FLIGHT).set(current as f64);
}

/// Record the sizes of a request/response pair.
pub fn record_sizes(path: &str, method: &str, request_bytes: u64, response_bytes: u64) {
    histogram!(
        GANTRY_REQUEST_SIZE_BYTES,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(request_bytes as f64);
    histogram!(
        GANTRY_RESPONSE_SIZE_BYTES,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(response_bytes as f64);
}

/// Count a failed request with its typed error kind.
pub fn increment_error_total(path: &str, method: &str, error_type: &str) {
    counter!(
        GANTRY_ERRORS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "type" => error_type.to_string()
    )
    .increment(1);
}

/// Count a rate-limit rejection for a given limiter (`ip`, `api`, `user`).
pub fn increment_rate_limit_exceeded(path: &str, method: &str, limiter: &str) {
    counter!(
        GANTRY_RATE_LIMIT_EXCEEDED_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "limiter" => limiter.to_string()
    )
    .increment(1);
}

/// Record the duration of one upstream call.
pub fn record_upstream_duration(service: &str, duration: std::time::Duration) {
    histogram!(
        GANTRY_UPSTREAM_DURATION_SECONDS,
        "service" => service.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Flip the breaker-open gauge for an upstream on state transitions.
pub fn set_circuit_breaker_open(service: &str, open: bool) {
    gauge!(GANTRY_CIRCUIT_BREAKER_OPEN, "service" => service.to_string())
        .set(if open { 1.0 } else { 0.0 });
}

/// Update the hit ratio gauge for a cache backend.
pub fn set_cache_hit_ratio(backend: &str, hits: u64, misses: u64) {
    let total = hits + misses;
    if total == 0 {
        return;
    }
    gauge!(GANTRY_CACHE_HIT_RATIO, "backend" => backend.to_string())
        .set(hits as f64 / total as f64);
}

/// Map an HTTP status to the typed error label used by the error counter.
pub fn error_type_for_status(status: u16) -> String {
    match status {
        400 => "bad_request".to_string(),
        401 => "unauthorized".to_string(),
        403 => "forbidden".to_string(),
        404 => "not_found".to_string(),
        405 => "method_not_allowed".to_string(),
        408 => "request_timeout".to_string(),
        409 => "conflict".to_string(),
        429 => "too_many_requests".to_string(),
        500 => "internal_server_error".to_string(),
        502 => "bad_gateway".to_string(),
        503 => "service_unavailable".to_string(),
        504 => "gateway_timeout".to_string(),
        s if s >= 500 => format!("server_error_{s}"),
        s => format!("client_error_{s}"),
    }
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}
