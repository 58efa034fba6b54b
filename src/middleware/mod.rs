//! The per-request policy pipeline.
//!
//! Each policy is an Axum middleware function; the router assembles them in
//! a fixed order (recovery, tracing, metrics, security headers,
//! authentication, IP / API / user rate limits, header validation). Any
//! policy may short-circuit by returning a response instead of calling the
//! next layer.

pub mod auth;
pub mod headers;
pub mod metrics;
pub mod rate_limit;
pub mod recovery;
pub mod security;
pub mod tracing;

use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

pub use self::auth::authenticate;
pub use self::headers::validate_required_headers;
pub use self::metrics::track_metrics;
pub use self::rate_limit::{api_rate_limit, ip_rate_limit, user_rate_limit};
pub use self::recovery::recovery;
pub use self::security::security_headers;
pub use self::tracing::trace_requests;

/// Answer favicon probes before any other policy runs.
pub async fn ignore_favicon(req: Request, next: Next) -> Response {
    if req.uri().path() == "/favicon.ico" {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}

/// Best-effort client IP: forwarded headers first, then the socket address.
pub(crate) fn extract_client_ip(req: &Request) -> Option<String> {
    if let Some(forwarded_for) = req.headers().get("X-Forwarded-For") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("X-Real-IP") {
        if let Ok(value) = real_ip.to_str() {
            return Some(value.to_string());
        }
    }

    req.extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string())
}
