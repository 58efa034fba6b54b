//! Rate-limiting policies: per-client-IP, per-API-pattern and
//! per-authenticated-user, all built on the shared windowed primitive.
//!
//! Every decision exposes the standard headers (`X-RateLimit-Limit`,
//! `-Remaining`, `-Reset` in epoch seconds, `Retry-After` on rejection).
//! Limiter errors never reject a request: the primitive fails open and the
//! error is only logged here. An IP driving `remaining` far below zero is
//! blocked outright for a configured cooldown.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    app::AppState,
    core::{proxy::ResolvedRoute, rate_limit::RateDecision, rate_limit::RateLimitQuota},
    error::GatewayError,
    metrics::increment_rate_limit_exceeded,
    middleware::extract_client_ip,
    ports::auth::AuthUser,
};

fn blocked_key(ip: &str) -> String {
    format!("ratelimit:blocked:{ip}")
}

/// Stamp the shared rate-limit headers onto a header map.
fn apply_rate_headers(headers: &mut HeaderMap, prefix: &str, decision: &RateDecision) {
    let reset_epoch = chrono::Utc::now().timestamp() + decision.reset_after.as_secs() as i64;
    let pairs = [
        (format!("X-RateLimit-{prefix}Limit"), decision.limit.to_string()),
        (
            format!("X-RateLimit-{prefix}Remaining"),
            decision.remaining.to_string(),
        ),
        (format!("X-RateLimit-{prefix}Reset"), reset_epoch.to_string()),
    ];
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            name.parse::<axum::http::HeaderName>(),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

fn reject(message: &str, decision: &RateDecision, header_prefix: &str) -> Response {
    let mut response = GatewayError::TooManyRequests {
        message: message.to_string(),
        retry_after: decision.reset_after.as_secs(),
    }
    .into_response();
    apply_rate_headers(response.headers_mut(), header_prefix, decision);
    response
}

/// Policy 6: limit requests per client IP, with outright blocking on
/// severe excess.
pub async fn ip_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let settings = &state.config.features.rate_limiting;
    if !settings.enabled {
        return next.run(req).await;
    }

    let client_ip = extract_client_ip(&req).unwrap_or_else(|| "unknown".to_string());
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    // A blocked IP is rejected before the limiter is even consulted.
    match state.cache.get_raw(&blocked_key(&client_ip)).await {
        Ok(Some(_)) => {
            return GatewayError::TooManyRequests {
                message: "IP temporarily blocked due to excessive requests".to_string(),
                retry_after: settings.block_secs,
            }
            .into_response();
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(error = %err, "block list lookup failed, continuing");
        }
    }

    let quota = RateLimitQuota::new(
        settings.ip_limit,
        Duration::from_secs(settings.window_secs),
        settings.ip_burst_factor,
    );
    let (decision, limiter_err) = state.limiter.allow(&client_ip, quota).await;
    if let Some(err) = limiter_err {
        tracing::error!(error = %err, client_ip, "ip rate limit check degraded");
    }

    if !decision.admitted && decision.remaining < settings.block_threshold {
        increment_rate_limit_exceeded(&path, &method, "ip_limit");
        tracing::warn!(
            client_ip,
            requests = decision.limit - decision.remaining,
            "possible abuse detected, blocking IP"
        );

        if let Err(err) = state
            .cache
            .set_raw(
                &blocked_key(&client_ip),
                "1".to_string(),
                Duration::from_secs(settings.block_secs),
            )
            .await
        {
            tracing::warn!(error = %err, client_ip, "failed to record IP block");
        }

        return GatewayError::TooManyRequests {
            message: "Rate limit exceeded significantly".to_string(),
            retry_after: settings.block_secs,
        }
        .into_response();
    }

    if !decision.admitted {
        increment_rate_limit_exceeded(&path, &method, "ip_limit");
        return reject("Rate limit exceeded", &decision, "");
    }

    let mut response = next.run(req).await;
    apply_rate_headers(response.headers_mut(), "", &decision);
    response
}

/// Policy 7: limit requests per matched route pattern. Also performs the
/// single catalogue lookup of the request and stashes the resolution for
/// the header-validation policy and the proxy engine.
pub async fn api_rate_limit(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let settings = &state.config.features.rate_limiting;

    if req.extensions().get::<ResolvedRoute>().is_none() {
        let path = req.uri().path().to_string();
        match state.catalog.get_route_by_path(&path).await {
            Ok(route) => {
                req.extensions_mut().insert(ResolvedRoute(Arc::new(route)));
            }
            // No match or a store failure: skip limiting, the engine
            // produces the client-facing answer. The span keeps the raw
            // path as its name.
            Err(err) => {
                tracing::debug!(error = %err, path, "no route resolution for api limit");
                return next.run(req).await;
            }
        }
    }

    // The pattern is known now; rename the request span after it.
    if let Some(resolved) = req.extensions().get::<ResolvedRoute>() {
        let span = tracing::Span::current();
        span.record("http.route", resolved.0.path.as_str());
        span.record(
            "otel.name",
            format!("HTTP {} {}", req.method(), resolved.0.path).as_str(),
        );
    }

    if !settings.enabled {
        return next.run(req).await;
    }

    let pattern = req
        .extensions()
        .get::<ResolvedRoute>()
        .map(|resolved| resolved.0.path.clone())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().to_string();

    let quota = RateLimitQuota::new(
        settings.api_limit,
        Duration::from_secs(settings.window_secs),
        settings.api_burst_factor,
    );
    let (decision, limiter_err) = state.limiter.allow(&format!("api:{pattern}"), quota).await;
    if let Some(err) = limiter_err {
        tracing::error!(error = %err, pattern, "api rate limit check degraded");
    }

    if !decision.admitted {
        increment_rate_limit_exceeded(&pattern, &method, "api_limit");
        return reject("API rate limit exceeded", &decision, "");
    }

    let mut response = next.run(req).await;
    apply_rate_headers(response.headers_mut(), "", &decision);
    response
}

/// Policy 8: limit requests per authenticated user. Applies only when the
/// authentication policy attached a user to the request.
pub async fn user_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let settings = &state.config.features.rate_limiting;
    if !settings.enabled {
        return next.run(req).await;
    }

    let user_id = match req.extensions().get::<AuthUser>() {
        Some(user) => user.id.clone(),
        None => return next.run(req).await,
    };

    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    let quota = RateLimitQuota::new(
        settings.user_limit,
        Duration::from_secs(settings.window_secs),
        settings.user_burst_factor,
    );
    let (decision, limiter_err) = state.limiter.allow(&format!("user:{user_id}"), quota).await;
    if let Some(err) = limiter_err {
        tracing::error!(error = %err, user_id, "user rate limit check degraded");
    }

    if !decision.admitted {
        increment_rate_limit_exceeded(&path, &method, "user_limit");
        return reject("User rate limit exceeded", &decision, "User-");
    }

    let mut response = next.run(req).await;
    apply_rate_headers(response.headers_mut(), "User-", &decision);
    response
}
