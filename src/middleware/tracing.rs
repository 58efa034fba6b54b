//! Tracing policy: extracts the inbound propagation headers, opens the
//! server-kind request span, assigns the correlation id later propagated to
//! the upstream, and records the final status.

use std::time::Instant;

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    middleware::extract_client_ip,
    tracing_setup::{RequestId, TraceContext, create_request_span},
};

pub async fn trace_requests(mut req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string();
    let client_ip = extract_client_ip(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    // Join the caller's trace (or start a new one) before anything logs.
    let trace = TraceContext::extract(req.headers());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = create_request_span(
        &method,
        &path,
        &request_id,
        client_ip.as_deref(),
        user_agent.as_deref(),
    );
    span.record("trace.id", trace.trace_id.as_str());
    req.extensions_mut().insert(trace);

    let start = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;
    let duration = start.elapsed();

    let status = response.status().as_u16();
    span.record("http.status_code", status);
    span.record("duration_ms", duration.as_millis() as u64);

    if status >= 400 {
        let _enter = span.enter();
        tracing::warn!(status, duration_ms = duration.as_millis() as u64, "request failed");
    } else {
        let _enter = span.enter();
        tracing::info!(status, duration_ms = duration.as_millis() as u64, "request completed");
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        extract::Request as AxumRequest,
        http::StatusCode,
        middleware::from_fn,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn test_request_id_is_attached_to_extensions() {
        async fn echo_request_id(req: AxumRequest) -> String {
            req.extensions()
                .get::<RequestId>()
                .map(|id| id.0.clone())
                .unwrap_or_default()
        }

        let app = Router::new()
            .route("/", get(echo_request_id))
            .layer(from_fn(trace_requests));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        // A UUID was generated and visible to the handler.
        assert_eq!(body.len(), 36);
    }
}
