//! Recovery policy: the outermost layer, catching panics from every
//! downstream policy and from the proxy itself. Panicking requests answer
//! 500 with a generic body; the panic payload is logged and never re-raised.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use crate::error::GatewayError;

pub async fn recovery(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().to_string();

    match std::panic::AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            let backtrace = std::backtrace::Backtrace::force_capture();
            tracing::error!(
                panic = %detail,
                path,
                method,
                backtrace = %backtrace,
                "recovered from panic while handling request"
            );

            GatewayError::Internal(detail).into_response()
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::StatusCode, middleware::from_fn, routing::get};
    use tower::ServiceExt;

    use super::*;

    async fn boom_handler() {
        panic!("something went sideways")
    }

    #[tokio::test]
    async fn test_panic_becomes_500_with_generic_body() {
        let app = Router::new()
            .route("/boom", get(boom_handler))
            .layer(from_fn(recovery));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/boom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    #[tokio::test]
    async fn test_healthy_requests_pass_through() {
        let app = Router::new()
            .route("/ok", get(|| async { "fine" }))
            .layer(from_fn(recovery));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
