//! The client-facing error taxonomy: one enum, one JSON body shape.
//!
//! Every failure the gateway surfaces to a client is a `GatewayError`. The
//! body is a JSON object with a single `error` string plus optional
//! machine-readable fields (`path`, `retry_after`, `required_headers`,
//! `allowed_methods`) where they help the caller act on the failure.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing required headers: {0:?}")]
    MissingHeaders(Vec<String>),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("no route matches path '{0}'")]
    RouteNotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<String> },

    #[error("{message}")]
    TooManyRequests { message: String, retry_after: u64 },

    #[error("{message}")]
    BadGateway { message: String, kind: &'static str },

    #[error("{message}")]
    ServiceUnavailable {
        message: String,
        kind: &'static str,
        path: Option<String>,
    },

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// The rejection produced for a resolvable but deactivated route.
    pub fn inactive_route(path: &str) -> Self {
        GatewayError::ServiceUnavailable {
            message: "API não disponível".to_string(),
            kind: "service_inactive",
            path: Some(path.to_string()),
        }
    }

    /// The rejection produced while a circuit breaker is open.
    pub fn circuit_open(service_url: &str) -> Self {
        GatewayError::ServiceUnavailable {
            message: "Service temporarily unavailable".to_string(),
            kind: "circuit_open",
            path: Some(service_url.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) | GatewayError::MissingHeaders(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used by the typed error counter.
    pub fn error_kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) | GatewayError::MissingHeaders(_) => "bad_request",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::RouteNotFound(_) => "not_found",
            GatewayError::MethodNotAllowed { .. } => "method_not_allowed",
            GatewayError::TooManyRequests { .. } => "too_many_requests",
            GatewayError::BadGateway { kind, .. } => kind,
            GatewayError::ServiceUnavailable { kind, .. } => kind,
            GatewayError::GatewayTimeout(_) => "timeout_error",
            GatewayError::Internal(_) => "internal_server_error",
        }
    }

    fn body(&self) -> Value {
        match self {
            GatewayError::MissingHeaders(missing) => json!({
                "error": "Required headers missing",
                "required_headers": missing,
            }),
            GatewayError::MethodNotAllowed { allowed } => json!({
                "error": "Method not allowed",
                "allowed_methods": allowed,
            }),
            GatewayError::TooManyRequests {
                message,
                retry_after,
            } => json!({
                "error": message,
                "retry_after": retry_after,
            }),
            GatewayError::RouteNotFound(path) => json!({
                "error": "Route not found",
                "path": path,
            }),
            GatewayError::ServiceUnavailable { message, path, .. } => match path {
                Some(path) => json!({ "error": message, "path": path }),
                None => json!({ "error": message }),
            },
            // Internal failures never leak their cause to clients.
            GatewayError::Internal(_) => json!({ "error": "Internal server error" }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.body())).into_response();

        if let GatewayError::TooManyRequests { retry_after, .. } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::RouteNotFound("/x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::inactive_route("/x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::GatewayTimeout("upstream".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_method_not_allowed_body_lists_methods() {
        let err = GatewayError::MethodNotAllowed {
            allowed: vec!["GET".to_string()],
        };
        let body = err.body();
        assert_eq!(body["error"], "Method not allowed");
        assert_eq!(body["allowed_methods"][0], "GET");
    }

    #[test]
    fn test_inactive_route_body() {
        let body = GatewayError::inactive_route("/api/anything").body();
        assert_eq!(body["error"], "API não disponível");
        assert_eq!(body["path"], "/api/anything");
    }

    #[test]
    fn test_internal_error_hides_details() {
        let body = GatewayError::Internal("pool exhausted at db.rs:42".into()).body();
        assert_eq!(body["error"], "Internal server error");
    }

    #[test]
    fn test_error_kinds_for_upstream_failures() {
        let err = GatewayError::BadGateway {
            message: "dns".into(),
            kind: "host_not_found",
        };
        assert_eq!(err.error_kind(), "host_not_found");
        assert_eq!(
            GatewayError::circuit_open("http://u:1").error_kind(),
            "circuit_open"
        );
    }
}
