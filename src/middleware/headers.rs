//! Header-validation policy: the last policy before the proxy. Rejects with
//! 400 when the resolved route declares required headers the request lacks.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{core::proxy::ResolvedRoute, error::GatewayError};

pub async fn validate_required_headers(req: Request, next: Next) -> Response {
    if let Some(resolved) = req.extensions().get::<ResolvedRoute>() {
        let missing = resolved.0.missing_required_headers(req.headers());
        if !missing.is_empty() {
            tracing::debug!(?missing, path = req.uri().path(), "required headers absent");
            return GatewayError::MissingHeaders(missing).into_response();
        }
    }

    next.run(req).await
}
