//! Authentication policy: bearer-token validation for non-public paths.
//!
//! Public path prefixes skip the policy entirely. A resolved user is
//! attached to the request for downstream policies (the user rate limit)
//! and, on admin-prefixed paths, must carry the admin role.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{app::AppState, error::GatewayError};

pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth_config = &state.config.auth;
    if !auth_config.enabled {
        return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    if auth_config
        .public_paths
        .iter()
        .any(|prefix| path.starts_with(prefix))
    {
        return next.run(req).await;
    }

    let header_value = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => value.to_string(),
        None => {
            return GatewayError::Unauthorized("Authorization header not provided".to_string())
                .into_response();
        }
    };

    let token = match header_value.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() => token,
        _ => {
            return GatewayError::Unauthorized("Invalid token format".to_string()).into_response();
        }
    };

    let user = match state.validator.validate_token(token).await {
        Ok(user) => user,
        Err(err) => {
            tracing::debug!(error = %err, path, "token rejected");
            return GatewayError::Unauthorized("Invalid or expired token".to_string())
                .into_response();
        }
    };

    if path.starts_with(&auth_config.admin_prefix) && !user.is_admin() {
        return GatewayError::Forbidden(
            "Access denied: administrator permission required".to_string(),
        )
        .into_response();
    }

    req.extensions_mut().insert(user);
    next.run(req).await
}
