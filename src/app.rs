//! Router assembly: reserved paths, the policy pipeline in its fixed order,
//! and the proxy fallback serving every dynamically registered route.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Request, State},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;

use crate::{
    adapters::health,
    config::models::GatewayConfig,
    core::{
        breaker::BreakerRegistry,
        catalog::RouteCatalog,
        proxy::ProxyEngine,
        rate_limit::RateLimiter,
    },
    middleware,
    ports::{auth::TokenValidator, cache::Cache, http_client::HttpClient, repository::RouteRepository},
};

/// Shared state handed to every policy and handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub catalog: Arc<RouteCatalog>,
    pub breakers: Arc<BreakerRegistry>,
    pub engine: Arc<ProxyEngine>,
    pub limiter: Arc<dyn RateLimiter>,
    pub validator: Arc<dyn TokenValidator>,
    pub cache: Arc<dyn Cache>,
    pub repo: Arc<dyn RouteRepository>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wire the core engine out of its collaborators.
    pub fn new(
        config: GatewayConfig,
        repo: Arc<dyn RouteRepository>,
        cache: Arc<dyn Cache>,
        limiter: Arc<dyn RateLimiter>,
        validator: Arc<dyn TokenValidator>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        let config = Arc::new(config);
        let catalog = Arc::new(RouteCatalog::new(
            repo.clone(),
            cache.clone(),
            Duration::from_secs(config.cache.ttl_secs),
        ));
        let breakers = Arc::new(BreakerRegistry::new(
            (&config.features.circuit_breaker).into(),
        ));
        let engine = Arc::new(ProxyEngine::new(
            catalog.clone(),
            breakers.clone(),
            client,
            Duration::from_secs(config.server.upstream_timeout_secs),
        ));

        Self {
            config,
            catalog,
            breakers,
            engine,
            limiter,
            validator,
            cache,
            repo,
            started_at: chrono::Utc::now(),
        }
    }
}

/// Every request that is not a reserved path falls through to the engine.
async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    match state.engine.handle(req).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// Build the edge router: reserved paths first, then the policy pipeline
/// wrapping everything, then the proxy fallback.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::detailed))
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/metrics", get(health::metrics_snapshot))
        .fallback(proxy_handler)
        .layer(
            // Outermost first: recovery must see everything below it,
            // header validation runs last before the handler.
            ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .layer(from_fn(middleware::recovery))
                .layer(from_fn(middleware::trace_requests))
                .layer(from_fn(middleware::track_metrics))
                .layer(from_fn(middleware::security_headers))
                .layer(from_fn(middleware::ignore_favicon))
                .layer(from_fn_with_state(state.clone(), middleware::authenticate))
                .layer(from_fn_with_state(state.clone(), middleware::ip_rate_limit))
                .layer(from_fn_with_state(state.clone(), middleware::api_rate_limit))
                .layer(from_fn_with_state(state.clone(), middleware::user_rate_limit))
                .layer(from_fn(middleware::validate_required_headers)),
        )
        .with_state(state)
}
