//! The reverse-proxy engine: resolves the route, gates the request, runs the
//! upstream call under a circuit breaker with a deadline, and streams the
//! response back.
//!
//! The engine performs a single catalogue lookup per request (reusing the
//! resolution a pipeline policy may already have stashed), never retries a
//! failed upstream call, and submits route counters asynchronously after the
//! response is produced.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    extract::ConnectInfo,
    http::{HeaderValue, Request, Response, Uri, header},
};
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    core::{
        breaker::BreakerRegistry,
        catalog::RouteCatalog,
        route::Route,
    },
    error::GatewayError,
    metrics::{increment_error_total, record_upstream_duration},
    ports::{
        http_client::{HttpClient, HttpClientError},
        repository::RepositoryError,
    },
    tracing_setup::{self, RequestId, TraceContext},
};

/// Default deadline for one upstream call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the detached post-response metrics submission.
const METRICS_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// A route resolution stashed in request extensions by the pipeline so the
/// engine does not repeat the catalogue lookup.
#[derive(Clone)]
pub struct ResolvedRoute(pub Arc<Route>);

pub struct ProxyEngine {
    catalog: Arc<RouteCatalog>,
    breakers: Arc<BreakerRegistry>,
    client: Arc<dyn HttpClient>,
    upstream_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(
        catalog: Arc<RouteCatalog>,
        breakers: Arc<BreakerRegistry>,
        client: Arc<dyn HttpClient>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            breakers,
            client,
            upstream_timeout,
        }
    }

    /// Proxy one request to its upstream.
    pub async fn handle(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, GatewayError> {
        let path = req.uri().path().to_string();
        let method = req.method().as_str().to_string();

        let route = match req.extensions().get::<ResolvedRoute>() {
            Some(resolved) => resolved.0.clone(),
            None => Arc::new(self.resolve(&path).await?),
        };

        if !route.is_active {
            return Err(GatewayError::inactive_route(&path));
        }

        if !route.is_method_allowed(&method) {
            return Err(GatewayError::MethodNotAllowed {
                allowed: route.methods.clone(),
            });
        }

        let missing = route.missing_required_headers(req.headers());
        if !missing.is_empty() {
            return Err(GatewayError::MissingHeaders(missing));
        }

        let breaker = self.breakers.get(&route.service_url);
        if breaker.allow_request().is_err() {
            return Err(GatewayError::circuit_open(&route.service_url));
        }

        let span = tracing_setup::create_upstream_span(&route.service_url, &method, &path);
        let outbound = match self.rewrite_request(&route, req) {
            Ok(outbound) => outbound,
            Err(err) => {
                // A failed rewrite must release the admission taken above.
                breaker.record(false);
                return Err(err);
            }
        };

        let start = std::time::Instant::now();
        let result = async {
            match tokio::time::timeout(self.upstream_timeout, self.client.send_request(outbound))
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(HttpClientError::Timeout(self.upstream_timeout)),
            }
        }
        .instrument(span.clone())
        .await;

        let elapsed = start.elapsed();
        record_upstream_duration(&route.service_url, elapsed);

        match result {
            Ok(response) => {
                breaker.record(true);

                span.record("http.status_code", response.status().as_u16());
                if let Some(content_type) = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                {
                    span.record("http.response_content_type", content_type);
                }
                span.record("duration_ms", elapsed.as_millis() as u64);

                self.submit_metrics_update(route.path.clone(), elapsed);

                // Upstream status is the client-visible status, 4xx/5xx included.
                Ok(response)
            }
            Err(err) => {
                breaker.record(false);

                let gateway_err = match err {
                    HttpClientError::Timeout(timeout) => GatewayError::GatewayTimeout(format!(
                        "upstream did not answer within {timeout:?}"
                    )),
                    HttpClientError::ConnectionRefused(msg) => GatewayError::ServiceUnavailable {
                        message: format!("upstream unreachable: {msg}"),
                        kind: "connection_refused",
                        path: None,
                    },
                    HttpClientError::HostNotFound(msg) => GatewayError::BadGateway {
                        message: format!("upstream host not found: {msg}"),
                        kind: "host_not_found",
                    },
                    HttpClientError::InvalidRequest(msg) | HttpClientError::Transport(msg) => {
                        GatewayError::BadGateway {
                            message: format!("failed to forward request: {msg}"),
                            kind: "proxy_error",
                        }
                    }
                };

                increment_error_total(&path, &method, gateway_err.error_kind());
                tracing::error!(
                    error = %gateway_err,
                    service_url = %route.service_url,
                    path,
                    "upstream call failed"
                );

                Err(gateway_err)
            }
        }
    }

    async fn resolve(&self, path: &str) -> Result<Route, GatewayError> {
        self.catalog.get_route_by_path(path).await.map_err(|err| match err {
            RepositoryError::NotFound(_) => GatewayError::RouteNotFound(path.to_string()),
            other => GatewayError::Internal(other.to_string()),
        })
    }

    /// Rewrite the inbound request for the upstream: scheme and authority
    /// from the route's service URL, path and query preserved, forwarding
    /// and propagation headers injected.
    fn rewrite_request(
        &self,
        route: &Route,
        req: Request<AxumBody>,
    ) -> Result<Request<AxumBody>, GatewayError> {
        let target = Url::parse(&route.service_url)
            .map_err(|e| GatewayError::Internal(format!("invalid service URL: {e}")))?;
        let host = target
            .host_str()
            .ok_or_else(|| GatewayError::Internal("service URL has no host".to_string()))?;
        let authority = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let client_ip = req
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|info| info.0.ip().to_string());
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        // The tracing policy extracted the inbound propagation headers; when
        // the engine is driven directly, fall back to extracting them here.
        let trace = req
            .extensions()
            .get::<TraceContext>()
            .cloned()
            .unwrap_or_else(|| TraceContext::extract(req.headers()));
        let original_host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = format!("{}://{}{}", target.scheme(), authority, path_and_query)
            .parse()
            .map_err(|e| GatewayError::Internal(format!("failed to build upstream URI: {e}")))?;
        parts.uri = uri;

        let headers = &mut parts.headers;

        if let Some(ip) = client_ip {
            if let Ok(value) = HeaderValue::from_str(&ip) {
                headers.insert("X-Forwarded-For", value);
            }
        }
        if let Some(original_host) = original_host {
            if let Ok(value) = HeaderValue::from_str(&original_host) {
                headers.insert("X-Forwarded-Host", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&authority) {
            headers.insert(header::HOST, value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert("X-Request-Id", value);
        }

        // The upstream joins the same trace under a fresh span id.
        trace.child().inject(headers);

        // Per-route propagated headers ride along when the client sent them.
        for name in &route.headers {
            if let Ok(header_name) = name.parse::<header::HeaderName>() {
                if let Some(value) = headers.get(&header_name).cloned() {
                    headers.insert(header_name, value);
                }
            }
        }

        Ok(Request::from_parts(parts, body))
    }

    /// Fire-and-forget counter update against the catalogue, bounded by a
    /// fresh deadline so it never outlives its budget.
    fn submit_metrics_update(&self, path: String, elapsed: Duration) {
        let catalog = self.catalog.clone();
        tokio::spawn(async move {
            let update = catalog.update_metrics(&path, 1, elapsed.as_millis() as i64);
            match tokio::time::timeout(METRICS_UPDATE_TIMEOUT, update).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, path, "route metrics update failed");
                }
                Err(_) => {
                    tracing::warn!(path, "route metrics update timed out");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        adapters::{cache::MemoryCache, repository::InMemoryRouteRepository},
        core::{breaker::BreakerConfig, catalog::DEFAULT_CACHE_TTL},
        ports::http_client::HttpClientResult,
    };

    enum MockBehavior {
        Respond(StatusCode),
        Refuse,
        Hang,
    }

    struct MockUpstream {
        behavior: MockBehavior,
        calls: AtomicUsize,
        seen_headers: Mutex<Vec<(String, String)>>,
        seen_uri: Mutex<Option<String>>,
    }

    impl MockUpstream {
        fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                seen_headers: Mutex::new(Vec::new()),
                seen_uri: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl HttpClient for MockUpstream {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut headers = self.seen_headers.lock().await;
                headers.clear();
                for (name, value) in req.headers() {
                    headers.push((
                        name.to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    ));
                }
                *self.seen_uri.lock().await = Some(req.uri().to_string());
            }

            match self.behavior {
                MockBehavior::Respond(status) => Ok(Response::builder()
                    .status(status)
                    .body(AxumBody::from("upstream body"))
                    .unwrap()),
                MockBehavior::Refuse => Err(HttpClientError::ConnectionRefused(
                    "tcp connect error".to_string(),
                )),
                MockBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn engine_with(
        routes: Vec<Route>,
        client: Arc<dyn HttpClient>,
        breaker_config: BreakerConfig,
        timeout: Duration,
    ) -> ProxyEngine {
        let repo = Arc::new(InMemoryRouteRepository::with_routes(routes));
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let catalog = Arc::new(RouteCatalog::new(repo, cache, DEFAULT_CACHE_TTL));
        ProxyEngine::new(
            catalog,
            Arc::new(BreakerRegistry::new(breaker_config)),
            client,
            timeout,
        )
    }

    fn users_route() -> Route {
        Route::new("/api/users", "http://u:9000", vec!["GET".to_string()])
    }

    fn request(method: &str, uri: &str) -> Request<AxumBody> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "gateway.local")
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::OK));
        let engine = engine_with(
            vec![users_route()],
            upstream.clone(),
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let err = engine.handle(request("GET", "/nope")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound(_)));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_method_gating_rejects_before_upstream() {
        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::OK));
        let engine = engine_with(
            vec![users_route()],
            upstream.clone(),
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let err = engine
            .handle(request("POST", "/api/users"))
            .await
            .unwrap_err();
        match err {
            GatewayError::MethodNotAllowed { allowed } => assert_eq!(allowed, vec!["GET"]),
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inactive_route_is_service_unavailable() {
        let mut route = Route::new("/api/*", "http://x:1", vec!["GET".to_string()]);
        route.is_active = false;

        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::OK));
        let engine = engine_with(
            vec![route],
            upstream.clone(),
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let err = engine
            .handle(request("GET", "/api/anything"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_kind(), "service_inactive");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_required_headers_rejects_with_400() {
        let mut route = users_route();
        route.required_headers = vec!["X-Api-Key".to_string()];

        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::OK));
        let engine = engine_with(
            vec![route],
            upstream.clone(),
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let err = engine
            .handle(request("GET", "/api/users"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingHeaders(_)));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_forwarding_headers_and_uri_rewrite() {
        let mut route = users_route();
        route.headers = vec!["X-Custom".to_string()];

        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::OK));
        let engine = engine_with(
            vec![route],
            upstream.clone(),
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let mut req = request("GET", "/api/users?page=2");
        req.headers_mut()
            .insert("X-Custom", HeaderValue::from_static("forwarded"));
        req.headers_mut().insert(
            "traceparent",
            HeaderValue::from_static("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
        );
        req.extensions_mut().insert(ConnectInfo(std::net::SocketAddr::from((
            [10, 0, 0, 1],
            55000,
        ))));

        let response = engine.handle(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let uri = upstream.seen_uri.lock().await.clone().unwrap();
        assert_eq!(uri, "http://u:9000/api/users?page=2");

        let headers = upstream.seen_headers.lock().await.clone();
        let get = |name: &str| {
            headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("x-forwarded-for"), Some("10.0.0.1".to_string()));
        assert_eq!(get("x-forwarded-host"), Some("gateway.local".to_string()));
        assert_eq!(get("host"), Some("u:9000".to_string()));
        assert_eq!(get("x-custom"), Some("forwarded".to_string()));
        assert!(get("x-request-id").is_some());

        // Propagation headers: same trace as the caller, fresh span id.
        let traceparent = get("traceparent").unwrap();
        assert!(traceparent.starts_with("00-0af7651916cd43dd8448eb211c80319c-"));
        assert!(!traceparent.contains("b7ad6b7169203331"));
        assert_eq!(
            get("x-trace-id"),
            Some("0af7651916cd43dd8448eb211c80319c".to_string())
        );
    }

    #[tokio::test]
    async fn test_upstream_status_is_not_rewritten() {
        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::IM_A_TEAPOT));
        let engine = engine_with(
            vec![users_route()],
            upstream,
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let response = engine.handle(request("GET", "/api/users")).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_failures_and_blocks_upstream() {
        let upstream = MockUpstream::new(MockBehavior::Refuse);
        let engine = engine_with(
            vec![users_route()],
            upstream.clone(),
            BreakerConfig {
                max_fails: 2,
                ..BreakerConfig::default()
            },
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        for _ in 0..2 {
            let err = engine
                .handle(request("GET", "/api/users"))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(err.error_kind(), "connection_refused");
        }
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);

        // Third request: the circuit is open, no connection is attempted.
        let err = engine
            .handle(request("GET", "/api/users"))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "circuit_open");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_upstream_deadline_maps_to_gateway_timeout() {
        let upstream = MockUpstream::new(MockBehavior::Hang);
        let engine = engine_with(
            vec![users_route()],
            upstream,
            BreakerConfig::default(),
            Duration::from_millis(50),
        );

        let err = engine
            .handle(request("GET", "/api/users"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.error_kind(), "timeout_error");
    }

    #[tokio::test]
    async fn test_placeholder_route_preserves_request_path() {
        let route = Route::new("/weather/:cep", "http://w:9100", vec!["GET".to_string()]);
        let upstream = MockUpstream::new(MockBehavior::Respond(StatusCode::OK));
        let engine = engine_with(
            vec![route],
            upstream.clone(),
            BreakerConfig::default(),
            DEFAULT_UPSTREAM_TIMEOUT,
        );

        let response = engine.handle(request("GET", "/weather/01310")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let uri = upstream.seen_uri.lock().await.clone().unwrap();
        assert_eq!(uri, "http://w:9100/weather/01310");
    }
}
