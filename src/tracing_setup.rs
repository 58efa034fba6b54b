use eyre::{Result, WrapErr};
use http::{HeaderMap, HeaderValue};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Per-request correlation id, stashed in request extensions at ingress and
/// propagated to upstreams as `X-Request-Id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// W3C trace-context state carried from the inbound request to the
/// upstream call.
///
/// Extracted from the client's `traceparent` / `tracestate` headers at
/// ingress (a fresh trace is started when they are absent or malformed) and
/// injected into the outbound request with a fresh span id, so the upstream
/// joins the same trace.
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
    /// 2 hex characters of trace flags.
    pub flags: String,
    /// Opaque vendor state, forwarded untouched.
    pub tracestate: Option<String>,
}

impl TraceContext {
    /// Extract the propagation headers from an inbound request, starting a
    /// new trace when `traceparent` is absent or does not parse.
    pub fn extract(headers: &HeaderMap) -> Self {
        let tracestate = headers
            .get("tracestate")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(parent) = headers.get("traceparent").and_then(|v| v.to_str().ok()) {
            if let Some(ctx) = Self::parse_traceparent(parent, tracestate.clone()) {
                return ctx;
            }
            tracing::debug!(traceparent = parent, "malformed traceparent, starting new trace");
        }

        Self {
            trace_id: random_hex(32),
            span_id: random_hex(16),
            flags: "01".to_string(),
            tracestate: None,
        }
    }

    fn parse_traceparent(value: &str, tracestate: Option<String>) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        let all_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());
        if parts.next().is_some()
            || version.len() != 2
            || trace_id.len() != 32
            || span_id.len() != 16
            || flags.len() != 2
            || !all_hex(version)
            || !all_hex(trace_id)
            || !all_hex(span_id)
            || !all_hex(flags)
        {
            return None;
        }
        // An all-zero trace or span id is invalid per the spec'd format.
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            flags: flags.to_ascii_lowercase(),
            tracestate,
        })
    }

    /// Derive the context injected upstream: same trace, fresh span id.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex(16),
            flags: self.flags.clone(),
            tracestate: self.tracestate.clone(),
        }
    }

    /// The serialized `traceparent` header value.
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-{}", self.trace_id, self.span_id, self.flags)
    }

    /// Inject the propagation headers into an outbound header map.
    pub fn inject(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.traceparent()) {
            headers.insert("traceparent", value);
        }
        if let Some(state) = &self.tracestate {
            if let Ok(value) = HeaderValue::from_str(state) {
                headers.insert("tracestate", value);
            }
        }
        if let Ok(value) = HeaderValue::from_str(&self.trace_id) {
            headers.insert("X-Trace-Id", value);
        }
    }
}

fn random_hex(len: usize) -> String {
    let mut hex = String::with_capacity(len + 32);
    while hex.len() < len {
        hex.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    hex.truncate(len);
    hex
}

/// Initialize structured logging with JSON output for Gantry
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Gantry structured logging initialized");
    Ok(())
}

/// Initialize tracing with custom configuration
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .init();
    }

    tracing::info!(level, json = json_format, "Gantry logging initialized");
    Ok(())
}

/// Shutdown tracing gracefully
pub fn shutdown_tracing() {
    // tracing-subscriber doesn't provide explicit shutdown,
    // but we can flush any pending logs
    tracing::info!("Gantry tracing shutdown complete");
}

/// Create the server-kind span for one inbound request.
///
/// `tracing` span names are static, so the dynamic `HTTP <method> <path>`
/// name lives in the conventional `otel.name` field; the pipeline
/// re-records it with the matched route pattern once resolution happens.
pub fn create_request_span(
    method: &str,
    path: &str,
    request_id: &str,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "http_request",
        otel.name = %format!("HTTP {method} {path}"),
        otel.kind = "server",
        http.method = method,
        http.path = path,
        http.client_ip = client_ip,
        http.user_agent = user_agent,
        request.id = request_id,
        trace.id = tracing::field::Empty,
        http.route = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create the client-kind span for one proxied upstream call.
pub fn create_upstream_span(service_url: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "upstream_request",
        otel.name = %format!("Proxy {path} -> {service_url}"),
        otel.kind = "client",
        upstream.url = service_url,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
        http.response_content_type = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                name.parse::<http::HeaderName>().unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_create_request_span() {
        let span = create_request_span("GET", "/api/test", "req-123", Some("10.0.0.1"), None);
        assert_eq!(span.metadata().map(|m| m.name()), Some("http_request"));
    }

    #[test]
    fn test_create_upstream_span() {
        let span = create_upstream_span("http://backend:9000", "POST", "/data");
        assert_eq!(span.metadata().map(|m| m.name()), Some("upstream_request"));
    }

    #[test]
    fn test_extract_preserves_inbound_trace() {
        let headers = headers_with(&[("traceparent", SAMPLE_TRACEPARENT), ("tracestate", "v=1")]);
        let ctx = TraceContext::extract(&headers);

        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.span_id, "b7ad6b7169203331");
        assert_eq!(ctx.flags, "01");
        assert_eq!(ctx.tracestate.as_deref(), Some("v=1"));
    }

    #[test]
    fn test_extract_starts_new_trace_when_absent() {
        let ctx = TraceContext::extract(&HeaderMap::new());
        assert_eq!(ctx.trace_id.len(), 32);
        assert_eq!(ctx.span_id.len(), 16);
        assert!(ctx.trace_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_extract_rejects_malformed_traceparent() {
        for bad in [
            "not-a-traceparent",
            "00-short-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "zz-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ] {
            let headers = headers_with(&[("traceparent", bad)]);
            let ctx = TraceContext::extract(&headers);
            assert_ne!(
                ctx.trace_id, "0af7651916cd43dd8448eb211c80319c",
                "{bad} should not have parsed"
            );
            assert_eq!(ctx.trace_id.len(), 32);
        }
    }

    #[test]
    fn test_child_keeps_trace_and_renews_span() {
        let headers = headers_with(&[("traceparent", SAMPLE_TRACEPARENT)]);
        let parent = TraceContext::extract(&headers);
        let child = parent.child();

        assert_eq!(child.trace_id, parent.trace_id);
        assert_ne!(child.span_id, parent.span_id);
        assert_eq!(child.span_id.len(), 16);
    }

    #[test]
    fn test_inject_writes_propagation_headers() {
        let inbound = headers_with(&[("traceparent", SAMPLE_TRACEPARENT), ("tracestate", "v=1")]);
        let ctx = TraceContext::extract(&inbound).child();

        let mut outbound = HeaderMap::new();
        ctx.inject(&mut outbound);

        let parent = outbound.get("traceparent").unwrap().to_str().unwrap();
        assert!(parent.starts_with("00-0af7651916cd43dd8448eb211c80319c-"));
        assert!(parent.ends_with("-01"));
        assert_eq!(outbound.get("tracestate").unwrap(), "v=1");
        assert_eq!(
            outbound.get("X-Trace-Id").unwrap(),
            "0af7651916cd43dd8448eb211c80319c"
        );
    }
}
