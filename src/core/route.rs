//! The route descriptor and its path-pattern matching rules.
//!
//! A route maps one registered pattern to one upstream service URL. Patterns
//! come in three shapes: exact segments (`/api/users`), named placeholders
//! (`/weather/:cep`) and a trailing wildcard (`/api/*`). When several
//! patterns match the same request path the winner is chosen by rank:
//! exact beats placeholder beats wildcard.

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors produced when a route descriptor fails validation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteValidationError {
    #[error("path is required")]
    MissingPath,

    #[error("service_url is required")]
    MissingServiceUrl,

    #[error("invalid service_url '{url}': {reason}")]
    InvalidServiceUrl { url: String, reason: String },

    #[error("at least one HTTP method is required")]
    MissingMethods,
}

/// How a registered pattern matched a request path. Ordering doubles as the
/// tie-break rank: exact wins over placeholder wins over wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Exact,
    Placeholder,
    Wildcard,
}

/// One proxied endpoint: the central entity of the catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    /// Registered pattern, unique across the catalogue.
    pub path: String,
    /// Absolute upstream URL (scheme + host, no path).
    pub service_url: String,
    /// Allowed HTTP methods. Never empty on a valid route.
    pub methods: Vec<String>,
    /// Header names copied from the client request when present.
    #[serde(default)]
    pub headers: Vec<String>,
    /// Header names that must be present; absence rejects with 400.
    #[serde(default)]
    pub required_headers: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Inactive routes resolve but answer 503.
    pub is_active: bool,
    /// Monotonic call counter, updated lossily after each proxied request.
    #[serde(default)]
    pub call_count: i64,
    /// Accumulated upstream response time in milliseconds.
    #[serde(default)]
    pub total_response_ms: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    /// Build a minimal active route. Counters start at zero and timestamps
    /// at "now"; callers adjust the rest field by field.
    pub fn new(path: impl Into<String>, service_url: impl Into<String>, methods: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            service_url: service_url.into(),
            methods,
            headers: Vec::new(),
            required_headers: Vec::new(),
            description: String::new(),
            is_active: true,
            call_count: 0,
            total_response_ms: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mean upstream response time in milliseconds, zero before any call.
    pub fn average_response_ms(&self) -> i64 {
        if self.call_count == 0 {
            return 0;
        }
        self.total_response_ms / self.call_count
    }

    /// Whether the given HTTP method is allowed for this route.
    pub fn is_method_allowed(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Header names declared required but absent from the request.
    pub fn missing_required_headers(&self, headers: &HeaderMap) -> Vec<String> {
        self.required_headers
            .iter()
            .filter(|name| !headers.contains_key(name.as_str()))
            .cloned()
            .collect()
    }

    /// Validate the descriptor invariants at the catalogue boundary.
    pub fn validate(&self) -> Result<(), RouteValidationError> {
        if self.path.is_empty() {
            return Err(RouteValidationError::MissingPath);
        }
        if self.service_url.is_empty() {
            return Err(RouteValidationError::MissingServiceUrl);
        }
        if self.methods.is_empty() {
            return Err(RouteValidationError::MissingMethods);
        }

        let parsed = Url::parse(&self.service_url).map_err(|e| {
            RouteValidationError::InvalidServiceUrl {
                url: self.service_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if parsed.host_str().is_none() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(RouteValidationError::InvalidServiceUrl {
                url: self.service_url.clone(),
                reason: "must be an absolute http:// or https:// URL".to_string(),
            });
        }

        Ok(())
    }
}

/// Match a registered pattern against a request path.
///
/// Returns the kind of match, or `None` when the pattern does not apply.
/// Placeholder segments accept any non-empty value; the wildcard form
/// matches every path sharing the prefix before `/*`.
pub fn match_route_path(pattern: &str, request_path: &str) -> Option<MatchKind> {
    if pattern == request_path {
        return Some(MatchKind::Exact);
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        if request_path.starts_with(prefix) {
            return Some(MatchKind::Wildcard);
        }
        return None;
    }

    if pattern.contains(':') {
        let pattern_parts: Vec<&str> = pattern.split('/').collect();
        let request_parts: Vec<&str> = request_path.split('/').collect();

        if pattern_parts.len() != request_parts.len() {
            return None;
        }

        for (pat, req) in pattern_parts.iter().zip(request_parts.iter()) {
            if let Some(_name) = pat.strip_prefix(':') {
                if req.is_empty() {
                    return None;
                }
                continue;
            }
            if pat != req {
                return None;
            }
        }

        return Some(MatchKind::Placeholder);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str, url: &str) -> Route {
        Route::new(path, url, vec!["GET".to_string()])
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(
            match_route_path("/api/users", "/api/users"),
            Some(MatchKind::Exact)
        );
        assert_eq!(match_route_path("/api/users", "/api/orders"), None);
    }

    #[test]
    fn test_wildcard_match() {
        assert_eq!(
            match_route_path("/api/*", "/api/anything/nested"),
            Some(MatchKind::Wildcard)
        );
        assert_eq!(match_route_path("/api/*", "/other"), None);
    }

    #[test]
    fn test_placeholder_match() {
        assert_eq!(
            match_route_path("/weather/:cep", "/weather/01310"),
            Some(MatchKind::Placeholder)
        );
        // Arity must be equal.
        assert_eq!(match_route_path("/weather/:cep", "/weather/01310/extra"), None);
        // Placeholder segments must be non-empty.
        assert_eq!(match_route_path("/weather/:cep", "/weather/"), None);
        // Literal segments must still match.
        assert_eq!(match_route_path("/weather/:cep", "/forecast/01310"), None);
    }

    #[test]
    fn test_match_kind_rank() {
        assert!(MatchKind::Exact < MatchKind::Placeholder);
        assert!(MatchKind::Placeholder < MatchKind::Wildcard);
    }

    #[test]
    fn test_validate_accepts_well_formed_route() {
        assert!(route("/api/users", "http://users:9000").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut r = route("", "http://users:9000");
        assert!(matches!(r.validate(), Err(RouteValidationError::MissingPath)));

        r = route("/api/users", "");
        assert!(matches!(
            r.validate(),
            Err(RouteValidationError::MissingServiceUrl)
        ));

        r = route("/api/users", "http://users:9000");
        r.methods.clear();
        assert!(matches!(
            r.validate(),
            Err(RouteValidationError::MissingMethods)
        ));
    }

    #[test]
    fn test_validate_rejects_relative_service_url() {
        let r = route("/api/users", "users:9000/api");
        assert!(matches!(
            r.validate(),
            Err(RouteValidationError::InvalidServiceUrl { .. })
        ));
    }

    #[test]
    fn test_method_gating() {
        let r = route("/api/users", "http://users:9000");
        assert!(r.is_method_allowed("GET"));
        assert!(!r.is_method_allowed("POST"));
    }

    #[test]
    fn test_missing_required_headers() {
        let mut r = route("/api/users", "http://users:9000");
        r.required_headers = vec!["X-Api-Key".to_string(), "X-Tenant".to_string()];

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());

        assert_eq!(r.missing_required_headers(&headers), vec!["X-Tenant"]);
    }

    #[test]
    fn test_average_response_time() {
        let mut r = route("/api/users", "http://users:9000");
        assert_eq!(r.average_response_ms(), 0);
        r.call_count = 4;
        r.total_response_ms = 200;
        assert_eq!(r.average_response_ms(), 50);
    }
}
