//! Configuration data structures for Gantry.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files
//! and every key can be overridden through an `AG_`-prefixed environment
//! variable (`AG_CACHE_TYPE`, `AG_SERVER_PORT`, ...). They are intentionally
//! serde-friendly and include defaults so that minimal configs remain
//! concise.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub metrics: MetricsConfig,
    pub tracing: TracingConfig,
    pub features: FeaturesConfig,
}

impl GatewayConfig {
    /// The socket address the edge listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for one upstream call, in seconds.
    pub upstream_timeout_secs: u64,
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            upstream_timeout_secs: 30,
            tls: None,
        }
    }
}

/// TLS configuration either via manual certificate/key pair or ACME automation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    /// Path to PEM encoded certificate (if using manual mode)
    pub cert_path: Option<String>,
    /// Path to PEM encoded private key (if using manual mode)
    pub key_path: Option<String>,
    /// Automatic certificate management configuration
    pub acme: Option<AcmeConfig>,
}

/// ACME (e.g. Let's Encrypt) certificate management configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AcmeConfig {
    /// Domain list to request certificates for
    pub domains: Vec<String>,
    /// Contact email for the ACME account
    pub email: String,
    /// Where to store issued certs / keys
    pub cache_dir: String,
    /// Use the production directory (false targets staging)
    #[serde(default)]
    pub production: bool,
    /// Port for the plain-HTTP challenge/redirect listener
    #[serde(default = "default_acme_http_port")]
    pub http_port: u16,
}

fn default_acme_http_port() -> u16 {
    80
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres` or `memory`
    pub driver: String,
    pub dsn: String,
    pub max_connections: u32,
    /// Optional JSON document of route descriptors loaded at startup
    /// (memory driver only).
    pub seed_file: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            dsn: String::new(),
            max_connections: 10,
            seed_file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `memory`, `redis` or `none`
    #[serde(rename = "type")]
    pub kind: String,
    pub ttl_secs: u64,
    /// Sweep interval for the in-process cache.
    pub cleanup_interval_secs: u64,
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: "memory".to_string(),
            ttl_secs: 300,
            cleanup_interval_secs: 60,
            redis: RedisConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RedisConfig {
    pub address: String,
    pub password: String,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
    pub issuer: Option<String>,
    /// Path prefixes exempt from authentication.
    pub public_paths: Vec<String>,
    /// Prefix whose routes additionally require the admin role.
    pub admin_prefix: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwt_secret: String::new(),
            issuer: None,
            public_paths: vec![
                "/health".to_string(),
                "/login".to_string(),
                "/swagger".to_string(),
            ],
            admin_prefix: "/admin".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
    pub level: String,
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "gantry".to_string(),
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FeaturesConfig {
    pub rate_limiting: RateLimitSettings,
    pub circuit_breaker: BreakerSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Nominal per-IP budget per window.
    pub ip_limit: i64,
    pub ip_burst_factor: f64,
    /// Per-route (API) budget per window; the admin surface may override
    /// per route, this is the default applied by the pipeline.
    pub api_limit: i64,
    pub api_burst_factor: f64,
    /// Per-authenticated-user budget per window.
    pub user_limit: i64,
    pub user_burst_factor: f64,
    /// Window length shared by the limiters, in seconds.
    pub window_secs: u64,
    /// `remaining` below this threshold blocks the IP outright.
    pub block_threshold: i64,
    /// How long a blocked IP stays blocked, in seconds.
    pub block_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ip_limit: 100,
            ip_burst_factor: 1.5,
            api_limit: 600,
            api_burst_factor: 1.2,
            user_limit: 1000,
            user_burst_factor: 1.5,
            window_secs: 60,
            block_threshold: -100,
            block_secs: 600,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures before a breaker opens.
    pub max_fails: u32,
    /// Reserved for rolling-window failure counting.
    pub interval_secs: u64,
    /// Seconds a breaker stays open before a half-open trial.
    pub timeout_secs: u64,
    /// Trials admitted while half-open.
    pub max_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_fails: 5,
            interval_secs: 60,
            timeout_secs: 30,
            max_requests: 1,
        }
    }
}

impl From<&BreakerSettings> for crate::core::breaker::BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            max_fails: settings.max_fails,
            interval: std::time::Duration::from_secs(settings.interval_secs),
            timeout: std::time::Duration::from_secs(settings.timeout_secs),
            max_requests: settings.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.server.upstream_timeout_secs, 30);
        assert_eq!(config.cache.kind, "memory");
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.features.rate_limiting.ip_limit, 100);
        assert_eq!(config.features.rate_limiting.block_threshold, -100);
        assert_eq!(config.features.circuit_breaker.max_fails, 5);
        assert_eq!(config.features.circuit_breaker.max_requests, 1);
        assert_eq!(
            config.auth.public_paths,
            vec!["/health", "/login", "/swagger"]
        );
    }

    #[test]
    fn test_cache_kind_deserializes_from_type_key() {
        let config: CacheConfig = serde_json::from_str(r#"{"type": "redis"}"#).unwrap();
        assert_eq!(config.kind, "redis");
    }
}
