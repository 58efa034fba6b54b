use std::net::SocketAddr;

use crate::config::models::GatewayConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, aggregating every problem
    /// into one error so operators fix a config in a single pass.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.listen_addr().parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListenAddress {
                address: config.listen_addr(),
                reason: "Must resolve to 'IP:PORT' (e.g., '0.0.0.0:8080')".to_string(),
            });
        }

        match config.database.driver.as_str() {
            "memory" => {}
            "postgres" => {
                if config.database.dsn.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "database.dsn".to_string(),
                    });
                }
            }
            other => errors.push(ValidationError::InvalidField {
                field: "database.driver".to_string(),
                message: format!("unknown driver '{other}', expected 'postgres' or 'memory'"),
            }),
        }

        match config.cache.kind.as_str() {
            "memory" | "none" => {}
            "redis" => {
                if config.cache.redis.address.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "cache.redis.address".to_string(),
                    });
                }
            }
            other => errors.push(ValidationError::InvalidField {
                field: "cache.type".to_string(),
                message: format!("unknown cache type '{other}', expected 'memory', 'redis' or 'none'"),
            }),
        }

        if config.auth.enabled && config.auth.jwt_secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.jwt_secret".to_string(),
            });
        }

        let limits = &config.features.rate_limiting;
        for (field, factor) in [
            ("features.rate_limiting.ip_burst_factor", limits.ip_burst_factor),
            ("features.rate_limiting.api_burst_factor", limits.api_burst_factor),
            ("features.rate_limiting.user_burst_factor", limits.user_burst_factor),
        ] {
            if factor <= 0.0 {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "burst factor must be positive".to_string(),
                });
            }
        }
        if limits.window_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "features.rate_limiting.window_secs".to_string(),
                message: "window must be at least one second".to_string(),
            });
        }

        if let Some(tls) = &config.server.tls {
            let manual = tls.cert_path.is_some() && tls.key_path.is_some();
            if !manual && tls.acme.is_none() {
                errors.push(ValidationError::InvalidTls {
                    message: "either cert_path + key_path or an [server.tls.acme] block is required"
                        .to_string(),
                });
            }
            if let Some(acme) = &tls.acme {
                if acme.domains.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "server.tls.acme.domains".to_string(),
                    });
                }
                if acme.email.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "server.tls.acme.email".to_string(),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
