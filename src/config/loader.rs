use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration from a file using the config crate, layered with
/// `AG_`-prefixed environment variables (e.g. `AG_CACHE_TYPE=redis` sets
/// `cache.type`). Supports TOML, YAML and JSON by extension.
pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .add_source(Environment::with_prefix("AG").separator("_").try_parsing(true))
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!("Failed to deserialize config from {}", path.display())
    })?;

    Ok(gateway_config)
}

/// Build a configuration from environment variables alone, falling back to
/// defaults for everything unset. Used when no config file is present.
pub fn load_config_from_env() -> Result<GatewayConfig> {
    let settings = Config::builder()
        .add_source(Environment::with_prefix("AG").separator("_").try_parsing(true))
        .build()
        .context("Failed to read environment configuration")?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .context("Failed to deserialize environment configuration")?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_toml_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 3000

[cache]
type = "none"
ttl_secs = 120

[features.rate_limiting]
ip_limit = 50
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:3000");
        assert_eq!(config.cache.kind, "none");
        assert_eq!(config.cache.ttl_secs, 120);
        assert_eq!(config.features.rate_limiting.ip_limit, 50);
        // Untouched sections keep their defaults.
        assert_eq!(config.features.circuit_breaker.max_fails, 5);
    }

    #[test]
    fn test_load_json_config() {
        let json_content = r#"
{
  "server": { "host": "0.0.0.0", "port": 9090 },
  "database": { "driver": "memory" }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.database.driver, "memory");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config("/does/not/exist.toml").is_err());
    }
}
