use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// HTTP front end settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a single proxied exchange.
    pub request_timeout: Duration,
    /// Optional TOML catalog of launch commands.
    pub catalog_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8911,
            request_timeout: Duration::from_secs(60),
            catalog_path: None,
        }
    }
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs = parse_optional_env(
            "GATEWAY_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GATEWAY_REQUEST_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            host: optional_env("GATEWAY_HOST")?.unwrap_or(defaults.host),
            port: parse_optional_env("GATEWAY_PORT", defaults.port)?,
            request_timeout: Duration::from_secs(timeout_secs),
            catalog_path: optional_env("CATALOG_PATH")?.map(PathBuf::from),
        })
    }
}
