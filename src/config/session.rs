use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Session expiry policy. No idle timeout is enforced unless configured.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let idle_timeout = optional_env("SESSION_IDLE_TIMEOUT_SECS")?
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SESSION_IDLE_TIMEOUT_SECS".to_string(),
                        message: e.to_string(),
                    })
            })
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let sweep_secs = parse_optional_env(
            "SESSION_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        )?;

        Ok(Self {
            idle_timeout,
            sweep_interval: Duration::from_secs(sweep_secs.max(1)),
        })
    }
}
