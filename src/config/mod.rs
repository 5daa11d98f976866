//! Configuration resolved from the process environment.
//!
//! `main` loads `.env` through `dotenvy` before calling [`Config::from_env`].

mod gateway;
pub(crate) mod helpers;
mod session;
mod sidecar;

pub use gateway::GatewayConfig;
pub use session::SessionConfig;
pub use sidecar::{SidecarConfig, StrategyPreference};

use crate::error::ConfigError;

/// Full gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub sidecar: SidecarConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve()?,
            sidecar: SidecarConfig::resolve()?,
            session: SessionConfig::resolve()?,
        })
    }
}
