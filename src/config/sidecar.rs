use std::ops::Range;
use std::path::PathBuf;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;

/// Which deployment strategy the orchestrator should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyPreference {
    /// Detect from the environment: typed client first, then kubectl.
    #[default]
    Auto,
    /// Typed cluster-API client only.
    Kube,
    /// kubectl only.
    Kubectl,
    /// No sidecar support.
    Disabled,
}

impl std::fmt::Display for StrategyPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Kube => write!(f, "kube"),
            Self::Kubectl => write!(f, "kubectl"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl std::str::FromStr for StrategyPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "kube" | "api" | "client" => Ok(Self::Kube),
            "kubectl" | "cli" => Ok(Self::Kubectl),
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            _ => Err(format!(
                "invalid sidecar strategy '{}', expected 'auto', 'kube', 'kubectl' or 'disabled'",
                s
            )),
        }
    }
}

/// Sidecar orchestration configuration.
///
/// Sidecars live in their own namespace, never the gateway's.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub strategy: StrategyPreference,
    /// Refuse to start without a usable strategy.
    pub required: bool,
    /// Namespace that holds every sidecar workload and service.
    pub namespace: String,
    /// Namespace the gateway itself runs in.
    pub gateway_namespace: String,
    /// Container port used when a launch command declares none.
    pub default_port: u16,
    pub cpu_limit: String,
    pub memory_limit: String,
    /// Local ports handed out to `kubectl port-forward`.
    pub forward_ports: Range<u16>,
    pub kubectl_path: PathBuf,
    /// Seconds to wait for a freshly deployed sidecar to report ready.
    pub startup_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyPreference::Auto,
            required: false,
            namespace: "mcp-sidecars".to_string(),
            gateway_namespace: "mcp-gateway".to_string(),
            default_port: 8000,
            cpu_limit: "500m".to_string(),
            memory_limit: "512Mi".to_string(),
            forward_ports: 8000..9000,
            kubectl_path: PathBuf::from("kubectl"),
            startup_timeout_secs: 120,
        }
    }
}

impl SidecarConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let strategy = match optional_env("SIDECAR_STRATEGY")? {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "SIDECAR_STRATEGY".to_string(),
                message,
            })?,
            None => defaults.strategy,
        };

        let start = parse_optional_env("SIDECAR_PORT_RANGE_START", defaults.forward_ports.start)?;
        let end = parse_optional_env("SIDECAR_PORT_RANGE_END", defaults.forward_ports.end)?;
        if start >= end {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_PORT_RANGE_END".to_string(),
                message: format!("range {start}..{end} is empty"),
            });
        }

        let config = Self {
            strategy,
            required: parse_bool_env("SIDECAR_REQUIRED", defaults.required)?,
            namespace: optional_env("SIDECAR_NAMESPACE")?.unwrap_or(defaults.namespace),
            gateway_namespace: optional_env("GATEWAY_NAMESPACE")?
                .unwrap_or(defaults.gateway_namespace),
            default_port: parse_optional_env("SIDECAR_DEFAULT_PORT", defaults.default_port)?,
            cpu_limit: optional_env("SIDECAR_CPU_LIMIT")?.unwrap_or(defaults.cpu_limit),
            memory_limit: optional_env("SIDECAR_MEMORY_LIMIT")?.unwrap_or(defaults.memory_limit),
            forward_ports: start..end,
            kubectl_path: optional_env("KUBECTL_PATH")?
                .map(PathBuf::from)
                .unwrap_or(defaults.kubectl_path),
            startup_timeout_secs: parse_optional_env(
                "SIDECAR_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would put sidecars next to the gateway.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace == self.gateway_namespace {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_NAMESPACE".to_string(),
                message: format!(
                    "sidecar namespace '{}' must differ from the gateway namespace",
                    self.namespace
                ),
            });
        }
        if self.default_port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIDECAR_DEFAULT_PORT".to_string(),
                message: "port 0 is not addressable".to_string(),
            });
        }
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.strategy != StrategyPreference::Disabled
    }
}
