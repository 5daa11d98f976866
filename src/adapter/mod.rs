//! Adapters: named bindings between the gateway and one backend MCP server.

mod service;
mod store;

pub use service::{AdapterService, CreateAdapter};
pub use store::{AdapterStore, InMemoryAdapterStore};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogError;
use crate::error::ErrorKind;
use crate::launch::{LaunchError, LaunchSpec};
use crate::sidecar::SidecarError;

/// How the dispatcher reaches an adapter's backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// Child process speaking line-delimited JSON-RPC on stdin/stdout.
    LocalProcess,
    /// Container deployed into the cluster by the sidecar orchestrator.
    SidecarContainer,
    /// Plain remote HTTP endpoint.
    RemoteHttp,
    /// Streamable HTTP endpoint, configured or derived from the sidecar address.
    StreamableHttp,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalProcess => write!(f, "local_process"),
            Self::SidecarContainer => write!(f, "sidecar_container"),
            Self::RemoteHttp => write!(f, "remote_http"),
            Self::StreamableHttp => write!(f, "streamable_http"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Provisioning,
    Ready,
    Degraded,
    Deleted,
}

/// Where an API key is attached to outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
    #[default]
    Header,
    Query,
}

/// Credentials applied to outbound HTTP calls.
#[derive(Debug, Clone, Default)]
pub enum AdapterAuth {
    #[default]
    None,
    Bearer {
        token: SecretString,
    },
    Basic {
        username: String,
        password: SecretString,
    },
    ApiKey {
        name: String,
        value: SecretString,
        location: ApiKeyLocation,
    },
}

impl AdapterAuth {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bearer { .. } => "bearer",
            Self::Basic { .. } => "basic",
            Self::ApiKey { .. } => "api_key",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Program started for a [`ConnectionKind::LocalProcess`] adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Adapter {
    pub name: String,
    pub kind: ConnectionKind,
    pub description: Option<String>,
    /// Parsed launch command. Present only for sidecar adapters.
    pub launch: Option<LaunchSpec>,
    pub local: Option<LocalCommand>,
    /// Normalised backend URL for the HTTP kinds.
    pub remote_url: Option<String>,
    pub auth: AdapterAuth,
    /// Overrides merged over the launch command's environment.
    pub env: HashMap<String, String>,
    pub status: AdapterStatus,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Adapter {
    pub fn is_deleted(&self) -> bool {
        self.status == AdapterStatus::Deleted
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Adapter '{name}' not found")]
    NotFound { name: String },

    #[error("Adapter '{name}' already exists")]
    Exists { name: String },

    #[error("Invalid adapter: {reason}")]
    Invalid { reason: String },

    #[error("Adapter '{name}' needs a sidecar but no deployment strategy is available")]
    SidecarsUnavailable { name: String },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Sidecar(#[from] SidecarError),
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::AdapterNotFound,
            Self::Exists { .. } => ErrorKind::AdapterExists,
            Self::Invalid { .. } => ErrorKind::InvalidAdapter,
            Self::SidecarsUnavailable { .. } => ErrorKind::ConfigurationFatal,
            Self::Launch(e) => e.kind(),
            Self::Catalog(e) => e.kind(),
            Self::Sidecar(e) => e.kind(),
        }
    }
}

/// Adapter names become URL path segments and cluster label values.
pub fn validate_name(name: &str) -> Result<(), AdapterError> {
    let invalid = |reason: &str| {
        Err(AdapterError::Invalid {
            reason: format!("name '{name}' {reason}"),
        })
    };
    if name.is_empty() {
        return invalid("is empty");
    }
    if name.len() > 63 {
        return invalid("is longer than 63 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return invalid("may only contain letters, digits, '-', '_' and '.'");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return invalid("must start with a letter or digit");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("uyuni").is_ok());
        assert!(validate_name("My_Server.v2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AdapterError::SidecarsUnavailable {
                name: "x".to_string()
            }
            .kind(),
            ErrorKind::ConfigurationFatal
        );
        assert_eq!(
            AdapterError::from(LaunchError::ImageNotFound).kind(),
            ErrorKind::ImageNotFound
        );
        assert_eq!(
            AdapterError::from(CatalogError::NotFound {
                id: "x".to_string()
            })
            .kind(),
            ErrorKind::InvalidAdapter
        );
    }
}
