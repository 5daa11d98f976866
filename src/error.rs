//! Error types for the gateway.
//!
//! Every subsystem owns a `thiserror` enum next to its code. They all map onto
//! [`ErrorKind`], the machine-readable classification that crosses the HTTP
//! boundary together with a human-readable message.

use serde::Serialize;

use crate::adapter::AdapterError;
use crate::catalog::CatalogError;
use crate::launch::LaunchError;
use crate::proxy::ProxyError;
use crate::session::SessionError;
use crate::sidecar::SidecarError;

/// Machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    MalformedCommand,
    ImageNotFound,
    AdapterNotFound,
    AdapterExists,
    InvalidAdapter,
    BackendUnavailable,
    BackendProtocol,
    DeploymentFailed,
    SessionNotFound,
    SessionInvalidated,
    SessionRequired,
    ConfigurationFatal,
    TeardownFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedCommand => "MalformedCommand",
            Self::ImageNotFound => "ImageNotFound",
            Self::AdapterNotFound => "AdapterNotFound",
            Self::AdapterExists => "AdapterExists",
            Self::InvalidAdapter => "InvalidAdapter",
            Self::BackendUnavailable => "BackendUnavailable",
            Self::BackendProtocol => "BackendProtocol",
            Self::DeploymentFailed => "DeploymentFailed",
            Self::SessionNotFound => "SessionNotFound",
            Self::SessionInvalidated => "SessionInvalidated",
            Self::SessionRequired => "SessionRequired",
            Self::ConfigurationFatal => "ConfigurationFatal",
            Self::TeardownFailed => "TeardownFailed",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors raised while resolving settings from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required setting {key}")]
    Missing { key: String },

    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Top-level error unifying every subsystem.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::ConfigurationFatal,
            Self::Launch(e) => e.kind(),
            Self::Sidecar(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Adapter(e) => e.kind(),
            Self::Catalog(e) => e.kind(),
            Self::Proxy(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
