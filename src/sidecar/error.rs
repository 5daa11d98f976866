//! Error types for sidecar orchestration.

use thiserror::Error;

use crate::error::ErrorKind;

/// Result type for sidecar operations.
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Errors that can occur while deploying, inspecting or removing sidecars.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// No deployment strategy can be used in this environment.
    #[error("No sidecar deployment strategy available: {reason}")]
    NoStrategy {
        /// Why every strategy was rejected.
        reason: String,
    },

    /// Running inside a cluster but the typed client could not be built.
    #[error("Running in-cluster but the cluster client failed to initialise: {reason}")]
    InClusterClientUnavailable {
        /// Underlying client error.
        reason: String,
    },

    /// Creating or updating the workload failed.
    #[error("Failed to deploy workload '{name}': {reason}")]
    DeploymentFailed {
        /// Resource name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Creating the service failed. The workload created in the same call
    /// has been removed when `rolled_back` is set.
    #[error("Failed to create service '{name}' (workload rolled back: {rolled_back}): {reason}")]
    ServiceCreationFailed {
        /// Resource name.
        name: String,
        /// Reason for failure.
        reason: String,
        /// Whether the workload was deleted again.
        rolled_back: bool,
    },

    /// The sidecar exists but is not serving yet.
    #[error("Sidecar '{name}' is not ready (status: {status})")]
    NotReady {
        /// Resource name.
        name: String,
        /// Last observed status.
        status: String,
    },

    /// The adapter has no deployed sidecar known to this gateway.
    #[error("No sidecar deployed for adapter '{adapter}'")]
    NotDeployed {
        /// Adapter name.
        adapter: String,
    },

    /// One or both deletions failed during teardown.
    #[error("Teardown of '{name}' incomplete: {}", errors.join("; "))]
    TeardownFailed {
        /// Resource name.
        name: String,
        /// One entry per failed deletion.
        errors: Vec<String>,
    },

    /// Every local port in the forward range is taken.
    #[error("No free local port in range {start}..{end}")]
    PortsExhausted {
        /// Range start.
        start: u16,
        /// Range end (exclusive).
        end: u16,
    },

    /// Cluster API request failed.
    #[error("Cluster API {operation} failed: {reason}")]
    Api {
        /// What was being attempted.
        operation: String,
        /// Reason for failure.
        reason: String,
    },

    /// A `kubectl` invocation exited unsuccessfully.
    #[error("`kubectl {command}` failed ({status}): {stderr}")]
    Cli {
        /// Subcommand that was run.
        command: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Output from the cluster could not be decoded.
    #[error("Could not decode cluster response: {0}")]
    Decode(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SidecarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoStrategy { .. } | Self::InClusterClientUnavailable { .. } => {
                ErrorKind::ConfigurationFatal
            }
            Self::DeploymentFailed { .. } | Self::ServiceCreationFailed { .. } => {
                ErrorKind::DeploymentFailed
            }
            Self::TeardownFailed { .. } => ErrorKind::TeardownFailed,
            Self::NotDeployed { .. }
            | Self::NotReady { .. }
            | Self::PortsExhausted { .. }
            | Self::Api { .. }
            | Self::Cli { .. }
            | Self::Decode(_)
            | Self::Io(_) => ErrorKind::BackendUnavailable,
        }
    }

    /// Failures that may clear up on a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Api { .. } | Self::Cli { .. } | Self::Io(_) | Self::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_message_lists_every_error() {
        let err = SidecarError::TeardownFailed {
            name: "mcp-sidecar-a".to_string(),
            errors: vec!["workload: boom".to_string(), "service: bang".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("workload: boom"));
        assert!(msg.contains("service: bang"));
        assert_eq!(err.kind(), ErrorKind::TeardownFailed);
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            SidecarError::Api {
                operation: "get".to_string(),
                reason: "timeout".to_string()
            }
            .is_transient()
        );
        assert!(
            !SidecarError::NoStrategy {
                reason: "none".to_string()
            }
            .is_transient()
        );
    }
}
