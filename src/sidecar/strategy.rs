//! The seam between the orchestrator and a concrete cluster backend.

use async_trait::async_trait;
use serde::Serialize;

use crate::launch::{ServiceSpec, WorkloadSpec};
use crate::sidecar::error::Result;

/// What the cluster reports about a deployed workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadState {
    /// Fingerprint annotation written at deploy time, if any.
    pub fingerprint: Option<String>,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub image: Option<String>,
}

/// What the cluster reports about a deployed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub fingerprint: Option<String>,
}

/// Observed status of a sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarStatus {
    /// No workload with that name exists.
    NotFound,
    /// Workload exists, no replica is ready yet.
    Pending,
    /// At least one replica is ready.
    Ready,
}

impl SidecarStatus {
    pub fn from_state(state: Option<&WorkloadState>) -> Self {
        match state {
            None => Self::NotFound,
            Some(s) if s.ready_replicas > 0 => Self::Ready,
            Some(_) => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Pending => "pending",
            Self::Ready => "ready",
        }
    }
}

/// Status answer for one sidecar. `status` is `not_found` rather than an
/// error when nothing is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidecarReport {
    pub status: SidecarStatus,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub image: Option<String>,
}

impl SidecarReport {
    pub fn from_state(state: Option<&WorkloadState>) -> Self {
        Self {
            status: SidecarStatus::from_state(state),
            replicas: state.map_or(0, |s| s.replicas),
            ready_replicas: state.map_or(0, |s| s.ready_replicas),
            image: state.and_then(|s| s.image.clone()),
        }
    }
}

impl std::fmt::Display for SidecarStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A way of talking to the cluster.
///
/// Implementations perform single resource operations. Idempotence, rollback
/// and error aggregation live in [`SidecarOrchestrator`](super::SidecarOrchestrator)
/// so every backend behaves the same.
#[async_trait]
pub trait DeploymentStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Create the namespace if it does not exist.
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>>;

    /// Create the workload, or update it in place if it already exists.
    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceState>>;

    /// Create the service, or update it in place if it already exists.
    async fn apply_service(&self, spec: &ServiceSpec) -> Result<()>;

    /// Delete the workload. Returns `false` when it did not exist.
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Delete the service. Returns `false` when it did not exist.
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Last `tail` lines of the workload's container output.
    async fn logs(&self, namespace: &str, name: &str, tail: i64) -> Result<String>;

    /// Base URL of the MCP endpoint behind `service`.
    async fn endpoint(&self, service: &ServiceSpec) -> Result<String>;

    /// Drop any per-sidecar local resources (port forwards and the like).
    async fn release(&self, _namespace: &str, _name: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_state() {
        assert_eq!(SidecarStatus::from_state(None), SidecarStatus::NotFound);
        let pending = WorkloadState {
            fingerprint: None,
            replicas: 1,
            ready_replicas: 0,
            image: Some("img".to_string()),
        };
        assert_eq!(SidecarStatus::from_state(Some(&pending)), SidecarStatus::Pending);
        let ready = WorkloadState {
            ready_replicas: 1,
            ..pending.clone()
        };
        assert_eq!(SidecarStatus::from_state(Some(&ready)), SidecarStatus::Ready);

        let report = SidecarReport::from_state(Some(&pending));
        assert_eq!(report.image.as_deref(), Some("img"));
        assert_eq!(report.replicas, 1);
        assert_eq!(SidecarReport::from_state(None).status, SidecarStatus::NotFound);
        assert_eq!(
            serde_json::to_value(SidecarStatus::NotFound).unwrap(),
            serde_json::json!("not_found")
        );
    }
}
