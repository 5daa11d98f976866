//! Strategy-independent sidecar lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::launch::{LaunchSpec, ServiceSpec, Translator, WorkloadSpec, resource_name};
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::strategy::{DeploymentStrategy, SidecarReport, SidecarStatus};

/// Delay before the single retry of a read-only cluster call.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(250);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle of one adapter's sidecar as seen by this gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarState {
    NotDeployed,
    Deploying,
    Ready,
    Deleting,
}

/// What a deploy call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
struct Deployed {
    service: ServiceSpec,
    state: SidecarState,
}

/// Deploys, inspects and removes sidecars through a [`DeploymentStrategy`].
///
/// Operations on the same resource name are serialised by a per-name async
/// lock. Different adapters proceed in parallel.
pub struct SidecarOrchestrator {
    strategy: Arc<dyn DeploymentStrategy>,
    translator: Translator,
    startup_timeout: Duration,
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    deployed: RwLock<HashMap<String, Deployed>>,
}

impl SidecarOrchestrator {
    pub fn new(
        strategy: Arc<dyn DeploymentStrategy>,
        translator: Translator,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            strategy,
            translator,
            startup_timeout,
            locks: std::sync::Mutex::new(HashMap::new()),
            deployed: RwLock::new(HashMap::new()),
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn namespace(&self) -> &str {
        self.translator.namespace()
    }

    pub async fn state(&self, adapter: &str) -> SidecarState {
        self.deployed
            .read()
            .await
            .get(adapter)
            .map(|d| d.state)
            .unwrap_or(SidecarState::NotDeployed)
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `name` unless another caller still holds or awaits it.
    fn forget_lock(&self, name: &str, held: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(held) <= 2 {
            locks.remove(name);
        }
    }

    /// Resource names with a lock entry.
    pub fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    async fn set_state(&self, adapter: &str, service: &ServiceSpec, state: SidecarState) {
        self.deployed.write().await.insert(
            adapter.to_string(),
            Deployed {
                service: service.clone(),
                state,
            },
        );
    }

    /// Make the cluster match the launch spec for `adapter`.
    ///
    /// Repeating a deploy with identical inputs changes nothing. If the
    /// service cannot be created and the workload was created by this same
    /// call, the workload is deleted again before the error is returned.
    pub async fn deploy(
        &self,
        adapter: &str,
        launch: &LaunchSpec,
        env_overrides: &HashMap<String, String>,
    ) -> Result<DeployAction> {
        let (workload, service) = self.translator.translate(adapter, launch, env_overrides);
        let lock = self.lock_for(&workload.name);
        let _guard = lock.lock().await;

        let previous = self.deployed.read().await.get(adapter).cloned();
        self.set_state(adapter, &service, SidecarState::Deploying).await;

        match self.deploy_locked(&workload, &service).await {
            Ok(action) => {
                self.set_state(adapter, &service, SidecarState::Ready).await;
                tracing::info!(
                    adapter,
                    name = %workload.name,
                    namespace = %workload.namespace,
                    strategy = self.strategy.name(),
                    ?action,
                    "Sidecar deployed"
                );
                Ok(action)
            }
            Err(e) => {
                let mut deployed = self.deployed.write().await;
                match previous {
                    Some(prev) => deployed.insert(adapter.to_string(), prev),
                    None => deployed.remove(adapter),
                };
                tracing::error!(adapter, name = %workload.name, error = %e, "Sidecar deploy failed");
                Err(e)
            }
        }
    }

    async fn deploy_locked(
        &self,
        workload: &WorkloadSpec,
        service: &ServiceSpec,
    ) -> Result<DeployAction> {
        self.strategy
            .ensure_namespace(&workload.namespace)
            .await
            .map_err(|e| SidecarError::DeploymentFailed {
                name: workload.name.clone(),
                reason: e.to_string(),
            })?;

        let desired = workload.fingerprint();
        let existing = self
            .strategy
            .get_workload(&workload.namespace, &workload.name)
            .await?;

        let mut action = match existing {
            Some(state) if state.fingerprint.as_deref() == Some(desired.as_str()) => {
                DeployAction::Unchanged
            }
            Some(_) => {
                self.strategy.apply_workload(workload).await?;
                DeployAction::Updated
            }
            None => {
                self.strategy.apply_workload(workload).await?;
                DeployAction::Created
            }
        };

        let service_current = self
            .strategy
            .get_service(&service.namespace, &service.name)
            .await
            .map(|s| s.and_then(|s| s.fingerprint) == Some(service.fingerprint()));

        let service_applied = match service_current {
            Ok(true) => Ok(false),
            Ok(false) => self.strategy.apply_service(service).await.map(|()| true),
            Err(e) => Err(e),
        };

        match service_applied {
            Ok(true) if action == DeployAction::Unchanged => action = DeployAction::Updated,
            Ok(_) => {}
            Err(e) => {
                let rolled_back = action == DeployAction::Created
                    && self.rollback_workload(workload).await;
                return Err(SidecarError::ServiceCreationFailed {
                    name: service.name.clone(),
                    reason: e.to_string(),
                    rolled_back,
                });
            }
        }

        Ok(action)
    }

    async fn rollback_workload(&self, workload: &WorkloadSpec) -> bool {
        match self
            .strategy
            .delete_workload(&workload.namespace, &workload.name)
            .await
        {
            Ok(_) => {
                tracing::info!(name = %workload.name, "Rolled back workload after service failure");
                true
            }
            Err(e) => {
                tracing::warn!(name = %workload.name, error = %e, "Rollback of workload failed");
                false
            }
        }
    }

    /// Current cluster status of the adapter's sidecar.
    pub async fn status(&self, adapter: &str) -> Result<SidecarReport> {
        let name = resource_name(adapter);
        let namespace = self.namespace();
        let state = retry_once("status", || self.strategy.get_workload(namespace, &name)).await?;
        Ok(SidecarReport::from_state(state.as_ref()))
    }

    /// Poll until the sidecar reports ready or the startup timeout passes.
    pub async fn wait_ready(&self, adapter: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.startup_timeout;
        loop {
            let status = self.status(adapter).await?.status;
            match status {
                SidecarStatus::Ready => return Ok(()),
                SidecarStatus::NotFound => {
                    return Err(SidecarError::NotDeployed {
                        adapter: adapter.to_string(),
                    });
                }
                SidecarStatus::Pending if tokio::time::Instant::now() >= deadline => {
                    return Err(SidecarError::NotReady {
                        name: resource_name(adapter),
                        status: status.to_string(),
                    });
                }
                SidecarStatus::Pending => tokio::time::sleep(READY_POLL_INTERVAL).await,
            }
        }
    }

    /// Last `tail` lines of the sidecar's output.
    pub async fn logs(&self, adapter: &str, tail: i64) -> Result<String> {
        let name = resource_name(adapter);
        let namespace = self.namespace();
        retry_once("logs", || self.strategy.logs(namespace, &name, tail)).await
    }

    /// Address of the adapter's MCP endpoint.
    pub async fn endpoint(&self, adapter: &str) -> Result<String> {
        let service = self
            .deployed
            .read()
            .await
            .get(adapter)
            .map(|d| d.service.clone())
            .ok_or_else(|| SidecarError::NotDeployed {
                adapter: adapter.to_string(),
            })?;
        self.strategy.endpoint(&service).await
    }

    /// Remove the adapter's workload and service.
    ///
    /// Both deletions are always attempted. Resources that are already gone
    /// count as removed. Failures are collected into a single error.
    pub async fn teardown(&self, adapter: &str) -> Result<()> {
        let name = resource_name(adapter);
        let namespace = self.namespace().to_string();
        let lock = self.lock_for(&name);
        let _guard = lock.lock().await;

        let previous = {
            let mut deployed = self.deployed.write().await;
            deployed.get_mut(adapter).map(|d| {
                let prev = d.state;
                d.state = SidecarState::Deleting;
                prev
            })
        };

        self.strategy.release(&namespace, &name).await;

        let mut errors = Vec::new();
        match self.strategy.delete_workload(&namespace, &name).await {
            Ok(existed) => tracing::debug!(%name, existed, "Workload removed"),
            Err(e) => errors.push(format!("workload: {e}")),
        }
        match self.strategy.delete_service(&namespace, &name).await {
            Ok(existed) => tracing::debug!(%name, existed, "Service removed"),
            Err(e) => errors.push(format!("service: {e}")),
        }

        let mut deployed = self.deployed.write().await;
        if errors.is_empty() {
            deployed.remove(adapter);
            drop(deployed);
            self.forget_lock(&name, &lock);
            tracing::info!(adapter, %name, "Sidecar torn down");
            Ok(())
        } else {
            if let (Some(prev), Some(entry)) = (previous, deployed.get_mut(adapter)) {
                entry.state = prev;
            }
            tracing::warn!(adapter, %name, ?errors, "Sidecar teardown incomplete");
            Err(SidecarError::TeardownFailed { name, errors })
        }
    }
}

/// Run `op`, and once more after [`RETRY_BACKOFF`] if the first failure is transient.
pub(crate) async fn retry_once<T, F, Fut>(operation: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::debug!(operation, error = %e, "Retrying after transient failure");
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::{ResourceLimits, parse};
    use crate::testing::InMemoryCluster;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator(cluster: Arc<InMemoryCluster>) -> SidecarOrchestrator {
        SidecarOrchestrator::new(
            cluster,
            Translator::new(
                "mcp-sidecars",
                ResourceLimits {
                    cpu: "500m".to_string(),
                    memory: "512Mi".to_string(),
                },
            ),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_retry_once_on_transient() {
        let calls = AtomicUsize::new(0);
        let result = retry_once("status", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SidecarError::Api {
                    operation: "get".to_string(),
                    reason: "flaky".to_string(),
                })
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_on_permanent() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_once("status", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SidecarError::NotDeployed {
                adapter: "x".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let cluster = Arc::new(InMemoryCluster::new());
        let orch = orchestrator(cluster.clone());
        let launch = parse("docker run img").unwrap();

        assert_eq!(orch.state("a").await, SidecarState::NotDeployed);
        orch.deploy("a", &launch, &HashMap::new()).await.unwrap();
        assert_eq!(orch.state("a").await, SidecarState::Ready);
        orch.teardown("a").await.unwrap();
        assert_eq!(orch.state("a").await, SidecarState::NotDeployed);
    }

    #[tokio::test]
    async fn test_teardown_forgets_name_lock() {
        let cluster = Arc::new(InMemoryCluster::new());
        let orch = orchestrator(cluster.clone());
        let launch = parse("docker run img").unwrap();

        orch.deploy("a", &launch, &HashMap::new()).await.unwrap();
        orch.deploy("b", &launch, &HashMap::new()).await.unwrap();
        assert_eq!(orch.tracked_locks(), 2);

        orch.teardown("a").await.unwrap();
        assert_eq!(orch.tracked_locks(), 1);

        cluster.set_fail_service_delete(true);
        assert!(orch.teardown("b").await.is_err());
        assert_eq!(orch.tracked_locks(), 1);
        cluster.set_fail_service_delete(false);
        orch.teardown("b").await.unwrap();
        assert_eq!(orch.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_endpoint_requires_deploy() {
        let orch = orchestrator(Arc::new(InMemoryCluster::new()));
        assert!(matches!(
            orch.endpoint("ghost").await,
            Err(SidecarError::NotDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_ready_times_out_when_pending() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.set_auto_ready(false);
        let orch = orchestrator(cluster.clone());
        let launch = parse("docker run img").unwrap();
        orch.deploy("slow", &launch, &HashMap::new()).await.unwrap();

        let err = orch.wait_ready("slow").await.unwrap_err();
        assert!(matches!(err, SidecarError::NotReady { .. }));

        cluster.mark_ready(&resource_name("slow"));
        orch.wait_ready("slow").await.unwrap();
    }
}
