//! Deployment strategy that shells out to `kubectl`.
//!
//! Used when no typed client can be built, typically on a workstation where
//! the gateway runs outside the cluster. Manifests are the same objects the
//! typed strategy applies, serialised to JSON and piped to `kubectl apply`.
//! Services are reached through `kubectl port-forward` on a local port.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::launch::{ServiceSpec, WorkloadSpec};
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::manifest;
use crate::sidecar::ports::PortAllocator;
use crate::sidecar::strategy::{DeploymentStrategy, ServiceState, WorkloadState};

const FORWARD_READY_TIMEOUT: Duration = Duration::from_secs(10);
const FORWARD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One service's port-forward. Its lock is held while the forward starts,
/// so only callers for the same service wait on it.
type ForwardSlot = Arc<Mutex<Option<Child>>>;

pub struct KubectlStrategy {
    binary: PathBuf,
    ports: PortAllocator,
    /// Port-forward slots keyed by `namespace/name`.
    forwards: std::sync::Mutex<HashMap<String, ForwardSlot>>,
}

impl KubectlStrategy {
    pub fn new(binary: PathBuf, ports: PortAllocator) -> Self {
        Self {
            binary,
            ports,
            forwards: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check that the binary runs at all.
    pub async fn check_binary(&self) -> Result<()> {
        self.run(&["version", "--client", "-o", "json"], None).await?;
        Ok(())
    }

    fn forward_slot(&self, key: &str) -> ForwardSlot {
        let mut forwards = self
            .forwards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(forwards.entry(key.to_string()).or_default())
    }

    async fn run(&self, args: &[&str], stdin: Option<Vec<u8>>) -> Result<Output> {
        tracing::debug!(binary = %self.binary.display(), ?args, "Running kubectl");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(&input).await?;
            pipe.shutdown().await?;
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            return Err(SidecarError::Cli {
                command: args.first().copied().unwrap_or_default().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn apply_json(&self, namespace: &str, manifest: Vec<u8>) -> Result<()> {
        self.run(&["apply", "-n", namespace, "-f", "-"], Some(manifest))
            .await?;
        Ok(())
    }

    /// `kubectl get <kind> <name> -o json`, `None` when absent.
    async fn get_json(&self, kind: &str, namespace: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let output = self
            .run(
                &["get", kind, name, "-n", namespace, "-o", "json", "--ignore-not-found"],
                None,
            )
            .await?;
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        Ok(Some(output.stdout))
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<bool> {
        let output = self
            .run(
                &["delete", kind, name, "-n", namespace, "--ignore-not-found", "-o", "name"],
                None,
            )
            .await?;
        Ok(!output.stdout.iter().all(u8::is_ascii_whitespace))
    }

    async fn start_forward(&self, service: &ServiceSpec, key: &str) -> Result<(u16, Child)> {
        let local = self.ports.allocate(key)?;
        let target = format!("service/{}", service.name);
        let mapping = format!("{local}:{}", service.port);

        let mut child = Command::new(&self.binary)
            .args(["port-forward", "-n", &service.namespace, &target, &mapping])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .inspect_err(|_| {
                self.ports.release(key);
            })?;

        let deadline = tokio::time::Instant::now() + FORWARD_READY_TIMEOUT;
        loop {
            if tokio::net::TcpStream::connect(("127.0.0.1", local)).await.is_ok() {
                tracing::info!(service = %service.name, local, "Port-forward established");
                return Ok((local, child));
            }
            if let Ok(Some(status)) = child.try_wait() {
                self.ports.release(key);
                return Err(SidecarError::Cli {
                    command: "port-forward".to_string(),
                    status: status.to_string(),
                    stderr: "port-forward exited before accepting connections".to_string(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = child.kill().await;
                self.ports.release(key);
                return Err(SidecarError::NotReady {
                    name: service.name.clone(),
                    status: format!("port-forward not listening after {FORWARD_READY_TIMEOUT:?}"),
                });
            }
            tokio::time::sleep(FORWARD_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl DeploymentStrategy for KubectlStrategy {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let body = serde_json::to_vec(&manifest::namespace(namespace))?;
        self.run(&["apply", "-f", "-"], Some(body)).await?;
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>> {
        match self.get_json("deployment", namespace, name).await? {
            Some(raw) => {
                let deployment: Deployment = serde_json::from_slice(&raw)?;
                Ok(Some(manifest::workload_state(&deployment)))
            }
            None => Ok(None),
        }
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        let body = serde_json::to_vec(&manifest::deployment(spec))?;
        self.apply_json(&spec.namespace, body)
            .await
            .map_err(|e| SidecarError::DeploymentFailed {
                name: spec.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceState>> {
        match self.get_json("service", namespace, name).await? {
            Some(raw) => {
                let service: Service = serde_json::from_slice(&raw)?;
                Ok(Some(manifest::service_state(&service)))
            }
            None => Ok(None),
        }
    }

    async fn apply_service(&self, spec: &ServiceSpec) -> Result<()> {
        let body = serde_json::to_vec(&manifest::service(spec))?;
        self.apply_json(&spec.namespace, body).await
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<bool> {
        self.delete("deployment", namespace, name).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
        self.delete("service", namespace, name).await
    }

    async fn logs(&self, namespace: &str, name: &str, tail: i64) -> Result<String> {
        let target = format!("deployment/{name}");
        let tail = format!("--tail={tail}");
        let output = self
            .run(&["logs", &target, "-n", namespace, &tail], None)
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn endpoint(&self, service: &ServiceSpec) -> Result<String> {
        let key = format!("{}/{}", service.namespace, service.name);
        let slot = self.forward_slot(&key);
        let mut current = slot.lock().await;

        if let Some(child) = current.as_mut() {
            match (child.try_wait(), self.ports.port_of(&key)) {
                (Ok(None), Some(port)) => return Ok(format!("http://127.0.0.1:{port}/mcp")),
                _ => {
                    tracing::warn!(service = %service.name, "Port-forward exited, restarting");
                    *current = None;
                    self.ports.release(&key);
                }
            }
        }

        let (port, child) = self.start_forward(service, &key).await?;
        *current = Some(child);
        Ok(format!("http://127.0.0.1:{port}/mcp"))
    }

    async fn release(&self, namespace: &str, name: &str) {
        let key = format!("{namespace}/{name}");
        let slot = self
            .forwards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&key);
        if let Some(slot) = slot
            && let Some(mut child) = slot.lock().await.take()
        {
            let _ = child.kill().await;
        }
        self.ports.release(&key);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A fake `kubectl` that records its arguments and prints canned output.
    fn fake_kubectl(dir: &std::path::Path, stdout: &str, exit: i32) -> PathBuf {
        let path = dir.join("kubectl");
        let log = dir.join("calls.log");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\ncat > /dev/null\nprintf '%s' '{}'\nexit {}\n",
            log.display(),
            stdout,
            exit
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn strategy(binary: PathBuf) -> KubectlStrategy {
        KubectlStrategy::new(binary, PortAllocator::new(30000..30010))
    }

    #[tokio::test]
    async fn test_missing_deployment_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let kubectl = strategy(fake_kubectl(dir.path(), "", 0));
        assert_eq!(kubectl.get_workload("ns", "absent").await.unwrap(), None);

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(calls.contains("get deployment absent -n ns -o json --ignore-not-found"));
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let dir = tempfile::tempdir().unwrap();
        let kubectl = strategy(fake_kubectl(dir.path(), "", 0));
        assert!(!kubectl.delete_service("ns", "svc").await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let kubectl = strategy(fake_kubectl(dir.path(), "service/svc", 0));
        assert!(kubectl.delete_service("ns", "svc").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_carries_stderr_and_command() {
        let dir = tempfile::tempdir().unwrap();
        let kubectl = strategy(fake_kubectl(dir.path(), "", 3));
        let err = kubectl.logs("ns", "mcp-sidecar-a", 50).await.unwrap_err();
        match err {
            SidecarError::Cli { command, .. } => assert_eq!(command, "logs"),
            other => panic!("unexpected error: {other:?}"),
        }
        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(calls.contains("logs deployment/mcp-sidecar-a -n ns --tail=50"));
    }

    fn service_for(adapter: &str) -> ServiceSpec {
        let launch = crate::launch::parse("docker run img").unwrap();
        crate::launch::Translator::new(
            "ns",
            crate::launch::ResourceLimits {
                cpu: "1".to_string(),
                memory: "1Gi".to_string(),
            },
        )
        .translate(adapter, &launch, &HashMap::new())
        .1
    }

    #[tokio::test]
    async fn test_slow_forward_does_not_block_other_services() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubectl");
        std::fs::write(
            &path,
            "#!/bin/sh\ncase \"$*\" in *mcp-sidecar-stuck*) exec sleep 30;; esac\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        let kubectl = Arc::new(strategy(path));

        let stuck = {
            let kubectl = Arc::clone(&kubectl);
            tokio::spawn(async move { kubectl.endpoint(&service_for("stuck")).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let other = tokio::time::timeout(
            Duration::from_secs(3),
            kubectl.endpoint(&service_for("other")),
        )
        .await
        .expect("other services are not held up by a pending forward");
        assert!(matches!(other, Err(SidecarError::Cli { .. })));

        stuck.abort();
        kubectl.release("ns", "mcp-sidecar-other").await;
    }

    #[tokio::test]
    async fn test_apply_pipes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let kubectl = strategy(fake_kubectl(dir.path(), "", 0));
        let launch = crate::launch::parse("docker run img").unwrap();
        let (workload, _) = crate::launch::Translator::new(
            "ns",
            crate::launch::ResourceLimits {
                cpu: "1".to_string(),
                memory: "1Gi".to_string(),
            },
        )
        .translate("a", &launch, &HashMap::new());

        kubectl.apply_workload(&workload).await.unwrap();
        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(calls.contains("apply -n ns -f -"));
    }
}
