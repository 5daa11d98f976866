//! Test doubles shared by unit and integration tests.
//!
//! Provides:
//! - [`InMemoryCluster`]: a [`DeploymentStrategy`] that keeps resources in
//!   memory, with failure injection and controllable readiness
//! - [`echo_server`]: a small line-echo MCP server run through `sh`
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_gateway::testing::InMemoryCluster;
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.set_auto_ready(false);
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::adapter::LocalCommand;
use crate::launch::{ServiceSpec, WorkloadSpec};
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::strategy::{DeploymentStrategy, ServiceState, WorkloadState};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(operation: &str) -> SidecarError {
    SidecarError::Api {
        operation: operation.to_string(),
        reason: "injected failure".to_string(),
    }
}

/// A cluster that lives in memory.
///
/// Workloads become ready as soon as they are applied unless
/// [`set_auto_ready(false)`](Self::set_auto_ready) is called, in which case
/// they stay pending until [`mark_ready`](Self::mark_ready).
pub struct InMemoryCluster {
    namespaces: Mutex<HashSet<String>>,
    workloads: Mutex<HashMap<Key, WorkloadState>>,
    services: Mutex<HashMap<Key, ServiceState>>,
    auto_ready: AtomicBool,
    fail_service_apply: AtomicBool,
    fail_workload_delete: AtomicBool,
    fail_service_delete: AtomicBool,
    workload_applies: AtomicUsize,
    service_applies: AtomicUsize,
    endpoint: Mutex<Option<String>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            namespaces: Mutex::new(HashSet::new()),
            workloads: Mutex::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
            auto_ready: AtomicBool::new(true),
            fail_service_apply: AtomicBool::new(false),
            fail_workload_delete: AtomicBool::new(false),
            fail_service_delete: AtomicBool::new(false),
            workload_applies: AtomicUsize::new(0),
            service_applies: AtomicUsize::new(0),
            endpoint: Mutex::new(None),
        }
    }

    pub fn set_auto_ready(&self, ready: bool) {
        self.auto_ready.store(ready, Ordering::Relaxed);
    }

    /// Report one ready replica for every workload called `name`.
    pub fn mark_ready(&self, name: &str) {
        for ((_, workload_name), state) in lock(&self.workloads).iter_mut() {
            if workload_name == name {
                state.ready_replicas = state.replicas.max(1);
            }
        }
    }

    pub fn set_fail_service_apply(&self, fail: bool) {
        self.fail_service_apply.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_workload_delete(&self, fail: bool) {
        self.fail_workload_delete.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_service_delete(&self, fail: bool) {
        self.fail_service_delete.store(fail, Ordering::Relaxed);
    }

    /// Answer every `endpoint` call with `url`, e.g. a local mock backend.
    pub fn set_endpoint(&self, url: impl Into<String>) {
        *lock(&self.endpoint) = Some(url.into());
    }

    pub fn workload_count(&self) -> usize {
        lock(&self.workloads).len()
    }

    pub fn service_count(&self) -> usize {
        lock(&self.services).len()
    }

    /// Number of `apply_workload` calls that reached the cluster.
    pub fn workload_applies(&self) -> usize {
        self.workload_applies.load(Ordering::Relaxed)
    }

    pub fn service_applies(&self) -> usize {
        self.service_applies.load(Ordering::Relaxed)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        lock(&self.namespaces).contains(namespace)
    }
}

#[async_trait]
impl DeploymentStrategy for InMemoryCluster {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        lock(&self.namespaces).insert(namespace.to_string());
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>> {
        Ok(lock(&self.workloads).get(&key(namespace, name)).cloned())
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        self.workload_applies.fetch_add(1, Ordering::Relaxed);
        let ready = if self.auto_ready.load(Ordering::Relaxed) {
            spec.replicas
        } else {
            0
        };
        lock(&self.workloads).insert(
            key(&spec.namespace, &spec.name),
            WorkloadState {
                fingerprint: Some(spec.fingerprint()),
                replicas: spec.replicas,
                ready_replicas: ready,
                image: Some(spec.image.clone()),
            },
        );
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceState>> {
        Ok(lock(&self.services).get(&key(namespace, name)).cloned())
    }

    async fn apply_service(&self, spec: &ServiceSpec) -> Result<()> {
        if self.fail_service_apply.load(Ordering::Relaxed) {
            return Err(injected("apply service"));
        }
        self.service_applies.fetch_add(1, Ordering::Relaxed);
        lock(&self.services).insert(
            key(&spec.namespace, &spec.name),
            ServiceState {
                fingerprint: Some(spec.fingerprint()),
            },
        );
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<bool> {
        if self.fail_workload_delete.load(Ordering::Relaxed) {
            return Err(injected("delete workload"));
        }
        Ok(lock(&self.workloads).remove(&key(namespace, name)).is_some())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
        if self.fail_service_delete.load(Ordering::Relaxed) {
            return Err(injected("delete service"));
        }
        Ok(lock(&self.services).remove(&key(namespace, name)).is_some())
    }

    async fn logs(&self, namespace: &str, name: &str, tail: i64) -> Result<String> {
        if !lock(&self.workloads).contains_key(&key(namespace, name)) {
            return Err(SidecarError::NotDeployed {
                adapter: name.to_string(),
            });
        }
        let lines: Vec<String> = (1..=3).map(|n| format!("{name} line {n}")).collect();
        let skip = lines.len().saturating_sub(usize::try_from(tail).unwrap_or(0));
        Ok(lines[skip..].join("\n"))
    }

    async fn endpoint(&self, service: &ServiceSpec) -> Result<String> {
        if let Some(url) = lock(&self.endpoint).clone() {
            return Ok(url);
        }
        Ok(format!(
            "http://{}.{}.svc.cluster.local:{}/mcp",
            service.name, service.namespace, service.port
        ))
    }
}

const ECHO_SCRIPT: &str = r#"while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  method=$(printf '%s\n' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  echo "received $method" >&2
  if [ "$method" = "exit" ]; then
    exit 0
  fi
  if [ -z "$id" ]; then
    continue
  fi
  printf '{"jsonrpc":"2.0","id":%s,"result":{"method":"%s","pid":%s}}\n' "$id" "$method" "$$"
done
"#;

/// Write a line-echo MCP server into `dir` and return the command to run it.
///
/// Every request is answered with `{"method": <method>, "pid": <pid>}`.
/// Notifications get no answer. A request for method `exit` makes the
/// process exit without answering.
pub fn echo_server(dir: &Path) -> LocalCommand {
    let script = dir.join("echo-server.sh");
    if let Err(e) = std::fs::write(&script, ECHO_SCRIPT) {
        panic!("failed to write echo server script: {e}");
    }
    LocalCommand {
        command: "sh".to_string(),
        args: vec![script.to_string_lossy().into_owned()],
    }
}
