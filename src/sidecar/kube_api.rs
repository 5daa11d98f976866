//! Deployment strategy backed by the typed cluster API client.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams};
use kube::Client;

use crate::launch::{ServiceSpec, WorkloadSpec};
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::manifest;
use crate::sidecar::strategy::{DeploymentStrategy, ServiceState, WorkloadState};

pub struct KubeStrategy {
    client: Client,
}

impl KubeStrategy {
    /// Build a client from in-cluster service account credentials or the
    /// local kubeconfig, then check the API server answers.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| api_error("connect", e))?;
        client
            .apiserver_version()
            .await
            .map_err(|e| api_error("version check", e))?;
        Ok(Self { client })
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(manifest::FIELD_MANAGER).force()
    }
}

#[async_trait]
impl DeploymentStrategy for KubeStrategy {
    fn name(&self) -> &'static str {
        "kube"
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api
            .get_opt(namespace)
            .await
            .map_err(|e| api_error("get namespace", e))?
            .is_some()
        {
            return Ok(());
        }
        api.patch(
            namespace,
            &Self::apply_params(),
            &Patch::Apply(&manifest::namespace(namespace)),
        )
        .await
        .map_err(|e| api_error("create namespace", e))?;
        tracing::info!(namespace, "Created sidecar namespace");
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<WorkloadState>> {
        let found = self
            .deployments(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get deployment", e))?;
        Ok(found.as_ref().map(manifest::workload_state))
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        self.deployments(&spec.namespace)
            .patch(
                &spec.name,
                &Self::apply_params(),
                &Patch::Apply(&manifest::deployment(spec)),
            )
            .await
            .map_err(|e| SidecarError::DeploymentFailed {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceState>> {
        let found = self
            .services(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get service", e))?;
        Ok(found.as_ref().map(manifest::service_state))
    }

    async fn apply_service(&self, spec: &ServiceSpec) -> Result<()> {
        self.services(&spec.namespace)
            .patch(
                &spec.name,
                &Self::apply_params(),
                &Patch::Apply(&manifest::service(spec)),
            )
            .await
            .map_err(|e| api_error("apply service", e))?;
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("delete deployment", e)),
        }
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .services(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(api_error("delete service", e)),
        }
    }

    async fn logs(&self, namespace: &str, name: &str, tail: i64) -> Result<String> {
        let Some(deployment) = self
            .deployments(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get deployment", e))?
        else {
            return Ok(String::new());
        };
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.as_ref())
            .map(manifest::selector_string)
            .unwrap_or_default();

        let pods = self.pods(namespace);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| api_error("list pods", e))?;

        let Some(pod_name) = list.items.iter().find_map(|p| p.metadata.name.clone()) else {
            return Ok(String::new());
        };

        pods.logs(
            &pod_name,
            &LogParams {
                tail_lines: Some(tail),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error("read logs", e))
    }

    async fn endpoint(&self, service: &ServiceSpec) -> Result<String> {
        Ok(format!(
            "http://{}.{}.svc.cluster.local:{}/mcp",
            service.name, service.namespace, service.port
        ))
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn api_error(operation: &str, err: kube::Error) -> SidecarError {
    SidecarError::Api {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
}
