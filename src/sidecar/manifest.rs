//! Rendering of workload and service specs into cluster API objects.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, PodSpec, PodTemplateSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec as ServiceObjectSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::launch::{ServiceSpec, WorkloadSpec};
use crate::sidecar::strategy::{ServiceState, WorkloadState};

/// Annotation carrying [`WorkloadSpec::fingerprint`] / [`ServiceSpec::fingerprint`].
pub const FINGERPRINT_ANNOTATION: &str = "mcp-gateway.io/spec-fingerprint";
/// Field manager name for server-side apply.
pub const FIELD_MANAGER: &str = "mcp-gateway";

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn deployment(spec: &WorkloadSpec) -> Deployment {
    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let limits = BTreeMap::from([
        ("cpu".to_string(), Quantity(spec.limits.cpu.clone())),
        ("memory".to_string(), Quantity(spec.limits.memory.clone())),
    ]);

    let container = Container {
        name: spec.container_name.clone(),
        image: Some(spec.image.clone()),
        env: (!env.is_empty()).then_some(env),
        args: (!spec.args.is_empty()).then(|| spec.args.clone()),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(spec.port),
            name: Some("mcp".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: Some(limits),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            annotations: Some(fingerprint_annotation(spec.fingerprint())),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(spec.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(spec: &ServiceSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            annotations: Some(fingerprint_annotation(spec.fingerprint())),
            ..Default::default()
        },
        spec: Some(ServiceObjectSpec {
            selector: Some(spec.selector.clone()),
            ports: Some(vec![ServicePort {
                name: Some("mcp".to_string()),
                port: i32::from(spec.port),
                target_port: Some(IntOrString::Int(i32::from(spec.target_port))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn workload_state(deployment: &Deployment) -> WorkloadState {
    let status = deployment.status.as_ref();
    WorkloadState {
        fingerprint: fingerprint_of(&deployment.metadata),
        replicas: deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        image: deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .and_then(|c| c.image.clone()),
    }
}

pub fn service_state(service: &Service) -> ServiceState {
    ServiceState {
        fingerprint: fingerprint_of(&service.metadata),
    }
}

/// Label selector string matching every pod of a workload.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn fingerprint_annotation(fingerprint: String) -> BTreeMap<String, String> {
    BTreeMap::from([(FINGERPRINT_ANNOTATION.to_string(), fingerprint)])
}

fn fingerprint_of(meta: &ObjectMeta) -> Option<String> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(FINGERPRINT_ANNOTATION))
        .cloned()
}
