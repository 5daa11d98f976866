//! Translation of a [`LaunchSpec`] into cluster resource descriptions.
//!
//! The output is plain data. Rendering it into API objects lives in
//! `sidecar::manifest` so both deployment strategies share it.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::SidecarConfig;
use crate::launch::LaunchSpec;

/// Prefix shared by every sidecar resource name.
pub const RESOURCE_PREFIX: &str = "mcp-sidecar-";
/// Label value that marks a resource as gateway-managed.
pub const APP_LABEL_VALUE: &str = "mcp-sidecar";
pub const CONTAINER_NAME: &str = "mcp-server";

const MAX_NAME_LEN: usize = 63;
/// Hex digits of the digest kept in rewritten names.
const NAME_HASH_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceLimits {
    pub cpu: String,
    pub memory: String,
}

/// Desired state of a sidecar workload (a single-replica deployment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub container_name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub port: u16,
    pub args: Vec<String>,
    pub replicas: i32,
    pub limits: ResourceLimits,
}

/// Desired state of the service that routes to a sidecar workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub port: u16,
    pub target_port: u16,
}

impl WorkloadSpec {
    /// Stable digest of the desired state, stored on the deployed object so a
    /// redeploy can tell whether anything changed.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

impl ServiceSpec {
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

/// Converts launch specs into resource specs for one target namespace.
#[derive(Debug, Clone)]
pub struct Translator {
    namespace: String,
    limits: ResourceLimits,
}

impl Translator {
    pub fn new(namespace: impl Into<String>, limits: ResourceLimits) -> Self {
        Self {
            namespace: namespace.into(),
            limits,
        }
    }

    pub fn from_config(config: &SidecarConfig) -> Self {
        Self::new(
            config.namespace.clone(),
            ResourceLimits {
                cpu: config.cpu_limit.clone(),
                memory: config.memory_limit.clone(),
            },
        )
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Produce the workload and service for `adapter_name`.
    ///
    /// Pure: the same inputs always yield equal outputs. `overrides` are the
    /// adapter's environment variables and win over the command's.
    pub fn translate(
        &self,
        adapter_name: &str,
        launch: &LaunchSpec,
        overrides: &HashMap<String, String>,
    ) -> (WorkloadSpec, ServiceSpec) {
        let name = resource_name(adapter_name);
        let labels = labels_for(adapter_name);

        let workload = WorkloadSpec {
            name: name.clone(),
            namespace: self.namespace.clone(),
            labels: labels.clone(),
            container_name: CONTAINER_NAME.to_string(),
            image: launch.image.clone(),
            env: launch.merged_env(overrides),
            port: launch.port,
            args: launch.args.clone(),
            replicas: 1,
            limits: self.limits.clone(),
        };

        let service = ServiceSpec {
            name,
            namespace: self.namespace.clone(),
            selector: labels.clone(),
            labels,
            port: launch.port,
            target_port: launch.port,
        };

        (workload, service)
    }
}

/// Labels attached to both resources; the service selects on the same set.
///
/// The `adapter` value is the resource name without its prefix, so two
/// adapters whose names sanitize alike still select disjoint pods.
pub fn labels_for(adapter_name: &str) -> BTreeMap<String, String> {
    let name = resource_name(adapter_name);
    let value = name.strip_prefix(RESOURCE_PREFIX).unwrap_or(&name).to_string();
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), APP_LABEL_VALUE.to_string());
    labels.insert("adapter".to_string(), value);
    labels
}

/// Deterministic, DNS-safe resource name for an adapter.
///
/// Names that needed rewriting get a short hash of the original appended so
/// `My_Adapter` and `my-adapter` do not collide.
pub fn resource_name(adapter_name: &str) -> String {
    let budget = MAX_NAME_LEN - RESOURCE_PREFIX.len();
    let clean = sanitize(adapter_name, budget);
    if clean == adapter_name {
        return format!("{RESOURCE_PREFIX}{clean}");
    }

    let mut suffix = hex::encode(Sha256::digest(adapter_name.as_bytes()));
    suffix.truncate(NAME_HASH_LEN);
    let room = budget - suffix.len() - 1;
    let head: String = clean.chars().take(room).collect();
    let head = head.trim_end_matches('-');
    if head.is_empty() {
        format!("{RESOURCE_PREFIX}{suffix}")
    } else {
        format!("{RESOURCE_PREFIX}{head}-{suffix}")
    }
}

fn sanitize(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed: String = out.trim_matches('-').chars().take(max_len).collect();
    trimmed.trim_end_matches('-').to_string()
}

/// SHA-256 of the JSON encoding, hex encoded.
fn fingerprint_of<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
