//! Adapter registration and deletion.
//!
//! This is the flow that owns adapter lifecycle events: it parses launch
//! commands once, records adapters, and drives the orchestrator on create and
//! the dispatcher's close transition on delete.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use secrecy::ExposeSecret;

use crate::adapter::{
    Adapter, AdapterAuth, AdapterError, AdapterStatus, AdapterStore, ApiKeyLocation,
    ConnectionKind, LocalCommand, validate_name,
};
use crate::catalog::CatalogSource;
use crate::launch::{self, LaunchSpec, resource_name};
use crate::proxy::Dispatcher;
use crate::sidecar::SidecarOrchestrator;

/// Registration request for a new adapter.
#[derive(Debug, Clone)]
pub struct CreateAdapter {
    pub name: String,
    pub kind: ConnectionKind,
    pub description: Option<String>,
    /// Inline `docker run ...` command for sidecar adapters.
    pub command: Option<String>,
    /// Catalog entry to take the command from instead.
    pub catalog_id: Option<String>,
    pub local: Option<LocalCommand>,
    pub remote_url: Option<String>,
    pub auth: AdapterAuth,
    pub env: HashMap<String, String>,
}

impl CreateAdapter {
    pub fn new(name: impl Into<String>, kind: ConnectionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            command: None,
            catalog_id: None,
            local: None,
            remote_url: None,
            auth: AdapterAuth::None,
            env: HashMap::new(),
        }
    }
}

pub struct AdapterService {
    store: Arc<dyn AdapterStore>,
    catalog: Option<Arc<dyn CatalogSource>>,
    orchestrator: Option<Arc<SidecarOrchestrator>>,
    dispatcher: Arc<Dispatcher>,
    /// Container port assumed when a launch command declares none.
    default_port: u16,
    /// Namespace used to derive streamable addresses without an orchestrator.
    sidecar_namespace: String,
}

impl AdapterService {
    pub fn new(
        store: Arc<dyn AdapterStore>,
        orchestrator: Option<Arc<SidecarOrchestrator>>,
        dispatcher: Arc<Dispatcher>,
        default_port: u16,
        sidecar_namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog: None,
            orchestrator,
            dispatcher,
            default_port,
            sidecar_namespace: sidecar_namespace.into(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogSource>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub async fn get(&self, name: &str) -> Result<Adapter, AdapterError> {
        self.store
            .get(name)
            .await
            .ok_or_else(|| AdapterError::NotFound {
                name: name.to_string(),
            })
    }

    pub async fn list(&self) -> Vec<Adapter> {
        self.store.list().await
    }

    /// Register an adapter.
    ///
    /// Sidecar adapters are stored as `Provisioning` and deployed before this
    /// returns. They move to `Ready` once the sidecar reports a ready replica,
    /// or to `Degraded` if deployment or startup fails.
    pub async fn create(&self, request: CreateAdapter) -> Result<Adapter, AdapterError> {
        validate_name(&request.name)?;
        if self.store.get(&request.name).await.is_some() {
            return Err(AdapterError::Exists { name: request.name });
        }
        validate_auth(&request.auth)?;

        let now = Utc::now();
        let mut adapter = Adapter {
            name: request.name.clone(),
            kind: request.kind,
            description: request.description.clone(),
            launch: None,
            local: None,
            remote_url: None,
            auth: request.auth.clone(),
            env: request.env.clone(),
            status: AdapterStatus::Ready,
            status_reason: None,
            created_at: now,
            updated_at: now,
        };

        match request.kind {
            ConnectionKind::SidecarContainer => {
                if self.orchestrator.is_none() {
                    return Err(AdapterError::SidecarsUnavailable { name: request.name });
                }
                let (launch, env) = self.resolve_launch(&request).await?;
                adapter.launch = Some(launch);
                adapter.env = env;
                adapter.status = AdapterStatus::Provisioning;
            }
            ConnectionKind::LocalProcess => {
                let local = request
                    .local
                    .clone()
                    .filter(|l| !l.command.trim().is_empty())
                    .ok_or_else(|| invalid("local_process adapters need a command"))?;
                adapter.local = Some(local);
            }
            ConnectionKind::RemoteHttp => {
                let url = request
                    .remote_url
                    .as_deref()
                    .ok_or_else(|| invalid("remote_http adapters need a remote_url"))?;
                adapter.remote_url = Some(normalize_remote_url(url)?);
            }
            ConnectionKind::StreamableHttp => {
                adapter.remote_url = Some(match request.remote_url.as_deref() {
                    Some(url) => normalize_remote_url(url)?,
                    None => self.derived_address(&request.name),
                });
            }
        }

        self.store.create(adapter.clone()).await?;
        tracing::info!(adapter = %adapter.name, kind = %adapter.kind, "Adapter registered");

        if let (Some(launch), Some(orchestrator)) = (&adapter.launch, &self.orchestrator) {
            if let Err(e) = orchestrator
                .deploy(&adapter.name, launch, &adapter.env)
                .await
            {
                let reason = e.to_string();
                self.store
                    .update(&adapter.name, &mut |a| {
                        a.status = AdapterStatus::Degraded;
                        a.status_reason = Some(reason.clone());
                    })
                    .await;
                return Err(e.into());
            }
            self.watch_readiness(&adapter.name);
        }

        Ok(adapter)
    }

    /// Command and environment for a sidecar, from the request or the catalog.
    ///
    /// Catalog defaults sit under the request's own overrides.
    async fn resolve_launch(
        &self,
        request: &CreateAdapter,
    ) -> Result<(LaunchSpec, HashMap<String, String>), AdapterError> {
        match (&request.command, &request.catalog_id) {
            (Some(command), None) => {
                let launch = launch::parse_with_default_port(command, self.default_port)?;
                Ok((launch, request.env.clone()))
            }
            (None, Some(id)) => {
                let catalog = self
                    .catalog
                    .as_ref()
                    .ok_or_else(|| invalid("catalog_id given but no catalog is configured"))?;
                let entry = catalog.resolve_launch_spec_source(id).await?;
                let port = entry.port.unwrap_or(self.default_port);
                let launch = launch::parse_with_default_port(&entry.command, port)?;
                let mut env = entry.env;
                env.extend(request.env.clone());
                Ok((launch, env))
            }
            (Some(_), Some(_)) => Err(invalid("give either command or catalog_id, not both")),
            (None, None) => Err(invalid("sidecar_container adapters need a command or catalog_id")),
        }
    }

    /// Sidecar service address assumed for streamable adapters without a URL.
    fn derived_address(&self, name: &str) -> String {
        let namespace = self
            .orchestrator
            .as_ref()
            .map_or(self.sidecar_namespace.as_str(), |o| o.namespace());
        format!(
            "http://{}.{}.svc.cluster.local:{}/mcp",
            resource_name(name),
            namespace,
            self.default_port
        )
    }

    fn watch_readiness(&self, name: &str) {
        let Some(orchestrator) = self.orchestrator.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let name = name.to_string();

        tokio::spawn(async move {
            let outcome = orchestrator.wait_ready(&name).await;
            let (status, reason) = match &outcome {
                Ok(()) => (AdapterStatus::Ready, None),
                Err(e) => (AdapterStatus::Degraded, Some(e.to_string())),
            };
            store
                .update(&name, &mut |a| {
                    if a.status == AdapterStatus::Provisioning {
                        a.status = status;
                        a.status_reason = reason.clone();
                    }
                })
                .await;
            match outcome {
                Ok(()) => tracing::info!(adapter = %name, "Sidecar ready"),
                Err(e) => tracing::warn!(adapter = %name, error = %e, "Sidecar did not become ready"),
            }
        });
    }

    /// Delete an adapter.
    ///
    /// The record is marked `Deleted` first so no new requests reach it. If
    /// teardown fails, the record stays `Deleted` and the error is returned;
    /// deleting again retries the teardown.
    pub async fn delete(&self, name: &str) -> Result<(), AdapterError> {
        let adapter = self
            .store
            .update(name, &mut |a| a.status = AdapterStatus::Deleted)
            .await
            .ok_or_else(|| AdapterError::NotFound {
                name: name.to_string(),
            })?;

        if let Err(e) = self.dispatcher.close(&adapter).await {
            let reason = e.to_string();
            self.store
                .update(name, &mut |a| a.status_reason = Some(reason.clone()))
                .await;
            return Err(e.into());
        }

        self.store.delete(name).await;
        tracing::info!(adapter = name, "Adapter deleted");
        Ok(())
    }
}

fn invalid(reason: &str) -> AdapterError {
    AdapterError::Invalid {
        reason: reason.to_string(),
    }
}

fn validate_auth(auth: &AdapterAuth) -> Result<(), AdapterError> {
    match auth {
        AdapterAuth::None => Ok(()),
        AdapterAuth::Bearer { token } if token.expose_secret().is_empty() => {
            Err(invalid("bearer auth needs a token"))
        }
        AdapterAuth::Basic { username, .. } if username.is_empty() => {
            Err(invalid("basic auth needs a username"))
        }
        AdapterAuth::ApiKey { name, .. } if name.is_empty() => {
            Err(invalid("api_key auth needs a key name"))
        }
        AdapterAuth::ApiKey {
            name,
            location: ApiKeyLocation::Header,
            ..
        } if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() => Err(invalid(
            &format!("api_key name '{name}' is not a valid header name"),
        )),
        _ => Ok(()),
    }
}

/// Parse a backend URL. An empty path becomes `/mcp`; any other path is kept.
pub fn normalize_remote_url(raw: &str) -> Result<String, AdapterError> {
    let mut url = url::Url::parse(raw.trim()).map_err(|e| AdapterError::Invalid {
        reason: format!("remote_url '{raw}': {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AdapterError::Invalid {
            reason: format!("remote_url '{raw}' must use http or https"),
        });
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/mcp");
    }
    Ok(url.to_string())
}
