//! Per-request routing from an adapter name to its backend.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::adapter::{Adapter, AdapterStore, ConnectionKind};
use crate::mcp::{JsonRpcMessage, METHOD_INITIALIZE};
use crate::proxy::handles::{BackendHandle, HandleTable, ServingState};
use crate::proxy::http::{HttpBackend, RemoteHealth};
use crate::proxy::stdio::StdioBackend;
use crate::proxy::{Forward, McpRequest, McpResponse, ProxyError, Reply, ResponseBody, Transport};
use crate::session::{Session, SessionError, SessionManager, short_id};
use crate::sidecar::{SidecarError, SidecarOrchestrator, SidecarStatus};

/// Log text returned for backends the gateway cannot read logs from.
pub const REMOTE_LOGS_MESSAGE: &str = "Remote server - no logs available";

/// Backend status as reported on `GET /adapters/{name}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendReport {
    pub adapter: String,
    pub kind: ConnectionKind,
    pub status: String,
    pub serving: ServingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Routes MCP exchanges to adapter backends with session affinity.
///
/// Requests on one session are forwarded one at a time in arrival order.
/// Requests on different sessions never wait on each other, apart from the
/// short per-adapter lock taken while a missing backend is being resolved.
pub struct Dispatcher {
    adapters: Arc<dyn AdapterStore>,
    sessions: Arc<SessionManager>,
    orchestrator: Option<Arc<SidecarOrchestrator>>,
    handles: HandleTable,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        adapters: Arc<dyn AdapterStore>,
        sessions: Arc<SessionManager>,
        orchestrator: Option<Arc<SidecarOrchestrator>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            sessions,
            orchestrator,
            handles: HandleTable::new(),
            http: reqwest::Client::new(),
            request_timeout,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn serving_state(&self, adapter: &str) -> ServingState {
        self.handles.state(adapter).await
    }

    /// Handle one MCP exchange for `adapter_name`.
    pub async fn handle(
        &self,
        adapter_name: &str,
        request: McpRequest,
    ) -> Result<McpResponse, ProxyError> {
        let adapter = match self.adapter(adapter_name).await {
            Ok(adapter) => adapter,
            Err(e) => return Err(self.explain_missing(adapter_name, &request, e).await),
        };
        let message = JsonRpcMessage::parse(&request.body).map_err(ProxyError::InvalidMessage)?;

        if message.method() == Some(METHOD_INITIALIZE) {
            self.initialize(&adapter, &message, &request).await
        } else {
            self.forward_in_session(&adapter, &message, &request).await
        }
    }

    async fn adapter(&self, name: &str) -> Result<Adapter, ProxyError> {
        match self.adapters.get(name).await {
            Some(adapter) if !adapter.is_deleted() => Ok(adapter),
            _ => Err(ProxyError::AdapterNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// A client still holding a session of a deleted adapter is told to
    /// reinitialize rather than that the adapter never existed.
    async fn explain_missing(
        &self,
        adapter_name: &str,
        request: &McpRequest,
        error: ProxyError,
    ) -> ProxyError {
        let Some(id) = request.session_id.as_deref() else {
            return error;
        };
        match self.sessions.get(id).await {
            Ok(session) if session.adapter == adapter_name && !session.is_active() => {
                SessionError::Invalidated { id: id.to_string() }.into()
            }
            _ => error,
        }
    }

    async fn initialize(
        &self,
        adapter: &Adapter,
        message: &JsonRpcMessage,
        request: &McpRequest,
    ) -> Result<McpResponse, ProxyError> {
        let handle = self.resolve(adapter).await?;
        let client_info = message
            .params
            .as_ref()
            .and_then(|p| p.get("clientInfo"))
            .cloned();

        let (session, created) = self
            .open(adapter, &handle, request.session_id.as_deref(), client_info)
            .await;

        let lock = self.sessions.order_lock(&session.id);
        let _order = lock.lock().await;

        let reply = match self
            .forward(&handle, message, None, request.protocol_version.as_deref())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                if created {
                    let _ = self.sessions.invalidate(&session.id).await;
                }
                return Err(e);
            }
        };

        if let Reply::Messages {
            backend_session_id: Some(backend_id),
            ..
        } = &reply
        {
            self.sessions
                .set_backend_session(&session.id, backend_id)
                .await;
        }

        tracing::debug!(
            adapter = %adapter.name,
            session = short_id(&session.id),
            backend = %handle.address,
            "Initialized session"
        );
        let mut response = self.respond(adapter, message, reply, request.accepts_sse)?;
        response.session_id = Some(session.id);
        Ok(response)
    }

    /// Reinitialize `existing` if it is an active session of this adapter,
    /// otherwise start a new one. Returns the session and whether it is new.
    async fn open(
        &self,
        adapter: &Adapter,
        handle: &BackendHandle,
        existing: Option<&str>,
        client_info: Option<Value>,
    ) -> (Session, bool) {
        if let Some(id) = existing {
            match self
                .sessions
                .reinitialize(&adapter.name, id, &handle.address, client_info.clone())
                .await
            {
                Ok(session) => return (session, false),
                Err(e) => tracing::debug!(
                    adapter = %adapter.name,
                    session = short_id(id),
                    error = %e,
                    "Cannot reinitialize, starting a new session"
                ),
            }
        }
        let session = self
            .sessions
            .create(&adapter.name, &handle.address, client_info)
            .await;
        (session, true)
    }

    async fn forward_in_session(
        &self,
        adapter: &Adapter,
        message: &JsonRpcMessage,
        request: &McpRequest,
    ) -> Result<McpResponse, ProxyError> {
        let id = request
            .session_id
            .as_deref()
            .ok_or_else(|| SessionError::Required {
                method: message.method().unwrap_or("response").to_string(),
            })?;

        // Unknown ids never get an ordering lock.
        self.sessions.touch_for(&adapter.name, id).await?;
        let lock = self.sessions.order_lock(id);
        let _order = lock.lock().await;
        // The session may have been invalidated while this request waited.
        let session = self.sessions.touch_for(&adapter.name, id).await?;

        let handle = match adapter.kind {
            // A lost local process is never silently replaced under a live session.
            ConnectionKind::LocalProcess => self.handles.get(&adapter.name).await,
            _ => Some(self.resolve(adapter).await?),
        };
        let handle = match handle {
            Some(handle) if handle.address == session.backend_address => handle,
            _ => {
                let _ = self.sessions.invalidate(id).await;
                return Err(SessionError::Invalidated { id: id.to_string() }.into());
            }
        };

        let reply = self
            .forward(
                &handle,
                message,
                session.backend_session_id.as_deref(),
                request.protocol_version.as_deref(),
            )
            .await?;
        self.respond(adapter, message, reply, request.accepts_sse)
    }

    async fn forward(
        &self,
        handle: &BackendHandle,
        message: &JsonRpcMessage,
        backend_session_id: Option<&str>,
        protocol_version: Option<&str>,
    ) -> Result<Reply, ProxyError> {
        let _in_flight = handle.begin();
        let call = handle.transport().forward(Forward {
            message,
            backend_session_id,
            protocol_version,
        });

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Err(e @ ProxyError::BackendUnavailable { .. })) => {
                handle.mark_unhealthy();
                Err(e)
            }
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout {
                adapter: handle.adapter.clone(),
                seconds: self.request_timeout.as_secs(),
            }),
        }
    }

    fn respond(
        &self,
        adapter: &Adapter,
        message: &JsonRpcMessage,
        reply: Reply,
        accepts_sse: bool,
    ) -> Result<McpResponse, ProxyError> {
        let accepted = McpResponse {
            status: 202,
            session_id: None,
            body: ResponseBody::Empty,
        };

        match reply {
            Reply::Accepted => Ok(accepted),
            Reply::Status {
                status,
                content_type,
                body,
            } => Ok(McpResponse {
                status,
                session_id: None,
                body: ResponseBody::Raw {
                    content_type,
                    bytes: body,
                },
            }),
            Reply::Messages { .. } if !message.is_request() => Ok(accepted),
            Reply::Messages { messages, .. } if accepts_sse => Ok(McpResponse {
                status: 200,
                session_id: None,
                body: ResponseBody::EventStream(messages),
            }),
            Reply::Messages { messages, .. } => messages
                .into_iter()
                .find(|m| m.is_response() && m.id == message.id)
                .map(|m| McpResponse {
                    status: 200,
                    session_id: None,
                    body: ResponseBody::Json(m),
                })
                .ok_or_else(|| ProxyError::BackendProtocol {
                    adapter: adapter.name.clone(),
                    reason: "no response matching the request id".to_string(),
                }),
        }
    }

    /// Find or create the backend handle for `adapter`.
    async fn resolve(&self, adapter: &Adapter) -> Result<Arc<BackendHandle>, ProxyError> {
        if let Some(handle) = self.handles.get(&adapter.name).await {
            return Ok(handle);
        }

        let lock = self.handles.resolve_lock(&adapter.name);
        let _guard = lock.lock().await;
        if let Some(handle) = self.handles.get(&adapter.name).await {
            return Ok(handle);
        }
        if self.handles.is_closed(&adapter.name).await {
            return Err(ProxyError::Closed {
                name: adapter.name.clone(),
            });
        }

        let transport = self.connect(adapter).await?;
        let handle = Arc::new(BackendHandle::new(&adapter.name, transport));
        match self.handles.insert(Arc::clone(&handle)).await {
            Ok(replaced) => {
                if let Some(old) = replaced {
                    old.transport().shutdown().await;
                }
                tracing::info!(adapter = %adapter.name, address = %handle.address, "Backend resolved");
                Ok(handle)
            }
            Err(rejected) => {
                rejected.transport().shutdown().await;
                Err(ProxyError::Closed {
                    name: adapter.name.clone(),
                })
            }
        }
    }

    async fn connect(&self, adapter: &Adapter) -> Result<Arc<dyn Transport>, ProxyError> {
        let misconfigured = |reason: &str| ProxyError::Misconfigured {
            adapter: adapter.name.clone(),
            reason: reason.to_string(),
        };

        match adapter.kind {
            ConnectionKind::LocalProcess => {
                let command = adapter
                    .local
                    .as_ref()
                    .ok_or_else(|| misconfigured("no local command"))?;
                let backend = StdioBackend::spawn(
                    &adapter.name,
                    command,
                    &adapter.env,
                    Arc::clone(&self.sessions),
                )?;
                Ok(Arc::new(backend))
            }
            ConnectionKind::SidecarContainer => {
                let orchestrator = self.orchestrator(adapter)?;
                let report = orchestrator.status(&adapter.name).await?;
                if report.status != SidecarStatus::Ready {
                    return Err(ProxyError::NotReady {
                        adapter: adapter.name.clone(),
                        status: report.status.to_string(),
                    });
                }
                let url = orchestrator.endpoint(&adapter.name).await?;
                Ok(Arc::new(HttpBackend::new(
                    &adapter.name,
                    url,
                    adapter.auth.clone(),
                    self.http.clone(),
                )))
            }
            ConnectionKind::RemoteHttp | ConnectionKind::StreamableHttp => {
                let url = adapter
                    .remote_url
                    .as_ref()
                    .ok_or_else(|| misconfigured("no remote url"))?;
                Ok(Arc::new(HttpBackend::new(
                    &adapter.name,
                    url.clone(),
                    adapter.auth.clone(),
                    self.http.clone(),
                )))
            }
        }
    }

    fn orchestrator(&self, adapter: &Adapter) -> Result<&Arc<SidecarOrchestrator>, ProxyError> {
        self.orchestrator
            .as_ref()
            .ok_or_else(|| ProxyError::SidecarsDisabled {
                adapter: adapter.name.clone(),
            })
    }

    /// Open or re-pin a session without talking to the backend.
    pub async fn open_session(
        &self,
        adapter_name: &str,
        existing: Option<&str>,
        client_info: Option<Value>,
    ) -> Result<Session, ProxyError> {
        let adapter = self.adapter(adapter_name).await?;
        let handle = self.resolve(&adapter).await?;
        let (session, _) = self.open(&adapter, &handle, existing, client_info).await;
        Ok(session)
    }

    /// Current backend status of `adapter_name`.
    pub async fn status(&self, adapter_name: &str) -> Result<BackendReport, ProxyError> {
        let adapter = self.adapter(adapter_name).await?;
        let serving = self.handles.state(&adapter.name).await;
        let live = self.handles.get(&adapter.name).await;
        let mut report = BackendReport {
            adapter: adapter.name.clone(),
            kind: adapter.kind,
            status: String::new(),
            serving,
            address: live.as_ref().map(|h| h.address.clone()),
            replicas: None,
            ready_replicas: None,
            image: None,
        };

        match adapter.kind {
            ConnectionKind::SidecarContainer => {
                let sidecar = self.orchestrator(&adapter)?.status(&adapter.name).await?;
                report.status = sidecar.status.to_string();
                report.replicas = Some(sidecar.replicas);
                report.ready_replicas = Some(sidecar.ready_replicas);
                report.image = sidecar.image;
            }
            ConnectionKind::LocalProcess => {
                report.status = if live.is_some() { "running" } else { "stopped" }.to_string();
            }
            ConnectionKind::RemoteHttp | ConnectionKind::StreamableHttp => {
                let url = adapter.remote_url.clone().unwrap_or_default();
                let backend = HttpBackend::new(
                    &adapter.name,
                    url.clone(),
                    adapter.auth.clone(),
                    self.http.clone(),
                );
                let health = tokio::time::timeout(self.request_timeout, backend.health())
                    .await
                    .unwrap_or_else(|_| {
                        tracing::debug!(adapter = %adapter.name, "Remote health check timed out");
                        RemoteHealth::Unavailable
                    });
                report.status = health.as_str().to_string();
                report.address = Some(url);
            }
        }
        Ok(report)
    }

    /// Last `tail` lines of backend output.
    pub async fn logs(&self, adapter_name: &str, tail: usize) -> Result<String, ProxyError> {
        let adapter = self.adapter(adapter_name).await?;
        match adapter.kind {
            ConnectionKind::SidecarContainer => {
                let tail = i64::try_from(tail).unwrap_or(i64::MAX);
                Ok(self.orchestrator(&adapter)?.logs(&adapter.name, tail).await?)
            }
            ConnectionKind::LocalProcess => Ok(self
                .handles
                .get_any(&adapter.name)
                .await
                .map(|h| h.transport().recent_output(tail).join("\n"))
                .unwrap_or_default()),
            ConnectionKind::RemoteHttp | ConnectionKind::StreamableHttp => {
                Ok(REMOTE_LOGS_MESSAGE.to_string())
            }
        }
    }

    /// Move `adapter` to Closed.
    ///
    /// Sessions are invalidated first, then the local process is stopped or
    /// the sidecar torn down. On teardown failure the adapter stays closed
    /// so the caller can retry.
    pub async fn close(&self, adapter: &Adapter) -> Result<(), SidecarError> {
        let handle = self.handles.close(&adapter.name).await;
        let invalidated = self.sessions.invalidate_all(&adapter.name).await;

        if let Some(handle) = handle {
            handle.transport().shutdown().await;
        }
        if adapter.kind == ConnectionKind::SidecarContainer
            && let Some(orchestrator) = &self.orchestrator
        {
            orchestrator.teardown(&adapter.name).await?;
        }

        self.handles.remove(&adapter.name).await;
        tracing::info!(adapter = %adapter.name, invalidated, "Adapter closed");
        Ok(())
    }
}
