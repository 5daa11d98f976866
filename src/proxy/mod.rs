//! Adapter dispatch: the request-facing side of the gateway.
//!
//! ```text
//!  POST /adapters/{name}/mcp
//!          │
//!          ▼
//!   ┌─────────────┐  initialize ──▶ SessionManager::create / reinitialize
//!   │ Dispatcher  │  other calls ─▶ SessionManager::touch_for + order lock
//!   └──────┬──────┘
//!          │ HandleTable (one BackendHandle per adapter)
//!          ▼
//!   ┌──────────────┬──────────────────┬─────────────────────────┐
//!   │ LocalProcess │ SidecarContainer │ RemoteHttp / Streamable │
//!   │ StdioBackend │ HttpBackend      │ HttpBackend             │
//!   │ (child proc) │ (orchestrator    │ (configured or derived  │
//!   │              │  endpoint)       │  address)               │
//!   └──────────────┴──────────────────┴─────────────────────────┘
//! ```

mod dispatcher;
mod handles;
pub mod http;
pub mod stdio;

pub use dispatcher::{BackendReport, Dispatcher, REMOTE_LOGS_MESSAGE};
pub use handles::{BackendHandle, HandleTable, ServingState};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ErrorKind;
use crate::mcp::{JsonRpcError, JsonRpcMessage};
use crate::session::SessionError;
use crate::sidecar::SidecarError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Adapter '{name}' not found")]
    AdapterNotFound { name: String },

    #[error("Adapter '{name}' is shutting down")]
    Closed { name: String },

    #[error("{}", .0.message)]
    InvalidMessage(JsonRpcError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    #[error("Adapter '{adapter}' needs a sidecar but no deployment strategy is available")]
    SidecarsDisabled { adapter: String },

    #[error("Sidecar for '{adapter}' is not ready (status: {status})")]
    NotReady { adapter: String, status: String },

    #[error("Adapter '{adapter}' is misconfigured: {reason}")]
    Misconfigured { adapter: String, reason: String },

    #[error("Backend for '{adapter}' is unavailable: {reason}")]
    BackendUnavailable { adapter: String, reason: String },

    #[error("Backend for '{adapter}' did not answer within {seconds}s")]
    Timeout { adapter: String, seconds: u64 },

    #[error("Backend for '{adapter}' sent an invalid response: {reason}")]
    BackendProtocol { adapter: String, reason: String },
}

impl ProxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AdapterNotFound { .. } | Self::Closed { .. } => ErrorKind::AdapterNotFound,
            Self::InvalidMessage(_) | Self::BackendProtocol { .. } => ErrorKind::BackendProtocol,
            Self::Session(e) => e.kind(),
            Self::Sidecar(e) => e.kind(),
            Self::SidecarsDisabled { .. } => ErrorKind::ConfigurationFatal,
            Self::Misconfigured { .. } => ErrorKind::InvalidAdapter,
            Self::NotReady { .. } | Self::BackendUnavailable { .. } | Self::Timeout { .. } => {
                ErrorKind::BackendUnavailable
            }
        }
    }
}

/// One inbound MCP exchange, already stripped of HTTP.
#[derive(Debug, Clone, Default)]
pub struct McpRequest {
    pub body: Bytes,
    pub session_id: Option<String>,
    /// The client listed `text/event-stream` in `Accept`.
    pub accepts_sse: bool,
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(JsonRpcMessage),
    EventStream(Vec<JsonRpcMessage>),
    /// Non-success answer from an HTTP backend, relayed untouched.
    Raw {
        content_type: Option<String>,
        bytes: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpResponse {
    pub status: u16,
    /// Set on `initialize` answers.
    pub session_id: Option<String>,
    pub body: ResponseBody,
}

/// A message on its way to a backend.
#[derive(Debug, Clone, Copy)]
pub struct Forward<'a> {
    pub message: &'a JsonRpcMessage,
    pub backend_session_id: Option<&'a str>,
    pub protocol_version: Option<&'a str>,
}

/// What a backend sent back.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Notification or response taken without a reply.
    Accepted,
    Messages {
        messages: Vec<JsonRpcMessage>,
        /// `Mcp-Session-Id` issued by the backend, if any.
        backend_session_id: Option<String>,
    },
    /// Backend answered with a non-success HTTP status.
    Status {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
}

/// A live connection to one backend instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address sessions are pinned to. Fixed for the transport's lifetime.
    fn address(&self) -> &str;

    async fn forward(&self, request: Forward<'_>) -> Result<Reply, ProxyError>;

    /// False once the backend instance is gone for good.
    fn is_alive(&self) -> bool {
        true
    }

    /// Last `tail` lines the backend wrote to its diagnostics stream.
    fn recent_output(&self, _tail: usize) -> Vec<String> {
        Vec::new()
    }

    async fn shutdown(&self) {}
}
