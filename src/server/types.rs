//! Request and response DTOs for the HTTP API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::adapter::{
    Adapter, AdapterAuth, AdapterStatus, ApiKeyLocation, ConnectionKind, CreateAdapter,
    LocalCommand,
};
use crate::session::{Session, SessionStatus};

// --- Adapters ---

/// Credentials as they arrive over the wire. Converted to secrets immediately.
#[derive(Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthRequest {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        name: String,
        value: String,
        #[serde(default)]
        location: ApiKeyLocation,
    },
}

impl From<AuthRequest> for AdapterAuth {
    fn from(auth: AuthRequest) -> Self {
        match auth {
            AuthRequest::None => Self::None,
            AuthRequest::Bearer { token } => Self::Bearer {
                token: SecretString::from(token),
            },
            AuthRequest::Basic { username, password } => Self::Basic {
                username,
                password: SecretString::from(password),
            },
            AuthRequest::ApiKey {
                name,
                value,
                location,
            } => Self::ApiKey {
                name,
                value: SecretString::from(value),
                location,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAdapterRequest {
    pub name: String,
    pub connection_type: ConnectionKind,
    pub description: Option<String>,
    /// `docker run ...` command for sidecar adapters.
    pub command: Option<String>,
    pub catalog_id: Option<String>,
    pub local: Option<LocalCommand>,
    pub remote_url: Option<String>,
    #[serde(default)]
    pub auth: AuthRequest,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl From<CreateAdapterRequest> for CreateAdapter {
    fn from(req: CreateAdapterRequest) -> Self {
        Self {
            name: req.name,
            kind: req.connection_type,
            description: req.description,
            command: req.command,
            catalog_id: req.catalog_id,
            local: req.local,
            remote_url: req.remote_url,
            auth: req.auth.into(),
            env: req.env,
        }
    }
}

/// Public view of an adapter. Credentials are reduced to their kind and
/// environment values are not echoed back.
#[derive(Debug, Serialize)]
pub struct AdapterInfo {
    pub name: String,
    pub connection_type: ConnectionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: AdapterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalCommand>,
    pub auth: &'static str,
    pub env_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Adapter> for AdapterInfo {
    fn from(adapter: Adapter) -> Self {
        let mut env_keys: Vec<String> = adapter.env.keys().cloned().collect();
        env_keys.sort();
        Self {
            image: adapter.launch.as_ref().map(|l| l.image.clone()),
            port: adapter.launch.as_ref().map(|l| l.port),
            auth: adapter.auth.kind(),
            name: adapter.name,
            connection_type: adapter.kind,
            description: adapter.description,
            status: adapter.status,
            status_reason: adapter.status_reason,
            remote_url: adapter.remote_url,
            local: adapter.local,
            env_keys,
            created_at: adapter.created_at,
            updated_at: adapter.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdapterListResponse {
    pub adapters: Vec<AdapterInfo>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

// --- Sessions ---

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Re-pin this session instead of opening a new one.
    pub session_id: Option<String>,
    pub client_info: Option<serde_json::Value>,
}

/// Public view of a session. The id is included because the caller owns it.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub adapter: String,
    pub backend_address: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            adapter: session.adapter,
            backend_address: session.backend_address,
            status: session.status,
            client_info: session.client_info,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            invalidated_at: session.invalidated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct InvalidatedResponse {
    pub invalidated: usize,
}

// --- Logs ---

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub adapter: String,
    pub logs: String,
}

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sidecar_strategy: Option<&'static str>,
}

