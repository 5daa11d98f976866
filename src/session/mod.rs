//! Client sessions pinned to one adapter backend.

mod manager;
mod store;

pub use manager::SessionManager;
pub use store::{InMemorySessionStore, SessionStore};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Invalidated,
}

/// A client's handle on one adapter's backend.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub adapter: String,
    /// Backend address fixed at creation. Every request on the session goes here.
    pub backend_address: String,
    /// Session id the backend itself issued, forwarded on later calls.
    pub backend_session_id: Option<String>,
    /// `clientInfo` from the client's `initialize` request.
    pub client_info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        adapter: impl Into<String>,
        backend_address: impl Into<String>,
        client_info: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(),
            adapter: adapter.into(),
            backend_address: backend_address.into(),
            backend_session_id: None,
            client_info,
            created_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
            invalidated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    fn invalidate(&mut self) {
        if self.is_active() {
            self.status = SessionStatus::Invalidated;
            self.invalidated_at = Some(Utc::now());
        }
    }
}

/// Shortened id for log lines. Full ids are bearer-equivalent.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// 32 random bytes, hex-encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("Session {id} has been invalidated; reinitialize")]
    Invalidated { id: String },

    #[error("A session id is required for '{method}'; call initialize first")]
    Required { method: String },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::SessionNotFound,
            Self::Invalidated { .. } => ErrorKind::SessionInvalidated,
            Self::Required { .. } => ErrorKind::SessionRequired,
        }
    }
}
