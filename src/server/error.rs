//! Mapping of gateway errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::adapter::AdapterError;
use crate::error::{ErrorKind, GatewayError};
use crate::mcp::{JsonRpcError, JsonRpcMessage};
use crate::proxy::ProxyError;
use crate::session::SessionError;

/// Error returned by every handler.
///
/// Rendered as `{"error": {"kind": "...", "message": "..."}}`, except for
/// malformed MCP messages which get a JSON-RPC error object instead.
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    jsonrpc: Option<JsonRpcError>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            jsonrpc: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.kind)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MalformedCommand
        | ErrorKind::ImageNotFound
        | ErrorKind::InvalidAdapter
        | ErrorKind::SessionRequired => StatusCode::BAD_REQUEST,
        // Clients treat 404 on a known session id as "reinitialize".
        ErrorKind::AdapterNotFound
        | ErrorKind::SessionNotFound
        | ErrorKind::SessionInvalidated => StatusCode::NOT_FOUND,
        ErrorKind::AdapterExists => StatusCode::CONFLICT,
        ErrorKind::BackendUnavailable | ErrorKind::BackendProtocol => StatusCode::BAD_GATEWAY,
        ErrorKind::ConfigurationFatal => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::DeploymentFailed | ErrorKind::TeardownFailed | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::InvalidMessage(error) => Self {
                kind: ErrorKind::BackendProtocol,
                message: error.message.clone(),
                jsonrpc: Some(error),
            },
            e => Self::new(e.kind(), e.to_string()),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(e: AdapterError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Proxy(e) => e.into(),
            e => Self::new(e.kind(), e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(error) = self.jsonrpc {
            let body = JsonRpcMessage::error_response(None, error);
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }

        let status = status_for(self.kind);
        if status.is_server_error() {
            tracing::warn!(kind = %self.kind, "{}", self.message);
        } else {
            tracing::debug!(kind = %self.kind, "{}", self.message);
        }
        let body = json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::error_codes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::AdapterExists), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::SessionInvalidated), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::BackendUnavailable), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::MalformedCommand), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_message_keeps_jsonrpc_error() {
        let err: ApiError =
            ProxyError::InvalidMessage(JsonRpcError::new(error_codes::PARSE_ERROR, "bad json"))
                .into();
        assert!(err.jsonrpc.is_some());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
