//! JSON-RPC 2.0 message model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Gateway-specific: the session is missing, unknown or invalidated.
    pub const SESSION_ERROR: i64 = -32001;
    /// Gateway-specific: the backend could not be reached.
    pub const BACKEND_UNAVAILABLE: i64 = -32002;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Any JSON-RPC message: request, notification or response.
///
/// `id` is `None` for notifications. A response to an unparseable request
/// carries `"id": null`, which also reads back as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    pub fn request(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Parse and validate one inbound message.
    ///
    /// Batches are rejected; MCP 2025-06-18 removed them.
    pub fn parse(body: &[u8]) -> Result<Self, JsonRpcError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| {
            JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {e}"))
        })?;

        if !value.is_object() {
            return Err(JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                "Invalid Request: expected a single JSON-RPC object",
            ));
        }

        let message: Self = serde_json::from_value(value).map_err(|e| {
            JsonRpcError::new(error_codes::INVALID_REQUEST, format!("Invalid Request: {e}"))
        })?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), JsonRpcError> {
        let invalid = |reason: &str| {
            Err(JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                format!("Invalid Request: {reason}"),
            ))
        };

        if self.jsonrpc != JSONRPC_VERSION {
            return invalid("jsonrpc must be \"2.0\"");
        }
        match (&self.method, &self.result, &self.error) {
            (Some(m), None, None) if !m.is_empty() => {}
            (Some(_), None, None) => return invalid("method must not be empty"),
            (None, Some(_), None) | (None, None, Some(_)) => {
                if self.id.is_none() {
                    return invalid("response without id");
                }
            }
            _ => return invalid("exactly one of method, result or error is required"),
        }
        if let Some(id) = &self.id
            && !(id.is_string() || id.is_number())
        {
            return invalid("id must be a string or number");
        }
        Ok(())
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}
