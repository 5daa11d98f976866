//! MCP wire format: JSON-RPC 2.0 messages and event-stream framing.

pub mod jsonrpc;
pub mod sse;

pub use jsonrpc::{JsonRpcError, JsonRpcMessage, error_codes};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";
/// Header carrying the negotiated protocol revision.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
/// Revision advertised when the client does not send one.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_SSE: &str = "text/event-stream";

pub const METHOD_INITIALIZE: &str = "initialize";

/// Methods with no side effects on the backend, safe to retry once.
pub fn is_read_only(method: &str) -> bool {
    matches!(
        method,
        "ping" | "tools/list" | "resources/list" | "resources/templates/list" | "prompts/list"
    )
}
