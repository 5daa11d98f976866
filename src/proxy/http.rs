//! MCP over HTTP for sidecar, remote and streamable backends.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::adapter::{AdapterAuth, ApiKeyLocation};
use crate::mcp::{
    self, CONTENT_TYPE_JSON, CONTENT_TYPE_SSE, JsonRpcMessage, PROTOCOL_VERSION_HEADER,
    SESSION_HEADER,
};
use crate::proxy::{Forward, ProxyError, Reply, Transport};
use crate::sidecar::orchestrator::RETRY_BACKOFF;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Reachability of an HTTP backend as seen by a plain `GET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteHealth {
    Ready,
    Degraded,
    Unavailable,
}

impl RemoteHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }
}

pub struct HttpBackend {
    adapter: String,
    url: String,
    auth: AdapterAuth,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        adapter: impl Into<String>,
        url: impl Into<String>,
        auth: AdapterAuth,
        client: reqwest::Client,
    ) -> Self {
        Self {
            adapter: adapter.into(),
            url: url.into(),
            auth,
            client,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        apply_auth(builder, &self.auth)
    }

    async fn send_once(&self, request: &Forward<'_>) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .header(ACCEPT, ACCEPT_BOTH)
            .body(request.message.to_bytes());
        if let Some(version) = request.protocol_version {
            builder = builder.header(PROTOCOL_VERSION_HEADER, version);
        }
        if let Some(session) = request.backend_session_id {
            builder = builder.header(SESSION_HEADER, session);
        }
        self.authorize(builder).send().await
    }

    /// Send, retrying once after [`RETRY_BACKOFF`] if the method has no side
    /// effects and the failure happened at the transport level.
    async fn send(&self, request: &Forward<'_>) -> Result<reqwest::Response, ProxyError> {
        let retryable = request.message.method().is_some_and(mcp::is_read_only);
        match self.send_once(request).await {
            Ok(response) => Ok(response),
            Err(e) if retryable && !e.is_builder() => {
                tracing::debug!(adapter = %self.adapter, error = %e, "Retrying read-only call");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.send_once(request).await.map_err(|e| self.transport_error(e))
            }
            Err(e) => Err(self.transport_error(e)),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ProxyError {
        ProxyError::BackendUnavailable {
            adapter: self.adapter.clone(),
            reason: e.to_string(),
        }
    }

    fn protocol_error(&self, reason: impl Into<String>) -> ProxyError {
        ProxyError::BackendProtocol {
            adapter: self.adapter.clone(),
            reason: reason.into(),
        }
    }

    /// Check the backend with a `GET` on its MCP path.
    ///
    /// Any answer below 500 counts as ready: streamable servers commonly
    /// refuse `GET` with 405.
    pub async fn health(&self) -> RemoteHealth {
        match self.authorize(self.client.get(&self.url)).send().await {
            Ok(response) if response.status().is_server_error() => RemoteHealth::Degraded,
            Ok(_) => RemoteHealth::Ready,
            Err(e) => {
                tracing::debug!(adapter = %self.adapter, error = %e, "Remote health check failed");
                RemoteHealth::Unavailable
            }
        }
    }
}

#[async_trait]
impl Transport for HttpBackend {
    fn address(&self) -> &str {
        &self.url
    }

    async fn forward(&self, request: Forward<'_>) -> Result<Reply, ProxyError> {
        let response = self.send(&request).await?;
        let status = response.status();
        let backend_session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            tracing::debug!(adapter = %self.adapter, %status, "Backend returned an error status");
            return Ok(Reply::Status {
                status: status.as_u16(),
                content_type,
                body,
            });
        }
        if status == reqwest::StatusCode::ACCEPTED || body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Reply::Accepted);
        }

        let messages = if content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with(CONTENT_TYPE_SSE))
        {
            let text = String::from_utf8_lossy(&body);
            mcp::sse::decode_messages(&text)
        } else {
            let message: JsonRpcMessage = serde_json::from_slice(&body)
                .map_err(|e| self.protocol_error(format!("response is not JSON-RPC: {e}")))?;
            vec![message]
        };

        Ok(Reply::Messages {
            messages,
            backend_session_id,
        })
    }
}

/// Attach the adapter's credentials to an outbound request.
pub fn apply_auth(builder: reqwest::RequestBuilder, auth: &AdapterAuth) -> reqwest::RequestBuilder {
    match auth {
        AdapterAuth::None => builder,
        AdapterAuth::Bearer { token } => builder.bearer_auth(token.expose_secret()),
        AdapterAuth::Basic { username, password } => {
            builder.basic_auth(username, Some(password.expose_secret()))
        }
        AdapterAuth::ApiKey {
            name,
            value,
            location: ApiKeyLocation::Header,
        } => builder.header(name.as_str(), value.expose_secret()),
        AdapterAuth::ApiKey {
            name,
            value,
            location: ApiKeyLocation::Query,
        } => builder.query(&[(name.as_str(), value.expose_secret())]),
    }
}
