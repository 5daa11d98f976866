//! Route handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::mcp::{CONTENT_TYPE_SSE, PROTOCOL_VERSION_HEADER, SESSION_HEADER, sse};
use crate::proxy::{BackendReport, McpRequest, McpResponse, ResponseBody};
use crate::server::GatewayState;
use crate::server::error::ApiError;
use crate::server::types::*;
use crate::session::{Session, SessionError};

pub async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        sidecar_strategy: state.sidecar_strategy,
    })
}

// --- Adapters ---

pub async fn adapters_create_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<CreateAdapterRequest>,
) -> Result<(StatusCode, Json<AdapterInfo>), ApiError> {
    let adapter = state.adapters.create(req.into()).await?;
    Ok((StatusCode::CREATED, Json(adapter.into())))
}

pub async fn adapters_list_handler(
    State(state): State<Arc<GatewayState>>,
) -> Json<AdapterListResponse> {
    let adapters = state
        .adapters
        .list()
        .await
        .into_iter()
        .map(AdapterInfo::from)
        .collect();
    Json(AdapterListResponse { adapters })
}

pub async fn adapters_get_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<AdapterInfo>, ApiError> {
    let adapter = state.adapters.get(&name).await?;
    Ok(Json(adapter.into()))
}

pub async fn adapters_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
    state.adapters.delete(&name).await?;
    Ok(Json(ActionResponse::ok(format!("Adapter '{name}' deleted"))))
}

pub async fn adapter_status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<BackendReport>, ApiError> {
    Ok(Json(state.dispatcher.status(&name).await?))
}

pub async fn adapter_logs_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let logs = state.dispatcher.logs(&name, query.tail).await?;
    Ok(Json(LogsResponse {
        adapter: name,
        logs,
    }))
}

// --- MCP ---

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn mcp_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let accepts_sse = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(CONTENT_TYPE_SSE));

    let request = McpRequest {
        body,
        session_id: header_string(&headers, SESSION_HEADER),
        accepts_sse,
        protocol_version: header_string(&headers, PROTOCOL_VERSION_HEADER),
    };

    let response = state.dispatcher.handle(&name, request).await?;
    Ok(render(response))
}

fn render(response: McpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut out = match response.body {
        ResponseBody::Empty => status.into_response(),
        ResponseBody::Json(message) => (status, Json(message)).into_response(),
        ResponseBody::EventStream(messages) => {
            let body: String = messages.iter().map(sse::encode_message).collect();
            (status, [(header::CONTENT_TYPE, CONTENT_TYPE_SSE)], body).into_response()
        }
        ResponseBody::Raw {
            content_type,
            bytes,
        } => {
            let mut raw = (status, bytes).into_response();
            if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
                raw.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            raw
        }
    };

    if let Some(id) = response.session_id
        && let Ok(value) = HeaderValue::from_str(&id)
    {
        out.headers_mut().insert(SESSION_HEADER, value);
    }
    out
}

// --- Sessions ---

/// Session `id`, provided it belongs to adapter `name`.
async fn owned_session(
    state: &GatewayState,
    name: &str,
    id: &str,
) -> Result<Session, ApiError> {
    let session = state.dispatcher.sessions().get(id).await?;
    if session.adapter != name {
        return Err(SessionError::NotFound { id: id.to_string() }.into());
    }
    Ok(session)
}

pub async fn sessions_list_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<SessionListResponse>, ApiError> {
    state.adapters.get(&name).await?;
    let sessions = state
        .dispatcher
        .sessions()
        .list(&name)
        .await
        .into_iter()
        .map(SessionInfo::from)
        .collect();
    Ok(Json(SessionListResponse { sessions }))
}

pub async fn sessions_create_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response, ApiError> {
    let session = state
        .dispatcher
        .open_session(&name, req.session_id.as_deref(), req.client_info)
        .await?;

    let mut response = (StatusCode::CREATED, Json(SessionInfo::from(session.clone()))).into_response();
    if let Ok(value) = HeaderValue::from_str(&session.id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    Ok(response)
}

pub async fn sessions_delete_all_handler(
    State(state): State<Arc<GatewayState>>,
    Path(name): Path<String>,
) -> Result<Json<InvalidatedResponse>, ApiError> {
    state.adapters.get(&name).await?;
    let invalidated = state.dispatcher.sessions().invalidate_all(&name).await;
    Ok(Json(InvalidatedResponse { invalidated }))
}

pub async fn sessions_get_handler(
    State(state): State<Arc<GatewayState>>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<SessionInfo>, ApiError> {
    let session = owned_session(&state, &name, &id).await?;
    Ok(Json(session.into()))
}

pub async fn sessions_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<SessionInfo>, ApiError> {
    owned_session(&state, &name, &id).await?;
    let session = state.dispatcher.sessions().invalidate(&id).await?;
    Ok(Json(session.into()))
}
