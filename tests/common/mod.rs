//! Shared wiring for integration tests.
//!
//! - `Gateway` -- every component assembled over an `InMemoryCluster`
//! - `MockBackend` -- an axum MCP server that records what it receives

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use serde_json::{Value, json};

use mcp_gateway::adapter::{
    Adapter, AdapterService, AdapterStatus, AdapterStore, InMemoryAdapterStore,
};
use mcp_gateway::launch::{ResourceLimits, Translator};
use mcp_gateway::proxy::{Dispatcher, McpRequest};
use mcp_gateway::session::{InMemorySessionStore, SessionManager};
use mcp_gateway::sidecar::SidecarOrchestrator;
use mcp_gateway::testing::InMemoryCluster;

pub const NAMESPACE: &str = "mcp-sidecars";

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct Gateway {
    pub cluster: Arc<InMemoryCluster>,
    pub orchestrator: Arc<SidecarOrchestrator>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub adapters: Arc<AdapterService>,
}

pub fn gateway() -> Gateway {
    gateway_with(Arc::new(InMemoryCluster::new()))
}

pub fn gateway_with(cluster: Arc<InMemoryCluster>) -> Gateway {
    build(cluster, Duration::from_secs(10))
}

/// A gateway whose backend calls give up after `request_timeout`.
pub fn gateway_with_timeout(request_timeout: Duration) -> Gateway {
    build(Arc::new(InMemoryCluster::new()), request_timeout)
}

fn build(cluster: Arc<InMemoryCluster>, request_timeout: Duration) -> Gateway {
    let orchestrator = Arc::new(SidecarOrchestrator::new(
        cluster.clone(),
        Translator::new(
            NAMESPACE,
            ResourceLimits {
                cpu: "500m".to_string(),
                memory: "512Mi".to_string(),
            },
        ),
        Duration::from_secs(3),
    ));
    let sessions = Arc::new(SessionManager::new(Arc::new(InMemorySessionStore::new())));
    let store: Arc<dyn AdapterStore> = Arc::new(InMemoryAdapterStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        Some(Arc::clone(&orchestrator)),
        request_timeout,
    ));
    let adapters = Arc::new(AdapterService::new(
        store,
        Some(Arc::clone(&orchestrator)),
        Arc::clone(&dispatcher),
        8000,
        NAMESPACE,
    ));

    Gateway {
        cluster,
        orchestrator,
        sessions,
        dispatcher,
        adapters,
    }
}

/// Poll until `name` reaches `status`, or panic after a few seconds.
pub async fn wait_for_status(adapters: &AdapterService, name: &str, status: AdapterStatus) -> Adapter {
    for _ in 0..100 {
        let adapter = adapters.get(name).await.unwrap();
        if adapter.status == status {
            return adapter;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("adapter '{name}' never reached {status:?}");
}

// ---------------------------------------------------------------------------
// MCP request helpers
// ---------------------------------------------------------------------------

pub fn initialize(id: i64) -> McpRequest {
    McpRequest {
        body: Bytes::from(
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": {"name": "it", "version": "1.0"}
                }
            })
            .to_string(),
        ),
        ..Default::default()
    }
}

pub fn call(session: &str, id: i64, method: &str) -> McpRequest {
    McpRequest {
        body: Bytes::from(json!({"jsonrpc": "2.0", "id": id, "method": method}).to_string()),
        session_id: Some(session.to_string()),
        ..Default::default()
    }
}

pub fn notify(session: &str, method: &str) -> McpRequest {
    McpRequest {
        body: Bytes::from(json!({"jsonrpc": "2.0", "method": method}).to_string()),
        session_id: Some(session.to_string()),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Mock HTTP backend
// ---------------------------------------------------------------------------

/// One request as the mock backend saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Option<String>,
    pub session: Option<String>,
    pub protocol_version: Option<String>,
    pub authorization: Option<String>,
}

/// MCP server answering every request with its method and the backend
/// session it arrived on.
///
/// - `initialize` issues a fresh `mcp-session-id`
/// - `stream/progress` answers as an event stream with a progress
///   notification ahead of the response
/// - `fail/500` answers 500
/// - `slow/*` answers after a short delay, counting overlapping calls
/// - notifications get 202
#[derive(Default)]
pub struct MockBackend {
    requests: Mutex<Vec<Recorded>>,
    sessions_issued: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    /// Most `slow/*` calls that were ever in progress at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

pub const SLOW_DELAY: Duration = Duration::from_millis(100);

async fn mock_mcp(
    State(mock): State<Arc<MockBackend>>,
    headers: HeaderMap,
    Json(message): Json<Value>,
) -> Response {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    let session = header_value("mcp-session-id");

    mock.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        session: session.clone(),
        protocol_version: header_value("mcp-protocol-version"),
        authorization: header_value("authorization"),
    });

    let Some(id) = message.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    let result = json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"method": method, "session": session}
    });

    match method.as_deref() {
        Some("initialize") => {
            let n = mock.sessions_issued.fetch_add(1, Ordering::SeqCst) + 1;
            ([("mcp-session-id", format!("backend-{n}"))], Json(result)).into_response()
        }
        Some("stream/progress") => {
            let progress = json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {"progress": 1}
            });
            let body = format!("event: message\ndata: {progress}\n\nevent: message\ndata: {result}\n\n");
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        Some("fail/500") => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        Some(m) if m.starts_with("slow/") => {
            let now = mock.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            mock.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(SLOW_DELAY).await;
            mock.in_flight.fetch_sub(1, Ordering::SeqCst);
            Json(result).into_response()
        }
        _ => Json(result).into_response(),
    }
}

/// Start a mock backend on a free local port. Returns its MCP URL.
pub async fn spawn_mock_backend() -> (String, Arc<MockBackend>) {
    let mock = Arc::new(MockBackend::default());
    let app = Router::new()
        .route("/mcp", post(mock_mcp))
        .with_state(Arc::clone(&mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/mcp"), mock)
}

/// A listener that accepts connections and never answers. Returns its URL.
pub async fn spawn_silent_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}/mcp")
}
