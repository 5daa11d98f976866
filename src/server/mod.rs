//! HTTP front end.
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /health` | liveness |
//! | `GET, POST /adapters` | list, register |
//! | `GET, DELETE /adapters/{name}` | inspect, delete |
//! | `POST /adapters/{name}/mcp` | one proxied MCP exchange |
//! | `GET, POST, DELETE /adapters/{name}/sessions` | list, open, invalidate all |
//! | `GET, DELETE /adapters/{name}/sessions/{id}` | inspect, invalidate |
//! | `GET /adapters/{name}/status` | backend status |
//! | `GET /adapters/{name}/logs?tail=N` | backend output |

mod error;
mod handlers;
pub mod types;

pub use error::{ApiError, status_for};

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::adapter::AdapterService;
use crate::proxy::Dispatcher;

use handlers::*;

/// Shared state for every handler.
pub struct GatewayState {
    pub adapters: Arc<AdapterService>,
    pub dispatcher: Arc<Dispatcher>,
    /// Name of the active sidecar strategy, if sidecars are enabled.
    pub sidecar_strategy: Option<&'static str>,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/adapters",
            get(adapters_list_handler).post(adapters_create_handler),
        )
        .route(
            "/adapters/{name}",
            get(adapters_get_handler).delete(adapters_delete_handler),
        )
        .route("/adapters/{name}/mcp", post(mcp_handler))
        .route(
            "/adapters/{name}/sessions",
            get(sessions_list_handler)
                .post(sessions_create_handler)
                .delete(sessions_delete_all_handler),
        )
        .route(
            "/adapters/{name}/sessions/{id}",
            get(sessions_get_handler).delete(sessions_delete_handler),
        )
        .route("/adapters/{name}/status", get(adapter_status_handler))
        .route("/adapters/{name}/logs", get(adapter_logs_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
