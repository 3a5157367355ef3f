//! API module
//!
//! HTTP/JSON dashboard API over a running `LifecycleManager`, plus a
//! websocket that streams every `ManagerEvent`.

use crate::app::LifecycleManager;
use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lifecycle_protocol::{ActionRequest, LifecycleBackend, ManagerResponse, SubmitError};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type SharedManager = Arc<LifecycleManager<dyn LifecycleBackend>>;

pub fn router(manager: SharedManager) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/nodes", get(get_nodes))
        // Node names are namespaced (`/ns/camera`), so the whole remaining
        // path is captured. `POST` expects it to end in `/actions`.
        .route("/nodes/*path", get(get_node).post(post_action))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

pub async fn run_api_server(manager: SharedManager, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("API Server listening on {}", addr);

    axum::serve(listener, router(manager))
        .await
        .context("API server stopped")
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        let status = match e {
            SubmitError::UnknownNode { .. } => StatusCode::NOT_FOUND,
            SubmitError::NodeBusy { .. } => StatusCode::CONFLICT,
            SubmitError::EmptySequence { .. } | SubmitError::IllegalTransition { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ManagerResponse::Error(self.message))).into_response()
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn get_nodes(State(manager): State<SharedManager>) -> Json<ManagerResponse> {
    Json(ManagerResponse::Nodes(manager.rows()))
}

async fn get_node(
    State(manager): State<SharedManager>,
    Path(path): Path<String>,
) -> Result<Json<ManagerResponse>, ApiError> {
    let name = node_name(&path);
    manager
        .rows()
        .into_iter()
        .find(|row| row.name == name)
        .map(|row| Json(ManagerResponse::Nodes(vec![row])))
        .ok_or_else(|| SubmitError::UnknownNode { node: name }.into())
}

async fn post_action(
    State(manager): State<SharedManager>,
    Path(path): Path<String>,
    Json(req): Json<ActionRequest>,
) -> Result<Response, ApiError> {
    let Some(node) = path.trim_end_matches('/').strip_suffix("/actions") else {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("no such resource '/nodes/{}'", path.trim_start_matches('/')),
        });
    };
    let name = node_name(node);
    info!("API: {} requested for '{}'", req.action, name);

    let ticket = manager.submit(&name, req.action)?;
    if !req.wait {
        let accepted = ManagerResponse::Accepted(ticket.request().clone());
        return Ok((StatusCode::ACCEPTED, Json(accepted)).into_response());
    }

    match ticket.outcome().await {
        Some(outcome) => Ok(Json(ManagerResponse::Completed(outcome)).into_response()),
        None => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "request was dropped before it finished".to_string(),
        }),
    }
}

/// Node names are absolute (`/ns/node`); the captured path may or may not
/// keep the leading slash.
fn node_name(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

// WebSocket Handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(manager): State<SharedManager>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, manager))
}

async fn handle_socket(mut socket: WebSocket, manager: SharedManager) {
    let mut rx = manager.event_bus().subscribe();

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("API: Websocket client lagged, skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!("API: Failed to encode event: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}
