use crate::registry::{DeviceRegistry, RegistryError};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;

struct ServerState {
    token: String,
    registry: Arc<DeviceRegistry>,
}

pub async fn start(
    addr: SocketAddr,
    token: String,
    registry: Arc<DeviceRegistry>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "control server listening");
    serve(listener, token, registry, shutdown_rx).await
}

pub async fn serve(
    listener: TcpListener,
    token: String,
    registry: Arc<DeviceRegistry>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(token, registry);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
}

fn router(token: String, registry: Arc<DeviceRegistry>) -> Router {
    let state = Arc::new(ServerState { token, registry });
    Router::new()
        .route("/health", get(health_check))
        .route("/devices", get(list_devices))
        .route("/devices/:id/buttons/:name", post(press_button))
        .route("/devices/:id/favorites/:digits", post(press_favorite))
        .route("/devices/:id/power", get(power_state))
        .with_state(state)
}

async fn list_devices(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.registry.list()).into_response()
}

async fn press_button(
    State(state): State<Arc<ServerState>>,
    Path((id, name)): Path<(String, String)>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.registry.button_pressed(&id, &name) {
        Ok(()) => accepted(&id),
        Err(err) => routing_error(err),
    }
}

async fn press_favorite(
    State(state): State<Arc<ServerState>>,
    Path((id, digits)): Path<(String, String)>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.registry.favorite_pressed(&id, &digits) {
        Ok(()) => accepted(&id),
        Err(err) => routing_error(err),
    }
}

async fn power_state(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.registry.power_state(&id).await {
        Ok(powered) => Json(serde_json::json!({ "device": id, "powered": powered })).into_response(),
        Err(err) => routing_error(err),
    }
}

// Commands are queued, not confirmed; delivery depends on the box session.
fn accepted(id: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "device": id, "status": "queued" })),
    )
        .into_response()
}

fn routing_error(err: RegistryError) -> Response {
    let status = match err {
        RegistryError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        RegistryError::UnknownButton(_) | RegistryError::InvalidFavorite(_) => {
            StatusCode::BAD_REQUEST
        }
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn is_token_valid(headers: &HeaderMap, query: &HashMap<String, String>, token: &str) -> bool {
    // Authorization header first, "Bearer <token>"
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(provided_token) = auth_str.strip_prefix("Bearer ") {
                return provided_token == token;
            }
        }
    }

    query.get("token").map(|t| t == token).unwrap_or(false)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}
