//! Tool-server status and lifecycle endpoints.
//!
//! - `GET  /v1/servers`                 status snapshot for every server
//! - `POST /v1/servers/:id/connect`     start or restart a connection
//! - `POST /v1/servers/:id/disconnect`  close it and stop reconnecting

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

use super::tool_error;

pub async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.executor.status())
}

pub async fn connect_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.connections.connect(&id) {
        Ok(generation) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "server_id": id, "generation": generation })),
        )
            .into_response(),
        Err(e) => tool_error(&e),
    }
}

pub async fn disconnect_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.connections.disconnect(&id) {
        Ok(()) => Json(serde_json::json!({ "server_id": id, "state": "disconnected" }))
            .into_response(),
        Err(e) => tool_error(&e),
    }
}
