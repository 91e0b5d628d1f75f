//! Tool discovery and invocation.
//!
//! - `GET  /v1/tools`               every tool advertised by a ready server
//! - `POST /v1/tools/:name/invoke`  call a tool, cache-first

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::state::AppState;

use super::tool_error;

pub async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.executor.list_tools())
}

#[derive(Debug, Default, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub params: Value,
    /// Pin the call to one server instead of resolving by name.
    #[serde(default)]
    pub server_id: Option<String>,
}

pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<InvokeRequest>,
) -> impl IntoResponse {
    let outcome = match req.server_id.as_deref() {
        Some(server_id) => state.executor.invoke_on(server_id, &name, req.params).await,
        None => state.executor.invoke_tool(&name, req.params).await,
    };
    match outcome {
        Ok(output) => Json(output).into_response(),
        Err(e) => {
            tracing::debug!(tool = %name, error = %e, "tool invocation failed");
            tool_error(&e)
        }
    }
}
