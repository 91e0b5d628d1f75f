//! Agent state endpoints over [`StatePersistence`](tb_state::StatePersistence).
//!
//! - `GET|PUT|DELETE /v1/threads/:id/state`
//! - `GET|PATCH      /v1/threads/:id/streaming`
//! - `GET|DELETE     /v1/threads`
//! - `GET            /v1/conversations/:id/state`

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{Map, Value};

use tb_state::SaveOptions;

use crate::state::AppState;

use super::{api_error, persistence_error};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Full thread state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SaveStateRequest {
    pub payload: Value,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

pub async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.persistence.get_state(&id).await {
        Ok(Some(thread)) => Json(thread).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("no state for thread {id}")),
        Err(e) => persistence_error(&e),
    }
}

pub async fn put_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SaveStateRequest>,
) -> impl IntoResponse {
    let opts = SaveOptions {
        conversation_id: req.conversation_id,
        is_complete: req.is_complete,
        ttl: req.ttl_secs.map(Duration::from_secs),
        is_streaming: req.is_streaming,
    };
    match state.persistence.save_state(&id, req.payload, opts).await {
        Ok(thread) => Json(thread).into_response(),
        Err(e) => persistence_error(&e),
    }
}

pub async fn delete_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.persistence.delete_state(&id).await {
        Ok(deleted) => Json(serde_json::json!({ "thread_id": id, "deleted": deleted })).into_response(),
        Err(e) => persistence_error(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_streaming(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.persistence.get_streaming_state(&id).await {
        Ok(Some(streaming)) => Json(streaming).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("thread {id} is not streaming")),
        Err(e) => persistence_error(&e),
    }
}

/// Body is the partial object to merge.
pub async fn patch_streaming(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(partial): Json<Map<String, Value>>,
) -> impl IntoResponse {
    match state.persistence.save_streaming_state(&id, partial).await {
        Ok(merged) => Json(merged).into_response(),
        Err(e) => persistence_error(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_threads(State(state): State<AppState>) -> impl IntoResponse {
    match state.persistence.list_thread_ids().await {
        Ok(ids) => Json(serde_json::json!({ "count": ids.len(), "threads": ids })).into_response(),
        Err(e) => persistence_error(&e),
    }
}

pub async fn clear_threads(State(state): State<AppState>) -> impl IntoResponse {
    match state.persistence.clear_all_state().await {
        Ok(cleared) => Json(serde_json::json!({ "cleared": cleared })).into_response(),
        Err(e) => persistence_error(&e),
    }
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.persistence.get_conversation_state(&id).await {
        Ok(threads) => Json(threads).into_response(),
        Err(e) => persistence_error(&e),
    }
}
