use axum::extract::State;
use axum::response::{IntoResponse, Json};

use tb_connections::LifecycleState;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let servers = state.connections.status();
    let ready = servers
        .iter()
        .filter(|s| s.state == LifecycleState::Ready)
        .count();
    let stats = state.cache.stats();
    let uptime = (state.clock.now() - state.started_at).num_seconds().max(0);

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "servers": { "total": servers.len(), "ready": ready },
        "cache": stats,
        "pending_requests": state.connections.correlator().pending_count(),
    }))
}
