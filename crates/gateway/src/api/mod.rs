pub mod health;
pub mod servers;
pub mod threads;
pub mod tools;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use tb_connections::ToolError;
use tb_state::PersistenceError;

use crate::state::AppState;

/// Build the API router. Single-tenant; no auth layer.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health::health))
        // Tool servers
        .route("/v1/servers", get(servers::list_servers))
        .route("/v1/servers/:id/connect", post(servers::connect_server))
        .route("/v1/servers/:id/disconnect", post(servers::disconnect_server))
        // Tools
        .route("/v1/tools", get(tools::list_tools))
        .route("/v1/tools/:name/invoke", post(tools::invoke_tool))
        // Agent state
        .route(
            "/v1/threads",
            get(threads::list_threads).delete(threads::clear_threads),
        )
        .route(
            "/v1/threads/:id/state",
            get(threads::get_state)
                .put(threads::put_state)
                .delete(threads::delete_state),
        )
        .route(
            "/v1/threads/:id/streaming",
            get(threads::get_streaming).patch(threads::patch_streaming),
        )
        .route(
            "/v1/conversations/:id/state",
            get(threads::get_conversation),
        )
}

/// The router with request tracing and a concurrency cap, bound to `state`.
pub fn app(state: AppState) -> Router {
    let max_concurrent = state.config.server.max_concurrent_requests;
    router()
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plain JSON error body: `{ "error": "<message>" }`. Used for lookups,
/// bad input and state persistence failures.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Tool invocation failures add the error class:
/// `{ "error": "<message>", "kind": "<ToolError::kind>" }`.
pub(crate) fn tool_error(e: &ToolError) -> Response {
    let status = match e {
        ToolError::UnknownServer(_) | ToolError::UnknownTool(_) => StatusCode::NOT_FOUND,
        ToolError::ToolTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ToolError::ConnectionLost { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ToolError::ToolExecutionError { .. } => StatusCode::BAD_GATEWAY,
        ToolError::Backpressure(_) => StatusCode::TOO_MANY_REQUESTS,
        ToolError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": e.to_string(), "kind": e.kind() })),
    )
        .into_response()
}

pub(crate) fn persistence_error(e: &PersistenceError) -> Response {
    match e {
        PersistenceError::InvalidThreadId(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        _ => {
            tracing::error!(error = %e, "state persistence failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
