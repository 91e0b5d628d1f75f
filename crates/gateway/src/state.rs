use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use tb_cache::ResultCache;
use tb_connections::ConnectionManager;
use tb_domain::clock::SharedClock;
use tb_domain::config::Config;
use tb_state::StatePersistence;

use crate::executor::ToolExecutor;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: SharedClock,
    pub started_at: DateTime<Utc>,

    // ── Tools ─────────────────────────────────────────────────────────
    pub connections: Arc<ConnectionManager>,
    pub executor: Arc<ToolExecutor>,
    pub cache: Arc<ResultCache>,

    // ── Agent state ───────────────────────────────────────────────────
    pub persistence: Arc<StatePersistence>,

    /// Cancelled once on shutdown; background loops watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Stop background loops, cancel reconnect timers and close every
    /// server connection. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.connections.shutdown();
    }
}
