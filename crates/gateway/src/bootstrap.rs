//! AppState construction and background-task spawning extracted from `main.rs`.
//!
//! Everything is built here and injected; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use tb_cache::{MemoryFastTier, ResultCache};
use tb_connections::{ConnectionManager, Connector, ManagerSettings, WebSocketConnector};
use tb_domain::clock::{SharedClock, SystemClock};
use tb_domain::config::{Config, ConfigSeverity, DurableBackend};
use tb_state::{DurableStore, FileStore, MemoryStore, StatePersistence, StateTtls};

use crate::executor::ToolExecutor;
use crate::state::AppState;

/// Validate config and wire every subsystem with the production WebSocket
/// transport and the system clock.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    build_app_state_with(
        config,
        Arc::new(WebSocketConnector::default()),
        SystemClock::shared(),
    )
}

/// Same as [`build_app_state`] with the transport and clock supplied by the
/// caller.
pub fn build_app_state_with(
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    clock: SharedClock,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Fast tier + result cache ─────────────────────────────────────
    let fast = Arc::new(MemoryFastTier::new(clock.clone()));
    let cache = Arc::new(ResultCache::new(
        fast.clone(),
        clock.clone(),
        Duration::from_secs(config.cache.default_ttl_secs),
    ));

    // ── State persistence ────────────────────────────────────────────
    let durable: Arc<dyn DurableStore> = match config.state.backend {
        DurableBackend::File => Arc::new(
            FileStore::new(&config.state.state_path).with_context(|| {
                format!("opening state store at {}", config.state.state_path.display())
            })?,
        ),
        DurableBackend::Memory => {
            tracing::warn!("state.backend = memory: agent state will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };
    let persistence = Arc::new(StatePersistence::new(
        fast,
        durable,
        clock.clone(),
        StateTtls::from(&config.state),
    ));

    // ── Tool servers ─────────────────────────────────────────────────
    let connections = ConnectionManager::new(connector, ManagerSettings::from(&config.connections));
    for descriptor in &config.tool_servers {
        connections.register(descriptor.clone());
    }
    tracing::info!(count = config.tool_servers.len(), "tool servers registered");

    let executor = Arc::new(ToolExecutor::new(
        connections.clone(),
        cache.clone(),
        config.cache.clone(),
    ));

    Ok(AppState {
        started_at: clock.now(),
        config,
        clock,
        connections,
        executor,
        cache,
        persistence,
        shutdown: CancellationToken::new(),
    })
}

/// Connect every `auto_connect` server and start the fast-tier sweeper.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Initial connections ──────────────────────────────────────────
    for descriptor in state.config.tool_servers.iter().filter(|d| d.auto_connect) {
        if let Err(e) = state.connections.connect(&descriptor.id) {
            tracing::warn!(server_id = %descriptor.id, error = %e, "initial connect failed");
        }
    }

    // ── Periodic expiry sweep ────────────────────────────────────────
    {
        let cache = state.cache.clone();
        let shutdown = state.shutdown.clone();
        let every = Duration::from_secs(state.config.cache.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let swept = cache.sweep_expired().await;
                        if swept > 0 {
                            tracing::debug!(swept, "expired fast-tier entries swept");
                        }
                    }
                }
            }
        });
    }
}
