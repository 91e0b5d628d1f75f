use serde::Serialize;

/// Structured trace events emitted across all toolbridge crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ConnectionStateChanged {
        server_id: String,
        generation: u64,
        from: String,
        to: String,
    },
    ReconnectScheduled {
        server_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    ToolInvoked {
        server_id: String,
        tool: String,
        request_id: String,
        duration_ms: u64,
        outcome: String,
    },
    ToolCacheHit {
        tool: String,
        key: String,
    },
    StatePersisted {
        thread_id: String,
        streaming: bool,
        durable: bool,
    },
    StateDurableFallback {
        thread_id: String,
        found: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tb_event");
    }
}
