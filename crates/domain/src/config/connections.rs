use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timeouts, limits and reconnect policy shared by every tool-server
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsConfig {
    /// Hard deadline for a single tool invocation.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long to wait for `handshake_response` after sending `handshake`.
    #[serde(default = "d_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// How long to wait for the transport to open.
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// In-flight invocations allowed per server (0 = unlimited).
    #[serde(default = "d_max_pending_per_server")]
    pub max_pending_per_server: usize,
    /// In-flight invocations allowed across all servers (0 = unlimited).
    #[serde(default = "d_max_pending_global")]
    pub max_pending_global: usize,
    /// Frames larger than this are rejected by the codec.
    #[serde(default = "d_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of each connection's outbound queue.
    #[serde(default = "d_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: d_request_timeout(),
            handshake_timeout_secs: d_handshake_timeout(),
            connect_timeout_secs: d_connect_timeout(),
            max_pending_per_server: d_max_pending_per_server(),
            max_pending_global: d_max_pending_global(),
            max_frame_bytes: d_max_frame_bytes(),
            outbound_buffer: d_outbound_buffer(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Jittered exponential back-off for reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "d_backoff_factor")]
    pub backoff_factor: f64,
    /// Consecutive failures before giving up (0 = never give up).
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: d_initial_delay_ms(),
            max_delay_ms: d_max_delay_ms(),
            backoff_factor: d_backoff_factor(),
            max_attempts: 0,
        }
    }
}

fn d_request_timeout() -> u64 {
    30
}
fn d_handshake_timeout() -> u64 {
    10
}
fn d_connect_timeout() -> u64 {
    10
}
fn d_max_pending_per_server() -> usize {
    50
}
fn d_max_pending_global() -> usize {
    200
}
fn d_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}
fn d_outbound_buffer() -> usize {
    64
}
fn d_initial_delay_ms() -> u64 {
    1_000
}
fn d_max_delay_ms() -> u64 {
    60_000
}
fn d_backoff_factor() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg: ConnectionsConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.handshake_timeout_secs, 10);
        assert_eq!(cfg.max_frame_bytes, 4 * 1024 * 1024);
        assert_eq!(cfg.reconnect.initial_delay_ms, 1_000);
        assert_eq!(cfg.reconnect.max_attempts, 0);
    }

    #[test]
    fn nested_reconnect_section() {
        let cfg: ConnectionsConfig = toml::from_str(
            r#"
            request_timeout_secs = 5

            [reconnect]
            initial_delay_ms = 250
            max_delay_ms = 8000
            max_attempts = 12
            "#,
        )
        .unwrap();
        assert_eq!(cfg.request_timeout_secs, 5);
        assert_eq!(cfg.reconnect.initial_delay_ms, 250);
        assert_eq!(cfg.reconnect.max_delay_ms, 8_000);
        assert!((cfg.reconnect.backoff_factor - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.reconnect.max_attempts, 12);
    }
}
