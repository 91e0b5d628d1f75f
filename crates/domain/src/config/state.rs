use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent state persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Durable backend.
    #[serde(default)]
    pub backend: DurableBackend,
    /// Root directory of the file backend.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Fast-tier TTL for full thread state.
    #[serde(default = "d_default_ttl")]
    pub default_ttl_secs: u64,
    /// Fast-tier TTL for streaming partial state.
    #[serde(default = "d_streaming_ttl")]
    pub streaming_ttl_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: DurableBackend::default(),
            state_path: d_state_path(),
            default_ttl_secs: d_default_ttl(),
            streaming_ttl_secs: d_streaming_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DurableBackend {
    /// One JSON document per thread under `state_path`.
    #[default]
    File,
    /// Process memory only; state does not survive restarts.
    Memory,
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}
fn d_default_ttl() -> u64 {
    3_600
}
fn d_streaming_ttl() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_ttl_is_shorter_by_default() {
        let cfg = StateConfig::default();
        assert!(cfg.streaming_ttl_secs < cfg.default_ttl_secs);
        assert_eq!(cfg.backend, DurableBackend::File);
    }

    #[test]
    fn memory_backend_parses() {
        let cfg: StateConfig = toml::from_str(r#"backend = "memory""#).unwrap();
        assert_eq!(cfg.backend, DurableBackend::Memory);
        assert_eq!(cfg.state_path, PathBuf::from("./data/state"));
    }
}
