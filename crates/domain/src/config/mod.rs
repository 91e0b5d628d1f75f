mod cache;
mod connections;
mod observability;
mod server;
mod state;
mod tool_servers;

pub use cache::*;
pub use connections::*;
pub use observability::*;
pub use server::*;
pub use state::*;
pub use tool_servers::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    /// Tool-provider servers to register at startup.
    #[serde(default)]
    pub tool_servers: Vec<ServerDescriptor>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        // ── Connections ───────────────────────────────────────────────
        let conn = &self.connections;
        if conn.request_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "connections.request_timeout_secs",
                "request timeout must be greater than 0",
            ));
        }
        if conn.handshake_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "connections.handshake_timeout_secs",
                "handshake timeout must be greater than 0",
            ));
        }
        if conn.reconnect.backoff_factor < 1.0 {
            errors.push(ConfigError::error(
                "connections.reconnect.backoff_factor",
                "backoff factor must be at least 1.0",
            ));
        }
        if conn.reconnect.max_delay_ms < conn.reconnect.initial_delay_ms {
            errors.push(ConfigError::error(
                "connections.reconnect.max_delay_ms",
                "max delay must not be smaller than the initial delay",
            ));
        }

        // ── Tool servers ──────────────────────────────────────────────
        if self.tool_servers.is_empty() {
            errors.push(ConfigError::warning(
                "tool_servers",
                "no tool servers configured",
            ));
        }
        let mut seen = HashSet::new();
        for (i, server) in self.tool_servers.iter().enumerate() {
            if server.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("tool_servers[{i}].id"),
                    "server id must not be empty",
                ));
            } else if !seen.insert(server.id.as_str()) {
                errors.push(ConfigError::error(
                    format!("tool_servers[{i}].id"),
                    format!("duplicate server id \"{}\"", server.id),
                ));
            }
            if !(server.url.starts_with("ws://") || server.url.starts_with("wss://")) {
                errors.push(ConfigError::error(
                    format!("tool_servers[{i}].url"),
                    "url must use the ws:// or wss:// scheme",
                ));
            }
        }

        // ── State ─────────────────────────────────────────────────────
        if self.state.streaming_ttl_secs >= self.state.default_ttl_secs {
            errors.push(ConfigError::warning(
                "state.streaming_ttl_secs",
                "streaming state should expire sooner than full state",
            ));
        }
        if self.cache.default_ttl_secs == 0 {
            errors.push(ConfigError::warning(
                "cache.default_ttl_secs",
                "a zero TTL disables result caching",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample rate must be between 0.0 and 1.0",
            ));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors_only(config: &Config) -> Vec<ConfigError> {
        config
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect()
    }

    #[test]
    fn default_config_has_no_errors() {
        let config = Config::default();
        assert!(errors_only(&config).is_empty());
        // ...but warns that nothing is configured.
        assert!(config
            .validate()
            .iter()
            .any(|e| e.field == "tool_servers"));
    }

    #[test]
    fn duplicate_server_ids_are_rejected() {
        let mut config = Config::default();
        config.tool_servers = vec![
            ServerDescriptor::new("search", "ws://a:1"),
            ServerDescriptor::new("search", "ws://b:2"),
        ];
        let errs = errors_only(&config);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].field, "tool_servers[1].id");
    }

    #[test]
    fn non_websocket_url_is_rejected() {
        let mut config = Config::default();
        config.tool_servers = vec![ServerDescriptor::new("fs", "http://fs:80")];
        let errs = errors_only(&config);
        assert!(errs.iter().any(|e| e.field == "tool_servers[0].url"));
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let mut config = Config::default();
        config.connections.reconnect.initial_delay_ms = 10_000;
        config.connections.reconnect.max_delay_ms = 1_000;
        assert!(errors_only(&config)
            .iter()
            .any(|e| e.field == "connections.reconnect.max_delay_ms"));
    }

    #[test]
    fn display_tags_severity() {
        let e = ConfigError::warning("state.streaming_ttl_secs", "too long");
        assert_eq!(e.to_string(), "[WARN] state.streaming_ttl_secs: too long");
    }
}
