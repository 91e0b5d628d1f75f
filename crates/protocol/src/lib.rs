//! Wire protocol between the core and tool-provider servers.
//!
//! Every frame is a single JSON object tagged by `type`. The core opens with
//! `handshake`, the server acknowledges with `handshake_response`, after
//! which the core sends `execute_tool` requests and the server answers each
//! with a `tool_response` carrying the same `request_id`. Servers may push
//! `event` and `log` frames at any time; those never get a reply.

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use codec::{Codec, CodecError};
pub use tb_domain::Capability;

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default upper bound for a single frame (4 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Wire message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Core → server: open the session and announce what the core consumes.
    Handshake {
        version: String,
        capabilities: Vec<Capability>,
    },

    /// Server → core: handshake accepted.
    HandshakeResponse {
        version: String,
        #[serde(default)]
        capabilities: Vec<Capability>,
        /// Tools this server exposes.
        #[serde(default)]
        tools: Vec<ToolSpec>,
    },

    /// Core → server: run a tool.
    ExecuteTool {
        request_id: String,
        tool: String,
        #[serde(default)]
        params: Value,
    },

    /// Server → core: outcome of one `execute_tool`.
    ToolResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },

    /// Server → core: unsolicited notification.
    Event {
        name: String,
        #[serde(default)]
        data: Value,
    },

    /// Server → core: unsolicited log line.
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
        #[serde(default)]
        fields: Value,
    },
}

impl WireMessage {
    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Handshake { .. } => "handshake",
            WireMessage::HandshakeResponse { .. } => "handshake_response",
            WireMessage::ExecuteTool { .. } => "execute_tool",
            WireMessage::ToolResponse { .. } => "tool_response",
            WireMessage::Event { .. } => "event",
            WireMessage::Log { .. } => "log",
        }
    }

    /// Correlation id carried by request/response frames.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            WireMessage::ExecuteTool { request_id, .. }
            | WireMessage::ToolResponse { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// Build the opening handshake for the given capabilities.
    pub fn handshake(capabilities: Vec<Capability>) -> Self {
        WireMessage::Handshake {
            version: PROTOCOL_VERSION.to_string(),
            capabilities,
        }
    }
}

/// Collapse the `result | error` pair of a `tool_response` into a `Result`.
///
/// A response with neither field set resolves to `null`.
pub fn tool_outcome(result: Option<Value>, error: Option<RemoteError>) -> Result<Value, RemoteError> {
    match error {
        Some(err) => Err(err),
        None => Ok(result.unwrap_or(Value::Null)),
    }
}

/// A tool advertised in `handshake_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's params.
    #[serde(default)]
    pub input_schema: Value,
    /// Whether results may be served from the result cache. `None` defers to
    /// the core's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable: Option<bool>,
    /// Preferred cache TTL for this tool's results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: Value::Null,
            cacheable: None,
            cache_ttl_secs: None,
        }
    }
}

/// Failure reported by the remote server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Severity of a server `log` frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execute_tool_wire_shape() {
        let msg = WireMessage::ExecuteTool {
            request_id: "r-1".into(),
            tool: "lookup".into(),
            params: json!({"q": "x"}),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({"type": "execute_tool", "request_id": "r-1", "tool": "lookup", "params": {"q": "x"}})
        );
    }

    #[test]
    fn handshake_response_defaults() {
        let msg: WireMessage =
            serde_json::from_str(r#"{"type":"handshake_response","version":"1.0"}"#).unwrap();
        match msg {
            WireMessage::HandshakeResponse {
                capabilities,
                tools,
                ..
            } => {
                assert!(capabilities.is_empty());
                assert!(tools.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_response_error_wins() {
        let out = tool_outcome(
            Some(json!(1)),
            Some(RemoteError {
                message: "boom".into(),
                code: Some("failed".into()),
            }),
        );
        assert_eq!(out.unwrap_err().to_string(), "failed: boom");
        assert_eq!(tool_outcome(None, None).unwrap(), Value::Null);
    }

    #[test]
    fn request_id_accessor() {
        let msg = WireMessage::ToolResponse {
            request_id: "abc".into(),
            result: None,
            error: None,
        };
        assert_eq!(msg.request_id(), Some("abc"));
        assert_eq!(msg.kind(), "tool_response");
        assert_eq!(WireMessage::handshake(vec![]).request_id(), None);
    }

    #[test]
    fn log_level_defaults_to_info() {
        let msg: WireMessage =
            serde_json::from_str(r#"{"type":"log","message":"hi"}"#).unwrap();
        assert!(matches!(
            msg,
            WireMessage::Log {
                level: LogLevel::Info,
                ..
            }
        ));
    }
}
