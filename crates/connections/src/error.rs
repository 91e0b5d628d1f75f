use std::time::Duration;

/// Per-request failure surfaced to callers of a remote tool.
///
/// Connection problems never escape the manager on their own; they only
/// reach callers through the request that was in flight (or attempted) at
/// the time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("connection to {server_id} lost: {reason}")]
    ConnectionLost { server_id: String, reason: String },

    #[error("tool {tool} timed out after {}ms", after.as_millis())]
    ToolTimeout { tool: String, after: Duration },

    #[error("tool {tool} failed: {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("too many requests in flight: {0}")]
    Backpressure(String),

    #[error("codec: {0}")]
    Codec(String),
}

impl ToolError {
    /// Stable snake_case tag for logs and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::ConnectionLost { .. } => "connection_lost",
            ToolError::ToolTimeout { .. } => "tool_timeout",
            ToolError::ToolExecutionError { .. } => "tool_execution_error",
            ToolError::UnknownServer(_) => "unknown_server",
            ToolError::UnknownTool(_) => "unknown_tool",
            ToolError::Backpressure(_) => "backpressure",
            ToolError::Codec(_) => "codec",
        }
    }

    pub(crate) fn connection_lost(server_id: &str, reason: impl Into<String>) -> Self {
        ToolError::ConnectionLost {
            server_id: server_id.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<tb_protocol::CodecError> for ToolError {
    fn from(e: tb_protocol::CodecError) -> Self {
        ToolError::Codec(e.to_string())
    }
}

impl From<ToolError> for tb_domain::Error {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::ConnectionLost { .. } => tb_domain::Error::Connection(e.to_string()),
            ToolError::ToolTimeout { .. } => tb_domain::Error::Timeout(e.to_string()),
            ToolError::Codec(_) => tb_domain::Error::Protocol(e.to_string()),
            _ => tb_domain::Error::Tool(e.to_string()),
        }
    }
}
