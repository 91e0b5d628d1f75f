//! Frame encoding and decoding.
//!
//! Size limits are checked before parsing so an oversized frame never gets
//! buffered into a `serde_json::Value`.

use crate::{WireMessage, DEFAULT_MAX_FRAME_BYTES};

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {bytes} bytes exceeds limit of {max} bytes")]
    Oversized { bytes: usize, max: usize },

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid {kind} frame: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

impl From<CodecError> for tb_domain::Error {
    fn from(e: CodecError) -> Self {
        tb_domain::Error::Protocol(e.to_string())
    }
}

/// JSON text codec with a frame size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_frame_bytes: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Codec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn encode(&self, msg: &WireMessage) -> Result<String, CodecError> {
        validate(msg)?;
        let text = serde_json::to_string(msg)?;
        self.check_size(text.len())?;
        Ok(text)
    }

    pub fn decode(&self, frame: &str) -> Result<WireMessage, CodecError> {
        self.check_size(frame.len())?;
        let msg: WireMessage = serde_json::from_str(frame)?;
        validate(&msg)?;
        Ok(msg)
    }

    fn check_size(&self, bytes: usize) -> Result<(), CodecError> {
        if self.max_frame_bytes > 0 && bytes > self.max_frame_bytes {
            return Err(CodecError::Oversized {
                bytes,
                max: self.max_frame_bytes,
            });
        }
        Ok(())
    }
}

fn validate(msg: &WireMessage) -> Result<(), CodecError> {
    let invalid = |reason: &str| CodecError::Invalid {
        kind: msg.kind(),
        reason: reason.to_string(),
    };

    match msg {
        WireMessage::Handshake { version, .. } | WireMessage::HandshakeResponse { version, .. } => {
            if version.is_empty() {
                return Err(invalid("version must not be empty"));
            }
        }
        WireMessage::ExecuteTool {
            request_id, tool, ..
        } => {
            if request_id.is_empty() {
                return Err(invalid("request_id must not be empty"));
            }
            if tool.is_empty() {
                return Err(invalid("tool must not be empty"));
            }
        }
        // A response carrying both fields is accepted; `tool_outcome` lets the error win.
        WireMessage::ToolResponse { request_id, .. } => {
            if request_id.is_empty() {
                return Err(invalid("request_id must not be empty"));
            }
        }
        WireMessage::Event { name, .. } => {
            if name.is_empty() {
                return Err(invalid("name must not be empty"));
            }
        }
        WireMessage::Log { .. } => {}
    }
    Ok(())
}
