//! Tool-provider server descriptors (`[[tool_servers]]`).

use serde::{Deserialize, Serialize};

use crate::capability::Capability;

/// A registered tool-provider server.
///
/// Descriptors are created at config load (or registered at runtime) and are
/// never mutated afterwards; runtime status lives beside them in the
/// connection manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerDescriptor {
    /// Unique identifier, also used for routing (`invoke_on(id, ..)`).
    pub id: String,
    /// Display name for status snapshots. Defaults to `id`.
    #[serde(default)]
    pub label: Option<String>,
    /// Connection address, e.g. `ws://127.0.0.1:7001/tools`.
    pub url: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Capabilities this server is expected to offer.
    #[serde(default = "d_capabilities")]
    pub capabilities: Vec<Capability>,
    /// Static allow-list. When set, only these advertised tools are exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Connect at startup.
    #[serde(default = "d_true")]
    pub auto_connect: bool,
}

impl ServerDescriptor {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            url: url.into(),
            transport: TransportKind::default(),
            capabilities: d_capabilities(),
            tools: None,
            auto_connect: true,
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Whether an advertised tool passes the static allow-list.
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|t| t == name))
    }
}

/// Transport used to reach a tool-provider server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
        }
    }
}

fn d_capabilities() -> Vec<Capability> {
    Capability::ALL.to_vec()
}

fn d_true() -> bool {
    true
}
