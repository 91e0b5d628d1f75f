use serde::{Deserialize, Serialize};

/// A protocol capability a tool-provider server can offer and the core can
/// consume.  Announced in the `handshake` and echoed back in the
/// `handshake_response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Remote tool execution (`execute_tool` / `tool_response`).
    Tools,
    /// Unsolicited `event` messages.
    Events,
    /// Unsolicited `log` messages.
    Logs,
}

impl Capability {
    /// Every capability the core understands.
    pub const ALL: [Capability; 3] = [Capability::Tools, Capability::Events, Capability::Logs];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Tools => "tools",
            Capability::Events => "events",
            Capability::Logs => "logs",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&Capability::ALL).unwrap();
        assert_eq!(json, r#"["tools","events","logs"]"#);
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(Capability::Events.to_string(), "events");
    }
}
