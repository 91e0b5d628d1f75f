use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool result cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when neither the call nor the tool overrides it.
    #[serde(default = "d_default_ttl")]
    pub default_ttl_secs: u64,
    /// Whether tools that declare nothing are cached.
    #[serde(default = "d_true")]
    pub default_cacheable: bool,
    /// How often expired entries are swept from the fast tier.
    #[serde(default = "d_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Per-tool overrides keyed by tool name.
    #[serde(default)]
    pub tools: HashMap<String, ToolCachePolicy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: d_default_ttl(),
            default_cacheable: true,
            sweep_interval_secs: d_sweep_interval(),
            tools: HashMap::new(),
        }
    }
}

/// Operator override for one tool; wins over what the server declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCachePolicy {
    #[serde(default)]
    pub cacheable: Option<bool>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn d_default_ttl() -> u64 {
    24 * 60 * 60
}
fn d_sweep_interval() -> u64 {
    300
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_a_day() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.default_ttl_secs, 86_400);
        assert!(cfg.default_cacheable);
        assert!(cfg.tools.is_empty());
    }

    #[test]
    fn per_tool_override() {
        let cfg: CacheConfig = toml::from_str(
            r#"
            default_cacheable = false

            [tools.send_email]
            cacheable = false

            [tools.lookup]
            ttl_secs = 60
            "#,
        )
        .unwrap();
        assert!(!cfg.default_cacheable);
        assert_eq!(cfg.tools["send_email"].cacheable, Some(false));
        assert_eq!(cfg.tools["lookup"].ttl_secs, Some(60));
        assert_eq!(cfg.tools["lookup"].cacheable, None);
    }
}
