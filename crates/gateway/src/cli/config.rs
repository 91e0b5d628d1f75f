use tb_domain::config::{Config, ConfigSeverity};

/// Print every validation issue. Returns `false` when any is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    for issue in &issues {
        println!("{issue}");
    }
    println!(
        "\n{error_count} error(s), {} warning(s) in {config_path}",
        issues.len() - error_count,
    );

    error_count == 0
}

/// Render the resolved config (with all defaults filled in) as TOML.
pub fn render(config: &Config) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serializing config: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_domain::config::ServerDescriptor;

    #[test]
    fn rendered_config_parses_back() {
        let mut config = Config::default();
        config.tool_servers = vec![ServerDescriptor::new("search", "ws://search:7001")];

        let rendered = render(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.tool_servers, config.tool_servers);
        assert_eq!(parsed.state.streaming_ttl_secs, 300);
    }

    #[test]
    fn validate_reports_errors() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(!validate(&config, "test.toml"));
    }
}
