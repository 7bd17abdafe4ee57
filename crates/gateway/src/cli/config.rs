use pr_domain::config::{Config, ConfigSeverity};

/// Validate the config, printing any issues.
///
/// Returns `false` when errors are found.
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
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&Config::default(), "config.toml"));
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(!validate(&config, "config.toml"));
    }

    #[test]
    fn warnings_alone_still_pass() {
        let mut config = Config::default();
        config.store.in_memory = true;
        assert!(validate(&config, "config.toml"));
    }
}
