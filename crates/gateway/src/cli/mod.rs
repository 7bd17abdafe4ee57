pub mod config;

use clap::{Parser, Subcommand};

/// persona-relay: a relay in front of a hosted persona agent.
#[derive(Debug, Parser)]
#[command(name = "persona-relay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the relay server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `PR_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the
/// path that was used. A missing file yields the defaults.
///
/// [`Config`]: pr_domain::config::Config
pub fn load_config() -> anyhow::Result<(pr_domain::config::Config, String)> {
    let config_path = std::env::var("PR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<pr_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(pr_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["persona-relay"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["persona-relay", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 3210);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[store]\nin_memory = true\n",
        )
        .unwrap();
        let config = load_config_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert!(config.store.in_memory);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config_from(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("parsing"));
    }
}
