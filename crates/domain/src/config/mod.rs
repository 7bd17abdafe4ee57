mod agent;
mod analytics;
mod observability;
mod server;
mod store;

pub use agent::*;
pub use analytics::*;
pub use observability::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin bearer token.
    /// If the env var is unset, admin endpoints are open (dev mode).
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

fn d_admin_token_env() -> String {
    "PR_ADMIN_TOKEN".into()
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

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if let Some(ref rl) = self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                error(
                    "server.rate_limit",
                    "requests_per_second and burst_size must be greater than 0",
                );
            }
        }
        if self.server.max_concurrent_requests == 0 {
            error("server.max_concurrent_requests", "must be greater than 0");
        }

        let base_url = self.agent.base_url.trim();
        if base_url.is_empty() {
            error("agent.base_url", "base_url must not be empty");
        } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            error("agent.base_url", "base_url must start with http:// or https://");
        }

        if self.analytics.max_text_chars == 0 {
            error("analytics.max_text_chars", "must be greater than 0");
        }
        if self.store.retention_days == Some(0) {
            error("store.retention_days", "must be greater than 0 when set");
        }
        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            error("observability.sample_rate", "must be between 0.0 and 1.0");
        }

        if self.store.in_memory {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "store.in_memory".into(),
                message: "conversation history will be lost on restart".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
