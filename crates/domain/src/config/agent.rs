use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream agent endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the hosted agent service, without trailing slash.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Path appended to `base_url` for agent turns.
    #[serde(default = "d_path")]
    pub path: String,
    /// Environment variable holding the upstream API key. When the variable
    /// is unset no key header is sent.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Header that carries the API key.
    #[serde(default = "d_api_key_header")]
    pub api_key_header: String,
    /// Model identifier forwarded upstream. `None` lets the service choose.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Persona prompt prepended as a `system` message, followed by the
    /// visitor's current pathname.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            path: d_path(),
            api_key_env: d_api_key_env(),
            api_key_header: d_api_key_header(),
            model: None,
            timeout_secs: d_timeout(),
            connect_timeout_secs: d_connect_timeout(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    /// Full URL of the agent endpoint.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim().trim_end_matches('/');
        let path = self.path.trim();
        if path.is_empty() {
            return base.to_owned();
        }
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

fn d_base_url() -> String {
    "http://127.0.0.1:8000/v1".into()
}
fn d_path() -> String {
    "/agent".into()
}
fn d_api_key_env() -> String {
    "PR_AGENT_API_KEY".into()
}
fn d_api_key_header() -> String {
    "X-Api-Key".into()
}
fn d_timeout() -> u64 {
    120
}
fn d_connect_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_and_path() {
        let cfg = AgentConfig {
            base_url: "https://api.example.com/v1/".into(),
            path: "agent".into(),
            ..Default::default()
        };
        assert_eq!(cfg.endpoint(), "https://api.example.com/v1/agent");
        assert_eq!(AgentConfig::default().endpoint(), "http://127.0.0.1:8000/v1/agent");
    }

    #[test]
    fn parses_system_prompt() {
        let toml_str = r#"
            base_url = "https://agents.internal"
            model = "openai/gpt-oss-120b"
            system_prompt = "You speak in first person."
        "#;
        let cfg: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.model.as_deref(), Some("openai/gpt-oss-120b"));
        assert_eq!(cfg.timeout_secs, 120);
        assert_eq!(cfg.api_key_env, "PR_AGENT_API_KEY");
        assert!(cfg.system_prompt.is_some());
    }
}
