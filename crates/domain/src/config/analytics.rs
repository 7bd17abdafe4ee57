use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor hashing & redaction limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Environment variable holding the salt mixed into IP hashes.
    #[serde(default = "d_hash_salt_env")]
    pub hash_salt_env: String,
    /// Stored strings longer than this are truncated.
    #[serde(default = "d_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "d_user_agent_max_chars")]
    pub user_agent_max_chars: usize,
    /// Cookie names whose presence marks a request as carrying a session.
    #[serde(default = "d_session_cookie_names")]
    pub session_cookie_names: Vec<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            hash_salt_env: d_hash_salt_env(),
            max_text_chars: d_max_text_chars(),
            user_agent_max_chars: d_user_agent_max_chars(),
            session_cookie_names: d_session_cookie_names(),
        }
    }
}

/// Salt used when the configured env var is unset.
pub const DEFAULT_HASH_SALT: &str = "analytics";

impl AnalyticsConfig {
    /// Read the salt from the environment, falling back to
    /// [`DEFAULT_HASH_SALT`].
    pub fn resolve_hash_salt(&self) -> String {
        std::env::var(&self.hash_salt_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HASH_SALT.into())
    }
}

fn d_hash_salt_env() -> String {
    "PR_ANALYTICS_HASH_SALT".into()
}
fn d_max_text_chars() -> usize {
    4000
}
fn d_user_agent_max_chars() -> usize {
    512
}
fn d_session_cookie_names() -> Vec<String> {
    vec!["session_token".into(), "__Secure-session_token".into()]
}
