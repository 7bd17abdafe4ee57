//! Shared helpers for the upstream client.

use pr_domain::error::Error;

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key from `env_var`. Unset or blank means no key.
pub fn resolve_api_key(env_var: &str) -> Option<String> {
    if env_var.trim().is_empty() {
        return None;
    }
    match std::env::var(env_var) {
        Ok(val) if !val.trim().is_empty() => Some(val.trim().to_owned()),
        _ => {
            tracing::debug!(env_var = %env_var, "agent api key env var not set");
            None
        }
    }
}

/// Render an error body for [`Error::Upstream`]: compact JSON when the body
/// parses, the raw text otherwise.
pub(crate) fn error_details(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => json.to_string(),
        Err(_) => body.trim().to_owned(),
    }
}
