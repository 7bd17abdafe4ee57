//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use pr_conversations::retention::prune_expired;
use pr_conversations::{ConversationStore, JsonFileStore};
use pr_domain::config::{Config, ConfigSeverity};
use pr_providers::{resolve_api_key, AgentClient};

use crate::state::AppState;

/// Validate config, open the conversation store, build the agent client
/// and return a fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── Conversation store ───────────────────────────────────────────
    let store: Arc<dyn ConversationStore> = if config.store.in_memory {
        tracing::info!("conversation store: in-memory");
        Arc::new(JsonFileStore::in_memory())
    } else {
        let path = config.store.state_path.clone();
        let store = tokio::task::spawn_blocking(move || JsonFileStore::open(&path))
            .await
            .context("conversation store loader panicked")?
            .context("opening conversation store")?;
        tracing::info!(path = %config.store.state_path.display(), "conversation store ready");
        Arc::new(store)
    };

    // ── Agent client ─────────────────────────────────────────────────
    let client = AgentClient::from_config(&config.agent).context("building agent client")?;
    if resolve_api_key(&config.agent.api_key_env).is_none() {
        tracing::info!(
            env_var = %config.agent.api_key_env,
            "no agent API key set, upstream requests are unauthenticated"
        );
    }
    tracing::info!(endpoint = %config.agent.endpoint(), "agent client ready");

    let mut state = AppState::new(config.clone(), Arc::new(client), store)
        .with_hash_salt(&config.analytics.resolve_hash_salt());

    // ── Admin token (read once, hash for constant-time comparison) ──
    let env_var = &config.admin.token_env;
    match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
        Some(token) => {
            tracing::info!(source = %format!("env:{env_var}"), "admin bearer-token auth enabled");
            state = state.with_admin_token(&token);
        }
        None => {
            tracing::warn!(
                "admin bearer-token auth DISABLED, set the {env_var} env var to protect conversation history"
            );
        }
    }

    Ok(state)
}

/// Spawn the long-running background tokio tasks (retention sweep).
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic retention sweep ─────────────────────────────────────
    if let Some(retention_days) = state.config.store.retention_days {
        let store = state.recorder.store().clone();
        let every = Duration::from_secs(state.config.store.retention_sweep_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match prune_expired(store.as_ref(), retention_days).await {
                    Ok(removed) if removed.conversations > 0 => tracing::info!(
                        conversations = removed.conversations,
                        turns = removed.turns,
                        "pruned expired conversations"
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                }
            }
        });
        tracing::info!(retention_days, "retention sweep scheduled");
    }
    tracing::info!("background tasks spawned");
}
