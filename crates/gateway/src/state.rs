use std::sync::Arc;

use sha2::{Digest, Sha256};

use pr_conversations::{ConversationQueryService, ConversationStore, TurnRecorder};
use pr_domain::config::{Config, DEFAULT_HASH_SALT};
use pr_providers::AgentBackend;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    /// The hosted agent the relay forwards turns to.
    pub backend: Arc<dyn AgentBackend>,

    // ── Conversation history ──────────────────────────────────────────
    pub recorder: Arc<TurnRecorder>,
    pub conversations: Arc<ConversationQueryService>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// Salt mixed into client IP hashes.
    pub hash_salt: Arc<str>,
    /// SHA-256 hash of the admin bearer token (read once at startup).
    /// `None` = dev mode (admin endpoints accessible without auth).
    pub admin_token_hash: Option<Vec<u8>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn AgentBackend>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        let recorder = TurnRecorder::new(store.clone(), config.analytics.max_text_chars);
        Self {
            config,
            backend,
            recorder: Arc::new(recorder),
            conversations: Arc::new(ConversationQueryService::new(store)),
            hash_salt: Arc::from(DEFAULT_HASH_SALT),
            admin_token_hash: None,
        }
    }

    pub fn with_hash_salt(mut self, salt: &str) -> Self {
        self.hash_salt = Arc::from(salt);
        self
    }

    pub fn with_admin_token(mut self, token: &str) -> Self {
        self.admin_token_hash = Some(Sha256::digest(token.as_bytes()).to_vec());
        self
    }
}
