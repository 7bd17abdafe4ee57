//! Read-mostly access to recorded conversations for operators.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use pr_domain::conversation::{ActorType, Conversation, ConversationStatus, ConversationTurn};
use pr_domain::error::Result;
use pr_domain::trace::TraceEvent;

use crate::store::{ConversationFilter, ConversationStore, Page, Removed, TurnFilter};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_CONVERSATION_LIMIT: usize = 50;
pub const MAX_CONVERSATION_LIMIT: usize = 200;
pub const DEFAULT_TURN_LIMIT: usize = 100;
pub const MAX_TURN_LIMIT: usize = 300;

#[derive(Debug, Clone, Default)]
pub struct ListConversations {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub actor_type: Option<ActorType>,
    pub status: Option<ConversationStatus>,
    pub session_id: Option<String>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ListTurns {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

/// Negative limits fall back to the default; the rest clamp into `[1, max]`.
fn clamp_limit(raw: Option<i64>, default: usize, max: usize) -> usize {
    match raw {
        Some(n) if n >= 0 => usize::try_from(n).unwrap_or(max).clamp(1, max),
        _ => default,
    }
}

fn clamp_skip(raw: Option<i64>) -> usize {
    raw.and_then(|n| usize::try_from(n).ok()).unwrap_or(0)
}

fn normalize_q(q: Option<String>) -> Option<String> {
    q.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty())
}

pub struct ConversationQueryService {
    store: Arc<dyn ConversationStore>,
}

impl ConversationQueryService {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Newest conversations first. Without bounds, the window is the last
    /// 30 days ending now.
    pub async fn list_conversations(&self, params: ListConversations) -> Result<Page<Conversation>> {
        let end = params.end.unwrap_or_else(Utc::now);
        let start = params
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_WINDOW_DAYS));

        let filter = ConversationFilter {
            start: Some(start),
            end: Some(end),
            actor_type: params.actor_type,
            status: params.status,
            session_id: params
                .session_id
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
            q: normalize_q(params.q),
            limit: clamp_limit(params.limit, DEFAULT_CONVERSATION_LIMIT, MAX_CONVERSATION_LIMIT),
            skip: clamp_skip(params.skip),
        };
        self.store.find_conversations(&filter).await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.store.get_conversation(conversation_id).await
    }

    /// Turns in replay order.
    pub async fn list_turns(
        &self,
        conversation_id: &str,
        params: ListTurns,
    ) -> Result<Page<ConversationTurn>> {
        let filter = TurnFilter {
            conversation_id: conversation_id.to_owned(),
            q: normalize_q(params.q),
            limit: clamp_limit(params.limit, DEFAULT_TURN_LIMIT, MAX_TURN_LIMIT),
            skip: clamp_skip(params.skip),
        };
        self.store.find_turns(&filter).await
    }

    /// Delete the aggregate and all of its turns.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<Removed> {
        let removed = self.store.delete_conversation(conversation_id).await?;
        TraceEvent::ConversationDeleted {
            conversation_id: conversation_id.to_owned(),
            turns_deleted: removed.turns,
        }
        .emit();
        Ok(removed)
    }

    pub async fn count_conversations(&self) -> Result<usize> {
        self.store.count_conversations().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None, 50, 200), 50);
        assert_eq!(clamp_limit(Some(0), 50, 200), 1);
        assert_eq!(clamp_limit(Some(1_000), 50, 200), 200);
        assert_eq!(clamp_limit(Some(-5), 50, 200), 50);
        assert_eq!(clamp_limit(Some(120), 100, 300), 120);
    }

    #[test]
    fn skip_is_never_negative() {
        assert_eq!(clamp_skip(None), 0);
        assert_eq!(clamp_skip(Some(-3)), 0);
        assert_eq!(clamp_skip(Some(7)), 7);
    }

    #[test]
    fn blank_query_is_dropped() {
        assert_eq!(normalize_q(Some("   ".into())), None);
        assert_eq!(normalize_q(Some(" Rust ".into())).as_deref(), Some("rust"));
    }
}
