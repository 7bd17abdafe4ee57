//! Persisted conversation documents.
//!
//! Two logical collections: `chat_conversations` holds one [`Conversation`]
//! aggregate per conversation id, `chat_conversation_turns` holds one
//! [`ConversationTurn`] per turn id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentUsage, ChatMessage};

pub const CONVERSATIONS_COLLECTION: &str = "chat_conversations";
pub const TURNS_COLLECTION: &str = "chat_conversation_turns";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    #[default]
    Public,
    Admin,
    System,
}

impl ActorType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "public" => Some(ActorType::Public),
            "admin" => Some(ActorType::Admin),
            "system" => Some(ActorType::System),
            _ => None,
        }
    }
}

/// Privacy-preserving description of who made a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub has_session: bool,
    /// One-way hash of the client IP; the raw address is never kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `Pending` moves exactly once to one of the other three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TurnStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, TurnStatus::Pending)
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
            TurnStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Redacted copies of the inbound messages.
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    /// Redacted assistant text.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<AgentUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub turn_id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 0-based, strictly increasing within a conversation.
    pub turn_index: u64,
    pub timestamp: DateTime<Utc>,
    pub status: TurnStatus,
    pub streamed: bool,
    pub route: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub actor: ActorContext,
    pub request: TurnRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TurnResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TurnError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation aggregate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Errored,
}

impl ConversationStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(ConversationStatus::Active),
            "errored" => Some(ConversationStatus::Errored),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationActor {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub actor: ConversationActor,
    pub started_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub turn_count: u64,
    pub successful_turns: u64,
    pub failed_turns: u64,
    #[serde(default)]
    pub cancelled_turns: u64,
    #[serde(default)]
    pub total_input_chars: u64,
    #[serde(default)]
    pub total_output_chars: u64,
    #[serde(default)]
    pub total_duration_ms: u64,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_user_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assistant_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Conversation {
    /// A fresh aggregate with zeroed counters.
    pub fn new(conversation_id: String, actor_type: ActorType, at: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            session_id: None,
            location: None,
            actor: ConversationActor { actor_type },
            started_at: at,
            last_message_at: at,
            turn_count: 0,
            successful_turns: 0,
            failed_turns: 0,
            cancelled_turns: 0,
            total_input_chars: 0,
            total_output_chars: 0,
            total_duration_ms: 0,
            status: ConversationStatus::Active,
            last_user_message: None,
            last_assistant_message: None,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_serializes_type_field() {
        let actor = ActorContext {
            actor_type: ActorType::Public,
            has_session: false,
            ip_hash: Some("abc".into()),
            user_agent: None,
        };
        let json = serde_json::to_value(&actor).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "public", "hasSession": false, "ipHash": "abc"})
        );
    }

    #[test]
    fn status_parsing() {
        assert_eq!(ActorType::parse("admin"), Some(ActorType::Admin));
        assert_eq!(ActorType::parse("robot"), None);
        assert_eq!(
            ConversationStatus::parse(" errored "),
            Some(ConversationStatus::Errored)
        );
        assert!(!TurnStatus::Pending.is_final());
        assert!(TurnStatus::Cancelled.is_final());
        assert_eq!(TurnStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn turn_document_is_camel_case() {
        let turn = ConversationTurn {
            turn_id: "t-1".into(),
            conversation_id: "c-1".into(),
            session_id: None,
            turn_index: 0,
            timestamp: Utc::now(),
            status: TurnStatus::Pending,
            streamed: true,
            route: "/v1/agent".into(),
            path: "/v1/agent".into(),
            location: None,
            actor: ActorContext::default(),
            request: TurnRequest::default(),
            response: None,
            error: None,
            completed_at: None,
            duration_ms: None,
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["turnId"], "t-1");
        assert_eq!(json["conversationId"], "c-1");
        assert_eq!(json["turnIndex"], 0);
        assert_eq!(json["status"], "pending");
        assert!(json.get("response").is_none());
    }
}
