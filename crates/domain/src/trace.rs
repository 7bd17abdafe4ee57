use serde::Serialize;

/// Structured trace events emitted across all persona-relay crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AgentRequest {
        endpoint: String,
        streaming: bool,
        status: u16,
        duration_ms: u64,
    },
    TurnStarted {
        conversation_id: String,
        turn_id: String,
        turn_index: u64,
        streamed: bool,
    },
    TurnFinalized {
        conversation_id: String,
        turn_id: String,
        status: String,
        duration_ms: u64,
    },
    ConversationDeleted {
        conversation_id: String,
        turns_deleted: usize,
    },
    RetentionSweep {
        conversations_deleted: usize,
        turns_deleted: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "pr_event");
    }
}
