//! Turn/conversation bookkeeping.
//!
//! A turn is opened `pending` when a request arrives and finalized exactly
//! once as `completed`, `failed` or `cancelled`. Every text field is
//! redacted before it reaches the store. Store failures propagate to the
//! caller as [`Error::Persistence`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pr_domain::agent::{last_user_message, AgentRequest, AgentResponse, ChatMessage};
use pr_domain::conversation::{
    ActorContext, ConversationTurn, TurnError, TurnRequest, TurnResponse, TurnStatus,
};
use pr_domain::error::{Error, Result};
use pr_domain::trace::TraceEvent;

use crate::redact::sanitize;
use crate::store::{ConversationStore, ConversationUpdate, TurnFinalization};

/// Inputs for [`TurnRecorder::start_turn`].
#[derive(Debug, Clone)]
pub struct TurnStart<'a> {
    pub request: &'a AgentRequest,
    pub actor: ActorContext,
    pub route: &'a str,
    pub path: &'a str,
    pub streamed: bool,
}

/// Identifiers needed to finalize a turn later.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedTurn {
    pub turn_id: String,
    pub conversation_id: String,
    pub turn_index: u64,
    pub started_at: DateTime<Utc>,
    pub session_id: Option<String>,
}

pub struct TurnRecorder {
    store: Arc<dyn ConversationStore>,
    max_text_chars: usize,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl TurnRecorder {
    pub fn new(store: Arc<dyn ConversationStore>, max_text_chars: usize) -> Self {
        Self {
            store,
            max_text_chars,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    fn clean(&self, text: &str) -> String {
        sanitize(text, self.max_text_chars)
    }

    /// Open a pending turn and bump the conversation aggregate.
    ///
    /// The conversation id is taken from the request or generated.
    pub async fn start_turn(&self, start: TurnStart<'_>) -> Result<StartedTurn> {
        let request = start.request;
        let timestamp = Utc::now();
        let session_id = non_blank(request.session_id.as_deref());
        let conversation_id = non_blank(request.conversation_id.as_deref())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let messages: Vec<ChatMessage> = request
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: self.clean(&m.content),
                name: m.name.clone(),
            })
            .collect();
        let last_user = last_user_message(&messages).map(str::to_owned);
        let input_chars = messages
            .iter()
            .map(|m| m.content.chars().count() as u64)
            .sum();

        let actor_type = start.actor.actor_type;
        let turn = ConversationTurn {
            turn_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            session_id: session_id.clone(),
            turn_index: 0,
            timestamp,
            status: TurnStatus::Pending,
            streamed: start.streamed,
            route: start.route.to_owned(),
            path: start.path.to_owned(),
            location: request.location.clone(),
            actor: start.actor,
            request: TurnRequest {
                messages,
                last_user_message: last_user.clone(),
            },
            response: None,
            error: None,
            completed_at: None,
            duration_ms: None,
        };

        let stored = self
            .store
            .open_turn(
                turn,
                ConversationUpdate::TurnStarted {
                    at: timestamp,
                    actor_type,
                    session_id: session_id.clone(),
                    location: request.location.clone(),
                    last_user_message: last_user,
                    input_chars,
                },
            )
            .await?;

        TraceEvent::TurnStarted {
            conversation_id: conversation_id.clone(),
            turn_id: stored.turn_id.clone(),
            turn_index: stored.turn_index,
            streamed: stored.streamed,
        }
        .emit();

        Ok(StartedTurn {
            turn_id: stored.turn_id,
            conversation_id,
            turn_index: stored.turn_index,
            started_at: timestamp,
            session_id,
        })
    }

    /// Mark the turn completed.
    ///
    /// `assistant_message` overrides the response text (used for streamed
    /// turns, where the text is assembled from deltas). Empty text is stored
    /// as no response payload at all.
    pub async fn complete_turn(
        &self,
        turn: &StartedTurn,
        response: &AgentResponse,
        duration_ms: u64,
        assistant_message: Option<&str>,
    ) -> Result<()> {
        let text = self.clean(assistant_message.unwrap_or(&response.message.content));
        let payload = (!text.is_empty()).then(|| TurnResponse {
            message: text,
            model: response.model.clone(),
            usage: response.usage.clone(),
        });
        self.finalize(turn, TurnStatus::Completed, duration_ms, payload, None)
            .await
    }

    /// Mark the turn failed, keeping any partial assistant text.
    pub async fn fail_turn(
        &self,
        turn: &StartedTurn,
        error: &Error,
        duration_ms: u64,
        partial_assistant_message: Option<&str>,
    ) -> Result<()> {
        let message = match self.clean(&error.to_string()) {
            m if m.is_empty() => "Unknown error".to_owned(),
            m => m,
        };
        let normalized = TurnError {
            name: Some(error.kind().to_owned()),
            message,
            stack: None,
        };
        let partial = self.partial(partial_assistant_message);
        self.finalize(turn, TurnStatus::Failed, duration_ms, partial, Some(normalized))
            .await
    }

    /// Mark the turn cancelled because the caller went away.
    pub async fn cancel_turn(
        &self,
        turn: &StartedTurn,
        duration_ms: u64,
        partial_assistant_message: Option<&str>,
    ) -> Result<()> {
        let partial = self.partial(partial_assistant_message);
        self.finalize(turn, TurnStatus::Cancelled, duration_ms, partial, None)
            .await
    }

    fn partial(&self, text: Option<&str>) -> Option<TurnResponse> {
        text.map(|t| self.clean(t))
            .filter(|t| !t.is_empty())
            .map(|message| TurnResponse {
                message,
                model: None,
                usage: None,
            })
    }

    async fn finalize(
        &self,
        turn: &StartedTurn,
        status: TurnStatus,
        duration_ms: u64,
        response: Option<TurnResponse>,
        error: Option<TurnError>,
    ) -> Result<()> {
        let completed_at = Utc::now();
        let assistant_message = response.as_ref().map(|r| r.message.clone());
        let error_message = error.as_ref().map(|e| e.message.clone());

        let updated = self
            .store
            .finalize_turn(
                &turn.turn_id,
                TurnFinalization {
                    status,
                    completed_at,
                    duration_ms,
                    response,
                    error,
                },
                ConversationUpdate::TurnFinished {
                    at: completed_at,
                    status,
                    duration_ms,
                    assistant_message,
                    error: error_message,
                },
            )
            .await?;

        if updated.is_none() {
            tracing::warn!(
                turn_id = %turn.turn_id,
                status = %status,
                "turn missing or already finalized"
            );
            return Ok(());
        }

        TraceEvent::TurnFinalized {
            conversation_id: turn.conversation_id.clone(),
            turn_id: turn.turn_id.clone(),
            status: status.to_string(),
            duration_ms,
        }
        .emit();

        Ok(())
    }
}
