use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::agent::AgentResponse;

/// A boxed async stream, used for upstream streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while an agent turn streams.
///
/// The sequence is finite: it ends after `Final` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// A text chunk of the assistant answer.
    Delta { delta: String },

    /// The agent is invoking a tool.
    ToolCall {
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    /// A tool returned.
    ToolResult {
        name: String,
        #[serde(default)]
        output: serde_json::Value,
    },

    /// The complete answer.
    Final { response: AgentResponse },

    /// The agent failed.
    Error { error: String },
}

impl AgentStreamEvent {
    /// The SSE `event:` name for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentStreamEvent::Delta { .. } => "delta",
            AgentStreamEvent::ToolCall { .. } => "tool_call",
            AgentStreamEvent::ToolResult { .. } => "tool_result",
            AgentStreamEvent::Final { .. } => "final",
            AgentStreamEvent::Error { .. } => "error",
        }
    }

    /// `Final` and `Error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStreamEvent::Final { .. } | AgentStreamEvent::Error { .. }
        )
    }
}
