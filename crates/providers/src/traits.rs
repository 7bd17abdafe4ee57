use pr_domain::agent::{AgentRequest, AgentResponse};
use pr_domain::error::{Error, Result};
use pr_domain::stream::{AgentStreamEvent, BoxStream};
use tokio_util::sync::CancellationToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the upstream answered with, decided once from `Content-Type`.
pub enum AgentReply {
    /// A single JSON response body, even though a stream was asked for.
    Json(AgentResponse),
    /// An event stream. Malformed events surface as `Err(StreamParse)` and
    /// the stream keeps going; it ends after `[DONE]`, a `done` event, or
    /// when the body closes.
    EventStream(BoxStream<'static, Result<AgentStreamEvent>>),
}

impl std::fmt::Debug for AgentReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentReply::Json(resp) => f.debug_tuple("Json").field(resp).finish(),
            AgentReply::EventStream(_) => f.write_str("EventStream(..)"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The hosted agent service, as seen by the relay.
///
/// [`crate::AgentClient`] is the HTTP implementation; tests plug in
/// scripted backends.
#[async_trait::async_trait]
pub trait AgentBackend: Send + Sync {
    /// Single request expecting one JSON body.
    ///
    /// Returns [`Error::Aborted`] when `cancel` fires first.
    async fn respond(&self, req: &AgentRequest, cancel: &CancellationToken)
        -> Result<AgentResponse>;

    /// Request an event stream. The returned stream stops quietly once
    /// `cancel` fires.
    async fn stream(&self, req: &AgentRequest, cancel: CancellationToken) -> Result<AgentReply>;

    /// Identifier used in logs.
    fn endpoint(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Push-style hooks for [`crate::call_agent`].
///
/// `on_event` sees every parsed event before the specific hook runs.
/// All hooks default to no-ops.
pub trait AgentObserver: Send {
    fn on_event(&mut self, _event: &AgentStreamEvent) {}
    fn on_delta(&mut self, _delta: &str) {}
    fn on_final(&mut self, _response: &AgentResponse) {}
    fn on_error(&mut self, _error: &Error) {}
}
