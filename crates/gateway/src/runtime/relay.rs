//! The relay loop: record the turn, forward it upstream, hand the answer
//! back to the caller, then finalize the turn.
//!
//! History writes never stand between the caller and the answer. A failed
//! `start_turn` only means the turn goes unrecorded; failed finalization
//! is logged.
//!
//! Each turn runs in its own task. A caller that disconnects cancels the
//! upstream call through a drop guard, and the task still records the
//! outcome.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use axum::body::Bytes;
use pr_conversations::redact::redact_value;
use pr_conversations::{StartedTurn, TurnRecorder, TurnStart};
use pr_domain::agent::{AgentRequest, AgentResponse, ChatMessage};
use pr_domain::conversation::ActorContext;
use pr_domain::error::{Error, Result};
use pr_domain::stream::{AgentStreamEvent, BoxStream};
use pr_providers::{AgentBackend, AgentReply};

use super::sse::encode_agent_stream;
use crate::state::AppState;

/// Route template recorded on every relayed turn.
pub const AGENT_ROUTE: &str = "/v1/agent";

/// Events buffered between the upstream reader and the response body.
const RELAY_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs / outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One validated inbound turn.
#[derive(Debug, Clone)]
pub struct RelayInput {
    pub request: AgentRequest,
    pub actor: ActorContext,
    pub path: String,
}

/// What the relay produced, plus the recorded turn if history is up.
pub struct Relayed<T> {
    pub turn: Option<StartedTurn>,
    pub body: T,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A started turn that gets finalized exactly once.
///
/// Dropping it unfinished (the caller disconnected and the handler future
/// was dropped) records the turn as cancelled.
struct PendingTurn {
    recorder: Arc<TurnRecorder>,
    turn: Option<StartedTurn>,
    started: Instant,
    partial: String,
}

impl PendingTurn {
    async fn begin(state: &AppState, input: &RelayInput, streamed: bool) -> Self {
        let started = Instant::now();
        let start = TurnStart {
            request: &input.request,
            actor: input.actor.clone(),
            route: AGENT_ROUTE,
            path: &input.path,
            streamed,
        };
        let turn = match state.recorder.start_turn(start).await {
            Ok(turn) => Some(turn),
            Err(e) => {
                tracing::warn!(error = %e, "failed to record turn start, relaying without history");
                None
            }
        };

        Self {
            recorder: state.recorder.clone(),
            turn,
            started,
            partial: String::new(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn partial(&self) -> Option<&str> {
        (!self.partial.is_empty()).then_some(self.partial.as_str())
    }

    async fn complete(mut self, response: &AgentResponse, assistant_message: Option<&str>) {
        let Some(turn) = self.turn.take() else { return };
        let res = self
            .recorder
            .complete_turn(&turn, response, self.elapsed_ms(), assistant_message)
            .await;
        if let Err(e) = res {
            tracing::warn!(turn_id = %turn.turn_id, error = %e, "failed to record turn completion");
        }
    }

    async fn fail(mut self, error: &Error) {
        let Some(turn) = self.turn.take() else { return };
        let res = self
            .recorder
            .fail_turn(&turn, error, self.elapsed_ms(), self.partial())
            .await;
        if let Err(e) = res {
            tracing::warn!(turn_id = %turn.turn_id, error = %e, "failed to record turn failure");
        }
    }

    async fn cancel(mut self) {
        let Some(turn) = self.turn.take() else { return };
        let res = self
            .recorder
            .cancel_turn(&turn, self.elapsed_ms(), self.partial())
            .await;
        if let Err(e) = res {
            tracing::warn!(turn_id = %turn.turn_id, error = %e, "failed to record turn cancellation");
        }
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        let Some(turn) = self.turn.take() else { return };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(turn_id = %turn.turn_id, "turn dropped outside the runtime, left pending");
            return;
        };

        let recorder = self.recorder.clone();
        let duration_ms = self.elapsed_ms();
        let partial = std::mem::take(&mut self.partial);
        handle.spawn(async move {
            let partial = (!partial.is_empty()).then_some(partial.as_str());
            match recorder.cancel_turn(&turn, duration_ms, partial).await {
                Ok(()) => tracing::info!(turn_id = %turn.turn_id, "caller went away, turn cancelled"),
                Err(e) => {
                    tracing::warn!(turn_id = %turn.turn_id, error = %e, "failed to record turn cancellation")
                }
            }
        });
    }
}

fn turn_span(turn: Option<&StartedTurn>, streamed: bool) -> tracing::Span {
    match turn {
        Some(t) => tracing::info_span!(
            "turn",
            conversation_id = %t.conversation_id,
            turn_id = %t.turn_id,
            turn_index = t.turn_index,
            streamed,
        ),
        None => tracing::info_span!("turn", streamed),
    }
}

/// The request forwarded upstream carries the recorded conversation id,
/// which may have been generated for this turn.
fn upstream_request(request: &AgentRequest, turn: Option<&StartedTurn>, stream: bool) -> AgentRequest {
    let mut upstream = request.clone();
    upstream.stream = Some(stream);
    if let Some(turn) = turn {
        upstream.conversation_id = Some(turn.conversation_id.clone());
    }
    upstream
}

fn log_relay(input: &RelayInput, streamed: bool) {
    tracing::info!(
        location = input.request.location.as_deref().unwrap_or("unknown"),
        messages = input.request.messages.len(),
        streamed,
        "relaying agent turn"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single JSON response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Relay one turn and wait for the complete answer.
pub async fn relay_json(state: &AppState, input: RelayInput) -> Relayed<Result<AgentResponse>> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match tokio::spawn(json_turn(state.clone(), input, cancel)).await {
        Ok((turn, body)) => Relayed { turn, body },
        Err(e) => {
            tracing::error!(error = %e, "relay task failed");
            Relayed {
                turn: None,
                body: Err(Error::Other(format!("relay task: {e}"))),
            }
        }
    }
}

async fn json_turn(
    state: AppState,
    input: RelayInput,
    cancel: CancellationToken,
) -> (Option<StartedTurn>, Result<AgentResponse>) {
    let pending = PendingTurn::begin(&state, &input, false).await;
    let turn = pending.turn.clone();
    let span = turn_span(turn.as_ref(), false);

    let body = async {
        log_relay(&input, false);
        let upstream = upstream_request(&input.request, turn.as_ref(), false);

        let result = state.backend.respond(&upstream, &cancel).await;
        match &result {
            Ok(response) => pending.complete(response, None).await,
            Err(Error::Aborted) => pending.cancel().await,
            Err(e) => {
                tracing::warn!(error = %e, "agent turn failed");
                pending.fail(e).await;
            }
        }
        result
    }
    .instrument(span)
    .await;

    (turn, body)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Outcome {
    /// `assistant_message` overrides the response text when set.
    Completed {
        response: AgentResponse,
        assistant_message: Option<String>,
    },
    Failed(Error),
    Cancelled,
}

/// Relay one turn as an SSE byte stream.
///
/// Upstream reading runs in its own task. Dropping the returned body, or
/// the caller going away before it exists, cancels it, and the turn is
/// then recorded as cancelled.
pub async fn relay_stream(
    state: AppState,
    input: RelayInput,
) -> Relayed<impl Stream<Item = std::result::Result<Bytes, std::convert::Infallible>> + Send + 'static>
{
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel::<std::result::Result<AgentStreamEvent, String>>(RELAY_BUFFER);
    let (started_tx, started_rx) = oneshot::channel();

    tokio::spawn(drive_stream(state, input, started_tx, tx, cancel));

    let turn = started_rx.await.unwrap_or_else(|_| {
        tracing::error!("relay task ended before the turn started");
        None
    });

    let events = async_stream::stream! {
        let _guard = guard;
        while let Some(item) = rx.recv().await {
            yield item;
        }
    };

    Relayed {
        turn,
        body: encode_agent_stream(events),
    }
}

async fn drive_stream(
    state: AppState,
    input: RelayInput,
    started: oneshot::Sender<Option<StartedTurn>>,
    tx: mpsc::Sender<std::result::Result<AgentStreamEvent, String>>,
    cancel: CancellationToken,
) {
    let pending = PendingTurn::begin(&state, &input, true).await;
    let turn = pending.turn.clone();
    let _ = started.send(turn.clone());

    log_relay(&input, true);
    let upstream = upstream_request(&input.request, turn.as_ref(), true);
    forward_stream(
        state.backend.clone(),
        upstream,
        pending,
        tx,
        cancel,
        state.config.analytics.max_text_chars,
    )
    .instrument(turn_span(turn.as_ref(), true))
    .await;
}

async fn forward_stream(
    backend: Arc<dyn AgentBackend>,
    upstream: AgentRequest,
    mut pending: PendingTurn,
    tx: mpsc::Sender<std::result::Result<AgentStreamEvent, String>>,
    cancel: CancellationToken,
    max_text_chars: usize,
) {
    let reply = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Aborted),
        reply = backend.stream(&upstream, cancel.clone()) => reply,
    };

    let outcome = match reply {
        Ok(AgentReply::Json(response)) => {
            let event = AgentStreamEvent::Final {
                response: response.clone(),
            };
            if tx.send(Ok(event)).await.is_err() {
                Outcome::Cancelled
            } else {
                Outcome::Completed {
                    response,
                    assistant_message: None,
                }
            }
        }
        Ok(AgentReply::EventStream(events)) => {
            pump(events, &tx, &cancel, &mut pending, max_text_chars).await
        }
        Err(Error::Aborted) => Outcome::Cancelled,
        Err(e) => {
            let _ = tx.send(Err(e.to_string())).await;
            Outcome::Failed(e)
        }
    };

    // Close the body first; the caller gets `done` without waiting on history.
    drop(tx);

    match outcome {
        Outcome::Completed {
            response,
            assistant_message,
        } => pending.complete(&response, assistant_message.as_deref()).await,
        Outcome::Failed(e) => {
            tracing::warn!(error = %e, "agent stream failed");
            pending.fail(&e).await;
        }
        Outcome::Cancelled => pending.cancel().await,
    }
}

/// Forward upstream events until a terminal event, a fatal error, the end
/// of the body, or cancellation.
async fn pump(
    mut events: BoxStream<'static, Result<AgentStreamEvent>>,
    tx: &mpsc::Sender<std::result::Result<AgentStreamEvent, String>>,
    cancel: &CancellationToken,
    pending: &mut PendingTurn,
    max_text_chars: usize,
) -> Outcome {
    let mut final_response = None;

    while let Some(item) = events.next().await {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let event = match item {
            Ok(event) => event,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "skipping malformed agent event");
                continue;
            }
            Err(e) => {
                let _ = tx.send(Err(e.to_string())).await;
                return Outcome::Failed(e);
            }
        };

        let mut upstream_error = None;
        match &event {
            AgentStreamEvent::Delta { delta } => pending.partial.push_str(delta),
            AgentStreamEvent::ToolCall { name, input } => {
                tracing::debug!(tool = %name, input = %redact_value(input, max_text_chars), "agent tool call");
            }
            AgentStreamEvent::ToolResult { name, output } => {
                tracing::debug!(tool = %name, output = %redact_value(output, max_text_chars), "agent tool result");
            }
            AgentStreamEvent::Final { response } => final_response = Some(response.clone()),
            AgentStreamEvent::Error { error } => upstream_error = Some(error.clone()),
        }

        let terminal = event.is_terminal();
        // The encoder turns an upstream `error` event into the error frame.
        if tx.send(Ok(event)).await.is_err() {
            return Outcome::Cancelled;
        }
        if let Some(message) = upstream_error {
            return Outcome::Failed(Error::Other(message));
        }
        if terminal {
            break;
        }
    }

    if cancel.is_cancelled() {
        return Outcome::Cancelled;
    }

    let streamed_text = pending.partial().map(str::to_owned);
    match final_response {
        Some(response) => {
            let assistant_message = if response.message.content.trim().is_empty() {
                streamed_text
            } else {
                None
            };
            Outcome::Completed {
                response,
                assistant_message,
            }
        }
        None => {
            tracing::debug!("agent stream ended without a final event");
            Outcome::Completed {
                response: AgentResponse {
                    id: Uuid::new_v4().to_string(),
                    message: ChatMessage::assistant(streamed_text.unwrap_or_default()),
                    model: None,
                    usage: None,
                },
                assistant_message: None,
            }
        }
    }
}
