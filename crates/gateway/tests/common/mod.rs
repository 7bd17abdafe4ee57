#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response};
use axum::Router;
use tokio_util::sync::CancellationToken;

use chrono::{DateTime, Utc};
use pr_conversations::store::{
    ConversationFilter, ConversationUpdate, TurnFilter, TurnFinalization,
};
use pr_conversations::{ConversationStore, JsonFileStore, ListTurns, Page, Removed};
use pr_domain::agent::{AgentRequest, AgentResponse, ChatMessage};
use pr_domain::config::Config;
use pr_domain::conversation::{Conversation, ConversationTurn};
use pr_domain::error::{Error, Result};
use pr_domain::stream::AgentStreamEvent;
use pr_gateway::api;
use pr_gateway::state::AppState;
use pr_providers::{AgentBackend, AgentReply};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted upstream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub enum Step {
    Event(AgentStreamEvent),
    Malformed,
}

pub enum Script {
    Json(AgentResponse),
    Fail { status: u16, details: String },
    Events(Vec<Step>),
    /// Streams one delta, then waits until cancelled.
    Hang,
}

pub struct ScriptedBackend {
    script: Script,
    pub seen: Mutex<Vec<AgentRequest>>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn last_request(&self) -> AgentRequest {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn respond(
        &self,
        req: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        self.seen.lock().unwrap().push(req.clone());
        match &self.script {
            Script::Json(resp) => Ok(resp.clone()),
            Script::Fail { status, details } => Err(Error::Upstream {
                status: *status,
                details: details.clone(),
            }),
            Script::Events(_) => Err(Error::Other("scripted for streaming only".into())),
            Script::Hang => {
                cancel.cancelled().await;
                Err(Error::Aborted)
            }
        }
    }

    async fn stream(&self, req: &AgentRequest, cancel: CancellationToken) -> Result<AgentReply> {
        self.seen.lock().unwrap().push(req.clone());
        match &self.script {
            Script::Json(resp) => Ok(AgentReply::Json(resp.clone())),
            Script::Fail { status, details } => Err(Error::Upstream {
                status: *status,
                details: details.clone(),
            }),
            Script::Events(steps) => {
                let items: Vec<Result<AgentStreamEvent>> = steps
                    .iter()
                    .map(|step| match step {
                        Step::Event(event) => Ok(event.clone()),
                        Step::Malformed => {
                            Err(Error::StreamParse("'delta' event: expected value".into()))
                        }
                    })
                    .collect();
                Ok(AgentReply::EventStream(Box::pin(futures_util::stream::iter(
                    items,
                ))))
            }
            Script::Hang => {
                let events = async_stream::stream! {
                    yield Ok::<_, Error>(AgentStreamEvent::Delta { delta: "partial ".into() });
                    cancel.cancelled().await;
                };
                Ok(AgentReply::EventStream(Box::pin(events)))
            }
        }
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A store whose disk is gone: every call fails.
pub struct FailingStore;

fn unavailable<T>() -> Result<T> {
    Err(Error::Persistence("store unavailable".into()))
}

#[async_trait]
impl ConversationStore for FailingStore {
    async fn open_turn(
        &self,
        _turn: ConversationTurn,
        _update: ConversationUpdate,
    ) -> Result<ConversationTurn> {
        unavailable()
    }

    async fn finalize_turn(
        &self,
        _turn_id: &str,
        _finalization: TurnFinalization,
        _update: ConversationUpdate,
    ) -> Result<Option<ConversationTurn>> {
        unavailable()
    }

    async fn get_turn(&self, _turn_id: &str) -> Result<Option<ConversationTurn>> {
        unavailable()
    }

    async fn get_conversation(&self, _conversation_id: &str) -> Result<Option<Conversation>> {
        unavailable()
    }

    async fn find_conversations(&self, _filter: &ConversationFilter) -> Result<Page<Conversation>> {
        unavailable()
    }

    async fn find_turns(&self, _filter: &TurnFilter) -> Result<Page<ConversationTurn>> {
        unavailable()
    }

    async fn delete_conversation(&self, _conversation_id: &str) -> Result<Removed> {
        unavailable()
    }

    async fn prune_idle_since(&self, _cutoff: DateTime<Utc>) -> Result<Removed> {
        unavailable()
    }

    async fn count_conversations(&self) -> Result<usize> {
        unavailable()
    }
}

/// An in-memory store with slow writes.
pub struct SlowStore {
    inner: JsonFileStore,
    open_delay: Duration,
    finalize_delay: Duration,
}

impl SlowStore {
    pub fn new(open_delay: Duration, finalize_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: JsonFileStore::in_memory(),
            open_delay,
            finalize_delay,
        })
    }
}

#[async_trait]
impl ConversationStore for SlowStore {
    async fn open_turn(
        &self,
        turn: ConversationTurn,
        update: ConversationUpdate,
    ) -> Result<ConversationTurn> {
        tokio::time::sleep(self.open_delay).await;
        self.inner.open_turn(turn, update).await
    }

    async fn finalize_turn(
        &self,
        turn_id: &str,
        finalization: TurnFinalization,
        update: ConversationUpdate,
    ) -> Result<Option<ConversationTurn>> {
        tokio::time::sleep(self.finalize_delay).await;
        self.inner.finalize_turn(turn_id, finalization, update).await
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<ConversationTurn>> {
        self.inner.get_turn(turn_id).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn find_conversations(&self, filter: &ConversationFilter) -> Result<Page<Conversation>> {
        self.inner.find_conversations(filter).await
    }

    async fn find_turns(&self, filter: &TurnFilter) -> Result<Page<ConversationTurn>> {
        self.inner.find_turns(filter).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<Removed> {
        self.inner.delete_conversation(conversation_id).await
    }

    async fn prune_idle_since(&self, cutoff: DateTime<Utc>) -> Result<Removed> {
        self.inner.prune_idle_since(cutoff).await
    }

    async fn count_conversations(&self) -> Result<usize> {
        self.inner.count_conversations().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn response(text: &str) -> AgentResponse {
    AgentResponse {
        id: "abc".into(),
        message: ChatMessage::assistant(text),
        model: None,
        usage: None,
    }
}

pub fn delta(text: &str) -> Step {
    Step::Event(AgentStreamEvent::Delta { delta: text.into() })
}

pub fn final_step(text: &str) -> Step {
    Step::Event(AgentStreamEvent::Final {
        response: response(text),
    })
}

pub fn state_with(backend: Arc<ScriptedBackend>) -> AppState {
    state_with_store(backend, Arc::new(JsonFileStore::in_memory()))
}

pub fn state_with_store(
    backend: Arc<ScriptedBackend>,
    store: Arc<dyn ConversationStore>,
) -> AppState {
    AppState::new(Arc::new(Config::default()), backend, store)
}

pub fn app(state: &AppState) -> Router {
    api::router().with_state(state.clone())
}

pub fn post_agent(body: serde_json::Value) -> Request<Body> {
    Request::post("/v1/agent")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(resp).await).unwrap()
}

pub fn header_value(resp: &Response<Body>, name: &str) -> String {
    resp.headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned()
}

/// Event names of every SSE frame in `body`, in order.
pub fn frame_events(body: &str) -> Vec<String> {
    body.split_terminator("\n\n")
        .filter_map(|frame| frame.lines().next())
        .filter_map(|line| line.strip_prefix("event: "))
        .map(str::to_owned)
        .collect()
}

/// Wait until the newest turn of `conversation_id` leaves `pending`.
///
/// Streamed turns finalize after the body closes.
pub async fn settled_turn(state: &AppState, conversation_id: &str) -> ConversationTurn {
    for _ in 0..200 {
        let page = state
            .conversations
            .list_turns(conversation_id, ListTurns::default())
            .await
            .unwrap();
        if let Some(turn) = page.items.last() {
            if turn.status.is_final() {
                return turn.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("turn for {conversation_id} never finalized");
}
