//! HTTP client for the hosted agent service.
//!
//! One POST per turn. Non-streaming calls expect a JSON [`AgentResponse`].
//! Streaming calls ask for `text/event-stream` but accept a plain JSON body
//! too; the reply shape is picked once from `Content-Type`.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use pr_domain::agent::{AgentRequest, AgentResponse, ChatMessage};
use pr_domain::config::AgentConfig;
use pr_domain::error::{Error, Result};
use pr_domain::stream::AgentStreamEvent;
use pr_domain::trace::TraceEvent;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::sse::agent_event_stream;
use crate::traits::{AgentBackend, AgentObserver, AgentReply};
use crate::util::{error_details, from_reqwest, resolve_api_key};

const EVENT_STREAM: &str = "text/event-stream";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentClient {
    endpoint: String,
    api_key: Option<String>,
    api_key_header: String,
    model: Option<String>,
    system_prompt: Option<String>,
    client: reqwest::Client,
}

/// Body sent upstream.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamPayload<'a> {
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

impl AgentClient {
    pub fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            endpoint: cfg.endpoint(),
            api_key: resolve_api_key(&cfg.api_key_env),
            api_key_header: cfg.api_key_header.clone(),
            model: cfg.model.clone(),
            system_prompt: cfg
                .system_prompt
                .clone()
                .filter(|p| !p.trim().is_empty()),
            client,
        })
    }

    /// Override the key resolved from the environment.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    fn payload<'a>(&'a self, req: &'a AgentRequest, stream: bool) -> UpstreamPayload<'a> {
        UpstreamPayload {
            messages: persona_messages(
                self.system_prompt.as_deref(),
                req.location.as_deref(),
                &req.messages,
            ),
            stream,
            model: self.model.as_deref(),
            location: req.location.as_deref(),
            session_id: req.session_id.as_deref(),
            conversation_id: req.conversation_id.as_deref(),
        }
    }

    /// POST the turn and fail on non-2xx.
    async fn send(&self, req: &AgentRequest, stream: bool) -> Result<reqwest::Response> {
        let started = Instant::now();
        let accept = if stream { EVENT_STREAM } else { "application/json" };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, accept)
            .json(&self.payload(req, stream));
        if let Some(ref key) = self.api_key {
            builder = builder.header(self.api_key_header.as_str(), key.as_str());
        }

        tracing::debug!(endpoint = %self.endpoint, stream, "agent request");

        let resp = builder.send().await.map_err(from_reqwest)?;
        let status = resp.status();

        TraceEvent::AgentRequest {
            endpoint: self.endpoint.clone(),
            streaming: stream,
            status: status.as_u16(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                details: error_details(&body),
            });
        }

        Ok(resp)
    }

    async fn read_json(resp: reqwest::Response) -> Result<AgentResponse> {
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(from_reqwest)?;
        serde_json::from_str(&text).map_err(|e| Error::Upstream {
            status,
            details: format!("unreadable agent response body: {e}"),
        })
    }
}

#[async_trait::async_trait]
impl AgentBackend for AgentClient {
    async fn respond(
        &self,
        req: &AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let work = async {
            let resp = self.send(req, false).await?;
            Self::read_json(resp).await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Aborted),
            res = work => res,
        }
    }

    async fn stream(&self, req: &AgentRequest, cancel: CancellationToken) -> Result<AgentReply> {
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            res = self.send(req, true) => res?,
        };

        let is_event_stream = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().contains(EVENT_STREAM))
            .unwrap_or(false);

        if is_event_stream {
            let bytes = resp.bytes_stream().map(|chunk| chunk.map_err(from_reqwest));
            return Ok(AgentReply::EventStream(agent_event_stream(bytes, cancel)));
        }

        tracing::debug!(endpoint = %self.endpoint, "stream requested but upstream replied with JSON");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Aborted),
            res = Self::read_json(resp) => res?,
        };
        Ok(AgentReply::Json(response))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Prepend the persona prompt, followed by the visitor's pathname, as a
/// `system` message. Without a prompt the messages pass through unchanged.
pub fn persona_messages(
    system_prompt: Option<&str>,
    location: Option<&str>,
    messages: &[ChatMessage],
) -> Vec<ChatMessage> {
    let Some(prompt) = system_prompt else {
        return messages.to_vec();
    };
    let pathname = location
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or("/");

    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(format!(
        "{prompt}\n\nCURRENT PATHNAME\n{pathname}"
    )));
    out.extend_from_slice(messages);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observer-driven entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for [`call_agent`].
#[derive(Default)]
pub struct CallOptions<'a> {
    pub cancel: CancellationToken,
    /// When set, the call streams and pushes events here.
    pub observer: Option<&'a mut dyn AgentObserver>,
}

/// Run one agent call.
///
/// Without an observer this is a plain JSON round trip. With one, events
/// are pushed as they arrive: `on_event` first, then `on_delta`,
/// `on_final` or `on_error`. Malformed events go to `on_error` and are
/// skipped. Returns the final response when one was seen, and `Ok(None)`
/// when the call was cancelled.
pub async fn call_agent(
    backend: &dyn AgentBackend,
    req: &AgentRequest,
    options: CallOptions<'_>,
) -> Result<Option<AgentResponse>> {
    let CallOptions { cancel, observer } = options;

    let Some(observer) = observer else {
        return match backend.respond(req, &cancel).await {
            Ok(resp) => Ok(Some(resp)),
            Err(Error::Aborted) => Ok(None),
            Err(e) => Err(e),
        };
    };

    let mut events = match backend.stream(req, cancel.clone()).await {
        Ok(AgentReply::Json(resp)) => return Ok(Some(resp)),
        Ok(AgentReply::EventStream(events)) => events,
        Err(Error::Aborted) => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut final_response = None;
    while let Some(item) = events.next().await {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match item {
            Ok(event) => {
                observer.on_event(&event);
                match event {
                    AgentStreamEvent::Delta { delta } => observer.on_delta(&delta),
                    AgentStreamEvent::Final { response } => {
                        observer.on_final(&response);
                        final_response = Some(response);
                    }
                    AgentStreamEvent::Error { error } => observer.on_error(&Error::Other(error)),
                    AgentStreamEvent::ToolCall { .. } | AgentStreamEvent::ToolResult { .. } => {}
                }
            }
            Err(e) if e.is_recoverable() => observer.on_error(&e),
            Err(e) => return Err(e),
        }
    }

    if cancel.is_cancelled() {
        return Ok(None);
    }
    Ok(final_response)
}
