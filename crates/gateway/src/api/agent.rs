//! `POST /v1/agent`: relay one chat turn to the hosted agent.
//!
//! Streaming is chosen by `stream` in the body, else by an `Accept` header
//! asking for `text/event-stream`. Either way the response carries
//! `x-conversation-id` / `x-turn-id` when the turn was recorded.

use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};

use pr_conversations::StartedTurn;
use pr_domain::agent::AgentRequest;
use pr_domain::conversation::ActorType;
use pr_domain::error::Error;

use crate::actor::build_actor_context;
use crate::runtime::{relay_json, relay_stream, RelayInput};
use crate::state::AppState;

pub const MISSING_MESSAGES: &str = "Missing required 'messages' array in request body.";
pub const INVALID_MESSAGES: &str = "Invalid message format in request body.";

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";
pub const TURN_ID_HEADER: &str = "x-turn-id";

const EVENT_STREAM: &str = "text/event-stream";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_request(body: &[u8]) -> Result<AgentRequest, &'static str> {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    if !value.get("messages").is_some_and(|m| m.is_array()) {
        return Err(MISSING_MESSAGES);
    }
    serde_json::from_value(value).map_err(|_| INVALID_MESSAGES)
}

fn wants_stream(request: &AgentRequest, headers: &HeaderMap) -> bool {
    request.stream.unwrap_or_else(|| {
        headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains(EVENT_STREAM))
    })
}

/// Relay failures as HTTP statuses.
pub fn error_status(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn turn_headers(turn: Option<&StartedTurn>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(turn) = turn else { return headers };
    for (name, value) in [
        (CONVERSATION_ID_HEADER, &turn.conversation_id),
        (TURN_ID_HEADER, &turn.turn_id),
    ] {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::debug!(header = name, "id is not a valid header value, omitted"),
        }
    }
    headers
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn agent(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_request(&body) {
        Ok(r) => r,
        Err(message) => return bad_request(message),
    };

    let streamed = wants_stream(&request, &headers);
    let actor = build_actor_context(
        &headers,
        peer.map(|ConnectInfo(addr)| addr.ip()),
        ActorType::Public,
        &state.hash_salt,
        &state.config.analytics,
    );
    let input = RelayInput {
        request,
        actor,
        path: uri.path().to_owned(),
    };

    if streamed {
        let relayed = relay_stream(state, input).await;
        let mut response_headers = turn_headers(relayed.turn.as_ref());
        response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
        response_headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-transform"),
        );
        return (response_headers, Body::from_stream(relayed.body)).into_response();
    }

    let relayed = relay_json(&state, input).await;
    let response_headers = turn_headers(relayed.turn.as_ref());
    match relayed.body {
        Ok(response) => (response_headers, Json(response)).into_response(),
        Err(e) => (
            error_status(&e),
            response_headers,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
