//! Outbound SSE framing for relayed agent streams.
//!
//! Every encoded stream ends with exactly one `done` frame, whether the
//! source finished normally or failed part way through.

use std::convert::Infallible;
use std::fmt::Display;

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};

use pr_domain::stream::AgentStreamEvent;

pub const DONE_FRAME: &str = "event: done\ndata: [DONE]\n\n";

/// Encode one `event:`/`data:` frame.
pub fn encode_frame(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

fn encode_event(event: &AgentStreamEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => encode_frame(event.event_name(), &json),
        Err(e) => encode_error(&format!("unserializable event: {e}")),
    }
}

fn encode_error(message: &str) -> Bytes {
    let payload = serde_json::json!({ "type": "error", "error": message });
    encode_frame("error", &payload.to_string())
}

/// Turn a fallible event sequence into SSE bytes.
///
/// An `Err` item becomes an `error` frame and ends the stream. Items after
/// it are never polled.
pub fn encode_agent_stream<S, E>(source: S) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = Result<AgentStreamEvent, E>> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut source = std::pin::pin!(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(event) => yield Ok(encode_event(&event)),
                Err(e) => {
                    let message = match e.to_string() {
                        m if m.is_empty() => "Agent failed unexpectedly.".to_owned(),
                        m => m,
                    };
                    yield Ok(encode_error(&message));
                    break;
                }
            }
        }
        yield Ok(Bytes::from_static(DONE_FRAME.as_bytes()));
    }
}
