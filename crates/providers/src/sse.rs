//! SSE parsing for the agent upstream.
//!
//! Bytes are buffered and split on `\n\n`. Each block yields an event name
//! (default `message`) and a payload made of its `data:` lines joined by
//! `\n`. A `[DONE]` payload or an event named `done` ends the stream.
//! Every other payload is parsed as an [`AgentStreamEvent`].

use futures_core::Stream;
use futures_util::StreamExt;
use pr_domain::error::{Error, Result};
use pr_domain::stream::{AgentStreamEvent, BoxStream};
use tokio_util::sync::CancellationToken;

/// One complete SSE block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// What a complete block means for the stream.
#[derive(Debug)]
pub(crate) enum Frame {
    Done,
    Event(Result<AgentStreamEvent>),
}

/// Largest block kept while waiting for its terminating `\n\n`.
pub(crate) const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Bytes received but not yet split into events.
///
/// Splitting happens on raw bytes so multi-byte characters cut across
/// chunks survive. Each delimiter search resumes where the previous one
/// stopped. A block that outgrows the limit is dropped up to its end and
/// reported once as a parse error.
pub(crate) struct SseBuffer {
    bytes: Vec<u8>,
    /// Prefix of `bytes` already searched without finding a delimiter.
    scanned: usize,
    limit: usize,
    /// Inside an oversized block.
    skipping: bool,
    overflowed: bool,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            scanned: 0,
            limit,
            skipping: false,
            overflowed: false,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Pull every complete event out of the buffer.
    ///
    /// A trailing partial event stays for the next call. Blocks without
    /// data are dropped.
    pub fn drain(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();

        loop {
            // A delimiter may straddle the previous scan boundary.
            let from = self.scanned.saturating_sub(1);
            let Some(pos) = self.bytes[from..]
                .windows(2)
                .position(|w| w == b"\n\n")
                .map(|p| from + p)
            else {
                self.scanned = self.bytes.len();
                break;
            };

            let block: Vec<u8> = self.bytes.drain(..pos + 2).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.skipping) {
                continue;
            }
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..pos])) {
                events.push(event);
            }
        }

        if self.skipping || self.bytes.len() > self.limit {
            if !self.skipping {
                self.overflowed = true;
                self.skipping = true;
            }
            // Keep the last byte: it may open the delimiter.
            let keep = self.bytes.len().saturating_sub(1);
            self.bytes.drain(..keep);
            self.scanned = self.bytes.len();
        }

        events
    }

    /// The error for a block dropped by the last [`drain`](Self::drain), if any.
    pub fn take_overflow(&mut self) -> Option<Error> {
        std::mem::take(&mut self.overflowed).then(|| {
            Error::StreamParse(format!("event exceeds {} bytes, dropped", self.limit))
        })
    }

    /// Terminate a trailing unterminated block so the next drain yields it.
    pub fn finish(&mut self) {
        if !self.skipping && self.bytes.iter().any(|b| !b.is_ascii_whitespace()) {
            self.bytes.extend_from_slice(b"\n\n");
        }
    }

    #[cfg(test)]
    fn pending(&self) -> &[u8] {
        &self.bytes
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim().to_owned();
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.trim());
        }
    }

    let data = data_lines.join("\n").trim().to_owned();
    if data.is_empty() {
        return None;
    }
    Some(SseEvent { event, data })
}

pub(crate) fn decode(event: &SseEvent) -> Frame {
    if event.data == "[DONE]" || event.event == "done" {
        return Frame::Done;
    }
    match serde_json::from_str::<AgentStreamEvent>(&event.data) {
        Ok(parsed) => Frame::Event(Ok(parsed)),
        Err(e) => Frame::Event(Err(Error::StreamParse(format!(
            "'{}' event: {e}",
            event.event
        )))),
    }
}

/// Turn a body byte stream into typed agent events.
///
/// The stream ends on the done sentinel, when the body closes (after
/// flushing a trailing unterminated block), after the first transport
/// error, or as soon as `cancel` fires. Nothing is yielded after
/// cancellation.
pub(crate) fn agent_event_stream<S, B>(
    chunks: S,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<AgentStreamEvent>>
where
    S: Stream<Item = Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut buffer = SseBuffer::new();

        'read: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'read,
                next = chunks.next() => next,
            };

            let (events, finished) = match next {
                Some(Ok(bytes)) => {
                    buffer.extend(bytes.as_ref());
                    (buffer.drain(), false)
                }
                Some(Err(e)) => {
                    if !cancel.is_cancelled() {
                        yield Err(e);
                    }
                    break 'read;
                }
                None => {
                    // Body closed -- flush any remaining partial event.
                    buffer.finish();
                    (buffer.drain(), true)
                }
            };

            for event in events {
                if cancel.is_cancelled() {
                    break 'read;
                }
                match decode(&event) {
                    Frame::Done => break 'read,
                    Frame::Event(item) => yield item,
                }
            }
            if let Some(e) = buffer.take_overflow() {
                yield Err(e);
            }

            if finished {
                break;
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
