//! Relay runtime: forwards turns to the agent and frames the answer.
//!
//! Entry points: [`relay_json`] for a single JSON answer and
//! [`relay_stream`] for an SSE byte stream that always ends in `done`.

pub mod relay;
pub mod sse;

pub use relay::{relay_json, relay_stream, RelayInput, Relayed, AGENT_ROUTE};
pub use sse::{encode_agent_stream, encode_frame, DONE_FRAME};
