pub mod agent;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use agent::{call_agent, persona_messages, AgentClient, CallOptions};
pub use traits::{AgentBackend, AgentObserver, AgentReply};
pub use util::resolve_api_key;
