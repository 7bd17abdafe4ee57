//! Conversation history for the relay: redaction, the document store,
//! turn bookkeeping and the operator query surface.

pub mod query;
pub mod recorder;
pub mod redact;
pub mod retention;
pub mod store;

pub use query::{ConversationQueryService, ListConversations, ListTurns};
pub use recorder::{StartedTurn, TurnRecorder, TurnStart};
pub use store::{ConversationStore, JsonFileStore, Page, Removed};
