//! Admin endpoints.
//!
//! All admin-guarded endpoints use the `AdminGuard` extractor (see
//! `guard.rs`), which enforces `PR_ADMIN_TOKEN` auth. If the env var is
//! unset, endpoints are accessible without auth (dev mode).

mod conversations;
mod guard;
mod health;

pub use conversations::{delete_conversation, get_conversation, list_conversations, list_turns};
pub use guard::AdminGuard;
pub use health::health;
