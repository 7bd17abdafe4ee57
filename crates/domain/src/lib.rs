//! Shared types for persona-relay: the chat wire model, persisted
//! conversation documents, configuration and the common error type.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod error;
pub mod stream;
pub mod trace;
