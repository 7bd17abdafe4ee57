//! persona-relay gateway: the HTTP surface in front of the hosted agent.

pub mod actor;
pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
