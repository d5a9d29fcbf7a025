//! CLI command implementations.

pub mod chat;
pub mod config_cmd;
pub mod runtime;
pub mod session;
