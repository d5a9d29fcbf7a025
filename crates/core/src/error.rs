//! Error types for the turnstore domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; every error is scoped to a
//! single operation on a single session.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by `ConversationStore` operations.
#[derive(Debug, Error)]
pub enum StoreError {
    // --- Rejected input ---
    #[error("Invalid turn: {0}")]
    InvalidTurn(#[from] InvalidTurnError),

    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("Invalid store settings: {0}")]
    InvalidSettings(String),

    // --- Durability ---
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// A turn was rejected at `append`; the session is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTurnError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("role {0} is reserved for compaction records")]
    ReservedRole(String),

    #[error("payload {payload} is not allowed on a {role} turn")]
    PayloadMismatch { role: String, payload: String },

    #[error("tool invocation payload must contain at least one call")]
    NoToolCalls,

    #[error("tool invocation is missing a tool name")]
    MissingToolName,

    #[error("tool result is missing the call id it answers")]
    MissingCallId,
}

/// The external Summarizer failed. Recovered locally by skipping compaction.
#[derive(Debug, Clone, Error)]
pub enum SummarizerError {
    #[error("Summarization failed: {0}")]
    Failed(String),

    #[error("Summarization timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// The external Responder failed. The store never calls the responder
/// itself, so these are propagated unchanged to whoever did.
#[derive(Debug, Clone, Error)]
pub enum ResponderError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by responder, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Responder returned no reply")]
    EmptyResponse,

    #[error("Responder has no more scripted replies (call #{call})")]
    Exhausted { call: usize },
}

/// Durable checkpoint storage failed.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted checkpoint for session {session}: {reason}")]
    Corrupted { session: String, reason: String },
}

/// Errors from tool execution in the agent runner.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
