use thiserror::Error;
use turnstore_core::error::{ResponderError, StoreError};

/// Errors from a conversational step.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Passed through unchanged from the responder
    #[error("Responder error: {0}")]
    Responder(#[from] ResponderError),

    #[error("Tool loop did not finish within {limit} iterations")]
    MaxIterations { limit: usize },
}
