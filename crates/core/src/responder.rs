//! Responder and Summarizer traits — the store's external collaborators.
//!
//! A Responder knows how to turn an ordered context into the next turn
//! (a hosted language model, an agent framework, a scripted fake). A
//! Summarizer condenses a run of turns into text and is only ever called
//! by compaction. The store never inspects how either is implemented.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::{ResponderError, SummarizerError};
use crate::turn::Turn;

/// A tool a responder may ask to invoke, described for the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

/// Produces the next turn for a conversation.
#[async_trait]
pub trait Responder: Send + Sync {
    /// A human-readable name (e.g., "openai", "echo").
    fn name(&self) -> &str;

    /// Produce the next turn given the replayed context.
    ///
    /// A returned turn may carry a tool invocation payload; callers append
    /// it verbatim.
    async fn respond(&self, context: &[Turn]) -> std::result::Result<Turn, ResponderError>;
}

/// Condenses a contiguous run of turns into summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, turns: &[Turn]) -> std::result::Result<String, SummarizerError>;
}

/// Render turns as a plain transcript, one `role: content` line each.
///
/// Tool invocations are rendered with their name and arguments so that a
/// summarizer sees what was asked for.
pub fn render_transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str(turn.role.as_str());
        out.push_str(": ");
        out.push_str(&turn.content);
        for call in turn.tool_calls() {
            out.push_str(&format!(" [call {}({})]", call.name, call.arguments));
        }
        out.push('\n');
    }
    out
}
