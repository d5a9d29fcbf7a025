//! The conversation runner for turnstore.
//!
//! One conversational step follows a fixed cycle:
//!
//! 1. **Append** the user turn to the session
//! 2. **Get context** from the store (compaction happens here, if due)
//! 3. **Respond** via the configured responder and append the reply
//! 4. **If tool calls**: execute tools, append results, loop back to step 2
//! 5. **Otherwise** return the reply
//!
//! The loop stops with an error once the iteration limit is reached.

pub mod calculator;
pub mod error;
pub mod runner;
pub mod tool;

pub use calculator::CalculatorTool;
pub use error::AgentError;
pub use runner::ConversationRunner;
pub use tool::{Tool, ToolRegistry, default_registry};
