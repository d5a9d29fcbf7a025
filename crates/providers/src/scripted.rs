//! Offline responders — scripted replies for tests, echo for `--offline`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use turnstore_core::error::ResponderError;
use turnstore_core::responder::Responder;
use turnstore_core::turn::{Payload, Role, Turn};

/// Returns a fixed sequence of replies, one per call.
///
/// Every context it was called with is recorded, so tests can check exactly
/// what a runner submitted. Once the script runs out, calls fail with
/// `ResponderError::Exhausted`.
pub struct ScriptedResponder {
    replies: Mutex<VecDeque<Result<Turn, ResponderError>>>,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedResponder {
    pub fn new(replies: Vec<Turn>) -> Self {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    /// Script that may include failures.
    pub fn from_results(replies: Vec<Result<Turn, ResponderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Plain assistant replies.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(Turn::assistant).collect())
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Contexts received so far, in call order.
    pub fn contexts(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn respond(&self, context: &[Turn]) -> Result<Turn, ResponderError> {
        let call = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.push(context.to_vec());
            seen.len()
        };
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Err(ResponderError::Exhausted { call }))
    }
}

/// Repeats the latest user or tool turn back. Needs no network.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoResponder;

#[async_trait]
impl Responder for EchoResponder {
    fn name(&self) -> &str {
        "echo"
    }

    async fn respond(&self, context: &[Turn]) -> Result<Turn, ResponderError> {
        let last = context
            .iter()
            .rev()
            .find(|t| matches!(t.role, Role::User | Role::ToolResult))
            .ok_or(ResponderError::EmptyResponse)?;

        let reply = match &last.payload {
            Payload::ToolResult { is_error: true, .. } => format!("Tool failed: {}", last.content),
            Payload::ToolResult { .. } => format!("Tool returned: {}", last.content),
            _ => format!("You said: {}", last.content),
        };
        Ok(Turn::assistant(reply))
    }
}
