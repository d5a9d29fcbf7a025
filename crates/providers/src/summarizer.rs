//! Summarizer built on any responder.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use turnstore_config::{CompactionConfig, default_summary_prompt};
use turnstore_core::error::SummarizerError;
use turnstore_core::responder::{Responder, Summarizer, render_transcript};
use turnstore_core::turn::Turn;

/// Asks a responder to condense a transcript into long-term memory.
///
/// The responder sees two turns: the summary instructions as a system turn
/// and the rendered transcript as a user turn. Its text reply is the summary.
pub struct ResponderSummarizer {
    responder: Arc<dyn Responder>,
    prompt: String,
}

impl ResponderSummarizer {
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        Self {
            responder,
            prompt: default_summary_prompt(),
        }
    }

    pub fn from_config(responder: Arc<dyn Responder>, config: &CompactionConfig) -> Self {
        Self::new(responder).with_prompt(config.summary_prompt.clone())
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[async_trait]
impl Summarizer for ResponderSummarizer {
    fn name(&self) -> &str {
        self.responder.name()
    }

    async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError> {
        let request = [
            Turn::system(self.prompt.clone()),
            Turn::user(render_transcript(turns)),
        ];
        debug!(responder = %self.responder.name(), turns = turns.len(), "Requesting summary");

        let reply = self
            .responder
            .respond(&request)
            .await
            .map_err(|e| SummarizerError::Failed(e.to_string()))?;

        if !reply.tool_calls().is_empty() {
            return Err(SummarizerError::Failed(
                "responder asked for a tool instead of summarizing".into(),
            ));
        }
        Ok(reply.content.trim().to_string())
    }
}
