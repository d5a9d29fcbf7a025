//! Token estimation.
//!
//! Any monotonic proxy for conversation size works as a compaction trigger.
//! The default is a character heuristic: ~4 characters per token, plus a
//! fixed per-turn overhead for role names and wire-format delimiters.

use crate::turn::Turn;

/// Estimates the size of a run of turns.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, turns: &[Turn]) -> usize;
}

impl<F> TokenEstimator for F
where
    F: Fn(&[Turn]) -> usize + Send + Sync,
{
    fn estimate(&self, turns: &[Turn]) -> usize {
        self(turns)
    }
}

/// 1 token ≈ 4 characters, plus 4 tokens of overhead per turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, turns: &[Turn]) -> usize {
        turns.iter().map(estimate_turn_tokens).sum()
    }
}

/// Total character count of all contents. Crude but exact and predictable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCountEstimator;

impl TokenEstimator for CharCountEstimator {
    fn estimate(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|t| t.content.chars().count()).sum()
    }
}

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single turn including per-turn overhead.
///
/// Tool call arguments count towards the estimate since they are replayed
/// on the wire along with the content.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    let overhead = 4;
    let calls: usize = turn
        .tool_calls()
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments.to_string()))
        .sum();
    overhead + estimate_tokens(&turn.content) + calls
}
