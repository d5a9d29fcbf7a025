//! Token-budget trimming — the non-lossy alternative to compaction.
//!
//! Drops whole turns from one end of a sequence until the rest fits a
//! budget. Nothing is summarized and the kept turns are never reordered.

use turnstore_core::token::TokenEstimator;
use turnstore_core::turn::{Role, Turn};

/// Which end of the sequence survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimStrategy {
    /// Keep the newest turns (sliding window)
    #[default]
    Last,
    /// Keep the oldest turns
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimOptions {
    pub strategy: TrimStrategy,
    /// Always keep a leading system turn, counted against the budget
    pub include_system: bool,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            strategy: TrimStrategy::Last,
            include_system: true,
        }
    }
}

/// Keep as many contiguous turns from the chosen end as fit in `max_tokens`.
///
/// A leading system turn kept by `include_system` is returned even when it
/// alone exceeds the budget; in that case nothing else is kept.
pub fn trim_turns(
    turns: &[Turn],
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
    options: TrimOptions,
) -> Vec<Turn> {
    let cost = |t: &Turn| estimator.estimate(std::slice::from_ref(t));

    let (head, rest) = match turns.split_first() {
        Some((first, rest)) if options.include_system && first.role == Role::System => {
            (Some(first), rest)
        }
        _ => (None, turns),
    };

    let mut used = head.map(cost).unwrap_or(0);
    let mut kept = 0;
    let window: Box<dyn Iterator<Item = &Turn>> = match options.strategy {
        TrimStrategy::Last => Box::new(rest.iter().rev()),
        TrimStrategy::First => Box::new(rest.iter()),
    };
    for turn in window {
        let tokens = cost(turn);
        if used + tokens > max_tokens {
            break;
        }
        used += tokens;
        kept += 1;
    }

    let body = match options.strategy {
        TrimStrategy::Last => &rest[rest.len() - kept..],
        TrimStrategy::First => &rest[..kept],
    };
    head.into_iter().chain(body).cloned().collect()
}
