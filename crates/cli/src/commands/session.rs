//! `turnstore history|sessions|compact|reset` — Session management commands.

use turnstore_core::token::TokenEstimator;
use turnstore_core::turn::{Payload, SessionKey, Turn};
use turnstore_memory::{CompactionOutcome, CompactionPolicy, TrimOptions, trim_turns};

use super::runtime::Runtime;

pub async fn history(
    session: &str,
    raw: bool,
    trim: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Viewing never summarizes, so no responder is needed
    let rt = Runtime::load(true)?;
    let key = SessionKey::parse(session)?;

    let turns = if raw {
        rt.store.history(&key).await?
    } else {
        rt.store.view(&key).await?
    };
    if turns.is_empty() {
        println!("  Session '{key}' is empty.");
        return Ok(());
    }

    let shown = trim_for_display(&turns, trim, rt.store.estimator());
    if shown.len() < turns.len() {
        println!("  ({} turns hidden by --trim)", turns.len() - shown.len());
    }
    for turn in &shown {
        println!("{}", format_turn(turn));
    }

    let stats = rt.store.stats(&key).await?;
    println!();
    println!(
        "  {} turns logged, {} replayed (~{} tokens), {} compactions",
        stats.turns, stats.replay_turns, stats.estimated_tokens, stats.compactions
    );
    Ok(())
}

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load(true)?;
    let keys = rt.store.sessions().await?;
    if keys.is_empty() {
        println!("  No sessions yet.");
        return Ok(());
    }
    for key in keys {
        let stats = rt.store.stats(&key).await?;
        println!(
            "  {:<40} {:>4} turns  {:>2} compactions",
            key.as_str(),
            stats.turns,
            stats.compactions
        );
    }
    Ok(())
}

pub async fn compact(
    session: &str,
    keep: Option<usize>,
    offline: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load(offline)?;
    let key = SessionKey::parse(session)?;
    let policy = CompactionPolicy {
        keep_recent: keep.unwrap_or(rt.config.compaction.keep_recent),
        timeout: rt.config.compaction.summarize_timeout(),
    };

    match rt.store.compact(&key, &policy).await? {
        CompactionOutcome::Compacted {
            replaced,
            tokens_before,
            tokens_after,
        } => println!(
            "  Compacted: {replaced} turns now summarized (~{tokens_before} → ~{tokens_after} tokens)"
        ),
        CompactionOutcome::Skipped(reason) => println!("  Skipped: {reason}"),
    }
    Ok(())
}

pub async fn reset(session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load(true)?;
    let key = SessionKey::parse(session)?;
    rt.store.reset(&key).await?;
    println!("  Session '{key}' cleared.");
    Ok(())
}

/// Keep the newest turns (and a leading system turn) within `budget` tokens.
fn trim_for_display(turns: &[Turn], budget: Option<usize>, estimator: &dyn TokenEstimator) -> Vec<Turn> {
    match budget {
        Some(max_tokens) => trim_turns(turns, max_tokens, estimator, TrimOptions::default()),
        None => turns.to_vec(),
    }
}

/// One display line per turn: `[role] content`, plus tool details.
fn format_turn(turn: &Turn) -> String {
    let mut line = format!("[{}] {}", turn.role, turn.content);
    match &turn.payload {
        Payload::Text => {}
        Payload::ToolInvocation { calls } => {
            for call in calls {
                line.push_str(&format!(" → {}({})", call.name, call.arguments));
            }
        }
        Payload::ToolResult { call_id, is_error } => {
            let status = if *is_error { "error" } else { "ok" };
            line.push_str(&format!(" ({status}, call {call_id})"));
        }
    }
    line
}
