//! `turnstore chat` — Interactive or single-message chat on a session.

use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use turnstore_agent::{ConversationRunner, default_registry};
use turnstore_core::turn::SessionKey;

use super::runtime::Runtime;

pub async fn run(
    session: Option<String>,
    message: Option<String>,
    offline: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::load(offline)?;
    let key = match session {
        Some(raw) => SessionKey::parse(&raw)?,
        None => SessionKey::generate(),
    };

    let runner = ConversationRunner::new(rt.store.clone(), rt.responder.clone())
        .with_tools(Arc::new(default_registry()))
        .with_max_iterations(rt.config.agent.max_iterations as usize)
        .with_system_prompt(rt.config.system_prompt.clone());

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let reply = runner.invoke(&key, msg).await;
        eprint!("\r              \r");
        println!("{}", reply?.content);
        eprintln!("  (session: {key})");
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  turnstore — interactive chat");
    println!();
    println!("  Session:   {key}");
    println!("  Responder: {}", rt.responder.name());
    if !offline {
        println!("  Model:     {}", rt.config.model);
    }
    println!(
        "  Compacts:  above ~{} tokens, keeping the last {} turns",
        rt.config.compaction.max_tokens_before_summary, rt.config.compaction.keep_recent
    );
    println!();
    println!("  Type your message and press Enter.");
    println!("  '/stats' shows session size, '/reset' clears it, 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            "exit" | "quit" => break,
            "/stats" => {
                let stats = rt.store.stats(&key).await?;
                println!(
                    "  {} turns logged, {} replayed (~{} tokens), {} compactions",
                    stats.turns, stats.replay_turns, stats.estimated_tokens, stats.compactions
                );
                println!();
            }
            "/reset" => {
                rt.store.reset(&key).await?;
                println!("  Session cleared.");
                println!();
            }
            text => {
                eprint!("  ...");
                match runner.invoke(&key, text).await {
                    Ok(reply) => {
                        eprint!("\r     \r");
                        println!();
                        for line in reply.content.lines() {
                            println!("  Assistant > {line}");
                        }
                        println!();
                    }
                    Err(e) => {
                        eprint!("\r     \r");
                        eprintln!("  [Error] {e}");
                        println!();
                    }
                }
            }
        }
        prompt()?;
    }

    println!();
    println!("  Goodbye! Resume with: turnstore chat --session {key}");
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
