//! turnstore CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Interactive or single-message chat on a session
//! - `history`  — Show a session's replay view or raw log
//! - `sessions` — List known sessions
//! - `compact`  — Summarize a session's older turns now
//! - `reset`    — Clear a session
//! - `config`   — Show configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "turnstore",
    about = "turnstore — replayable conversation sessions with context compaction",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Answer and summarize with the local echo responder (no network)
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on a session
    Chat {
        /// Session to continue (a new one is created if omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show a session's history
    History {
        #[arg(short, long)]
        session: String,

        /// Print every logged turn instead of the replay view
        #[arg(long)]
        raw: bool,

        /// Show only the newest turns that fit in this many tokens
        #[arg(long, value_name = "TOKENS")]
        trim: Option<usize>,
    },

    /// List known sessions
    Sessions,

    /// Compact a session now
    Compact {
        #[arg(short, long)]
        session: String,

        /// Most recent turns to keep verbatim (defaults to the configured value)
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Clear a session and its checkpoint
    Reset {
        #[arg(short, long)]
        session: String,
    },

    /// Show configuration
    Config {
        /// Print the built-in defaults as TOML
        #[arg(long)]
        default: bool,

        /// Print the config file path
        #[arg(long, conflicts_with = "default")]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat { session, message } => {
            commands::chat::run(session, message, cli.offline).await?
        }
        Commands::History { session, raw, trim } => {
            commands::session::history(&session, raw, trim).await?
        }
        Commands::Sessions => commands::session::list().await?,
        Commands::Compact { session, keep } => {
            commands::session::compact(&session, keep, cli.offline).await?
        }
        Commands::Reset { session } => commands::session::reset(&session).await?,
        Commands::Config { default, path } => {
            if path {
                commands::config_cmd::path().await?
            } else if default {
                commands::config_cmd::defaults().await?
            } else {
                commands::config_cmd::show().await?
            }
        }
    }

    Ok(())
}
