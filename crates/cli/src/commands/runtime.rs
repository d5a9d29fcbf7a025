//! Wiring shared by the commands: config → responder, summarizer, store.

use std::sync::Arc;
use tracing::warn;
use turnstore_config::{AppConfig, StorageBackend};
use turnstore_core::checkpoint::Checkpointer;
use turnstore_core::responder::{Responder, Summarizer};
use turnstore_memory::{ConversationStore, FileCheckpointer, InMemoryCheckpointer};
use turnstore_providers::{EchoResponder, OpenAiCompatResponder, ResponderSummarizer};

pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<ConversationStore>,
    pub responder: Arc<dyn Responder>,
}

impl Runtime {
    /// Load config from disk and build everything from it.
    pub fn load(offline: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        Self::from_config(config, offline)
    }

    pub fn from_config(config: AppConfig, offline: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let (responder, summary_responder) = if offline {
            let echo: Arc<dyn Responder> = Arc::new(EchoResponder);
            (echo.clone(), echo)
        } else {
            let api_key = config.api_key.clone().ok_or_else(missing_api_key)?;
            let answer: Arc<dyn Responder> = Arc::new(
                OpenAiCompatResponder::new(&config.base_url, &api_key, &config.model)?
                    .with_temperature(f64::from(config.temperature))
                    .with_tools(turnstore_agent::default_registry().definitions()),
            );
            let summary: Arc<dyn Responder> = Arc::new(
                OpenAiCompatResponder::new(&config.base_url, &api_key, config.summary_model())?
                    .with_name("summary")
                    .with_temperature(f64::from(config.compaction.summary_temperature)),
            );
            (answer, summary)
        };

        let summarizer: Arc<dyn Summarizer> = Arc::new(ResponderSummarizer::from_config(
            summary_responder,
            &config.compaction,
        ));
        let checkpointer: Arc<dyn Checkpointer> = match config.storage.backend {
            StorageBackend::File => Arc::new(FileCheckpointer::new(config.storage.sessions_dir())),
            StorageBackend::Memory => {
                warn!("Memory storage backend: sessions are lost when the process exits");
                Arc::new(InMemoryCheckpointer::new())
            }
        };
        let store = ConversationStore::from_config(summarizer, &config.compaction)?
            .with_checkpointer(checkpointer);

        Ok(Self {
            config,
            store: Arc::new(store),
            responder,
        })
    }
}

fn missing_api_key() -> Box<dyn std::error::Error> {
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    TURNSTORE_API_KEY = 'sk-...'");
    eprintln!("    OPENAI_API_KEY    = 'sk-...'");
    eprintln!();
    eprintln!("  Or add `api_key` to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    eprintln!("  Or run with --offline to use the local echo responder.");
    eprintln!();
    "No API key found. See above for setup instructions.".into()
}
