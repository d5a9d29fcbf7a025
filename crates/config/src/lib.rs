//! Configuration loading, validation, and management for turnstore.
//!
//! Loads configuration from `~/.turnstore/config.toml` with environment
//! variable overrides. Validates all settings once, at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.turnstore/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used to answer
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for answers
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Standing system instruction for new sessions
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Compaction (context summarization) settings
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Where sessions are checkpointed
    #[serde(default)]
    pub storage: StorageConfig,

    /// Agent runner settings
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("system_prompt", &self.system_prompt)
            .field("compaction", &self.compaction)
            .field("storage", &self.storage)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Which token estimator drives the compaction trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// ~4 characters per token plus per-turn overhead
    #[default]
    Heuristic,
    /// Raw character count
    Chars,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compact once the replayed context is estimated above this many tokens
    #[serde(default = "default_max_tokens_before_summary")]
    pub max_tokens_before_summary: usize,

    /// Number of most recent history turns that are never compacted
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Upper bound on a single summarizer call
    #[serde(default = "default_summarize_timeout_secs")]
    pub summarize_timeout_secs: u64,

    /// Instructions given to the summarizing model
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,

    /// Model used for summaries (falls back to the answering model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,

    /// Temperature used for summaries
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,

    #[serde(default)]
    pub estimator: EstimatorKind,
}

fn default_max_tokens_before_summary() -> usize {
    1000
}
fn default_keep_recent() -> usize {
    4
}
fn default_summarize_timeout_secs() -> u64 {
    30
}
fn default_summary_temperature() -> f32 {
    0.1
}

/// Default long-term memory summary instructions.
pub fn default_summary_prompt() -> String {
    "You are building a long-term memory summary for an assistant.\n\
     Compress the conversation below into durable memory:\n\
     1. Keep the user's background, goals and preferences.\n\
     2. Keep tasks that are finished or still open.\n\
     3. Keep important conclusions and identifiers (names, order numbers).\n\
     4. Drop small talk and repetition.\n\
     5. Describe everything objectively in the third person.\n\
     The output will be given to the assistant as system memory."
        .into()
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            max_tokens_before_summary: default_max_tokens_before_summary(),
            keep_recent: default_keep_recent(),
            summarize_timeout_secs: default_summarize_timeout_secs(),
            summary_prompt: default_summary_prompt(),
            summary_model: None,
            summary_temperature: default_summary_temperature(),
            estimator: EstimatorKind::default(),
        }
    }
}

impl CompactionConfig {
    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }
}

/// Checkpoint storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON file per session on disk
    #[default]
    File,
    /// Process memory only
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory for session files (defaults to `~/.turnstore/sessions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            directory: None,
        }
    }
}

impl StorageConfig {
    /// The effective session directory.
    pub fn sessions_dir(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum responder calls per user message (tool loop bound)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    8
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.turnstore/config.toml).
    ///
    /// Environment variables override the file:
    /// - `TURNSTORE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TURNSTORE_BASE_URL`
    /// - `TURNSTORE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TURNSTORE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("TURNSTORE_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = lookup("TURNSTORE_MODEL") {
            self.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".turnstore")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.compaction.max_tokens_before_summary == 0 {
            return Err(ConfigError::ValidationError(
                "compaction.max_tokens_before_summary must be > 0".into(),
            ));
        }

        if self.compaction.summarize_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "compaction.summarize_timeout_secs must be > 0".into(),
            ));
        }

        if self.compaction.summary_prompt.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "compaction.summary_prompt must not be empty".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The model used for summaries.
    pub fn summary_model(&self) -> &str {
        self.compaction.summary_model.as_deref().unwrap_or(&self.model)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            compaction: CompactionConfig::default(),
            storage: StorageConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
