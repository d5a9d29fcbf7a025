//! Checkpointer trait — durable storage for session state.
//!
//! The store keeps every session in memory and writes a snapshot through
//! the checkpointer after each mutation, so a restarted process can pick a
//! thread back up by its key. Implementations: in-memory (tests, ephemeral
//! sessions) and one-JSON-file-per-session on disk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::turn::{CompactionRecord, Role, SessionKey, Turn};

/// Everything needed to rebuild one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub key: SessionKey,

    /// Every turn ever appended, in order. Compaction never rewrites this.
    pub log: Vec<Turn>,

    /// The summary currently standing in for the compacted prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionRecord>,

    /// Index into `log` of the first turn not covered by `compaction`
    #[serde(default)]
    pub covered_until: usize,

    /// How many compactions have succeeded for this session
    #[serde(default)]
    pub compactions: u32,

    /// Log length at which the last automatic compaction failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<usize>,

    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// A fresh, empty session.
    pub fn empty(key: SessionKey) -> Self {
        Self {
            key,
            log: Vec::new(),
            compaction: None,
            covered_until: 0,
            compactions: 0,
            failed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Index of the first history turn: 1 when the log opens with a
    /// standing system instruction, else 0.
    pub fn history_start(&self) -> usize {
        match self.log.first() {
            Some(t) if t.role == Role::System => 1,
            _ => 0,
        }
    }

    /// The replay view: standing system turn, summary, uncovered raw turns.
    pub fn replay(&self) -> Vec<Turn> {
        let start = self.history_start();
        let covered = self.covered_until.max(start).min(self.log.len());
        let mut view = Vec::with_capacity(self.log.len() - covered + start + 1);
        view.extend(self.log[..start].iter().cloned());
        if let Some(record) = &self.compaction {
            view.push(record.turn.clone());
        }
        view.extend(self.log[covered..].iter().cloned());
        view
    }
}

/// Durable session storage.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Load a session, `None` if it was never saved.
    async fn load(&self, key: &SessionKey)
    -> std::result::Result<Option<SessionSnapshot>, CheckpointError>;

    /// Save (overwrite) a session.
    async fn save(&self, snapshot: &SessionSnapshot) -> std::result::Result<(), CheckpointError>;

    /// Delete a session. Returns whether anything was removed.
    async fn delete(&self, key: &SessionKey) -> std::result::Result<bool, CheckpointError>;

    /// All saved session keys.
    async fn list(&self) -> std::result::Result<Vec<SessionKey>, CheckpointError>;
}
