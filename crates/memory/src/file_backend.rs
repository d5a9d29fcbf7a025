//! File-based checkpointer — one JSON document per session.
//!
//! Storage location: `~/.turnstore/sessions/<encoded-key>.json`
//!
//! Session keys are opaque, so file names are percent-encoded; keys whose
//! encoding is too long for a file name are stored under `~<sha256>.json`.
//! The snapshot itself carries the real key. Writes go to a temporary file
//! that is renamed into place, so a crash never leaves half a session.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use turnstore_core::checkpoint::{Checkpointer, SessionSnapshot};
use turnstore_core::error::CheckpointError;
use turnstore_core::turn::SessionKey;

/// A directory of session snapshots.
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    /// Create a checkpointer rooted at `dir`. The directory is created on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File checkpointer ready");
        Self { dir }
    }

    /// Default directory: `~/.turnstore/sessions`
    pub fn default_dir() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".turnstore").join("sessions")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key.as_str())))
    }

    fn parse(path: &Path, content: &str) -> Result<SessionSnapshot, CheckpointError> {
        serde_json::from_str(content).map_err(|e| CheckpointError::Corrupted {
            session: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Encoded names longer than this switch to a hashed name, leaving room
/// for the `.json.tmp` suffix under the common 255-byte limit.
const MAX_ENCODED_LEN: usize = 200;

/// File stem for a key. `~` is always escaped by `encode_key`, so hashed
/// stems never collide with encoded ones.
fn file_stem(key: &str) -> String {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_ENCODED_LEN {
        encoded
    } else {
        format!("~{}", hex::encode(Sha256::digest(key.as_bytes())))
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<SessionSnapshot>, CheckpointError> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CheckpointError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        Self::parse(&path, &content).map(Some)
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CheckpointError::Storage(format!("Failed to create session directory: {e}"))
        })?;

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| CheckpointError::Storage(format!("Failed to serialize session: {e}")))?;

        let path = self.path_for(&snapshot.key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::Storage(format!("Failed to move session file: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, CheckpointError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::Storage(format!(
                "Failed to delete session file: {e}"
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<SessionKey>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CheckpointError::Storage(e.to_string())),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                    continue;
                }
            };
            match Self::parse(&path, &content) {
                Ok(snapshot) => keys.push(snapshot.key),
                Err(e) => warn!(error = %e, "Skipping corrupted session file"),
            }
        }

        keys.sort();
        Ok(keys)
    }
}
