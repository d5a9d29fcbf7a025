//! In-memory checkpointer — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use turnstore_core::checkpoint::{Checkpointer, SessionSnapshot};
use turnstore_core::error::CheckpointError;
use turnstore_core::turn::SessionKey;

/// Keeps snapshots in a map for the lifetime of the process.
#[derive(Clone)]
pub struct InMemoryCheckpointer {
    snapshots: Arc<RwLock<HashMap<SessionKey, SessionSnapshot>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &SessionKey) -> Result<Option<SessionSnapshot>, CheckpointError> {
        Ok(self.snapshots.read().await.get(key).cloned())
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CheckpointError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.key.clone(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, CheckpointError> {
        Ok(self.snapshots.write().await.remove(key).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionKey>, CheckpointError> {
        let mut keys: Vec<SessionKey> = self.snapshots.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
