//! Domain event system — lets observers follow store activity without
//! coupling to it.
//!
//! Events are published when something interesting happens to a session.
//! Subscribers filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn was appended to a session log
    TurnAppended {
        session: String,
        role: String,
        log_len: usize,
        timestamp: DateTime<Utc>,
    },

    /// Older history was replaced with a summary
    ContextCompacted {
        session: String,
        replaced: usize,
        tokens_before: usize,
        tokens_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A compaction attempt was skipped (nothing to do, or the summarizer failed)
    CompactionSkipped {
        session: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was cleared
    SessionReset {
        session: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
