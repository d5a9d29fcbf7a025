//! Conversation store, checkpointers and trimming for turnstore.

pub mod file_backend;
pub mod in_memory;
pub mod store;
pub mod trim;

pub use file_backend::FileCheckpointer;
pub use in_memory::InMemoryCheckpointer;
pub use store::{
    CompactionOutcome, CompactionPolicy, ConversationStore, SessionState, SessionStats,
    SkipReason, StoreSettings,
};
pub use trim::{TrimOptions, TrimStrategy, trim_turns};
