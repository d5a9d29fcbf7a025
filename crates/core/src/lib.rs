//! # turnstore Core
//!
//! Domain types, traits, and error definitions for the turnstore
//! conversation store. This crate has **no framework dependencies**: it
//! defines the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! The store's collaborators (responder, summarizer, token estimator) are
//! traits here. Implementations live in their respective crates, which keeps
//! the dependency graph pointing inward and makes every seam mockable.

pub mod checkpoint;
pub mod error;
pub mod event;
pub mod responder;
pub mod token;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use checkpoint::{Checkpointer, SessionSnapshot};
pub use error::{
    CheckpointError, InvalidTurnError, ResponderError, Result, StoreError, SummarizerError,
    ToolError,
};
pub use event::{DomainEvent, EventBus};
pub use responder::{Responder, Summarizer, ToolDefinition, render_transcript};
pub use token::{CharCountEstimator, HeuristicEstimator, TokenEstimator};
pub use turn::{CompactionRecord, Payload, Role, SessionKey, ToolInvocation, Turn};
