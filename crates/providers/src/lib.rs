//! Responder and summarizer implementations for turnstore.
//!
//! All responders implement the `turnstore_core::Responder` trait.
//! `ResponderSummarizer` turns any of them into the store's summarizer.

pub mod openai_compat;
pub mod scripted;
pub mod summarizer;

pub use openai_compat::OpenAiCompatResponder;
pub use scripted::{EchoResponder, ScriptedResponder};
pub use summarizer::ResponderSummarizer;
