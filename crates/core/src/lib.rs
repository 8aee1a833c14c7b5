//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat runtime.
//! This crate has **no inference or storage dependencies**. It defines the
//! vocabulary that the engine, history, and pipeline crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`InferenceEngine`] tokenizes conversations and runs blocking generation
//! - [`HistoryStore`] owns per-conversation message history
//!
//! Implementations live in their respective crates, so the streaming pipeline
//! can be tested against scripted engines without loading a model.

pub mod engine;
pub mod error;
pub mod history;
pub mod message;

// Re-export key types at crate root for ergonomics
pub use engine::{
    GenerationRequest, InferenceEngine, SamplingParams, StopCondition, StopToken, TextSink,
};
pub use error::{ContextError, EngineError, Error, HistoryError, Result, StreamError};
pub use history::HistoryStore;
pub use message::{ConversationId, Message, Role};
