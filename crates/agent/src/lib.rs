//! The conversational core of Parley.
//!
//! Each turn runs through two stages:
//!
//! 1. **Build context**: the [`ContextAssembler`] picks the newest slice of
//!    the conversation that fits the token budget, always keeping the system
//!    message and the current user turn
//! 2. **Stream the reply**: [`stream_response`] runs blocking generation on a
//!    worker, buffers the raw increments and yields cleaned text chunks
//!
//! [`ChatSession`] wires both stages to a history store and a log book and
//! persists each completed reply exactly once.

pub mod context;
pub mod session;
pub mod stream;

#[cfg(test)]
mod test_helpers;

pub use context::{BoundedContext, ContextAssembler, ContextMetadata, build_context};
pub use session::{ChatSession, ChatTurn, SessionSettings};
pub use stream::{FlushPolicy, PipelineSettings, ResponseStream, StreamBuffer, stream_response};
