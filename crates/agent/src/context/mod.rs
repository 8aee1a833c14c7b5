//! Token-budgeted context assembly.
//!
//! | Part | Source | Trim Strategy |
//! |------|--------|---------------|
//! | System message | Conversation / configuration | Never trimmed |
//! | Newest message | Current user turn | Never trimmed |
//! | Prior turns | Conversation history | Oldest dropped first |

pub mod assembler;

pub use assembler::{BoundedContext, ContextAssembler, ContextMetadata, build_context};
