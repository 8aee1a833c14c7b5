//! History storage implementations for Parley.

pub mod in_memory;
pub mod transcript;

pub use in_memory::InMemoryHistory;
pub use transcript::{TranscriptEntry, TranscriptWriter};
