//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Inference engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- History errors ---
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Context assembly errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Streaming errors ---
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Model failed to load: {0}")]
    LoadFailed(String),

    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Conversation history is empty; nothing to respond to")]
    EmptyHistory,

    #[error("Token counting failed: {0}")]
    Tokenization(#[from] EngineError),
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("No text received from the generator within {waited:?}")]
    QueueTimeout { waited: Duration },

    #[error("Generation worker panicked: {0}")]
    WorkerPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_displays_correctly() {
        let err = Error::Engine(EngineError::ModelNotFound("tinyllama-9000".into()));
        assert!(err.to_string().contains("tinyllama-9000"));
        assert!(err.to_string().starts_with("Engine error"));
    }

    #[test]
    fn timeout_is_distinct_from_generation_failure() {
        let timeout = Error::Stream(StreamError::QueueTimeout {
            waited: Duration::from_secs(60),
        });
        assert!(timeout.to_string().contains("within 60s"));
        assert!(matches!(timeout, Error::Stream(_)));

        let generation = Error::Engine(EngineError::Generation("oom".into()));
        assert!(!matches!(generation, Error::Stream(_)));
    }

    #[test]
    fn sub_second_timeout_keeps_its_precision() {
        let err = StreamError::QueueTimeout {
            waited: Duration::from_millis(20),
        };
        assert!(err.to_string().ends_with("within 20ms"));
    }

    #[test]
    fn bounded_context_errors_convert_into_error() {
        fn lift<E: Into<Error>>(e: E) -> Error {
            e.into()
        }
        assert!(matches!(lift(HistoryError::Storage("disk".into())), Error::History(_)));
        assert!(matches!(lift(ContextError::EmptyHistory), Error::Context(_)));
        assert!(matches!(
            lift(StreamError::WorkerPanicked("boom".into())),
            Error::Stream(_)
        ));
    }

    #[test]
    fn context_error_wraps_engine_error() {
        let err: ContextError = EngineError::Tokenization("bad template".into()).into();
        assert!(err.to_string().contains("bad template"));
    }
}
