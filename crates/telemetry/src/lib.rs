//! Channel logging for Parley.
//!
//! The [`LogBook`] is the runtime's line-oriented log: every record lands in
//! an hour-bucketed text file per channel (`llm/`, `chat/`) and is mirrored to
//! `tracing` so console output follows the usual `RUST_LOG` filtering.

pub mod logbook;

pub use logbook::{FileSink, LogBook, LogLevel, LogRecord, LogSink, channels};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to write log file {path}: {reason}")]
    Write { path: String, reason: String },
}
