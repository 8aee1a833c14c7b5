//! Log book: line-append channel logging.
//!
//! Record format, one per line:
//!
//! ```text
//! 2025-01-12 14:03:22|Model|Info: tinyllama loaded successfully.
//! ```
//!
//! Files live at `<root>/<channel>/<YYYY-MM-DD-HH>.txt`.

use crate::TelemetryError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Well-known channel names.
pub mod channels {
    /// Engine lifecycle, pipeline failures
    pub const LLM: &str = "llm";
    /// User prompts and assistant responses
    pub const CHAT: &str = "chat";
}

/// Severity / kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Prompt,
    Response,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Prompt => "Prompt",
            Self::Response => "Response",
        };
        f.write_str(s)
    }
}

/// A single log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub channel: String,
    pub process: String,
    pub level: LogLevel,
    pub message: String,
    /// Whether the record should surface on the console
    pub visible: bool,
}

impl LogRecord {
    /// Render as a log file line (without trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.process,
            self.level,
            self.message
        )
    }
}

/// Destination for log records.
pub trait LogSink: Send + Sync {
    fn record(&self, record: &LogRecord) -> Result<(), TelemetryError>;
}

/// Appends records to hour-bucketed files under a root directory.
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<channel>/<YYYY-MM-DD-HH>.txt` for the record's timestamp.
    pub fn path_for(&self, channel: &str, at: &DateTime<Local>) -> PathBuf {
        self.root
            .join(channel)
            .join(format!("{}.txt", at.format("%Y-%m-%d-%H")))
    }
}

impl LogSink for FileSink {
    fn record(&self, record: &LogRecord) -> Result<(), TelemetryError> {
        let path = self.path_for(&record.channel, &record.timestamp);
        let write_err = |e: std::io::Error| TelemetryError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_err)?;
        writeln!(file, "{}", record.to_line()).map_err(write_err)?;
        Ok(())
    }
}

/// Channel logger that keeps recent records in memory and fans out to sinks.
pub struct LogBook {
    entries: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
    sinks: Vec<Box<dyn LogSink>>,
}

impl std::fmt::Debug for LogBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBook")
            .field("entry_count", &self.count())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBook {
    const DEFAULT_CAPACITY: usize = 1024;

    /// In-memory only, no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn LogSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: Self::DEFAULT_CAPACITY,
            sinks,
        }
    }

    /// Log book writing to `<logs_dir>/<channel>/...`.
    pub fn to_dir(logs_dir: impl Into<PathBuf>) -> Self {
        Self::with_sinks(vec![Box::new(FileSink::new(logs_dir))])
    }

    /// Record a message on `channel` on behalf of `process`.
    pub fn log(
        &self,
        channel: &str,
        process: &str,
        level: LogLevel,
        message: impl Into<String>,
        visible: bool,
    ) {
        let record = LogRecord {
            timestamp: Local::now(),
            channel: channel.into(),
            process: process.into(),
            level,
            message: message.into(),
            visible,
        };

        mirror_to_tracing(&record);

        for sink in &self.sinks {
            if let Err(e) = sink.record(&record) {
                tracing::warn!(channel = %record.channel, error = %e, "Log sink write failed");
            }
        }

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Recent records, oldest first.
    pub fn entries(&self) -> Vec<LogRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Recent records on one channel.
    pub fn entries_for(&self, channel: &str) -> Vec<LogRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.channel == channel)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn mirror_to_tracing(record: &LogRecord) {
    let channel = record.channel.as_str();
    let process = record.process.as_str();
    match record.level {
        LogLevel::Error => tracing::error!(channel, process, "{}", record.message),
        LogLevel::Warning => tracing::warn!(channel, process, "{}", record.message),
        _ if record.visible => tracing::info!(channel, process, "{}", record.message),
        _ => tracing::debug!(channel, process, "{}", record.message),
    }
}
