//! Conversation transcripts: append-only JSON-lines files.
//!
//! Each appended message becomes one line in
//! `<dir>/<conversation_id>.jsonl`:
//!
//! ```text
//! {"role":"user","content":"Hi"}
//! ```

use parley_core::error::HistoryError;
use parley_core::message::{ConversationId, Message, Role};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Writes one JSONL file per conversation.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Transcript file for `id`. Ids that are not a single plain file name
    /// (absolute paths, `..`, separators) are rejected so every transcript
    /// stays inside `dir`.
    pub fn path_for(&self, id: &ConversationId) -> Result<PathBuf, HistoryError> {
        let name = format!("{id}.jsonl");
        let mut components = Path::new(&name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(name)),
            _ => Err(HistoryError::Storage(format!(
                "Conversation id '{id}' is not a valid transcript name"
            ))),
        }
    }

    /// Append a single message line.
    pub fn append(&self, id: &ConversationId, message: &Message) -> Result<(), HistoryError> {
        let path = self.path_for(id)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            HistoryError::Storage(format!("Failed to create transcript directory: {e}"))
        })?;

        let line = serde_json::to_string(&TranscriptEntry::from(message)).map_err(|e| {
            HistoryError::Storage(format!("Failed to serialize transcript entry: {e}"))
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HistoryError::Storage(format!("Failed to open transcript: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| HistoryError::Storage(format!("Failed to write transcript: {e}")))?;
        Ok(())
    }

    /// Read a transcript back. Missing files yield an empty list;
    /// corrupted lines are skipped.
    pub fn read(&self, id: &ConversationId) -> Result<Vec<TranscriptEntry>, HistoryError> {
        let content = match std::fs::read_to_string(self.path_for(id)?) {
            Ok(c) => c,
            Err(_) => return Ok(Vec::new()),
        };

        let entries = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<TranscriptEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(conversation_id = %id, error = %e, "Skipping corrupted transcript line");
                    None
                }
            })
            .collect();
        Ok(entries)
    }
}
