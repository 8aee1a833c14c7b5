//! In-memory history store with optional JSONL transcripts.

use async_trait::async_trait;
use crate::transcript::TranscriptWriter;
use parley_core::error::HistoryError;
use parley_core::history::HistoryStore;
use parley_core::message::{ConversationId, Message, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Conversations keyed by id, each an ordered message list.
///
/// Appending to an id that was never opened creates it, so callers that
/// manage their own ids still work.
pub struct InMemoryHistory {
    conversations: Arc<RwLock<HashMap<ConversationId, Vec<Message>>>>,
    transcripts: Option<TranscriptWriter>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            transcripts: None,
        }
    }

    /// Mirror every appended message into a JSONL transcript.
    pub fn with_transcripts(mut self, writer: TranscriptWriter) -> Self {
        self.transcripts = Some(writer);
        self
    }

    /// Reload a conversation from its transcript. Returns the number of
    /// messages restored.
    pub async fn resume(&self, id: &ConversationId) -> Result<usize, HistoryError> {
        let Some(writer) = &self.transcripts else {
            return Err(HistoryError::Storage(
                "Transcripts are disabled; nothing to resume from".into(),
            ));
        };

        let messages: Vec<Message> = writer
            .read(id)?
            .into_iter()
            .map(|e| Message::new(e.role, e.content))
            .collect();
        if messages.is_empty() {
            return Err(HistoryError::UnknownConversation(id.to_string()));
        }
        let count = messages.len();
        self.conversations.write().await.insert(id.clone(), messages);
        debug!(conversation_id = %id, count, "Resumed conversation from transcript");
        Ok(count)
    }

    fn write_transcript(&self, id: &ConversationId, message: &Message) {
        if let Some(writer) = &self.transcripts {
            if let Err(e) = writer.append(id, message) {
                warn!(conversation_id = %id, error = %e, "Failed to append transcript");
            }
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn open(&self, system_prompt: &str) -> Result<ConversationId, HistoryError> {
        let id = ConversationId::new();
        let system = Message::system(system_prompt);
        self.write_transcript(&id, &system);
        self.conversations.write().await.insert(id.clone(), vec![system]);
        debug!(conversation_id = %id, "Opened conversation");
        Ok(id)
    }

    async fn append(
        &self,
        id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<(), HistoryError> {
        let message = Message::new(role, content);
        self.write_transcript(id, &message);
        self.conversations
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn get(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, id: &ConversationId) -> Result<bool, HistoryError> {
        let removed = self.conversations.write().await.remove(id).is_some();
        debug!(conversation_id = %id, removed, "Evicted conversation");
        Ok(removed)
    }

    async fn conversations(&self) -> Result<Vec<ConversationId>, HistoryError> {
        Ok(self.conversations.read().await.keys().cloned().collect())
    }
}
