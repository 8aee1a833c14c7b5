//! History trait for per-conversation message storage.
//!
//! The store owns every conversation's ordered message list. Callers read a
//! snapshot per turn and append exactly one message per completed step.
//! Lifecycle is explicit: a conversation is opened with its system prompt and
//! evicted when the session ends.

use async_trait::async_trait;
use crate::error::HistoryError;
use crate::message::{ConversationId, Message, Role};

/// The core HistoryStore trait.
///
/// Implementations: in-memory (with optional JSONL transcripts).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "in_memory").
    fn name(&self) -> &str;

    /// Start a conversation seeded with a single system message.
    async fn open(&self, system_prompt: &str) -> Result<ConversationId, HistoryError>;

    /// Append a message to the end of a conversation.
    async fn append(
        &self,
        id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<(), HistoryError>;

    /// Snapshot of a conversation in insertion order. Unknown ids yield an
    /// empty history.
    async fn get(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError>;

    /// Evict a conversation. Returns whether it existed.
    async fn clear(&self, id: &ConversationId) -> Result<bool, HistoryError>;

    /// Ids of all live conversations.
    async fn conversations(&self) -> Result<Vec<ConversationId>, HistoryError>;

    /// Human-readable rendering, one `role: content` line per message.
    async fn format(&self, id: &ConversationId) -> Result<String, HistoryError> {
        let history = self.get(id).await?;
        Ok(history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
