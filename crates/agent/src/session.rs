//! Chat session orchestration.
//!
//! A [`ChatSession`] ties the engine, the history store and the log book
//! together. Each [`ChatSession::query`] records the user turn, assembles a
//! bounded context from the history snapshot and starts a streamed
//! generation. The returned [`ChatTurn`] yields chunks and, once the stream
//! ends, appends the full non-empty response to the history exactly once.

use crate::context::ContextAssembler;
use crate::stream::{PipelineSettings, ResponseStream, stream_response};
use futures::Stream;
use parley_config::AppConfig;
use parley_core::engine::{InferenceEngine, StopCondition, StopToken};
use parley_core::error::Result;
use parley_core::history::HistoryStore;
use parley_core::message::{ConversationId, Message, Role};
use parley_telemetry::{LogBook, LogLevel, channels};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Static inputs for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// System prompt used for new conversations
    pub system_prompt: String,

    /// Token budget for assembled contexts
    pub token_budget: usize,

    /// Stop tokens as configured (ids or token strings)
    pub stop_tokens: Vec<StopToken>,

    pub pipeline: PipelineSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.context.system_prompt.clone(),
            token_budget: config.context.max_tokens,
            stop_tokens: config.model.stop_tokens.clone(),
            pipeline: PipelineSettings::from_config(config),
        }
    }
}

/// The chat orchestrator.
pub struct ChatSession {
    /// Engine used for tokenization and generation
    engine: Arc<dyn InferenceEngine>,

    /// Per-conversation message history
    history: Arc<dyn HistoryStore>,

    /// Channel log for prompts, responses and engine errors
    log_book: Arc<LogBook>,

    settings: SessionSettings,

    /// Stop tokens resolved against the engine's vocabulary
    stop: StopCondition,
}

impl ChatSession {
    /// Create a session. Stop tokens are resolved once; names unknown to the
    /// engine are skipped with a warning.
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        history: Arc<dyn HistoryStore>,
        log_book: Arc<LogBook>,
        settings: SessionSettings,
    ) -> Self {
        let (stop, unknown) = engine.resolve_stop_tokens(&settings.stop_tokens);
        for name in &unknown {
            warn!(token = %name, "Stop token not in vocabulary, ignoring");
            log_book.log(
                channels::LLM,
                "session",
                LogLevel::Warning,
                format!("Unknown stop token '{name}' ignored"),
                true,
            );
        }

        info!(
            engine = engine.name(),
            history = history.name(),
            token_budget = settings.token_budget,
            stop_tokens = stop.len(),
            "Chat session ready"
        );

        Self {
            engine,
            history,
            log_book,
            settings,
            stop,
        }
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn log_book(&self) -> &Arc<LogBook> {
        &self.log_book
    }

    pub fn stop_condition(&self) -> &StopCondition {
        &self.stop
    }

    /// Start a conversation seeded with the configured system prompt.
    pub async fn open_conversation(&self) -> Result<ConversationId> {
        let id = self.history.open(&self.settings.system_prompt).await?;
        self.log_book.log(
            channels::LLM,
            "session",
            LogLevel::Info,
            format!("Conversation {id} opened"),
            false,
        );
        Ok(id)
    }

    /// Evict a conversation. Returns whether it existed.
    pub async fn close_conversation(&self, id: &ConversationId) -> Result<bool> {
        let removed = self.history.clear(id).await?;
        self.log_book.log(
            channels::LLM,
            "session",
            LogLevel::Info,
            format!("Conversation {id} closed"),
            false,
        );
        Ok(removed)
    }

    /// Submit `prompt` to conversation `id` and start streaming the reply.
    ///
    /// Context assembly and tokenization failures are returned here; the
    /// user message is already recorded at that point.
    pub async fn query(&self, id: &ConversationId, prompt: &str) -> Result<ChatTurn> {
        self.history.append(id, Role::User, prompt).await?;
        self.log_book.log(
            channels::CHAT,
            id.as_str(),
            LogLevel::Prompt,
            prompt,
            false,
        );

        let snapshot = self.history.get(id).await?;
        let system = snapshot
            .iter()
            .find(|m| m.role == Role::System)
            .cloned()
            .unwrap_or_else(|| Message::system(&self.settings.system_prompt));

        let engine = Arc::clone(&self.engine);
        let context = ContextAssembler::new(self.settings.token_budget).assemble(
            &snapshot,
            &system,
            |messages| engine.count_tokens(messages),
        )?;

        debug!(
            conversation_id = %id,
            messages = context.messages.len(),
            tokens = context.metadata.total_tokens,
            dropped = context.metadata.prior_dropped(),
            "Starting turn"
        );

        let stream = stream_response(
            Arc::clone(&self.engine),
            &context.messages,
            self.stop.clone(),
            &self.settings.pipeline,
            Some(Arc::clone(&self.log_book)),
        )?;

        Ok(ChatTurn {
            conversation_id: id.clone(),
            stream,
            history: Arc::clone(&self.history),
            log_book: Arc::clone(&self.log_book),
            persisted: false,
        })
    }
}

/// One streamed assistant reply.
pub struct ChatTurn {
    conversation_id: ConversationId,
    stream: ResponseStream,
    history: Arc<dyn HistoryStore>,
    log_book: Arc<LogBook>,
    persisted: bool,
}

impl ChatTurn {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Next cleaned chunk. When the stream ends (normally or on a queue
    /// timeout) the response is persisted before `None` or the timeout error
    /// is returned.
    pub async fn next(&mut self) -> Option<Result<String>> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(e)) => {
                if let Err(persist_err) = self.persist().await {
                    warn!(error = %persist_err, "Failed to persist partial response");
                }
                Some(Err(e.into()))
            }
            None => self.persist().await.err().map(Err),
        }
    }

    /// Drain the turn and return the full response.
    pub async fn collect(mut self) -> Result<String> {
        while let Some(item) = self.next().await {
            item?;
        }
        Ok(self.stream.full_response().to_string())
    }

    /// Text yielded so far.
    pub fn full_response(&self) -> &str {
        self.stream.full_response()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<String>> {
        futures::stream::unfold(self, |mut turn| async move {
            turn.next().await.map(|item| (item, turn))
        })
    }

    async fn persist(&mut self) -> Result<()> {
        if self.persisted {
            return Ok(());
        }
        self.persisted = true;

        let response = self.stream.full_response();
        if response.is_empty() {
            debug!(conversation_id = %self.conversation_id, "Empty response, nothing to persist");
            return Ok(());
        }

        self.history
            .append(&self.conversation_id, Role::Assistant, response)
            .await?;
        self.log_book.log(
            channels::CHAT,
            self.conversation_id.as_str(),
            LogLevel::Response,
            response,
            false,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedEngine;
    use futures::StreamExt;
    use parley_core::error::{Error, StreamError};
    use parley_memory::InMemoryHistory;
    use std::time::Duration;

    fn session(engine: ScriptedEngine) -> ChatSession {
        session_with(engine, SessionSettings::default())
    }

    fn session_with(engine: ScriptedEngine, settings: SessionSettings) -> ChatSession {
        ChatSession::new(
            Arc::new(engine),
            Arc::new(InMemoryHistory::new()),
            Arc::new(LogBook::new()),
            settings,
        )
    }

    fn bob() -> SessionSettings {
        SessionSettings {
            system_prompt: "You are Bob.".into(),
            ..SessionSettings::default()
        }
    }

    #[tokio::test]
    async fn turn_streams_and_persists_once() {
        let session = session_with(ScriptedEngine::new(["He", "llo", " there!"]), bob());
        let id = session.open_conversation().await.unwrap();

        let mut turn = session.query(&id, "Hi").await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = turn.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec!["Hello there!"]);

        // Further polling neither yields nor appends again.
        assert!(turn.next().await.is_none());
        assert_eq!(
            session.history().get(&id).await.unwrap(),
            vec![
                Message::system("You are Bob."),
                Message::user("Hi"),
                Message::assistant("Hello there!"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_response_is_not_persisted() {
        let session = session(ScriptedEngine::new(["<|endoftext|>"]));
        let id = session.open_conversation().await.unwrap();

        let response = session.query(&id, "Hi").await.unwrap().collect().await.unwrap();
        assert!(response.is_empty());
        let roles: Vec<_> = session
            .history()
            .get(&id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
    }

    #[tokio::test]
    async fn generation_error_persists_partial_output() {
        let session = session(ScriptedEngine::new(["Partial"]).fail_after(1));
        let id = session.open_conversation().await.unwrap();

        let response = session.query(&id, "Hi").await.unwrap().collect().await.unwrap();
        assert_eq!(response, "Partial");
        let history = session.history().get(&id).await.unwrap();
        assert_eq!(history.last(), Some(&Message::assistant("Partial")));
    }

    #[tokio::test]
    async fn queue_timeout_surfaces_as_stream_error() {
        let mut settings = SessionSettings::default();
        settings.pipeline.queue_timeout = Duration::from_millis(20);
        let session = session_with(
            ScriptedEngine::new(["slow"]).with_delay(Duration::from_millis(300)),
            settings,
        );
        let id = session.open_conversation().await.unwrap();

        let result = session.query(&id, "Hi").await.unwrap().collect().await;
        assert!(matches!(
            result,
            Err(Error::Stream(StreamError::QueueTimeout { .. }))
        ));
        // Nothing was yielded, so nothing is persisted.
        assert_eq!(session.history().get(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn context_respects_token_budget() {
        let settings = SessionSettings {
            system_prompt: "You are Bob.".into(),
            token_budget: 6,
            ..SessionSettings::default()
        };
        let engine = Arc::new(ScriptedEngine::new(["ok."]));
        let session = ChatSession::new(
            engine.clone(),
            Arc::new(InMemoryHistory::new()),
            Arc::new(LogBook::new()),
            settings,
        );
        let id = session.open_conversation().await.unwrap();
        session.history().append(&id, Role::User, "one two three").await.unwrap();
        session.history().append(&id, Role::Assistant, "four five").await.unwrap();

        session.query(&id, "Hi").await.unwrap().collect().await.unwrap();

        // system(3) + "four five"(2) + "Hi"(1); "one two three" is dropped.
        assert_eq!(engine.last_request().unwrap().input_ids.len(), 6);
    }

    #[tokio::test]
    async fn prompts_and_responses_go_to_chat_channel() {
        let session = session(ScriptedEngine::new(["Sure."]));
        let id = session.open_conversation().await.unwrap();
        session.query(&id, "Help?").await.unwrap().collect().await.unwrap();

        let chat = session.log_book().entries_for(channels::CHAT);
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].level, LogLevel::Prompt);
        assert_eq!(chat[0].message, "Help?");
        assert_eq!(chat[1].level, LogLevel::Response);
        assert_eq!(chat[1].message, "Sure.");
        assert!(chat.iter().all(|r| !r.visible && r.process == id.as_str()));
    }

    #[tokio::test]
    async fn unknown_stop_tokens_are_skipped() {
        let settings = SessionSettings {
            stop_tokens: vec![
                StopToken::Name("</s>".into()),
                StopToken::Id(7),
                StopToken::Name("<nope>".into()),
            ],
            ..SessionSettings::default()
        };
        let session = session_with(ScriptedEngine::new(["x"]), settings);

        assert_eq!(session.stop_condition().len(), 2);
        assert!(session.stop_condition().should_stop(2));
        let warnings: Vec<_> = session
            .log_book()
            .entries()
            .into_iter()
            .filter(|r| r.level == LogLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("<nope>"));
    }

    #[tokio::test]
    async fn close_conversation_evicts_history() {
        let session = session(ScriptedEngine::new(["x"]));
        let id = session.open_conversation().await.unwrap();
        assert!(session.close_conversation(&id).await.unwrap());
        assert!(session.history().get(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn turn_adapts_into_stream() {
        let session = session(ScriptedEngine::new(["One, ", "two."]));
        let id = session.open_conversation().await.unwrap();
        let turn = session.query(&id, "Count").await.unwrap();

        let chunks: Vec<String> = turn.into_stream().map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["One, ", "two."]);
        let history = session.history().get(&id).await.unwrap();
        assert_eq!(history.last(), Some(&Message::assistant("One, two.")));
    }
}
