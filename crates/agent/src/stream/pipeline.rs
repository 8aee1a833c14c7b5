//! Streaming response pipeline.
//!
//! Generation is a long blocking call, so it runs on a blocking worker
//! (`spawn_blocking`) that pushes raw increments into a bounded channel.
//! The async side pulls from the channel with a per-receive timeout, runs
//! every increment through a [`StreamBuffer`], and yields cleaned chunks.
//!
//! Completion is signalled by the worker dropping its sender. Worker errors
//! and panics are logged and end the stream early; they are never yielded.
//! A receive timeout is yielded once as [`StreamError::QueueTimeout`] and
//! ends the stream.

use crate::stream::buffer::{FlushPolicy, StreamBuffer};
use futures::Stream;
use parley_config::AppConfig;
use parley_core::engine::{
    GenerationRequest, InferenceEngine, SamplingParams, StopCondition, TextSink,
};
use parley_core::error::{EngineError, StreamError};
use parley_core::message::Message;
use parley_telemetry::{LogBook, LogLevel, channels};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const PROCESS: &str = "stream_response";

/// Knobs for one streamed generation.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub policy: FlushPolicy,
    /// Longest wait for the next increment before giving up.
    pub queue_timeout: Duration,
    pub queue_capacity: usize,
    pub max_new_tokens: usize,
    pub sampling: SamplingParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: FlushPolicy::from_config(&config.stream),
            queue_timeout: Duration::from_secs(config.stream.queue_timeout_secs),
            queue_capacity: config.stream.queue_capacity,
            max_new_tokens: config.model.max_new_tokens,
            sampling: config.model.sampling(),
        }
    }
}

/// Forwards engine output into the bounded queue.
struct ChannelSink {
    sender: mpsc::Sender<Vec<u8>>,
}

impl TextSink for ChannelSink {
    fn emit(&mut self, piece: &[u8]) -> bool {
        if piece.is_empty() {
            return !self.sender.is_closed();
        }
        self.sender.blocking_send(piece.to_vec()).is_ok()
    }
}

/// Everything the worker needs for one generation call.
struct GenerationTask {
    engine: Arc<dyn InferenceEngine>,
    request: GenerationRequest,
    stop: StopCondition,
    sender: mpsc::Sender<Vec<u8>>,
    log_book: Option<Arc<LogBook>>,
}

impl GenerationTask {
    fn run(self) {
        let mut sink = ChannelSink {
            sender: self.sender,
        };
        match self.engine.generate(&self.request, &self.stop, &mut sink) {
            Ok(()) => debug!(engine = self.engine.name(), "Generation finished"),
            Err(e) => {
                error!(engine = self.engine.name(), error = %e, "Generation failed");
                if let Some(log_book) = &self.log_book {
                    log_book.log(
                        channels::LLM,
                        PROCESS,
                        LogLevel::Error,
                        format!("Error during generation: {e}"),
                        true,
                    );
                }
            }
        }
        // `sink` drops here, closing the queue.
    }
}

/// Start generation for `context` and return the consumer side.
///
/// Tokenization runs on the calling thread, so a tokenizer failure is
/// returned here rather than from the stream. Must be called from within a
/// Tokio runtime.
pub fn stream_response(
    engine: Arc<dyn InferenceEngine>,
    context: &[Message],
    stop: StopCondition,
    settings: &PipelineSettings,
    log_book: Option<Arc<LogBook>>,
) -> Result<ResponseStream, EngineError> {
    let input_ids = engine.tokenize(context)?;
    let request = GenerationRequest::new(
        input_ids,
        settings.max_new_tokens,
        settings.sampling.clone(),
    );

    debug!(
        engine = engine.name(),
        prompt_tokens = request.input_ids.len(),
        max_new_tokens = request.max_new_tokens,
        stop_tokens = stop.len(),
        "Starting streamed generation"
    );

    let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
    let task = GenerationTask {
        engine,
        request,
        stop,
        sender,
        log_book: log_book.clone(),
    };
    let worker = tokio::task::spawn_blocking(move || task.run());

    Ok(ResponseStream {
        receiver,
        worker: Some(worker),
        buffer: StreamBuffer::new(settings.policy.clone()),
        queue_timeout: settings.queue_timeout,
        response: String::new(),
        done: false,
        log_book,
    })
}

/// Finite, non-restartable sequence of cleaned chunks.
pub struct ResponseStream {
    receiver: mpsc::Receiver<Vec<u8>>,
    worker: Option<JoinHandle<()>>,
    buffer: StreamBuffer,
    queue_timeout: Duration,
    response: String,
    done: bool,
    log_book: Option<Arc<LogBook>>,
}

impl ResponseStream {
    /// Next cleaned chunk; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<String, StreamError>> {
        if self.done {
            return None;
        }

        loop {
            match tokio::time::timeout(self.queue_timeout, self.receiver.recv()).await {
                Ok(Some(piece)) => {
                    if let Some(chunk) = self.buffer.push(&piece) {
                        return Some(Ok(self.record(chunk)));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    self.join_worker().await;
                    return self.buffer.finish().map(|chunk| Ok(self.record(chunk)));
                }
                Err(_) => {
                    self.done = true;
                    // Lets the worker's next send fail so the engine can stop.
                    self.receiver.close();
                    let err = StreamError::QueueTimeout {
                        waited: self.queue_timeout,
                    };
                    warn!(error = %err, "Gave up waiting for generated text");
                    self.log(LogLevel::Error, err.to_string());
                    return Some(Err(err));
                }
            }
        }
    }

    /// Concatenation of every chunk yielded so far.
    pub fn full_response(&self) -> &str {
        &self.response
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<String, StreamError>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }

    fn record(&mut self, chunk: String) -> String {
        self.response.push_str(&chunk);
        chunk
    }

    async fn join_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Err(e) = worker.await {
            let err = StreamError::WorkerPanicked(e.to_string());
            error!(error = %err, "Generation worker did not finish cleanly");
            self.log(LogLevel::Error, err.to_string());
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        if let Some(log_book) = &self.log_book {
            log_book.log(channels::LLM, PROCESS, level, message, true);
        }
    }
}
