//! Shared test helpers for pipeline and session tests.

use parley_core::engine::{GenerationRequest, InferenceEngine, StopCondition, TextSink};
use parley_core::error::EngineError;
use parley_core::message::Message;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// An engine that replays scripted byte increments.
///
/// Tokenization counts whitespace-separated words; increment `i` is treated
/// as token id `i` for stop-condition checks.
pub struct ScriptedEngine {
    increments: Vec<Vec<u8>>,
    fail_after: Option<usize>,
    panic_after: Option<usize>,
    fail_tokenize: bool,
    delay: Duration,
    emitted: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedEngine {
    pub fn new<I, P>(increments: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        Self {
            increments: increments
                .into_iter()
                .map(|p| p.as_ref().to_vec())
                .collect(),
            fail_after: None,
            panic_after: None,
            fail_tokenize: false,
            delay: Duration::ZERO,
            emitted: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return a generation error once `n` increments have been emitted.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Panic once `n` increments have been emitted.
    pub fn panic_after(mut self, n: usize) -> Self {
        self.panic_after = Some(n);
        self
    }

    pub fn fail_tokenize(mut self) -> Self {
        self.fail_tokenize = true;
        self
    }

    /// Sleep before every increment.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Increments the consumer accepted.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn tokenize(&self, messages: &[Message]) -> Result<Vec<u32>, EngineError> {
        if self.fail_tokenize {
            return Err(EngineError::Tokenization("scripted tokenizer failure".into()));
        }
        let words: usize = messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();
        Ok((0..words as u32).collect())
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        match token {
            "</s>" => Some(2),
            "<|endoftext|>" => Some(50256),
            _ => None,
        }
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        stop: &StopCondition,
        sink: &mut dyn TextSink,
    ) -> Result<(), EngineError> {
        self.requests.lock().unwrap().push(request.clone());

        for (i, piece) in self.increments.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(EngineError::Generation("scripted failure".into()));
            }
            if self.panic_after == Some(i) {
                panic!("scripted panic");
            }
            if stop.should_stop(i as u32) {
                return Ok(());
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if !sink.emit(piece) {
                return Ok(());
            }
            self.emitted.fetch_add(1, Ordering::SeqCst);
        }

        if self.fail_after == Some(self.increments.len()) {
            return Err(EngineError::Generation("scripted failure".into()));
        }
        Ok(())
    }
}
