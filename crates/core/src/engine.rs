//! Inference engine trait: the abstraction over model runtimes.
//!
//! An engine knows how to turn a conversation into token ids and how to run
//! token-by-token generation, pushing decoded text increments into a
//! [`TextSink`] as they are produced. Generation is **blocking**: callers are
//! expected to run it on a dedicated thread (see the streaming pipeline in
//! `parley-agent`).

use crate::error::EngineError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Sampling parameters forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature (0.0 = greedy)
    pub temperature: f32,

    /// Nucleus sampling threshold
    pub top_p: f32,

    /// When false the engine decodes greedily regardless of temperature
    pub do_sample: bool,

    /// RNG seed for reproducible sampling
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 1.0,
            do_sample: true,
            seed: 42,
        }
    }
}

/// Everything the engine needs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Tokenized prompt
    pub input_ids: Vec<u32>,

    /// One entry per input position; 1 = attend
    pub attention_mask: Vec<u8>,

    /// Token id used for padding
    pub pad_token_id: u32,

    /// Upper bound on generated tokens
    pub max_new_tokens: usize,

    pub sampling: SamplingParams,
}

impl GenerationRequest {
    /// Build a request whose attention mask marks every input position
    /// as attendable.
    pub fn new(input_ids: Vec<u32>, max_new_tokens: usize, sampling: SamplingParams) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self {
            input_ids,
            attention_mask,
            pad_token_id: 0,
            max_new_tokens,
            sampling,
        }
    }
}

/// A stop token as written in configuration: either a raw vocabulary id
/// or a token string to be looked up in the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopToken {
    Id(u32),
    Name(String),
}

/// Set of token ids that halt generation as soon as one is produced.
///
/// The engine evaluates [`StopCondition::should_stop`] after every sampled
/// token. An empty condition never fires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopCondition {
    ids: HashSet<u32>,
}

impl StopCondition {
    pub fn new(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn should_stop(&self, token: u32) -> bool {
        self.ids.contains(&token)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Receiver of raw text increments emitted during generation.
///
/// Increments are bytes, not `str`: an engine streaming at byte granularity
/// may split a multi-byte character across two calls.
pub trait TextSink: Send {
    /// Deliver one increment. Returns `false` once the consumer is gone,
    /// which the engine should treat as a request to stop.
    fn emit(&mut self, piece: &[u8]) -> bool;
}

/// The core engine trait.
///
/// Implementations: Candle-backed local GGUF models (`parley-providers`),
/// scripted engines in tests.
pub trait InferenceEngine: Send + Sync {
    /// A human-readable name (e.g., "local/tinyllama").
    fn name(&self) -> &str;

    /// Apply the chat template (with a generation prompt) and tokenize.
    fn tokenize(&self, messages: &[Message]) -> Result<Vec<u32>, EngineError>;

    /// Token count of `messages` as the model would see them.
    fn count_tokens(&self, messages: &[Message]) -> Result<usize, EngineError> {
        Ok(self.tokenize(messages)?.len())
    }

    /// Look up a single token string in the vocabulary.
    fn token_id(&self, _token: &str) -> Option<u32> {
        None
    }

    /// Resolve configured stop tokens into a [`StopCondition`].
    ///
    /// Names unknown to the vocabulary are returned in the second slot so the
    /// caller can report them.
    fn resolve_stop_tokens(&self, tokens: &[StopToken]) -> (StopCondition, Vec<String>) {
        let mut ids = Vec::with_capacity(tokens.len());
        let mut unknown = Vec::new();
        for token in tokens {
            match token {
                StopToken::Id(id) => ids.push(*id),
                StopToken::Name(name) => match self.token_id(name) {
                    Some(id) => ids.push(id),
                    None => unknown.push(name.clone()),
                },
            }
        }
        (StopCondition::new(ids), unknown)
    }

    /// Run generation to completion, streaming increments into `sink`.
    ///
    /// Blocks for the whole generation. Returns early without error when
    /// `stop` fires or the sink reports the consumer is gone.
    fn generate(
        &self,
        request: &GenerationRequest,
        stop: &StopCondition,
        sink: &mut dyn TextSink,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VocabOnly;

    impl InferenceEngine for VocabOnly {
        fn name(&self) -> &str {
            "vocab_only"
        }

        fn tokenize(&self, messages: &[Message]) -> Result<Vec<u32>, EngineError> {
            Ok(vec![0; messages.len()])
        }

        fn token_id(&self, token: &str) -> Option<u32> {
            match token {
                "</s>" => Some(2),
                "<|im_end|>" => Some(32000),
                _ => None,
            }
        }

        fn generate(
            &self,
            _request: &GenerationRequest,
            _stop: &StopCondition,
            _sink: &mut dyn TextSink,
        ) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn attention_mask_covers_every_position() {
        let req = GenerationRequest::new(vec![5, 6, 7], 16, SamplingParams::default());
        assert_eq!(req.attention_mask, vec![1, 1, 1]);
        assert_eq!(req.pad_token_id, 0);
    }

    #[test]
    fn stop_condition_matches_configured_ids() {
        let stop = StopCondition::new([2, 7]);
        assert!(stop.should_stop(7));
        assert!(!stop.should_stop(3));
        assert!(!StopCondition::default().should_stop(2));
    }

    #[test]
    fn stop_tokens_resolve_by_id_and_name() {
        let tokens = vec![
            StopToken::Id(11),
            StopToken::Name("</s>".into()),
            StopToken::Name("<nope>".into()),
        ];
        let (stop, unknown) = VocabOnly.resolve_stop_tokens(&tokens);
        assert_eq!(stop.len(), 2);
        assert!(stop.should_stop(11));
        assert!(stop.should_stop(2));
        assert_eq!(unknown, vec!["<nope>".to_string()]);
    }

    #[test]
    fn stop_tokens_deserialize_untagged() {
        let tokens: Vec<StopToken> = serde_json::from_str(r#"[2, "<|im_end|>"]"#).unwrap();
        assert_eq!(
            tokens,
            vec![StopToken::Id(2), StopToken::Name("<|im_end|>".into())]
        );
    }

    #[test]
    fn default_count_tokens_uses_tokenize() {
        let msgs = vec![Message::system("a"), Message::user("b")];
        assert_eq!(VocabOnly.count_tokens(&msgs).unwrap(), 2);
    }
}
