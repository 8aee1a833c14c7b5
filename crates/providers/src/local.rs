//! Local inference engine. Runs GGUF models directly on your hardware.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML) for
//! quantized llama-architecture models (TinyLlama, SmolLM, Qwen2, Phi-2 GGUF
//! exports) and `tokenizers` for the vocabulary.
//!
//! Generation is synchronous and streams decoded text into a
//! [`TextSink`] token by token; the streaming pipeline runs it on a blocking
//! worker thread.

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use parley_core::engine::{GenerationRequest, InferenceEngine, StopCondition, TextSink};
use parley_core::error::EngineError;
use parley_core::message::Message;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::presets::{PRESET_NAMES, resolve_preset};
use crate::template::ChatTemplate;

/// Fallback tokenizer for bare GGUF files without a `tokenizer.json` beside them.
const FALLBACK_TOKENIZER_REPO: &str = "TinyLlama/TinyLlama-1.1B-Chat-v1.0";

/// An engine running a GGUF-quantized model locally via Candle.
///
/// The weights sit behind a Mutex: a forward pass mutates the KV cache, so
/// only one generation runs at a time. Tokenization does not take the lock.
pub struct LocalEngine {
    name: String,
    weights: Mutex<qlm::ModelWeights>,
    tokenizer: Tokenizer,
    device: Device,
    chat_template: ChatTemplate,
    eos_token_id: u32,
}

/// Parse a device name from configuration.
pub fn select_device(name: &str) -> Result<Device, EngineError> {
    let device = match name.to_lowercase().as_str() {
        "cpu" => Device::Cpu,
        "cuda" | "gpu" => Device::new_cuda(0).map_err(|e| {
            EngineError::UnsupportedDevice(format!("CUDA device unavailable: {e}"))
        })?,
        "metal" => Device::new_metal(0).map_err(|e| {
            EngineError::UnsupportedDevice(format!("Metal device unavailable: {e}"))
        })?,
        "auto" => Device::cuda_if_available(0).map_err(|e| {
            EngineError::UnsupportedDevice(format!("Device initialization failed: {e}"))
        })?,
        other => {
            return Err(EngineError::UnsupportedDevice(format!(
                "Unknown device '{other}'. Use cpu, cuda, metal or auto."
            )));
        }
    };
    Ok(device)
}

impl LocalEngine {
    /// Load a model by preset alias or `.gguf` path onto `device_name`.
    ///
    /// Presets are downloaded through the Hugging Face Hub cache on first use.
    pub fn load(model_name: &str, device_name: &str) -> Result<Self, EngineError> {
        let device = select_device(device_name)?;

        if Path::new(model_name).exists() && model_name.ends_with(".gguf") {
            return Self::load_from_path(Path::new(model_name), device);
        }

        let preset = resolve_preset(model_name).ok_or_else(|| {
            EngineError::ModelNotFound(format!(
                "Unknown local model '{}'. Available presets: {}. \
                 Or provide a path to a .gguf file.",
                model_name,
                PRESET_NAMES.join(", ")
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        let api = Api::new().map_err(|e| {
            EngineError::Network(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let model_path = api
            .model(preset.repo.to_string())
            .get(preset.gguf_file)
            .map_err(|e| {
                EngineError::Network(format!(
                    "Failed to download model '{}' from '{}': {e}",
                    preset.gguf_file, preset.repo
                ))
            })?;

        info!(path = %model_path.display(), "Model file ready");

        let tokenizer_path = api
            .model(preset.tokenizer_repo.to_string())
            .get("tokenizer.json")
            .map_err(|e| {
                EngineError::Network(format!(
                    "Failed to download tokenizer from '{}': {e}",
                    preset.tokenizer_repo
                ))
            })?;

        let tokenizer = load_tokenizer(&tokenizer_path)?;
        let weights = load_weights(&model_path, &device)?;

        Ok(Self::assemble(
            format!("local/{model_name}"),
            weights,
            tokenizer,
            device,
            preset.chat_template,
        ))
    }

    /// Load from an explicit GGUF file path.
    fn load_from_path(path: &Path, device: Device) -> Result<Self, EngineError> {
        info!(path = %path.display(), "Loading local GGUF model");

        let weights = load_weights(path, &device)?;

        let tokenizer_path = path.with_file_name("tokenizer.json");
        let tokenizer = if tokenizer_path.exists() {
            load_tokenizer(&tokenizer_path)?
        } else {
            warn!(
                repo = FALLBACK_TOKENIZER_REPO,
                "No tokenizer.json found next to GGUF file, downloading fallback tokenizer"
            );
            let api = Api::new()
                .map_err(|e| EngineError::Network(format!("HuggingFace Hub API error: {e}")))?;
            let tok_path = api
                .model(FALLBACK_TOKENIZER_REPO.to_string())
                .get("tokenizer.json")
                .map_err(|e| {
                    EngineError::Network(format!("Failed to download fallback tokenizer: {e}"))
                })?;
            load_tokenizer(&tok_path)?
        };

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gguf".into());

        Ok(Self::assemble(
            format!("local/{name}"),
            weights,
            tokenizer,
            device,
            ChatTemplate::ChatML,
        ))
    }

    fn assemble(
        name: String,
        weights: qlm::ModelWeights,
        tokenizer: Tokenizer,
        device: Device,
        chat_template: ChatTemplate,
    ) -> Self {
        let eos_token_id = chat_template
            .end_of_turn_tokens()
            .iter()
            .find_map(|t| tokenizer.token_to_id(t))
            .or_else(|| tokenizer.token_to_id("</s>"))
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .unwrap_or(2);

        info!(engine = %name, eos_token_id, "Local model loaded successfully");

        Self {
            name,
            weights: Mutex::new(weights),
            tokenizer,
            device,
            chat_template,
            eos_token_id,
        }
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, EngineError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| EngineError::Generation(format!("Detokenization failed: {e}")))
    }
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer, EngineError> {
    Tokenizer::from_file(path)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to load tokenizer: {e}")))
}

fn load_weights(path: &Path, device: &Device) -> Result<qlm::ModelWeights, EngineError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to open model file: {e}")))?;

    let gguf = gguf_file::Content::read(&mut file)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to parse GGUF file: {e}")))?;

    qlm::ModelWeights::from_gguf(gguf, &mut file, device)
        .map_err(|e| EngineError::LoadFailed(format!("Failed to load model weights: {e}")))
}

/// Map Candle errors to EngineError.
fn map_candle_err(e: candle_core::Error) -> EngineError {
    EngineError::Generation(format!("Candle inference error: {e}"))
}

impl InferenceEngine for LocalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn tokenize(&self, messages: &[Message]) -> Result<Vec<u32>, EngineError> {
        let prompt = self.chat_template.render(messages);
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn token_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        stop: &StopCondition,
        sink: &mut dyn TextSink,
    ) -> Result<(), EngineError> {
        let sampling = &request.sampling;
        let temperature = (sampling.do_sample && sampling.temperature > 0.0)
            .then_some(sampling.temperature as f64);
        let top_p = (sampling.top_p < 1.0).then_some(sampling.top_p as f64);
        let mut logits_processor = LogitsProcessor::new(sampling.seed, temperature, top_p);

        debug!(
            prompt_tokens = request.input_ids.len(),
            max_new_tokens = request.max_new_tokens,
            stop_tokens = stop.len(),
            ?temperature,
            "Starting local generation"
        );

        let mut weights = self
            .weights
            .lock()
            .map_err(|_| EngineError::Generation("Model lock poisoned".into()))?;

        let mut input = Tensor::new(request.input_ids.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut index_pos = 0;
        let mut generated: Vec<u32> = Vec::new();
        let mut emitted = 0;

        for _ in 0..request.max_new_tokens {
            let seq_len = input.dim(1).map_err(map_candle_err)?;
            let logits = weights
                .forward(&input, index_pos)
                .and_then(|l| l.squeeze(0))
                .map_err(map_candle_err)?;
            index_pos += seq_len;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if next_token == self.eos_token_id || stop.should_stop(next_token) {
                debug!(token = next_token, "Stop token produced");
                break;
            }
            generated.push(next_token);

            let text = self.decode(&generated)?;
            if let Some(tail) = unsent_tail(&text, &mut emitted) {
                if !sink.emit(tail.as_bytes()) {
                    debug!("Consumer went away, stopping generation");
                    return Ok(());
                }
                emitted = text.len();
            }

            input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        debug!(completion_tokens = generated.len(), "Generation complete");
        Ok(())
    }
}

/// The part of `text` past the `emitted` cursor, or `None` while the decoded
/// tail is still an incomplete character.
///
/// Re-decoding the whole sequence can rewrite text that was already sent.
/// A cursor that no longer lands on a character boundary moves forward to
/// the next one.
fn unsent_tail<'a>(text: &'a str, emitted: &mut usize) -> Option<&'a str> {
    if text.ends_with('\u{FFFD}') {
        return None;
    }
    if *emitted > text.len() {
        warn!(emitted = *emitted, decoded = text.len(), "Decoded text shrank below emitted length");
        *emitted = text.len();
        return None;
    }
    if !text.is_char_boundary(*emitted) {
        let resync = (*emitted..=text.len())
            .find(|&i| text.is_char_boundary(i))
            .unwrap_or(text.len());
        warn!(from = *emitted, to = resync, "Decoded text shifted under emit cursor, resyncing");
        *emitted = resync;
    }
    (text.len() > *emitted).then(|| &text[*emitted..])
}
