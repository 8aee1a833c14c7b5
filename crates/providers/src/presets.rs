//! Well-known model aliases.
//!
//! Friendly names that resolve to Hugging Face repos, GGUF filenames and the
//! chat template the model was tuned with.

use crate::template::ChatTemplate;

/// A downloadable GGUF model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPreset {
    pub repo: &'static str,
    pub gguf_file: &'static str,
    pub tokenizer_repo: &'static str,
    pub chat_template: ChatTemplate,
}

/// Every alias accepted by [`resolve_preset`], for help output.
pub const PRESET_NAMES: &[&str] = &[
    "tinyllama",
    "smollm:135m",
    "smollm:360m",
    "smollm:1.7b",
    "phi2",
    "qwen:0.5b",
    "qwen:1.5b",
];

pub fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    let alias_lower = alias.to_lowercase();
    match alias_lower.as_str() {
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
            chat_template: ChatTemplate::TinyLlama,
        }),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-135M-Instruct-GGUF",
            gguf_file: "smollm-135m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-135M-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm:360m" | "smollm-360m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-360M-Instruct-GGUF",
            gguf_file: "smollm-360m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-360M-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm:1.7b" | "smollm-1.7b" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-1.7B-Instruct-GGUF",
            gguf_file: "smollm-1.7b-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-1.7B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "phi2" | "phi-2" => Some(ModelPreset {
            repo: "TheBloke/phi-2-GGUF",
            gguf_file: "phi-2.Q4_K_M.gguf",
            tokenizer_repo: "microsoft/phi-2",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:0.5b" | "qwen-0.5b" | "qwen2-0.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-0.5B-Instruct-GGUF",
            gguf_file: "qwen2-0_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-0.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:1.5b" | "qwen-1.5b" | "qwen2-1.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-1.5B-Instruct-GGUF",
            gguf_file: "qwen2-1_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-1.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        _ => None,
    }
}
