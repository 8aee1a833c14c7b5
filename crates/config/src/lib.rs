//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use parley_core::engine::{SamplingParams, StopToken};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model and sampling settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Context window settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Streaming pipeline settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Log file settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Preset alias (`tinyllama`, `smollm:135m`, ...) or a path to a `.gguf` file
    #[serde(default = "default_model_name")]
    pub name: String,

    /// `cpu`, `cuda`, `metal` or `auto`
    #[serde(default = "default_device")]
    pub device: String,

    /// Maximum tokens generated per response
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_true")]
    pub do_sample: bool,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Token ids or token strings that end generation early
    #[serde(default)]
    pub stop_tokens: Vec<StopToken>,
}

fn default_model_name() -> String {
    "tinyllama".into()
}
fn default_device() -> String {
    "cpu".into()
}
fn default_max_new_tokens() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    1.0
}
fn default_seed() -> u64 {
    42
}
fn default_true() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            device: default_device(),
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            do_sample: true,
            seed: default_seed(),
            stop_tokens: vec![],
        }
    }
}

impl ModelConfig {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            do_sample: self.do_sample,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for an assembled prompt
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_context_tokens() -> usize {
    2048
}
fn default_system_prompt() -> String {
    "You are Parley, a concise and friendly assistant running on local hardware.".into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Buffered characters that force a flush
    #[serde(default = "default_min_flush_chars")]
    pub min_flush_chars: usize,

    /// Any of these characters in the buffer forces a flush
    #[serde(default = "default_boundary_chars")]
    pub boundary_chars: String,

    /// Markers stripped from every flush
    #[serde(default = "default_control_markers")]
    pub control_markers: Vec<String>,

    /// Seconds the consumer waits for the next increment
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,

    /// Bounded queue capacity between generator and consumer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_min_flush_chars() -> usize {
    10
}
fn default_boundary_chars() -> String {
    ".!?,\n".into()
}
fn default_control_markers() -> Vec<String> {
    vec!["<|endoftext|>".into(), "<|pad|>".into()]
}
fn default_queue_timeout_secs() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            min_flush_chars: default_min_flush_chars(),
            boundary_chars: default_boundary_chars(),
            control_markers: default_control_markers(),
            queue_timeout_secs: default_queue_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Root directory for `llm/` and `chat/` log channels
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Write a JSONL transcript per conversation
    #[serde(default = "default_true")]
    pub transcripts: bool,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            transcripts: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `PARLEY_MODEL`
    /// - `PARLEY_DEVICE`
    /// - `PARLEY_SYSTEM_PROMPT`
    /// - `PARLEY_LOGS_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("PARLEY_MODEL") {
            self.model.name = model;
        }
        if let Some(device) = lookup("PARLEY_DEVICE") {
            self.model.device = device;
        }
        if let Some(prompt) = lookup("PARLEY_SYSTEM_PROMPT") {
            self.context.system_prompt = prompt;
        }
        if let Some(dir) = lookup("PARLEY_LOGS_DIR") {
            self.logging.logs_dir = PathBuf::from(dir);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.model.top_p <= 0.0 || self.model.top_p > 1.0 {
            return Err(ConfigError::ValidationError(
                "model.top_p must be in (0.0, 1.0]".into(),
            ));
        }

        if self.model.max_new_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_new_tokens must be > 0".into(),
            ));
        }

        if self.context.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_tokens must be > 0".into(),
            ));
        }

        if self.stream.min_flush_chars == 0 {
            return Err(ConfigError::ValidationError(
                "stream.min_flush_chars must be > 0".into(),
            ));
        }

        if self.stream.queue_capacity == 0 || self.stream.queue_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "stream.queue_capacity and stream.queue_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
