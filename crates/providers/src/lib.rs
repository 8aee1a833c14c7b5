//! Inference engine implementations for Parley.
//!
//! All engines implement the `parley_core::InferenceEngine` trait.
//! The Candle-backed [`LocalEngine`] is compiled with the `local` feature.

#[cfg(feature = "local")]
pub mod local;
pub mod presets;
pub mod template;

#[cfg(feature = "local")]
pub use local::LocalEngine;
pub use presets::{ModelPreset, PRESET_NAMES, resolve_preset};
pub use template::ChatTemplate;
