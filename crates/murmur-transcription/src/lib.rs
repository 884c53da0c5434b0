//! Whisper transcription on ONNX Runtime around the `murmur-decode` loop.
//!
//! # Architecture
//!
//! ```text
//! audio bytes → symphonia decode → rubato resample to 16kHz mono f32
//! → log-mel front end (rustfft) → features [1, 80, 3000]
//! → encoder_model.onnx → encoder output [1, 1500, D]
//! → murmur-decode loop (decoder_model_merged.onnx per step) → token IDs
//! → vocab.json / added_tokens.json lookup → text string
//! ```
//!
//! ## Crate Position
//!
//! Depends on: murmur-decode, murmur-settings.
//! Depended on by: murmur-cli.

// Always available (no heavy deps)
pub mod config;
pub mod model;
pub mod types;

// Feature-gated (require symphonia + rubato + rustfft)
#[cfg(feature = "audio")]
pub mod audio;
#[cfg(feature = "audio")]
pub mod features;

// Feature-gated (require ort + hf-hub)
#[cfg(feature = "ort")]
pub mod engine;
#[cfg(feature = "ort")]
pub mod onnx;

pub use config::{checked_decode_config, decode_config};
pub use model::{ModelPaths, is_model_cached, load_vocabulary, resolve_model_dir};
pub use types::{ResultExt, TranscriptionError, TranscriptionResult};
#[cfg(feature = "ort")]
pub use engine::TranscriptionEngine;
#[cfg(feature = "ort")]
pub use model::ensure_model;
