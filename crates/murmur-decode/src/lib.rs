//! Cache-carrying greedy decode loop for Whisper-style speech models.
//!
//! # Architecture
//!
//! ```text
//! PromptOptions → Prompt [sos, lang, task, notimestamps]
//! → prefill: DecoderModel::run(prompt, audio, use_cache=false) → CacheStore
//! → generate: DecoderModel::run([last], audio, use_cache=true) → CacheStore
//!   → Sampler::select(last logits row, history) → next id
//! → end-of-sequence / step ceiling → detokenize → text
//! ```
//!
//! The model itself is an external collaborator behind [`DecoderModel`]; the
//! ONNX Runtime adapter lives in `murmur-transcription`.

pub mod cache;
pub mod detokenize;
pub mod engine;
pub mod error;
pub mod model;
pub mod prompt;
pub mod sampler;
pub mod special;
pub mod vocab;

pub use cache::CacheStore;
pub use detokenize::detokenize;
pub use engine::{
    DecodeConfig, DecodeEngine, GenerationState, Phase, StopReason, Transcript, Transcription,
};
pub use error::{CacheError, DecodeError, ModelError};
pub use model::{
    Attention, CacheSlot, CacheTensor, DecoderInput, DecoderModel, DecoderOutput, KvPart,
    LayerPresent,
};
pub use prompt::{Prompt, PromptConfig, PromptOptions};
pub use sampler::{Sampler, SamplerConfig};
pub use special::SpecialTokens;
pub use vocab::Vocabulary;
pub use tokio_util::sync::CancellationToken;
