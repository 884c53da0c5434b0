//! Decode error types.

use thiserror::Error;

use crate::model::CacheSlot;

/// Errors that terminate a transcription.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Unknown language/task tag or an inconsistent vocabulary.
    ///
    /// Raised before any model call, so no cache entries exist yet.
    #[error("config error: {0}")]
    Config(String),

    /// The model call failed or returned malformed outputs.
    #[error("inference error at {}: {message}", step_label(*.step))]
    Inference {
        /// Generation step index, `None` for the prefill call.
        step: Option<usize>,
        /// What went wrong.
        message: String,
    },

    /// An external cancellation signal was observed around a model call.
    #[error("transcription cancelled")]
    Cancelled,
}

fn step_label(step: Option<usize>) -> String {
    step.map_or_else(|| "prefill".to_string(), |s| format!("step {s}"))
}

impl DecodeError {
    /// Build an [`DecodeError::Inference`] for a given step.
    pub fn inference(step: Option<usize>, message: impl Into<String>) -> Self {
        Self::Inference {
            step,
            message: message.into(),
        }
    }
}

/// Failure reported by a [`DecoderModel`](crate::model::DecoderModel) implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ModelError(pub String);

impl ModelError {
    /// Wrap any displayable error with a context prefix.
    pub fn with_context(context: &str, err: impl std::fmt::Display) -> Self {
        Self(format!("{context}: {err}"))
    }
}

/// Model outputs that cannot be absorbed into the cache.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A slot the cache must hold was missing from the outputs.
    #[error("missing present output for {0}")]
    MissingSlot(CacheSlot),

    /// Outputs referenced a layer the cache was not sized for.
    #[error("unexpected layer {layer} (cache has {layers} layers)")]
    UnexpectedLayer {
        /// Offending layer index.
        layer: usize,
        /// Configured layer count.
        layers: usize,
    },

    /// A self-attention entry did not grow by exactly one position.
    #[error("{slot} has sequence length {actual}, expected {expected}")]
    SelfLengthMismatch {
        /// Offending slot.
        slot: CacheSlot,
        /// Length the slot should have after the step.
        expected: usize,
        /// Length the model returned.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attention, KvPart};

    #[test]
    fn inference_display_names_prefill() {
        let e = DecodeError::inference(None, "session run failed");
        assert_eq!(
            e.to_string(),
            "inference error at prefill: session run failed"
        );
    }

    #[test]
    fn inference_display_names_step() {
        let e = DecodeError::inference(Some(7), "boom");
        assert_eq!(e.to_string(), "inference error at step 7: boom");
    }

    #[test]
    fn config_display() {
        let e = DecodeError::Config("unknown language: xx".into());
        assert!(e.to_string().contains("unknown language: xx"));
    }

    #[test]
    fn model_error_context() {
        let e = ModelError::with_context("extract logits", "bad dtype");
        assert_eq!(e.to_string(), "extract logits: bad dtype");
    }

    #[test]
    fn cache_error_names_slot() {
        let slot = CacheSlot::new(3, Attention::Decoder, KvPart::Value);
        let e = CacheError::MissingSlot(slot);
        assert_eq!(
            e.to_string(),
            "missing present output for past_key_values.3.decoder.value"
        );
    }
}
