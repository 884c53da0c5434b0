//! Core types for the transcription pipeline.

use murmur_decode::{DecodeError, StopReason};
use murmur_settings::SettingsError;
use serde::{Serialize, Serializer};

/// Result of transcribing an audio file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    /// The transcribed text.
    pub text: String,
    /// Language code the prompt was built with (e.g. "zh").
    pub language: String,
    /// Duration of the decoded audio in seconds.
    pub duration_seconds: f64,
    /// Number of ids emitted by the decoder.
    pub tokens: usize,
    /// Why generation stopped.
    #[serde(serialize_with = "serialize_stop_reason")]
    pub stop_reason: StopReason,
}

fn serialize_stop_reason<S: Serializer>(reason: &StopReason, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(reason.as_str())
}

/// Errors that can occur during transcription.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    /// Model files not found or failed to download.
    #[error("model not available: {0}")]
    ModelNotAvailable(String),

    /// ONNX Runtime session creation or inference failure.
    #[error("inference error: {0}")]
    Inference(String),

    /// Audio decoding failure (unsupported format, corrupt data).
    #[error("audio decode error: {0}")]
    AudioDecode(String),

    /// Resampling failure.
    #[error("resample error: {0}")]
    Resample(String),

    /// I/O error (file read/write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The decode loop failed, was cancelled or was misconfigured.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl TranscriptionError {
    /// Whether the transcription was stopped by its cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Decode(DecodeError::Cancelled))
    }
}

/// Extension trait to reduce `.map_err()` boilerplate when wrapping errors into `TranscriptionError`.
pub trait ResultExt<T> {
    /// Wrap the error as [`TranscriptionError::Inference`] with `context` prefix.
    fn inference(self, context: &str) -> Result<T, TranscriptionError>;
    /// Wrap the error as [`TranscriptionError::AudioDecode`] with `context` prefix.
    fn audio_decode(self, context: &str) -> Result<T, TranscriptionError>;
    /// Wrap the error as [`TranscriptionError::Resample`] with `context` prefix.
    fn resample(self, context: &str) -> Result<T, TranscriptionError>;
    /// Wrap the error as [`TranscriptionError::ModelNotAvailable`] with `context` prefix.
    fn model(self, context: &str) -> Result<T, TranscriptionError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn inference(self, context: &str) -> Result<T, TranscriptionError> {
        self.map_err(|e| TranscriptionError::Inference(format!("{context}: {e}")))
    }
    fn audio_decode(self, context: &str) -> Result<T, TranscriptionError> {
        self.map_err(|e| TranscriptionError::AudioDecode(format!("{context}: {e}")))
    }
    fn resample(self, context: &str) -> Result<T, TranscriptionError> {
        self.map_err(|e| TranscriptionError::Resample(format!("{context}: {e}")))
    }
    fn model(self, context: &str) -> Result<T, TranscriptionError> {
        self.map_err(|e| TranscriptionError::ModelNotAvailable(format!("{context}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_error_display() {
        let e = TranscriptionError::ModelNotAvailable("missing encoder".into());
        assert!(e.to_string().contains("missing encoder"));

        let e = TranscriptionError::AudioDecode("corrupt header".into());
        assert!(e.to_string().contains("corrupt header"));
    }

    #[test]
    fn decode_errors_pass_through() {
        let e: TranscriptionError = DecodeError::inference(Some(4), "boom").into();
        assert_eq!(e.to_string(), "inference error at step 4: boom");
        assert!(!e.is_cancelled());

        let e: TranscriptionError = DecodeError::Cancelled.into();
        assert!(e.is_cancelled());
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = TranscriptionResult {
            text: "hello".into(),
            language: "en".into(),
            duration_seconds: 1.5,
            tokens: 3,
            stop_reason: StopReason::EndOfSequence,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["durationSeconds"], 1.5);
        assert_eq!(value["stopReason"], "end_of_sequence");
        assert_eq!(value["tokens"], 3);
    }

    #[test]
    fn result_ext_inference_context() {
        let err: Result<(), &str> = Err("onnx failure");
        let mapped = err.inference("encoder run");
        assert!(matches!(mapped, Err(TranscriptionError::Inference(s)) if s == "encoder run: onnx failure"));
    }

    #[test]
    fn result_ext_audio_decode_context() {
        let err: Result<(), &str> = Err("corrupt header");
        let mapped = err.audio_decode("probe");
        assert!(matches!(mapped, Err(TranscriptionError::AudioDecode(s)) if s == "probe: corrupt header"));
    }

    #[test]
    fn result_ext_resample_context() {
        let err: Result<(), &str> = Err("ratio invalid");
        let mapped = err.resample("init");
        assert!(matches!(mapped, Err(TranscriptionError::Resample(s)) if s == "init: ratio invalid"));
    }

    #[test]
    fn result_ext_model_context() {
        let err: Result<(), &str> = Err("download failed");
        let mapped = err.model("ensure_model");
        assert!(matches!(mapped, Err(TranscriptionError::ModelNotAvailable(s)) if s == "ensure_model: download failed"));
    }

    #[test]
    fn result_ext_ok_passthrough() {
        let ok: Result<i32, &str> = Ok(42);
        assert_eq!(ok.inference("ctx").unwrap(), 42);
    }
}
