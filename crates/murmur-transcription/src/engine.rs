//! ONNX session management and the end-to-end inference pipeline.

use std::path::Path;
use std::sync::Arc;

use murmur_decode::{
    CancellationToken, DecodeEngine, DecodeError, PromptOptions, SpecialTokens,
};
use murmur_settings::MurmurSettings;
use ort::session::Session;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::audio;
use crate::config::checked_decode_config;
use crate::features::LogMelExtractor;
use crate::model::{self, ModelPaths};
use crate::onnx::{self, OnnxDecoder};
use crate::types::{ResultExt, TranscriptionError, TranscriptionResult};

/// Whisper transcription engine on ONNX Runtime.
///
/// Holds the encoder session, the decode engine (merged decoder session,
/// vocabulary, special tokens) and the log-mel front end. Sessions sit
/// behind a `Mutex` since `Session::run` requires `&mut self`. All CPU work
/// runs on `spawn_blocking`.
pub struct TranscriptionEngine {
    encoder: Mutex<Session>,
    decoder: DecodeEngine<OnnxDecoder>,
    features: LogMelExtractor,
}

impl TranscriptionEngine {
    /// Create an engine from the model directory named by `settings`.
    ///
    /// Loads several hundred MB of weights; call once at startup.
    pub async fn new(settings: MurmurSettings) -> Result<Arc<Self>, TranscriptionError> {
        let model_dir = model::resolve_model_dir(&settings.model);
        tokio::task::spawn_blocking(move || Self::load(&model_dir, &settings))
            .await
            .inference("task join")?
            .map(Arc::new)
    }

    fn load(model_dir: &Path, settings: &MurmurSettings) -> Result<Self, TranscriptionError> {
        info!(
            "loading transcription model from {}...",
            model_dir.display()
        );
        let config = checked_decode_config(settings)?;
        let paths = ModelPaths::from_dir(model_dir, &settings.model);
        if !paths.all_exist() {
            return Err(TranscriptionError::ModelNotAvailable(format!(
                "model files missing under {} (run `murmur download`)",
                model_dir.display()
            )));
        }

        let encoder = onnx::load_session(&paths.encoder, settings.runtime.intra_threads)?;
        debug!("loaded encoder");

        let decoder = OnnxDecoder::load(
            &paths.decoder,
            settings.model.layers,
            settings.runtime.decoder_threads,
        )?;

        let vocab = model::load_vocabulary(&paths)?;
        let special = SpecialTokens::from_vocabulary(&vocab)?;

        info!(
            vocab_size = vocab.len(),
            layers = config.layers,
            heads = config.heads,
            max_tokens = config.max_tokens,
            "transcription engine ready"
        );

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: DecodeEngine::new(decoder, vocab, special, config)?,
            features: LogMelExtractor::new(),
        })
    }

    /// Transcribe raw audio bytes.
    ///
    /// Pipeline: decode audio → resample to 16 kHz → log-mel → encoder →
    /// cached greedy decode → text. Cancelling `cancel` stops the decode
    /// loop at the next model call boundary.
    pub async fn transcribe(
        self: &Arc<Self>,
        audio_data: &[u8],
        mime_type: &str,
        options: PromptOptions,
        cancel: CancellationToken,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let data = audio_data.to_vec();
        let mime = mime_type.to_string();
        let decoded = tokio::task::spawn_blocking(move || audio::decode_audio(&data, &mime))
            .await
            .inference("audio decode task")??;

        let duration_seconds = decoded.duration_seconds();
        debug!(
            "decoded {:.1}s of audio ({} samples, source rate {})",
            duration_seconds,
            decoded.samples.len(),
            decoded.source_rate
        );

        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            engine.run_inference(&decoded.samples, &options, &cancel, duration_seconds)
        })
        .await
        .inference("inference task")?
    }

    /// Features, encoder and decode loop (CPU-bound, must be on a blocking thread).
    fn run_inference(
        &self,
        samples: &[f32],
        options: &PromptOptions,
        cancel: &CancellationToken,
        duration_seconds: f64,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let features = self.features.compute(samples);
        debug!("mel features: {:?}", features.shape());

        if cancel.is_cancelled() {
            return Err(DecodeError::Cancelled.into());
        }

        let encoded = {
            let mut encoder = self.encoder.lock();
            onnx::run_encoder(&mut encoder, &features)?
        };
        debug!("encoder output: {:?}", encoded.shape());

        let transcript = self
            .decoder
            .transcribe_with_cancel(encoded.view(), options, cancel)?;

        let language = options
            .language
            .clone()
            .unwrap_or_else(|| self.decoder.config().prompt.default_language.clone());

        Ok(TranscriptionResult {
            text: transcript.text,
            language,
            duration_seconds,
            tokens: transcript.tokens.len(),
            stop_reason: transcript.stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(dir: &Path) -> MurmurSettings {
        let mut settings = MurmurSettings::default();
        settings.model.dir = Some(dir.to_string_lossy().into_owned());
        settings
    }

    #[tokio::test]
    async fn engine_rejects_invalid_settings_before_loading() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings_for(tmp.path());
        settings.decode.task = "summarize".into();
        let result = TranscriptionEngine::new(settings).await;
        assert!(matches!(result, Err(TranscriptionError::Settings(_))));
    }

    #[tokio::test]
    async fn engine_requires_model_files() {
        let tmp = tempfile::tempdir().unwrap();
        let result = TranscriptionEngine::new(settings_for(tmp.path())).await;
        assert!(matches!(
            result,
            Err(TranscriptionError::ModelNotAvailable(msg)) if msg.contains("murmur download")
        ));
    }

    // Needs the model download; run with `cargo test --features ort -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn transcribe_silence_produces_short_text() {
        let settings = MurmurSettings::default();
        let model_dir = model::resolve_model_dir(&settings.model);
        model::ensure_model(&model_dir, &settings.model).await.unwrap();
        let engine = TranscriptionEngine::new(settings).await.unwrap();

        let wav = crate::audio::tests::generate_test_wav(16000, 1, 16000);
        let result = engine
            .transcribe(
                &wav,
                "audio/wav",
                PromptOptions::default().language("en"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.language, "en");
        assert!((result.duration_seconds - 1.0).abs() < 0.05);
        assert!(result.tokens >= 1);
    }

    #[tokio::test]
    #[ignore]
    async fn cancelled_token_stops_transcription() {
        let settings = MurmurSettings::default();
        let model_dir = model::resolve_model_dir(&settings.model);
        model::ensure_model(&model_dir, &settings.model).await.unwrap();
        let engine = TranscriptionEngine::new(settings).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let wav = crate::audio::tests::generate_test_wav(16000, 1, 16000);
        let err = engine
            .transcribe(&wav, "audio/wav", PromptOptions::default(), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
