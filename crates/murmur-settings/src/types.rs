//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file only needs the fields it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{KNOWN_TASKS, Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "model": { "dir": "/opt/models/whisper", "layers": 24 },
///   "decode": { "language": "en", "maxTokens": 120 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MurmurSettings {
    /// Model files and geometry.
    pub model: ModelSettings,
    /// Decode loop behavior.
    pub decode: DecodeSettings,
    /// ONNX Runtime threading.
    pub runtime: RuntimeSettings,
}

impl MurmurSettings {
    /// Reject values no decode can run with.
    pub fn validate(&self) -> Result<()> {
        if self.model.layers == 0 {
            return Err(SettingsError::invalid("model.layers", "must be at least 1"));
        }
        if self.model.heads == Some(0) {
            return Err(SettingsError::invalid("model.heads", "must be at least 1"));
        }
        if self.model.head_dim == 0 {
            return Err(SettingsError::invalid("model.headDim", "must be at least 1"));
        }
        let d = &self.decode;
        for (key, value) in [
            ("decode.lastTokenPenalty", d.last_token_penalty),
            ("decode.windowPenalty", d.window_penalty),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SettingsError::invalid(
                    key,
                    format!("must be a finite, non-negative number (got {value})"),
                ));
            }
        }
        let tasks = std::iter::once(("decode.task", &d.task)).chain(
            d.secondary_pair
                .as_ref()
                .map(|pair| ("decode.secondaryPair.task", &pair.task)),
        );
        for (key, task) in tasks {
            if !KNOWN_TASKS.contains(&task.as_str()) {
                return Err(SettingsError::UnknownTask {
                    key,
                    task: task.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Where the model lives and how it is shaped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    /// Model directory. `None` means `~/.murmur/models/<repo name>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Hugging Face repository the files are downloaded from.
    pub hf_repo: String,
    /// Encoder ONNX file, relative to the model directory.
    pub encoder_file: String,
    /// Merged decoder ONNX file, relative to the model directory.
    pub decoder_file: String,
    /// `token → id` JSON table.
    pub vocab_file: String,
    /// Added/special `marker → id` JSON table.
    pub added_tokens_file: String,
    /// Decoder layer count.
    pub layers: usize,
    /// Attention heads per layer; derived from `layers` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heads: Option<usize>,
    /// Size of one attention head.
    pub head_dim: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: None,
            hf_repo: "onnx-community/whisper-small".to_string(),
            encoder_file: "onnx/encoder_model.onnx".to_string(),
            decoder_file: "onnx/decoder_model_merged.onnx".to_string(),
            vocab_file: "vocab.json".to_string(),
            added_tokens_file: "added_tokens.json".to_string(),
            layers: 12,
            heads: None,
            head_dim: 64,
        }
    }
}

impl ModelSettings {
    /// Explicit head count, or the one the standard Whisper sizes use for
    /// this layer count.
    pub fn resolved_heads(&self) -> usize {
        self.heads.unwrap_or_else(|| heads_for_layers(self.layers))
    }
}

/// Attention heads of the standard Whisper sizes, keyed by decoder layers.
pub fn heads_for_layers(layers: usize) -> usize {
    match layers {
        4 => 6,
        6 => 8,
        12 => 12,
        24 => 16,
        32 => 20,
        _ => 8,
    }
}

/// Decode loop behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecodeSettings {
    /// Generation steps allowed after prefill.
    pub max_tokens: usize,
    /// Language used when a request names none.
    pub language: String,
    /// Task used when a request names none.
    pub task: String,
    /// Extra language/task pair appended to every prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_pair: Option<LanguageTask>,
    /// History length below which end-of-sequence is masked.
    pub min_tokens_before_eos: usize,
    /// Deducted from the previous token's score.
    pub last_token_penalty: f32,
    /// Deducted per occurrence inside the trailing window.
    pub window_penalty: f32,
    /// Trailing window length.
    pub penalty_window: usize,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            language: "zh".to_string(),
            task: "transcribe".to_string(),
            secondary_pair: None,
            min_tokens_before_eos: 10,
            last_token_penalty: 1.0,
            window_penalty: 0.5,
            penalty_window: 5,
        }
    }
}

/// A language code and task tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageTask {
    /// Language code, e.g. `zh`.
    pub language: String,
    /// Task tag, e.g. `transcribe`.
    pub task: String,
}

/// ONNX Runtime threading.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Intra-op threads for the encoder session. `0` lets the runtime decide.
    pub intra_threads: usize,
    /// Intra-op threads for the decoder session.
    pub decoder_threads: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            // The decoder runs one token at a time.
            decoder_threads: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heads_follow_whisper_sizes() {
        assert_eq!(heads_for_layers(4), 6);
        assert_eq!(heads_for_layers(6), 8);
        assert_eq!(heads_for_layers(12), 12);
        assert_eq!(heads_for_layers(24), 16);
        assert_eq!(heads_for_layers(32), 20);
        assert_eq!(heads_for_layers(7), 8);
    }

    #[test]
    fn explicit_heads_win() {
        let model = ModelSettings {
            heads: Some(3),
            ..ModelSettings::default()
        };
        assert_eq!(model.resolved_heads(), 3);
        assert_eq!(ModelSettings::default().resolved_heads(), 12);
    }

    #[test]
    fn serializes_camel_case_without_unset_options() {
        let value = serde_json::to_value(MurmurSettings::default()).unwrap();
        assert_eq!(value["model"]["hfRepo"], "onnx-community/whisper-small");
        assert_eq!(value["decode"]["maxTokens"], 200);
        assert_eq!(value["decode"]["minTokensBeforeEos"], 10);
        assert!(value["model"].get("dir").is_none());
        assert!(value["decode"].get("secondaryPair").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: MurmurSettings =
            serde_json::from_str(r#"{"decode": {"secondaryPair": {"language": "zh", "task": "transcribe"}}}"#)
                .unwrap();
        assert_eq!(
            settings.decode.secondary_pair,
            Some(LanguageTask {
                language: "zh".into(),
                task: "transcribe".into()
            })
        );
        assert_eq!(settings.decode.max_tokens, 200);
        assert_eq!(settings.model.layers, 12);
    }

    #[test]
    fn validate_rejects_bad_geometry_and_penalties() {
        assert!(MurmurSettings::default().validate().is_ok());

        let mut s = MurmurSettings::default();
        s.model.layers = 0;
        assert!(s.validate().is_err());

        let mut s = MurmurSettings::default();
        s.model.heads = Some(0);
        assert!(s.validate().is_err());

        let mut s = MurmurSettings::default();
        s.decode.window_penalty = f32::NAN;
        assert_eq!(s.validate().unwrap_err().key(), Some("decode.windowPenalty"));

        let mut s = MurmurSettings::default();
        s.decode.task = "summarize".into();
        assert!(matches!(
            s.validate(),
            Err(SettingsError::UnknownTask { key: "decode.task", .. })
        ));
    }
}
