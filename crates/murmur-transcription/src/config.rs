//! Settings → decode loop configuration.

use murmur_decode::{DecodeConfig, PromptConfig, SamplerConfig};
use murmur_settings::MurmurSettings;

use crate::types::TranscriptionError;

/// Validate `settings`, then build the [`DecodeConfig`] from them.
pub fn checked_decode_config(settings: &MurmurSettings) -> Result<DecodeConfig, TranscriptionError> {
    settings.validate()?;
    Ok(decode_config(settings))
}

/// Build the [`DecodeConfig`] an engine runs with.
pub fn decode_config(settings: &MurmurSettings) -> DecodeConfig {
    let model = &settings.model;
    let decode = &settings.decode;
    DecodeConfig {
        max_tokens: decode.max_tokens,
        layers: model.layers,
        heads: model.resolved_heads(),
        head_dim: model.head_dim,
        sampler: SamplerConfig {
            min_tokens_before_eos: decode.min_tokens_before_eos,
            last_token_penalty: decode.last_token_penalty,
            window_penalty: decode.window_penalty,
            penalty_window: decode.penalty_window,
        },
        prompt: PromptConfig {
            default_language: decode.language.clone(),
            default_task: decode.task.clone(),
            secondary_pair: decode
                .secondary_pair
                .as_ref()
                .map(|pair| (pair.language.clone(), pair.task.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    use murmur_settings::{LanguageTask, SettingsError};

    use super::*;

    #[test]
    fn defaults_match_decode_defaults() {
        assert_eq!(
            decode_config(&MurmurSettings::default()),
            DecodeConfig::default()
        );
    }

    #[test]
    fn settings_flow_through() {
        let mut settings = MurmurSettings::default();
        settings.model.layers = 24;
        settings.decode.max_tokens = 50;
        settings.decode.language = "en".into();
        settings.decode.min_tokens_before_eos = 3;
        settings.decode.secondary_pair = Some(LanguageTask {
            language: "zh".into(),
            task: "transcribe".into(),
        });

        let config = decode_config(&settings);
        assert_eq!(config.layers, 24);
        assert_eq!(config.heads, 16);
        assert_eq!(config.max_tokens, 50);
        assert_eq!(config.sampler.min_tokens_before_eos, 3);
        assert_eq!(config.prompt.default_language, "en");
        assert_eq!(
            config.prompt.secondary_pair,
            Some(("zh".to_string(), "transcribe".to_string()))
        );
    }

    #[test]
    fn invalid_settings_surface_as_settings_error() {
        let mut settings = MurmurSettings::default();
        settings.model.head_dim = 0;
        let err = checked_decode_config(&settings).unwrap_err();
        assert!(matches!(
            err,
            TranscriptionError::Settings(SettingsError::InvalidValue { key: "model.headDim", .. })
        ));
        assert!(err.to_string().contains("model.headDim"));

        assert_eq!(
            checked_decode_config(&MurmurSettings::default()).unwrap(),
            DecodeConfig::default()
        );
    }
}
