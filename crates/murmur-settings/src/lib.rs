//! # murmur-settings
//!
//! Layered configuration for the murmur transcriber.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MurmurSettings::default()`]
//! 2. **User file**: `~/.murmur/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `MURMUR_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use murmur_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("decoder layers: {}", settings.model.layers);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{KNOWN_TASKS, Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, murmur_home,
    settings_path,
};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, initialized on first access via [`get_settings`].
static SETTINGS: OnceLock<MurmurSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.murmur/settings.json` with env var
/// overrides. If loading fails, logs the error and returns compiled defaults.
pub fn get_settings() -> &'static MurmurSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            MurmurSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: MurmurSettings) -> std::result::Result<(), MurmurSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = MurmurSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.model.hf_repo, "onnx-community/whisper-small");
        assert_eq!(settings.model.layers, 12);
        assert_eq!(settings.decode.max_tokens, 200);
        assert_eq!(settings.decode.language, "zh");
        assert_eq!(settings.decode.task, "transcribe");
        assert!(settings.decode.secondary_pair.is_none());
        assert_eq!(settings.runtime.decoder_threads, 1);
    }

    // The only test in this crate that touches the global.
    #[test]
    fn init_settings_sets_the_global_once() {
        let mut settings = MurmurSettings::default();
        settings.model.layers = 4;
        settings.decode.language = "en".into();
        init_settings(settings.clone()).unwrap();
        assert_eq!(get_settings(), &settings);

        let rejected = init_settings(MurmurSettings::default()).unwrap_err();
        assert_eq!(rejected, MurmurSettings::default());
        assert_eq!(get_settings().model.layers, 4);
    }

    #[test]
    fn settings_path_under_murmur_home() {
        let path = settings_path();
        assert!(path.ends_with(".murmur/settings.json"));
        assert!(path.starts_with(murmur_home()));
    }
}
