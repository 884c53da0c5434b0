//! Model file management: download from `HuggingFace`, path resolution and
//! vocabulary loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use murmur_decode::Vocabulary;
use murmur_settings::{ModelSettings, murmur_home};

use crate::types::{ResultExt, TranscriptionError};
#[cfg(feature = "ort")]
use tracing::{debug, info, warn};

/// Typed paths for the four required model files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    /// Audio encoder (`input_features` → `last_hidden_state`).
    pub encoder: PathBuf,
    /// Merged decoder with `use_cache_branch`.
    pub decoder: PathBuf,
    /// `token → id` table (`vocab.json`).
    pub vocab: PathBuf,
    /// Added/special `marker → id` table (`added_tokens.json`).
    pub added_tokens: PathBuf,
}

impl ModelPaths {
    /// Construct paths for all model files under `dir`.
    pub fn from_dir(dir: impl AsRef<Path>, settings: &ModelSettings) -> Self {
        let dir = dir.as_ref();
        Self {
            encoder: dir.join(&settings.encoder_file),
            decoder: dir.join(&settings.decoder_file),
            vocab: dir.join(&settings.vocab_file),
            added_tokens: dir.join(&settings.added_tokens_file),
        }
    }

    /// Repository-relative names of the required files.
    pub fn names(settings: &ModelSettings) -> [&str; 4] {
        [
            settings.encoder_file.as_str(),
            settings.decoder_file.as_str(),
            settings.vocab_file.as_str(),
            settings.added_tokens_file.as_str(),
        ]
    }

    /// Check if all required files exist.
    pub fn all_exist(&self) -> bool {
        self.encoder.exists()
            && self.decoder.exists()
            && self.vocab.exists()
            && self.added_tokens.exists()
    }
}

/// Default model directory, `~/.murmur/models/<repo name>`.
pub fn default_model_dir(settings: &ModelSettings) -> PathBuf {
    let name = settings
        .hf_repo
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("whisper");
    murmur_home().join("models").join(name)
}

/// Configured model directory, or the default one.
pub fn resolve_model_dir(settings: &ModelSettings) -> PathBuf {
    settings
        .dir
        .as_ref()
        .map_or_else(|| default_model_dir(settings), PathBuf::from)
}

/// Check if all required model files exist locally.
pub fn is_model_cached(model_dir: impl AsRef<Path>, settings: &ModelSettings) -> bool {
    ModelPaths::from_dir(model_dir, settings).all_exist()
}

/// Download model files from `HuggingFace` if not already cached.
///
/// Files are stored in `HuggingFace`'s cache, then copied to `model_dir`.
#[cfg(feature = "ort")]
pub async fn ensure_model(
    model_dir: impl AsRef<Path>,
    settings: &ModelSettings,
) -> Result<(), TranscriptionError> {
    let model_dir = model_dir.as_ref().to_path_buf();

    if is_model_cached(&model_dir, settings) {
        debug!("model files already cached at {}", model_dir.display());
        return Ok(());
    }

    info!("downloading {} from HuggingFace...", settings.hf_repo);
    std::fs::create_dir_all(&model_dir)?;

    // hf-hub's sync API blocks on HTTP.
    let dir = model_dir.clone();
    let settings = settings.clone();
    tokio::task::spawn_blocking(move || download_model_files(&dir, &settings))
        .await
        .model("task join")?
}

#[cfg(feature = "ort")]
fn download_model_files(
    model_dir: &Path,
    settings: &ModelSettings,
) -> Result<(), TranscriptionError> {
    let api = hf_hub::api::sync::Api::new().model("HF API init")?;
    let repo = api.model(settings.hf_repo.clone());

    for filename in ModelPaths::names(settings) {
        let target = model_dir.join(filename);
        if target.exists() {
            debug!("skipping {filename} (already exists)");
            continue;
        }

        info!("downloading {filename}...");
        match repo.get(filename) {
            Ok(cached_path) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                if cached_path != target {
                    let _ = std::fs::copy(&cached_path, &target)
                        .model(&format!("failed to copy {filename}"))?;
                }
                debug!("downloaded {filename}");
            }
            Err(e) => {
                warn!("failed to download {filename}: {e}");
                return Err(TranscriptionError::ModelNotAvailable(format!(
                    "download failed for {filename}: {e}"
                )));
            }
        }
    }

    info!("all model files ready at {}", model_dir.display());
    Ok(())
}

/// Load the vocabulary from `vocab.json` and `added_tokens.json`.
pub fn load_vocabulary(paths: &ModelPaths) -> Result<Vocabulary, TranscriptionError> {
    let standard = read_token_table(&paths.vocab)?;
    let added = read_token_table(&paths.added_tokens)?;
    Ok(Vocabulary::new(standard, added)?)
}

fn read_token_table(path: &Path) -> Result<HashMap<String, u32>, TranscriptionError> {
    let content =
        std::fs::read_to_string(path).model(&format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).model(&format!("failed to parse {}", path.display()))
}
