//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MurmurSettings::default()`]
//! 2. If `~/.murmur/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MURMUR_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::MurmurSettings;

/// Resolve the path to the settings file (`~/.murmur/settings.json`).
pub fn settings_path() -> PathBuf {
    murmur_home().join("settings.json")
}

/// Root of per-user murmur state (`~/.murmur`).
pub fn murmur_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".murmur")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MurmurSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or out-of-range values, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MurmurSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<MurmurSettings> {
    let defaults = serde_json::to_value(MurmurSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must be valid and within range; invalid values are logged and
/// ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut MurmurSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (the environment in production).
pub fn apply_overrides<F>(settings: &mut MurmurSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Model ───────────────────────────────────────────────────────
    if let Some(v) = env.string("MURMUR_MODEL_DIR") {
        settings.model.dir = Some(v);
    }
    if let Some(v) = env.string("MURMUR_HF_REPO") {
        settings.model.hf_repo = v;
    }
    if let Some(v) = env.usize("MURMUR_MODEL_LAYERS", 1, 64) {
        settings.model.layers = v;
    }

    // ── Decode ──────────────────────────────────────────────────────
    if let Some(v) = env.usize("MURMUR_MAX_TOKENS", 0, 4096) {
        settings.decode.max_tokens = v;
    }
    if let Some(v) = env.string("MURMUR_LANGUAGE") {
        settings.decode.language = v;
    }
    if let Some(v) = env.string("MURMUR_TASK") {
        settings.decode.task = v;
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = env.usize("MURMUR_INTRA_THREADS", 0, 256) {
        settings.runtime.intra_threads = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
