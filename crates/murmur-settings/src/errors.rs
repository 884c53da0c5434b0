//! Settings error types.

use thiserror::Error;

/// Tasks a Whisper prompt can name.
pub const KNOWN_TASKS: [&str; 2] = ["transcribe", "translate"];

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value no decode can run with, keyed by its camelCase settings path.
    #[error("invalid settings value {key}: {reason}")]
    InvalidValue {
        /// Settings path, e.g. `model.layers`.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// A task tag outside [`KNOWN_TASKS`].
    #[error("unknown task {task:?} in {key} (expected one of {KNOWN_TASKS:?})")]
    UnknownTask {
        /// `decode.task` or `decode.secondaryPair.task`.
        key: &'static str,
        /// The rejected tag.
        task: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }

    /// Settings path of the offending value, if the error names one.
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { key, .. } | Self::UnknownTask { key, .. } => Some(key),
            Self::Io(_) | Self::Json(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
