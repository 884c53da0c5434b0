//! Special token ids used by prompt construction, sampling and detokenization.

use std::collections::BTreeMap;

use crate::error::DecodeError;
use crate::vocab::Vocabulary;

/// Language codes with a `<|code|>` marker in multilingual Whisper vocabularies.
pub const LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv",
    "it", "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no",
    "th", "ur", "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr",
    "az", "sl", "kn", "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw",
    "gl", "mr", "pa", "si", "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu",
    "am", "yi", "lo", "uz", "fo", "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl",
    "mg", "as", "tt", "haw", "ln", "ha", "ba", "jw", "su", "yue",
];

/// Task tags with a `<|task|>` marker.
pub const TASKS: &[&str] = &["transcribe", "translate"];

const START_OF_TRANSCRIPT: &str = "<|startoftranscript|>";
const END_OF_TEXT: &str = "<|endoftext|>";
const NO_TIMESTAMPS: &str = "<|notimestamps|>";
const FIRST_TIMESTAMP: &str = "<|0.00|>";

/// Format a tag as a special marker (`zh` → `<|zh|>`).
pub fn marker(tag: &str) -> String {
    format!("<|{tag}|>")
}

/// Fixed set of special token ids, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Start of sequence (`<|startoftranscript|>`).
    pub sos: u32,
    /// End of sequence (`<|endoftext|>`).
    pub eos: u32,
    /// `<|notimestamps|>`.
    pub no_timestamps: u32,
    /// First timestamp id; every id at or above it is a timestamp marker.
    pub timestamp_begin: u32,
    languages: BTreeMap<String, u32>,
    tasks: BTreeMap<String, u32>,
}

impl SpecialTokens {
    /// Build with no language or task tags.
    pub fn new(sos: u32, eos: u32, no_timestamps: u32, timestamp_begin: u32) -> Self {
        Self {
            sos,
            eos,
            no_timestamps,
            timestamp_begin,
            languages: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// Register a language tag.
    #[must_use]
    pub fn with_language(mut self, code: impl Into<String>, id: u32) -> Self {
        let _ = self.languages.insert(code.into(), id);
        self
    }

    /// Register a task tag.
    #[must_use]
    pub fn with_task(mut self, tag: impl Into<String>, id: u32) -> Self {
        let _ = self.tasks.insert(tag.into(), id);
        self
    }

    /// Derive every id from its marker string.
    ///
    /// When `<|0.00|>` is absent the timestamp range starts right after
    /// `<|notimestamps|>`.
    pub fn from_vocabulary(vocab: &Vocabulary) -> Result<Self, DecodeError> {
        let required = |name: &str| {
            vocab
                .id(name)
                .ok_or_else(|| DecodeError::Config(format!("vocabulary has no {name} token")))
        };
        let sos = required(START_OF_TRANSCRIPT)?;
        let eos = required(END_OF_TEXT)?;
        let no_timestamps = required(NO_TIMESTAMPS)?;
        let timestamp_begin = vocab.id(FIRST_TIMESTAMP).unwrap_or(no_timestamps + 1);

        let mut tokens = Self::new(sos, eos, no_timestamps, timestamp_begin);
        for &code in LANGUAGES {
            if let Some(id) = vocab.id(&marker(code)) {
                tokens = tokens.with_language(code, id);
            }
        }
        for &task in TASKS {
            if let Some(id) = vocab.id(&marker(task)) {
                tokens = tokens.with_task(task, id);
            }
        }
        Ok(tokens)
    }

    /// Check that every referenced id exists in `vocab`.
    pub fn validate(&self, vocab: &Vocabulary) -> Result<(), DecodeError> {
        let named = [
            ("start-of-sequence", self.sos),
            ("end-of-sequence", self.eos),
            ("no-timestamps", self.no_timestamps),
        ];
        let tagged = self
            .languages
            .iter()
            .chain(&self.tasks)
            .map(|(tag, id)| (tag.as_str(), *id));

        for (name, id) in named.into_iter().chain(tagged) {
            if !vocab.contains_id(id) {
                return Err(DecodeError::Config(format!(
                    "{name} token id {id} is not in the vocabulary"
                )));
            }
        }
        Ok(())
    }

    /// Id of a language tag.
    pub fn language_id(&self, code: &str) -> Option<u32> {
        self.languages.get(code).copied()
    }

    /// Id of a task tag.
    pub fn task_id(&self, tag: &str) -> Option<u32> {
        self.tasks.get(tag).copied()
    }

    /// Registered language codes.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    /// Whether `id` is in the timestamp range.
    pub fn is_timestamp(&self, id: u32) -> bool {
        id >= self.timestamp_begin
    }
}
