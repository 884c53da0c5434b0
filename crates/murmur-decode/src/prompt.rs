//! Initial decoder prompt.

use crate::error::DecodeError;
use crate::special::SpecialTokens;

/// Per-request language/task selection. `None` falls back to the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptOptions {
    /// Language code, e.g. `"zh"`.
    pub language: Option<String>,
    /// Task tag, `"transcribe"` or `"translate"`.
    pub task: Option<String>,
}

impl PromptOptions {
    /// Select a language.
    #[must_use]
    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.language = Some(code.into());
        self
    }

    /// Select a task.
    #[must_use]
    pub fn task(mut self, tag: impl Into<String>) -> Self {
        self.task = Some(tag.into());
        self
    }
}

/// Engine-wide prompt settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptConfig {
    /// Language used when the request names none.
    pub default_language: String,
    /// Task used when the request names none.
    pub default_task: String,
    /// Extra language/task pair appended after the selected one.
    ///
    /// Off by default; set it to reproduce prompts that carry two pairs.
    pub secondary_pair: Option<(String, String)>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            default_language: "zh".to_string(),
            default_task: "transcribe".to_string(),
            secondary_pair: None,
        }
    }
}

/// Ordered prompt ids, fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    ids: Vec<u32>,
}

impl Prompt {
    /// Build `[sos, language, task, (secondary language, secondary task), no_timestamps]`.
    ///
    /// Unknown tags are rejected here, before any model call.
    pub fn build(
        special: &SpecialTokens,
        config: &PromptConfig,
        options: &PromptOptions,
    ) -> Result<Self, DecodeError> {
        let language = options
            .language
            .as_deref()
            .unwrap_or(config.default_language.as_str());
        let task = options
            .task
            .as_deref()
            .unwrap_or(config.default_task.as_str());

        let mut ids = vec![special.sos];
        push_pair(&mut ids, special, language, task)?;
        if let Some((language, task)) = &config.secondary_pair {
            push_pair(&mut ids, special, language, task)?;
        }
        ids.push(special.no_timestamps);
        Ok(Self { ids })
    }

    /// Prompt ids.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Number of prompt tokens.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false; a prompt holds at least start-of-sequence and no-timestamps.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids widened for the `input_ids` tensor.
    pub fn input_ids(&self) -> Vec<i64> {
        self.ids.iter().map(|&id| i64::from(id)).collect()
    }
}

fn push_pair(
    ids: &mut Vec<u32>,
    special: &SpecialTokens,
    language: &str,
    task: &str,
) -> Result<(), DecodeError> {
    let language_id = special
        .language_id(language)
        .ok_or_else(|| DecodeError::Config(format!("unknown language: {language}")))?;
    let task_id = special
        .task_id(task)
        .ok_or_else(|| DecodeError::Config(format!("unknown task: {task}")))?;
    ids.extend([language_id, task_id]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn special() -> SpecialTokens {
        SpecialTokens::new(50258, 50257, 50363, 50364)
            .with_language("en", 50259)
            .with_language("zh", 50260)
            .with_task("translate", 50358)
            .with_task("transcribe", 50359)
    }

    #[test]
    fn defaults_build_single_pair() {
        let p = Prompt::build(&special(), &PromptConfig::default(), &PromptOptions::default())
            .unwrap();
        assert_eq!(p.ids(), &[50258, 50260, 50359, 50363]);
        assert_eq!(p.input_ids(), vec![50258i64, 50260, 50359, 50363]);
        assert!(!p.is_empty());
    }

    #[test]
    fn options_override_defaults_independently() {
        let p = Prompt::build(
            &special(),
            &PromptConfig::default(),
            &PromptOptions::default().task("translate"),
        )
        .unwrap();
        assert_eq!(p.ids(), &[50258, 50260, 50358, 50363]);

        let p = Prompt::build(
            &special(),
            &PromptConfig::default(),
            &PromptOptions::default().language("en"),
        )
        .unwrap();
        assert_eq!(p.ids(), &[50258, 50259, 50359, 50363]);
    }

    #[test]
    fn secondary_pair_is_appended() {
        let config = PromptConfig {
            secondary_pair: Some(("zh".into(), "transcribe".into())),
            ..PromptConfig::default()
        };
        let p = Prompt::build(
            &special(),
            &config,
            &PromptOptions::default().language("en").task("translate"),
        )
        .unwrap();
        assert_eq!(p.ids(), &[50258, 50259, 50358, 50260, 50359, 50363]);
        assert_eq!(p.len(), 6);
    }

    #[test]
    fn unknown_language_is_config_error() {
        let err = Prompt::build(
            &special(),
            &PromptConfig::default(),
            &PromptOptions::default().language("xx"),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Config(msg) if msg == "unknown language: xx"));
    }

    #[test]
    fn unknown_task_is_config_error() {
        let err = Prompt::build(
            &special(),
            &PromptConfig::default(),
            &PromptOptions::default().task("summarize"),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Config(msg) if msg == "unknown task: summarize"));
    }
}
