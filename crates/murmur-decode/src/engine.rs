//! Prefill → generate state machine.
//!
//! ```text
//! Init ──prefill──▶ Generate ──step──▶ Generate ... ──▶ Done(stop)
//!   │                  │
//!   └──────────────────┴──▶ Failed   (model error, malformed output, cancellation)
//! ```
//!
//! A [`Transcription`] owns the prompt, the cache and the generation state of
//! one request. Every terminal transition goes through a single release
//! routine, and the cache also releases on `Drop`.

use ndarray::{Array3, ArrayView3, s};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::detokenize::detokenize;
use crate::error::DecodeError;
use crate::model::{DecoderInput, DecoderModel, DecoderOutput};
use crate::prompt::{Prompt, PromptConfig, PromptOptions};
use crate::sampler::{Sampler, SamplerConfig};
use crate::special::SpecialTokens;
use crate::vocab::Vocabulary;

/// Default ceiling on generation steps after prefill.
pub const DEFAULT_MAX_TOKENS: usize = 200;

/// Engine-wide decode settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
    /// Generation steps allowed after prefill.
    pub max_tokens: usize,
    /// Decoder layer count.
    pub layers: usize,
    /// Attention heads per layer.
    pub heads: usize,
    /// Size of one attention head.
    pub head_dim: usize,
    /// Token selection constants.
    pub sampler: SamplerConfig,
    /// Prompt defaults.
    pub prompt: PromptConfig,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            layers: 12,
            heads: 12,
            head_dim: 64,
            sampler: SamplerConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// End-of-sequence was selected.
    EndOfSequence,
    /// The step ceiling was reached.
    MaxTokens,
}

impl StopReason {
    /// Stable snake-case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndOfSequence => "end_of_sequence",
            Self::MaxTokens => "max_tokens",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a [`Transcription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Prompt built, cache holds placeholders.
    Init,
    /// The prefill call is in flight.
    Prefill,
    /// At least one token emitted, generation continues.
    Generate,
    /// Finished normally; the cache has been released.
    Done(StopReason),
    /// Terminated by an error or cancellation; the cache has been released.
    Failed,
}

impl Phase {
    /// Whether no further model calls will be made.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed)
    }
}

/// Emitted ids and step counter of one transcription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationState {
    tokens: Vec<u32>,
    steps: usize,
    stop: Option<StopReason>,
    finished: bool,
}

impl GenerationState {
    /// Every id emitted so far, including a final end-of-sequence.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Generation calls completed after prefill.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Stop reason once finished normally.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Whether the state is frozen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Result of a completed transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Detokenized, trimmed text.
    pub text: String,
    /// Emitted ids, including a final end-of-sequence.
    pub tokens: Vec<u32>,
    /// Why generation stopped.
    pub stop: StopReason,
    /// Generation calls made after prefill.
    pub steps: usize,
}

/// Drives transcriptions against a shared model.
///
/// Vocabulary, special tokens and the sampler are engine-scoped and shared
/// read-only by every transcription. Each transcription gets its own cache.
pub struct DecodeEngine<M> {
    model: M,
    vocab: Vocabulary,
    special: SpecialTokens,
    sampler: Sampler,
    config: DecodeConfig,
}

impl<M: DecoderModel> DecodeEngine<M> {
    /// Create an engine. Fails with [`DecodeError::Config`] when a special
    /// token id is missing from the vocabulary or the cache geometry is empty.
    pub fn new(
        model: M,
        vocab: Vocabulary,
        special: SpecialTokens,
        config: DecodeConfig,
    ) -> Result<Self, DecodeError> {
        special.validate(&vocab)?;
        if config.layers == 0 || config.heads == 0 || config.head_dim == 0 {
            return Err(DecodeError::Config(format!(
                "invalid cache geometry: layers={}, heads={}, head_dim={}",
                config.layers, config.heads, config.head_dim
            )));
        }
        let sampler = Sampler::new(&special, config.sampler);
        Ok(Self {
            model,
            vocab,
            special,
            sampler,
            config,
        })
    }

    /// Transcribe encoded audio to text.
    pub fn transcribe(
        &self,
        encoder_hidden_states: ArrayView3<'_, f32>,
        options: &PromptOptions,
    ) -> Result<String, DecodeError> {
        self.transcribe_with_cancel(encoder_hidden_states, options, &CancellationToken::new())
            .map(|t| t.text)
    }

    /// Transcribe, observing `cancel` around every model call.
    pub fn transcribe_with_cancel(
        &self,
        encoder_hidden_states: ArrayView3<'_, f32>,
        options: &PromptOptions,
        cancel: &CancellationToken,
    ) -> Result<Transcript, DecodeError> {
        self.begin(encoder_hidden_states.reborrow(), options, cancel)?.run()
    }

    /// Build the prompt and an empty cache without calling the model.
    ///
    /// Unknown language or task tags fail here, before any cache allocation.
    pub fn begin<'e>(
        &'e self,
        encoder_hidden_states: ArrayView3<'e, f32>,
        options: &PromptOptions,
        cancel: &CancellationToken,
    ) -> Result<Transcription<'e, M>, DecodeError> {
        let prompt = Prompt::build(&self.special, &self.config.prompt, options)?;
        let cache =
            CacheStore::initialize_empty(self.config.layers, self.config.heads, self.config.head_dim);
        debug!(
            prompt = ?prompt.ids(),
            slots = cache.live_entries(),
            "transcription initialized"
        );
        Ok(Transcription {
            engine: self,
            audio: encoder_hidden_states,
            prompt,
            cache,
            state: GenerationState::default(),
            phase: Phase::Init,
            failure: None,
            cancel: cancel.clone(),
        })
    }

    /// The shared model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The shared vocabulary.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// The special token ids.
    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    /// Decode settings in use.
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }
}

/// One in-flight transcription.
pub struct Transcription<'e, M> {
    engine: &'e DecodeEngine<M>,
    audio: ArrayView3<'e, f32>,
    prompt: Prompt,
    cache: CacheStore,
    state: GenerationState,
    phase: Phase,
    failure: Option<DecodeError>,
    cancel: CancellationToken,
}

impl<M: DecoderModel> Transcription<'_, M> {
    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The prompt fed at prefill.
    pub fn prompt(&self) -> &Prompt {
        &self.prompt
    }

    /// The cache, for inspection between steps.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Emitted ids and step counter.
    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// Make exactly one model call (prefill first, then one generation step)
    /// and return the phase reached.
    ///
    /// On error the transcription is `Failed` and its cache released. Calling
    /// this on a `Done` transcription is a no-op; on a `Failed` one it returns
    /// the error that ended it.
    pub fn advance(&mut self) -> Result<Phase, DecodeError> {
        let outcome = match self.phase {
            Phase::Done(_) => return Ok(self.phase),
            Phase::Failed => {
                return Err(self.failure.clone().unwrap_or_else(|| {
                    DecodeError::inference(Some(self.state.steps), "transcription already failed")
                }));
            }
            Phase::Init | Phase::Prefill => self.prefill(),
            Phase::Generate => self.step(),
        };

        match outcome {
            Ok(Phase::Done(stop)) => {
                self.state.stop = Some(stop);
                self.terminate(Phase::Done(stop));
                info!(
                    steps = self.state.steps,
                    tokens = self.state.tokens.len(),
                    ?stop,
                    "transcription finished"
                );
                Ok(self.phase)
            }
            Ok(phase) => {
                self.phase = phase;
                Ok(phase)
            }
            Err(err) => {
                self.terminate(Phase::Failed);
                debug!(error = %err, steps = self.state.steps, "transcription failed");
                self.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Advance until a terminal phase and assemble the transcript.
    pub fn run(mut self) -> Result<Transcript, DecodeError> {
        loop {
            if let Phase::Done(stop) = self.advance()? {
                let tokens = std::mem::take(&mut self.state.tokens);
                let text = detokenize(&tokens, &self.engine.vocab, &self.engine.special);
                return Ok(Transcript {
                    text,
                    tokens,
                    stop,
                    steps: self.state.steps,
                });
            }
        }
    }

    fn prefill(&mut self) -> Result<Phase, DecodeError> {
        self.phase = Phase::Prefill;
        self.check_cancelled()?;

        let input_ids = self.prompt.input_ids();
        let output = self.call_model(&input_ids, false, None)?;
        self.check_cancelled()?;

        let DecoderOutput { logits, present } = output;
        self.cache
            .absorb_prefill_outputs(present)
            .map_err(|e| DecodeError::inference(None, e.to_string()))?;

        let token = self.select(&logits, None)?;
        debug!(token, prompt_len = input_ids.len(), "prefill complete");

        if token == self.engine.special.eos {
            Ok(Phase::Done(StopReason::EndOfSequence))
        } else if self.engine.config.max_tokens == 0 {
            Ok(Phase::Done(StopReason::MaxTokens))
        } else {
            Ok(Phase::Generate)
        }
    }

    fn step(&mut self) -> Result<Phase, DecodeError> {
        let step = self.state.steps + 1;
        self.check_cancelled()?;

        let Some(&last) = self.state.tokens.last() else {
            return Err(DecodeError::inference(Some(step), "no token to feed"));
        };
        let input_ids = [i64::from(last)];
        let output = self.call_model(&input_ids, true, Some(step))?;
        self.check_cancelled()?;

        let DecoderOutput { logits, present } = output;
        self.cache
            .absorb_step_outputs(present)
            .map_err(|e| DecodeError::inference(Some(step), e.to_string()))?;

        let token = self.select(&logits, Some(step))?;
        self.state.steps = step;
        debug!(step, token, self_len = self.cache.self_len(), "generated token");

        if token == self.engine.special.eos {
            Ok(Phase::Done(StopReason::EndOfSequence))
        } else if step >= self.engine.config.max_tokens {
            Ok(Phase::Done(StopReason::MaxTokens))
        } else {
            Ok(Phase::Generate)
        }
    }

    fn call_model(
        &self,
        input_ids: &[i64],
        use_cache: bool,
        step: Option<usize>,
    ) -> Result<DecoderOutput, DecodeError> {
        self.engine
            .model
            .run(DecoderInput {
                input_ids,
                encoder_hidden_states: self.audio.view(),
                use_cache,
                cache: &self.cache,
            })
            .map_err(|e| DecodeError::inference(step, e.to_string()))
    }

    /// Sample from the last logits position and append the result.
    fn select(&mut self, logits: &Array3<f32>, step: Option<usize>) -> Result<u32, DecodeError> {
        let (batch, len, vocab) = logits.dim();
        if batch != 1 || len == 0 || vocab == 0 {
            return Err(DecodeError::inference(
                step,
                format!("logits shape [{batch}, {len}, {vocab}], expected [1, L, V]"),
            ));
        }
        let row = logits.slice(s![0, len - 1, ..]).to_vec();
        let token = self.engine.sampler.select(&row, &self.state.tokens);
        self.state.tokens.push(token);
        Ok(token)
    }

    fn check_cancelled(&self) -> Result<(), DecodeError> {
        if self.cancel.is_cancelled() {
            Err(DecodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn terminate(&mut self, phase: Phase) {
        self.phase = phase;
        self.state.finished = true;
        let _ = self.cache.release_all();
    }
}
