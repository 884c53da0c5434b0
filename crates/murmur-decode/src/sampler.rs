//! Greedy next-token selection.
//!
//! Policy, applied in order to a copy of the last logits row:
//! 1. start-of-sequence, no-timestamps and every timestamp id are masked;
//! 2. end-of-sequence is masked while the history is shorter than
//!    [`SamplerConfig::min_tokens_before_eos`];
//! 3. the last emitted token loses [`SamplerConfig::last_token_penalty`] and
//!    every occurrence in the trailing window loses
//!    [`SamplerConfig::window_penalty`] (masked scores stay masked);
//! 4. the highest score wins, ties going to the lowest id.

use crate::special::SpecialTokens;

/// Sampling constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    /// History length below which end-of-sequence cannot be selected.
    pub min_tokens_before_eos: usize,
    /// Deducted from the immediately preceding token.
    pub last_token_penalty: f32,
    /// Deducted once per occurrence inside the trailing window.
    pub window_penalty: f32,
    /// Trailing window length.
    pub penalty_window: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_tokens_before_eos: 10,
            last_token_penalty: 1.0,
            window_penalty: 0.5,
            penalty_window: 5,
        }
    }
}

/// Deterministic greedy sampler. Holds no state besides its configuration.
#[derive(Debug, Clone)]
pub struct Sampler {
    sos: u32,
    eos: u32,
    no_timestamps: u32,
    timestamp_begin: u32,
    config: SamplerConfig,
}

impl Sampler {
    /// Create a sampler for the given special tokens.
    pub fn new(special: &SpecialTokens, config: SamplerConfig) -> Self {
        Self {
            sos: special.sos,
            eos: special.eos,
            no_timestamps: special.no_timestamps,
            timestamp_begin: special.timestamp_begin,
            config,
        }
    }

    /// Sampling constants in use.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Pick the next token from one logits row given everything emitted so far.
    ///
    /// Returns end-of-sequence when every candidate is masked.
    pub fn select(&self, logits: &[f32], history: &[u32]) -> u32 {
        let mut scores = logits.to_vec();

        mask(&mut scores, self.sos);
        mask(&mut scores, self.no_timestamps);
        if let Some(timestamps) = scores.get_mut(self.timestamp_begin as usize..) {
            timestamps.fill(f32::NEG_INFINITY);
        }
        if history.len() < self.config.min_tokens_before_eos {
            mask(&mut scores, self.eos);
        }

        if let Some(&last) = history.last() {
            penalize(&mut scores, last, self.config.last_token_penalty);
        }
        let window_start = history.len().saturating_sub(self.config.penalty_window);
        for &id in &history[window_start..] {
            penalize(&mut scores, id, self.config.window_penalty);
        }

        argmax(&scores).map_or(self.eos, |i| i as u32)
    }
}

fn mask(scores: &mut [f32], id: u32) {
    if let Some(s) = scores.get_mut(id as usize) {
        *s = f32::NEG_INFINITY;
    }
}

fn penalize(scores: &mut [f32], id: u32, amount: f32) {
    if let Some(s) = scores.get_mut(id as usize) {
        if *s > f32::NEG_INFINITY {
            *s -= amount;
        }
    }
}

/// Index of the first maximum, skipping masked and NaN scores.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score == f32::NEG_INFINITY || score.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}
