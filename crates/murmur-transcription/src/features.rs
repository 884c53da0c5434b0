//! Whisper log-mel front end.
//!
//! 30 s of 16 kHz audio become an `[1, 80, 3000]` tensor laid out
//! `[batch][mel][frame]`, the shape the encoder's `input_features` expects.

use std::sync::Arc;

use ndarray::Array3;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::audio::TARGET_SAMPLE_RATE;

/// FFT size.
pub const N_FFT: usize = 512;
/// Analysis window length (zero padded to [`N_FFT`]).
pub const WIN_LEN: usize = 400;
/// Hop between frames.
pub const HOP: usize = 160;
/// Mel bands.
pub const N_MELS: usize = 80;
/// Samples in one 30 s window.
pub const N_SAMPLES: usize = 480_000;
/// Frames in one 30 s window.
pub const N_FRAMES: usize = 3000;

const N_FREQS: usize = N_FFT / 2 + 1;
const LOG_FLOOR: f64 = 1e-10;
const DYNAMIC_RANGE: f32 = 8.0;

/// Reusable front end: FFT plan, window and filter bank are built once.
pub struct LogMelExtractor {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filters: Vec<Vec<f32>>,
}

impl std::fmt::Debug for LogMelExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMelExtractor")
            .field("n_fft", &N_FFT)
            .field("n_mels", &self.filters.len())
            .finish_non_exhaustive()
    }
}

impl Default for LogMelExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMelExtractor {
    /// Plan the FFT and build the window and filter bank.
    pub fn new() -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(N_FFT);
        Self {
            fft,
            window: hann_window(WIN_LEN),
            filters: mel_filters(
                N_FFT,
                TARGET_SAMPLE_RATE,
                N_MELS,
                0.0,
                TARGET_SAMPLE_RATE as f32 / 2.0,
            ),
        }
    }

    /// Compute the normalized log-mel spectrogram of up to 30 s of audio.
    ///
    /// Longer input is truncated, shorter input is zero padded.
    pub fn compute(&self, samples: &[f32]) -> Array3<f32> {
        let active = samples.len().min(N_SAMPLES);
        let mut padded = vec![0.0f32; N_SAMPLES];
        padded[..active].copy_from_slice(&samples[..active]);
        let centered = reflect_pad(&padded, N_FFT / 2);

        // Frames past this index only see padding zeros.
        let active_frames = (active + N_FFT / 2).div_ceil(HOP).min(N_FRAMES);

        let floor = LOG_FLOOR.log10() as f32;
        let mut mel = Array3::<f32>::from_elem((1, N_MELS, N_FRAMES), floor);
        let mut buf = vec![Complex::new(0.0f32, 0.0); N_FFT];
        let mut power = [0.0f32; N_FREQS];

        for frame in 0..active_frames {
            let start = frame * HOP;
            for (i, slot) in buf.iter_mut().enumerate() {
                let s = if i < WIN_LEN {
                    centered[start + i] * self.window[i]
                } else {
                    0.0
                };
                *slot = Complex::new(s, 0.0);
            }
            self.fft.process(&mut buf);

            for (p, c) in power.iter_mut().zip(&buf) {
                *p = c.norm_sqr();
            }
            for (m, filter) in self.filters.iter().enumerate() {
                let energy: f64 = filter
                    .iter()
                    .zip(&power)
                    .filter(|(w, _)| **w > 0.0)
                    .map(|(w, p)| f64::from(*w) * f64::from(*p))
                    .sum();
                mel[[0, m, frame]] = energy.max(LOG_FLOOR).log10() as f32;
            }
        }

        let max_val = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        mel.mapv_inplace(|v| (v.max(max_val - DYNAMIC_RANGE) + 4.0) / 4.0);
        mel
    }
}

/// One-off convenience over [`LogMelExtractor::compute`].
pub fn log_mel_spectrogram(samples: &[f32]) -> Array3<f32> {
    LogMelExtractor::new().compute(samples)
}

/// Periodic Hann window.
fn hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Slaney-normalized triangular mel filter bank, `n_mels` rows of
/// `fft_size / 2 + 1` weights.
fn mel_filters(fft_size: usize, sr: u32, n_mels: usize, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let n_freqs = fft_size / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let hz_pts: Vec<f32> = (0..=(n_mels + 1))
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sr as f32 / fft_size as f32)
        .collect();

    hz_pts
        .windows(3)
        .map(|pts| {
            let (lower, center, upper) = (pts[0], pts[1], pts[2]);
            let down = (center - lower).max(1e-10);
            let up = (upper - center).max(1e-10);
            let enorm = 2.0 / (upper - lower).max(1e-10);
            fft_freqs
                .iter()
                .map(|&freq| {
                    let w = if freq >= lower && freq <= center {
                        (freq - lower) / down
                    } else if freq > center && freq <= upper {
                        (upper - freq) / up
                    } else {
                        0.0
                    };
                    (w * enorm).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Mirror `pad` samples at each edge, excluding the edge sample itself.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    if pad == 0 || samples.len() <= pad {
        let mut out = vec![0.0; pad];
        out.extend_from_slice(samples);
        out.resize(samples.len() + 2 * pad, 0.0);
        return out;
    }
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend(samples[1..=pad].iter().rev());
    out.extend_from_slice(samples);
    out.extend(samples[n - 1 - pad..n - 1].iter().rev());
    out
}

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1_000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4_f32.ln() / 27.0
}

fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(hz: f32, seconds: f32) -> Vec<f32> {
        let n = (seconds * TARGET_SAMPLE_RATE as f32) as usize;
        (0..n)
            .map(|i| {
                0.5 * (2.0 * std::f32::consts::PI * hz * i as f32 / TARGET_SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn output_shape_is_fixed() {
        let extractor = LogMelExtractor::new();
        assert_eq!(extractor.compute(&[]).shape(), &[1, N_MELS, N_FRAMES]);
        assert_eq!(
            extractor.compute(&vec![0.1; N_SAMPLES + 5000]).shape(),
            &[1, N_MELS, N_FRAMES]
        );
    }

    #[test]
    fn silence_maps_to_constant_floor() {
        let mel = log_mel_spectrogram(&vec![0.0; 16_000]);
        // log10(1e-10) = -10, then (-10 + 4) / 4.
        assert!(mel.iter().all(|&v| (v + 1.5).abs() < 1e-6));
    }

    #[test]
    fn dynamic_range_is_clamped() {
        let mel = log_mel_spectrogram(&tone(440.0, 2.0));
        let max = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = mel.iter().copied().fold(f32::INFINITY, f32::min);
        assert!(max - min <= DYNAMIC_RANGE / 4.0 + 1e-5, "range {}", max - min);
    }

    #[test]
    fn tone_energy_lands_in_matching_band() {
        let mel = log_mel_spectrogram(&tone(1_000.0, 1.0));
        let frame = 50;
        let peak = (0..N_MELS)
            .max_by(|&a, &b| mel[[0, a, frame]].total_cmp(&mel[[0, b, frame]]))
            .unwrap();
        assert!((24..=29).contains(&peak), "peak band {peak}");
    }

    #[test]
    fn filter_bank_geometry() {
        let filters = mel_filters(N_FFT, TARGET_SAMPLE_RATE, N_MELS, 0.0, 8_000.0);
        assert_eq!(filters.len(), N_MELS);
        for (m, row) in filters.iter().enumerate() {
            assert_eq!(row.len(), N_FREQS);
            assert!(row.iter().all(|w| *w >= 0.0));
            assert!(row.iter().any(|w| *w > 0.0), "band {m} is empty");
        }
    }

    #[test]
    fn slaney_scale_round_trips_at_the_knee() {
        assert!((hz_to_mel(1_000.0) - 15.0).abs() < 1e-4);
        assert!((mel_to_hz(15.0) - 1_000.0).abs() < 1e-2);
        assert!((hz_to_mel(500.0) - 7.5).abs() < 1e-4);
    }

    #[test]
    fn reflect_pad_mirrors_without_edge() {
        let out = reflect_pad(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(out, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn hann_window_is_periodic() {
        let w = hann_window(WIN_LEN);
        assert_eq!(w.len(), WIN_LEN);
        assert!(w[0].abs() < 1e-7);
        assert!((w[WIN_LEN / 2] - 1.0).abs() < 1e-6);
    }
}
