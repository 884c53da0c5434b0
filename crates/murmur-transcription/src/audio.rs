//! Audio decoding and resampling to 16 kHz mono f32.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::types::{ResultExt, TranscriptionError};

/// Sample rate the Whisper front end expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decoded, resampled audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples at [`TARGET_SAMPLE_RATE`].
    pub samples: Vec<f32>,
    /// Sample rate of the source stream.
    pub source_rate: u32,
}

impl DecodedAudio {
    /// Length in seconds at the target rate.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(TARGET_SAMPLE_RATE)
    }
}

/// Map a MIME type to the container extension symphonia probes with.
pub fn extension_hint(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "audio/wav" | "audio/wave" | "audio/x-wav" | "audio/vnd.wave" => Some("wav"),
        "audio/m4a" | "audio/mp4" | "audio/x-m4a" | "audio/aac" => Some("m4a"),
        _ => None,
    }
}

/// Guess a MIME type from a file extension.
pub fn mime_for_path(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("wav" | "wave") => "audio/wav",
        Some("m4a" | "mp4") => "audio/mp4",
        Some("aac") => "audio/aac",
        _ => "application/octet-stream",
    }
}

/// Decode audio bytes into 16 kHz mono f32 samples.
///
/// Supports WAV and M4A/AAC via symphonia. Multi-channel input is averaged
/// to mono, other rates are resampled.
pub fn decode_audio(data: &[u8], mime_type: &str) -> Result<DecodedAudio, TranscriptionError> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_hint(mime_type) {
        let _ = hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .audio_decode("probe failed")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| TranscriptionError::AudioDecode("no audio track found".into()))?;

    let codec_params = track.codec_params.clone();
    let track_id = track.id;
    let source_rate = codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
    let channels = codec_params.channels.map_or(1, |c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .audio_decode("codec init failed")?;

    let mut mono: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(TranscriptionError::AudioDecode(format!("packet read: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet).audio_decode("decode")?;

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        mix_to_mono(sample_buf.samples(), channels, &mut mono);
    }

    if mono.is_empty() {
        return Err(TranscriptionError::AudioDecode(
            "no audio samples decoded".into(),
        ));
    }

    debug!(
        source_rate,
        channels,
        frames = mono.len(),
        "decoded audio stream"
    );

    let samples = if source_rate == TARGET_SAMPLE_RATE {
        mono
    } else {
        resample(&mono, source_rate, TARGET_SAMPLE_RATE)?
    };

    Ok(DecodedAudio {
        samples,
        source_rate,
    })
}

/// Average interleaved frames of `channels` samples into `out`.
fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels > 1 {
        out.extend(
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    } else {
        out.extend_from_slice(interleaved);
    }
}

/// Resample mono audio from `from_rate` to `to_rate` using rubato.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, TranscriptionError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let chunk_size = 1024;

    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1).resample("init")?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let mut block = chunk.to_vec();
        // Last chunk is zero padded.
        block.resize(chunk_size, 0.0);

        let resampled = resampler.process(&[block], None).resample("process")?;
        if let Some(channel) = resampled.first() {
            output.extend_from_slice(channel);
        }
    }

    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn decode_invalid_audio_returns_error() {
        let result = decode_audio(b"not audio data", "audio/wav");
        assert!(matches!(result, Err(TranscriptionError::AudioDecode(_))));
    }

    #[test]
    fn decode_empty_returns_error() {
        assert!(decode_audio(b"", "audio/wav").is_err());
    }

    #[test]
    fn mime_hints() {
        assert_eq!(extension_hint("audio/x-wav"), Some("wav"));
        assert_eq!(extension_hint("audio/mp4"), Some("m4a"));
        assert_eq!(extension_hint("application/octet-stream"), None);
    }

    #[test]
    fn mime_from_file_name() {
        use std::path::Path;
        assert_eq!(mime_for_path(Path::new("a/b/clip.WAV")), "audio/wav");
        assert_eq!(mime_for_path(Path::new("memo.m4a")), "audio/mp4");
        assert_eq!(
            extension_hint(mime_for_path(Path::new("notes.txt"))),
            None
        );
    }

    #[test]
    fn stereo_frames_are_averaged() {
        let mut out = Vec::new();
        mix_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);

        mix_to_mono(&[0.25], 1, &mut out);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn resample_identity() {
        let samples: Vec<f32> = (0..16000).map(|i| (i as f32 / 16000.0).sin()).collect();
        let result = resample(&samples, 16000, 16000).unwrap();
        let ratio = result.len() as f64 / samples.len() as f64;
        assert!((ratio - 1.0).abs() < 0.1, "ratio: {ratio}");
    }

    #[test]
    fn resample_downsample() {
        // 48 kHz → 16 kHz keeps about a third of the samples.
        let samples: Vec<f32> = (0..48000).map(|i| (i as f32 / 48000.0).sin()).collect();
        let result = resample(&samples, 48000, 16000).unwrap();
        let ratio = result.len() as f64 / samples.len() as f64;
        assert!((ratio - 1.0 / 3.0).abs() < 0.05, "ratio: {ratio}");
    }

    #[test]
    fn decode_wav_synthetic() {
        // 16 kHz mono 16-bit, 0.1 s of silence.
        let wav = generate_test_wav(16000, 1, 1600);
        let audio = decode_audio(&wav, "audio/wav").unwrap();
        assert_eq!(audio.source_rate, 16000);
        assert!(!audio.samples.is_empty());
        assert!(audio.samples.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!((audio.duration_seconds() - 0.1).abs() < 0.01);
    }

    #[test]
    fn decode_wav_44khz_resamples_to_16khz() {
        // 44.1 kHz stereo, 0.5 s.
        let wav = generate_test_wav(44100, 2, 22050);
        let audio = decode_audio(&wav, "audio/wav").unwrap();
        assert_eq!(audio.source_rate, 44100);
        let expected_approx = 8000;
        let ratio = audio.samples.len() as f64 / f64::from(expected_approx);
        assert!(
            (ratio - 1.0).abs() < 0.2,
            "Expected ~{expected_approx} samples, got {}: ratio {ratio}",
            audio.samples.len()
        );
    }

    /// Generate a minimal valid PCM WAV file of silence.
    pub(crate) fn generate_test_wav(sample_rate: u32, channels: u16, num_samples: u32) -> Vec<u8> {
        let bits_per_sample: u16 = 16;
        let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
        let block_align = channels * bits_per_sample / 8;
        let data_size = num_samples * u32::from(channels) * u32::from(bits_per_sample) / 8;
        let file_size = 36 + data_size;

        let mut buf = Vec::with_capacity(file_size as usize + 8);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&file_size.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&bits_per_sample.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_size.to_le_bytes());
        buf.resize(buf.len() + data_size as usize, 0);
        buf
    }
}
