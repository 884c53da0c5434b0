//! ONNX Runtime sessions for the Whisper encoder and merged decoder.
//!
//! The merged decoder export takes the whole cache on every call and picks
//! its branch from `use_cache_branch`:
//!
//! ```text
//! input_ids [1, L] i64
//! encoder_hidden_states [1, T, D] f32
//! use_cache_branch [1] bool
//! past_key_values.{layer}.{decoder|encoder}.{key|value} [1, H, S, d]
//!   → logits [1, L, V], present.{layer}.{decoder|encoder}.{key|value}
//! ```

use std::collections::HashSet;
use std::path::Path;

use murmur_decode::{
    CacheSlot, CacheTensor, DecoderInput, DecoderModel, DecoderOutput, ModelError,
};
use ndarray::{Array3, IxDyn};
use ort::session::{Session, SessionInputValue};
use ort::value::{Tensor, TensorRef};
use parking_lot::Mutex;
use tracing::debug;

use crate::types::{ResultExt, TranscriptionError};

const INPUT_IDS: &str = "input_ids";
const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";
const USE_CACHE_BRANCH: &str = "use_cache_branch";
const LOGITS: &str = "logits";
const INPUT_FEATURES: &str = "input_features";
const LAST_HIDDEN_STATE: &str = "last_hidden_state";

/// Build a session with a fixed intra-op thread count. `0` keeps the
/// runtime default.
pub fn load_session(path: &Path, intra_threads: usize) -> Result<Session, TranscriptionError> {
    let mut builder = Session::builder().inference("session builder")?;
    if intra_threads > 0 {
        builder = builder
            .with_intra_threads(intra_threads)
            .inference("set threads")?;
    }
    builder
        .commit_from_file(path)
        .inference(&format!("load {}", path.display()))
}

/// Names the merged decoder must accept for a model with `layers` layers
/// that are absent from `declared`.
pub fn missing_decoder_inputs<'a>(
    declared: impl IntoIterator<Item = &'a str>,
    layers: usize,
) -> Vec<String> {
    let declared: HashSet<&str> = declared.into_iter().collect();
    [INPUT_IDS, ENCODER_HIDDEN_STATES, USE_CACHE_BRANCH]
        .into_iter()
        .map(str::to_string)
        .chain(CacheSlot::all(layers).map(|slot| slot.input_name()))
        .filter(|name| !declared.contains(name.as_str()))
        .collect()
}

fn tensor_dims(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
}

/// [`DecoderModel`] over a merged-decoder ONNX session.
///
/// `Session::run` needs `&mut self`, so concurrent transcriptions take
/// turns on the session; each still owns its cache.
pub struct OnnxDecoder {
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxDecoder").finish_non_exhaustive()
    }
}

impl OnnxDecoder {
    /// Wrap a loaded session after checking its input contract.
    pub fn new(session: Session, layers: usize) -> Result<Self, TranscriptionError> {
        let missing = missing_decoder_inputs(session.inputs().iter().map(|i| i.name()), layers);
        if !missing.is_empty() {
            return Err(TranscriptionError::ModelNotAvailable(format!(
                "decoder is not a merged {layers}-layer export, missing inputs: {}",
                missing.join(", ")
            )));
        }
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Load the decoder from `path`.
    pub fn load(path: &Path, layers: usize, threads: usize) -> Result<Self, TranscriptionError> {
        let session = load_session(path, threads)?;
        debug!("loaded decoder from {}", path.display());
        Self::new(session, layers)
    }
}

impl DecoderModel for OnnxDecoder {
    fn run(&self, input: DecoderInput<'_>) -> Result<DecoderOutput, ModelError> {
        let ids = TensorRef::from_array_view((
            [1_i64, input.input_ids.len() as i64],
            input.input_ids,
        ))
        .map_err(|e| ModelError::with_context("input_ids tensor", e))?;

        let encoded = input.encoder_hidden_states;
        let (batch, frames, width) = encoded.dim();
        let encoded_slice = encoded
            .as_slice()
            .ok_or_else(|| ModelError("encoder_hidden_states must be contiguous".into()))?;
        let encoded = TensorRef::from_array_view((
            [batch as i64, frames as i64, width as i64],
            encoded_slice,
        ))
        .map_err(|e| ModelError::with_context("encoder_hidden_states tensor", e))?;

        let use_cache = Tensor::from_array(([1_i64], vec![input.use_cache]))
            .map_err(|e| ModelError::with_context("use_cache_branch tensor", e))?;

        let mut inputs: Vec<(String, SessionInputValue<'_>)> =
            Vec::with_capacity(3 + input.cache.live_entries());
        inputs.push((INPUT_IDS.into(), SessionInputValue::from(ids)));
        inputs.push((ENCODER_HIDDEN_STATES.into(), SessionInputValue::from(encoded)));
        inputs.push((USE_CACHE_BRANCH.into(), SessionInputValue::from(use_cache)));

        for (slot, tensor) in input.cache.iter() {
            let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
            let data = tensor
                .as_slice()
                .ok_or_else(|| ModelError(format!("{slot} must be contiguous")))?;
            let value = TensorRef::from_array_view((shape, data))
                .map_err(|e| ModelError::with_context(&format!("{slot} tensor"), e))?;
            inputs.push((slot.input_name(), SessionInputValue::from(value)));
        }

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| ModelError::with_context("decoder run", e))?;

        let (shape, data) = outputs
            .get(LOGITS)
            .ok_or_else(|| ModelError("decoder returned no logits".into()))?
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::with_context("extract logits", e))?;
        let dims = tensor_dims(shape.as_ref());
        let [b, l, v] = dims[..] else {
            return Err(ModelError(format!("logits must be rank 3, got {dims:?}")));
        };
        let logits = Array3::from_shape_vec((b, l, v), data.to_vec())
            .map_err(|e| ModelError::with_context("reshape logits", e))?;

        let names: Vec<String> = outputs
            .keys()
            .filter(|name| CacheSlot::parse(name).is_some())
            .map(ToString::to_string)
            .collect();
        let mut present = Vec::with_capacity(names.len());
        for name in names {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::with_context(&format!("extract {name}"), e))?;
            let tensor =
                CacheTensor::from_shape_vec(IxDyn(&tensor_dims(shape.as_ref())), data.to_vec())
                    .map_err(|e| ModelError::with_context(&format!("reshape {name}"), e))?;
            present.push((name, tensor));
        }

        DecoderOutput::from_named(logits, present)
    }
}

/// Run the encoder on `[1, 80, 3000]` log-mel features.
///
/// Output: `last_hidden_state` `[1, T, D]`.
pub fn run_encoder(
    encoder: &mut Session,
    features: &Array3<f32>,
) -> Result<Array3<f32>, TranscriptionError> {
    let (batch, mels, frames) = features.dim();
    let flat = features
        .as_slice()
        .ok_or_else(|| TranscriptionError::Inference("features must be contiguous".into()))?;
    let input = TensorRef::from_array_view(([batch as i64, mels as i64, frames as i64], flat))
        .inference("input_features tensor")?;

    let outputs = encoder
        .run(ort::inputs![INPUT_FEATURES => input])
        .inference("encoder run")?;

    let (shape, data) = outputs
        .get(LAST_HIDDEN_STATE)
        .ok_or_else(|| TranscriptionError::Inference("encoder returned no last_hidden_state".into()))?
        .try_extract_tensor::<f32>()
        .inference("extract encoder output")?;

    let dims = tensor_dims(shape.as_ref());
    let [b, t, d] = dims[..] else {
        return Err(TranscriptionError::Inference(format!(
            "encoder output must be rank 3, got {dims:?}"
        )));
    };
    Array3::from_shape_vec((b, t, d), data.to_vec()).inference("reshape encoder output")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged_inputs(layers: usize) -> Vec<String> {
        [INPUT_IDS, ENCODER_HIDDEN_STATES, USE_CACHE_BRANCH]
            .into_iter()
            .map(str::to_string)
            .chain(CacheSlot::all(layers).map(|s| s.input_name()))
            .collect()
    }

    #[test]
    fn merged_export_has_no_missing_inputs() {
        let names = merged_inputs(4);
        assert!(missing_decoder_inputs(names.iter().map(String::as_str), 4).is_empty());
    }

    #[test]
    fn layer_mismatch_is_reported() {
        let names = merged_inputs(4);
        let missing = missing_decoder_inputs(names.iter().map(String::as_str), 6);
        assert_eq!(missing.len(), 8);
        assert!(missing.contains(&"past_key_values.5.encoder.value".to_string()));
    }

    #[test]
    fn plain_decoder_lacks_cache_inputs() {
        let missing = missing_decoder_inputs([INPUT_IDS, ENCODER_HIDDEN_STATES], 2);
        assert_eq!(missing[0], USE_CACHE_BRANCH);
        assert_eq!(missing.len(), 1 + 8);
    }

    #[test]
    fn dims_clamp_dynamic_axes() {
        assert_eq!(tensor_dims(&[1, 12, 0, 64]), vec![1, 12, 0, 64]);
        assert_eq!(tensor_dims(&[-1, 3]), vec![0, 3]);
    }
}
