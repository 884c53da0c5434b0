//! Contract with the model-evaluation engine.
//!
//! The decoder is treated as a black box: it receives the token ids for this
//! call, the encoded audio, a use-cache flag and every cache slot, and returns
//! logits plus one freshly allocated "present" tensor per slot.
//!
//! Slot names follow the merged-decoder export convention:
//!
//! ```text
//! inputs:  past_key_values.{layer}.{decoder|encoder}.{key|value}
//! outputs: present.{layer}.{decoder|encoder}.{key|value}
//! ```
//!
//! `decoder` marks self-attention slots (grow every step), `encoder` marks
//! cross-attention slots (fixed after prefill).

use std::fmt;
use std::sync::Arc;

use ndarray::{Array3, ArrayD, ArrayView3};

use crate::cache::CacheStore;
use crate::error::ModelError;

/// Owned cache tensor, `[1, heads, seq, head_dim]`.
pub type CacheTensor = ArrayD<f32>;

/// Which attention block a cache slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attention {
    /// Self-attention over generated tokens.
    Decoder,
    /// Cross-attention over the encoded audio.
    Encoder,
}

impl Attention {
    fn marker(self) -> &'static str {
        match self {
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
        }
    }
}

/// Key or value half of a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KvPart {
    /// Attention keys.
    Key,
    /// Attention values.
    Value,
}

impl KvPart {
    fn marker(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Value => "value",
        }
    }
}

/// One named cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheSlot {
    /// Decoder layer index.
    pub layer: usize,
    /// Self or cross attention.
    pub attention: Attention,
    /// Key or value.
    pub part: KvPart,
}

const INPUT_PREFIX: &str = "past_key_values";
const OUTPUT_PREFIX: &str = "present";

impl CacheSlot {
    /// Create a slot.
    pub const fn new(layer: usize, attention: Attention, part: KvPart) -> Self {
        Self {
            layer,
            attention,
            part,
        }
    }

    /// Every slot of a decoder with `layers` layers, in model input order.
    pub fn all(layers: usize) -> impl Iterator<Item = Self> {
        (0..layers).flat_map(|layer| {
            [
                Self::new(layer, Attention::Decoder, KvPart::Key),
                Self::new(layer, Attention::Decoder, KvPart::Value),
                Self::new(layer, Attention::Encoder, KvPart::Key),
                Self::new(layer, Attention::Encoder, KvPart::Value),
            ]
        })
    }

    /// Whether this slot grows every generation step.
    pub fn is_self_attention(&self) -> bool {
        self.attention == Attention::Decoder
    }

    /// Model input name (`past_key_values.{layer}.{attention}.{part}`).
    pub fn input_name(&self) -> String {
        self.name_with(INPUT_PREFIX)
    }

    /// Model output name (`present.{layer}.{attention}.{part}`).
    pub fn output_name(&self) -> String {
        self.name_with(OUTPUT_PREFIX)
    }

    fn name_with(&self, prefix: &str) -> String {
        format!(
            "{prefix}.{}.{}.{}",
            self.layer,
            self.attention.marker(),
            self.part.marker()
        )
    }

    /// Parse an input or output slot name. Returns `None` for anything else
    /// (e.g. `logits`).
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name
            .strip_prefix(OUTPUT_PREFIX)
            .or_else(|| name.strip_prefix(INPUT_PREFIX))?
            .strip_prefix('.')?;

        let mut parts = rest.split('.');
        let layer = parts.next()?.parse().ok()?;
        let attention = match parts.next()? {
            "decoder" => Attention::Decoder,
            "encoder" => Attention::Encoder,
            _ => return None,
        };
        let part = match parts.next()? {
            "key" => KvPart::Key,
            "value" => KvPart::Value,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(layer, attention, part))
    }
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input_name())
    }
}

/// Present tensors returned for one decoder layer.
#[derive(Debug, Clone, Default)]
pub struct LayerPresent {
    /// Self-attention keys.
    pub self_key: Option<CacheTensor>,
    /// Self-attention values.
    pub self_value: Option<CacheTensor>,
    /// Cross-attention keys.
    pub cross_key: Option<CacheTensor>,
    /// Cross-attention values.
    pub cross_value: Option<CacheTensor>,
}

impl LayerPresent {
    fn field_mut(&mut self, attention: Attention, part: KvPart) -> &mut Option<CacheTensor> {
        match (attention, part) {
            (Attention::Decoder, KvPart::Key) => &mut self.self_key,
            (Attention::Decoder, KvPart::Value) => &mut self.self_value,
            (Attention::Encoder, KvPart::Key) => &mut self.cross_key,
            (Attention::Encoder, KvPart::Value) => &mut self.cross_value,
        }
    }

    /// Borrow one tensor.
    pub fn get(&self, attention: Attention, part: KvPart) -> Option<&CacheTensor> {
        match (attention, part) {
            (Attention::Decoder, KvPart::Key) => self.self_key.as_ref(),
            (Attention::Decoder, KvPart::Value) => self.self_value.as_ref(),
            (Attention::Encoder, KvPart::Key) => self.cross_key.as_ref(),
            (Attention::Encoder, KvPart::Value) => self.cross_value.as_ref(),
        }
    }

    /// Move one tensor out, leaving `None`.
    pub fn take(&mut self, attention: Attention, part: KvPart) -> Option<CacheTensor> {
        self.field_mut(attention, part).take()
    }

    /// Store one tensor, returning the one it replaced.
    pub fn set(
        &mut self,
        attention: Attention,
        part: KvPart,
        tensor: CacheTensor,
    ) -> Option<CacheTensor> {
        self.field_mut(attention, part).replace(tensor)
    }
}

/// Everything one decoder call returns.
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// `[1, L_out, vocab_size]`.
    pub logits: Array3<f32>,
    /// Present tensors indexed by layer.
    pub present: Vec<LayerPresent>,
}

impl DecoderOutput {
    /// Assemble a typed output from name-keyed present tensors.
    ///
    /// Names that are not cache slots are ignored.
    pub fn from_named<I>(logits: Array3<f32>, named: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (String, CacheTensor)>,
    {
        let mut present: Vec<LayerPresent> = Vec::new();
        for (name, tensor) in named {
            let Some(slot) = CacheSlot::parse(&name) else {
                continue;
            };
            if present.len() <= slot.layer {
                present.resize_with(slot.layer + 1, LayerPresent::default);
            }
            if present[slot.layer]
                .set(slot.attention, slot.part, tensor)
                .is_some()
            {
                return Err(ModelError(format!("duplicate present output {name}")));
            }
        }
        Ok(Self { logits, present })
    }
}

/// Inputs for one decoder call.
#[derive(Debug)]
pub struct DecoderInput<'a> {
    /// `[1, L]` at prefill, `[1, 1]` afterwards.
    pub input_ids: &'a [i64],
    /// Encoded audio, unchanged for the whole transcription.
    pub encoder_hidden_states: ArrayView3<'a, f32>,
    /// `false` at prefill, `true` for every generation step.
    pub use_cache: bool,
    /// Current cache contents, one tensor per slot.
    pub cache: &'a CacheStore,
}

/// The model-evaluation engine.
///
/// Implementations must be safe to call from several transcriptions at once;
/// each call gets its own cache.
pub trait DecoderModel: Send + Sync {
    /// Run the decoder once.
    fn run(&self, input: DecoderInput<'_>) -> Result<DecoderOutput, ModelError>;
}

impl<M: DecoderModel + ?Sized> DecoderModel for Arc<M> {
    fn run(&self, input: DecoderInput<'_>) -> Result<DecoderOutput, ModelError> {
        (**self).run(input)
    }
}

impl<M: DecoderModel + ?Sized> DecoderModel for Box<M> {
    fn run(&self, input: DecoderInput<'_>) -> Result<DecoderOutput, ModelError> {
        (**self).run(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn slot_names_round_trip_through_parse() {
        let slot = CacheSlot::new(11, Attention::Encoder, KvPart::Key);
        assert_eq!(slot.input_name(), "past_key_values.11.encoder.key");
        assert_eq!(slot.output_name(), "present.11.encoder.key");
        assert_eq!(CacheSlot::parse(&slot.output_name()), Some(slot));
        assert_eq!(CacheSlot::parse(&slot.input_name()), Some(slot));
    }

    #[test]
    fn parse_rejects_non_slot_names() {
        assert_eq!(CacheSlot::parse("logits"), None);
        assert_eq!(CacheSlot::parse("present.x.decoder.key"), None);
        assert_eq!(CacheSlot::parse("present.0.decoder.query"), None);
        assert_eq!(CacheSlot::parse("present.0.attn.key"), None);
        assert_eq!(CacheSlot::parse("present.0.decoder.key.extra"), None);
        assert_eq!(CacheSlot::parse("presentation.0.decoder.key"), None);
    }

    #[test]
    fn all_slots_four_per_layer() {
        let slots: Vec<_> = CacheSlot::all(2).collect();
        assert_eq!(slots.len(), 8);
        assert_eq!(slots.iter().filter(|s| s.is_self_attention()).count(), 4);
        assert_eq!(slots[0].input_name(), "past_key_values.0.decoder.key");
        assert_eq!(slots[7].input_name(), "past_key_values.1.encoder.value");
    }

    #[test]
    fn from_named_routes_by_marker() {
        let t = || ArrayD::<f32>::zeros(IxDyn(&[1, 2, 1, 4]));
        let out = DecoderOutput::from_named(
            Array3::zeros((1, 1, 8)),
            vec![
                ("logits".to_string(), t()),
                ("present.1.decoder.value".to_string(), t()),
                ("present.0.encoder.key".to_string(), t()),
            ],
        )
        .unwrap();
        assert_eq!(out.present.len(), 2);
        assert!(out.present[0].cross_key.is_some());
        assert!(out.present[0].self_key.is_none());
        assert!(out.present[1].self_value.is_some());
    }

    #[test]
    fn from_named_rejects_duplicates() {
        let t = || ArrayD::<f32>::zeros(IxDyn(&[1, 1, 1, 1]));
        let result = DecoderOutput::from_named(
            Array3::zeros((1, 1, 1)),
            vec![
                ("present.0.decoder.key".to_string(), t()),
                ("past_key_values.0.decoder.key".to_string(), t()),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn layer_present_take_leaves_none() {
        let mut layer = LayerPresent::default();
        assert!(
            layer
                .set(Attention::Decoder, KvPart::Key, ArrayD::zeros(IxDyn(&[1])))
                .is_none()
        );
        assert!(layer.get(Attention::Decoder, KvPart::Key).is_some());
        assert!(layer.take(Attention::Decoder, KvPart::Key).is_some());
        assert!(layer.take(Attention::Decoder, KvPart::Key).is_none());
    }
}
