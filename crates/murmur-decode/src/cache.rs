//! Key/value cache owned by one transcription.
//!
//! Every model call returns freshly allocated present tensors. The store
//! swaps them in and drops the buffers they replace on the spot, so the live
//! set never grows beyond one tensor per slot. Updates are validated in full
//! before anything is swapped: a rejected output set leaves the store as it
//! was.

use std::collections::BTreeMap;

use ndarray::IxDyn;
use tracing::debug;

use crate::error::CacheError;
use crate::model::{Attention, CacheSlot, CacheTensor, KvPart, LayerPresent};

/// Owns the self- and cross-attention cache tensors.
#[derive(Debug)]
pub struct CacheStore {
    layers: usize,
    entries: BTreeMap<CacheSlot, CacheTensor>,
}

impl CacheStore {
    /// Allocate zero-length `[1, head_count, 0, head_dim]` placeholders for
    /// every slot so the prefill call sees a uniform input contract.
    pub fn initialize_empty(layer_count: usize, head_count: usize, head_dim: usize) -> Self {
        let entries = CacheSlot::all(layer_count)
            .map(|slot| {
                (
                    slot,
                    CacheTensor::zeros(IxDyn(&[1, head_count, 0, head_dim])),
                )
            })
            .collect();
        Self {
            layers: layer_count,
            entries,
        }
    }

    /// Install every present tensor returned by the prefill call.
    ///
    /// All four slots of every layer must be present.
    pub fn absorb_prefill_outputs(&mut self, present: Vec<LayerPresent>) -> Result<(), CacheError> {
        let mut present = self.check_layers(present)?;
        let mut staged = Vec::with_capacity(self.layers * 4);
        for slot in CacheSlot::all(self.layers) {
            let tensor = present[slot.layer]
                .take(slot.attention, slot.part)
                .ok_or(CacheError::MissingSlot(slot))?;
            staged.push((slot, tensor));
        }

        for (slot, tensor) in staged {
            // Replaced placeholders are dropped here.
            let _ = self.entries.insert(slot, tensor);
        }
        debug!(entries = self.entries.len(), "cache populated from prefill");
        Ok(())
    }

    /// Replace the self-attention entries with the ones returned by a
    /// generation step.
    ///
    /// Each new self entry must be exactly one position longer than the one
    /// it replaces. Cross-attention outputs are ignored and dropped: the
    /// encoded audio does not change, so the prefill values stay valid.
    pub fn absorb_step_outputs(&mut self, present: Vec<LayerPresent>) -> Result<(), CacheError> {
        let mut present = self.check_layers(present)?;
        let mut staged = Vec::with_capacity(self.layers * 2);
        for layer in 0..self.layers {
            for part in [KvPart::Key, KvPart::Value] {
                let slot = CacheSlot::new(layer, Attention::Decoder, part);
                let tensor = present[layer]
                    .take(Attention::Decoder, part)
                    .ok_or(CacheError::MissingSlot(slot))?;

                let expected = self.entries.get(&slot).map_or(0, seq_len) + 1;
                let actual = seq_len(&tensor);
                if actual != expected {
                    return Err(CacheError::SelfLengthMismatch {
                        slot,
                        expected,
                        actual,
                    });
                }
                staged.push((slot, tensor));
            }
        }
        drop(present);

        for (slot, tensor) in staged {
            let _ = self.entries.insert(slot, tensor);
        }
        Ok(())
    }

    /// Drop every entry. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let released = self.entries.len();
        self.entries.clear();
        if released > 0 {
            debug!(released, "cache released");
        }
        released
    }

    /// Borrow the tensor held for `slot`.
    pub fn get(&self, slot: &CacheSlot) -> Option<&CacheTensor> {
        self.entries.get(slot)
    }

    /// Iterate over held entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&CacheSlot, &CacheTensor)> {
        self.entries.iter()
    }

    /// Number of layers the store was sized for.
    pub fn layer_count(&self) -> usize {
        self.layers
    }

    /// Number of tensors currently held.
    pub fn live_entries(&self) -> usize {
        self.entries.len()
    }

    /// Number of self-attention tensors currently held.
    pub fn self_entries(&self) -> usize {
        self.entries.keys().filter(|s| s.is_self_attention()).count()
    }

    /// Number of cross-attention tensors currently held.
    pub fn cross_entries(&self) -> usize {
        self.entries.keys().filter(|s| !s.is_self_attention()).count()
    }

    /// Sequence length currently held by the self-attention cache.
    pub fn self_len(&self) -> usize {
        self.entries
            .get(&CacheSlot::new(0, Attention::Decoder, KvPart::Key))
            .map_or(0, seq_len)
    }

    fn check_layers(&self, present: Vec<LayerPresent>) -> Result<Vec<LayerPresent>, CacheError> {
        if present.len() > self.layers {
            return Err(CacheError::UnexpectedLayer {
                layer: present.len() - 1,
                layers: self.layers,
            });
        }
        let mut present = present;
        present.resize_with(self.layers, LayerPresent::default);
        Ok(present)
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        let _ = self.release_all();
    }
}

/// Sequence axis of a `[batch, heads, seq, head_dim]` tensor.
fn seq_len(tensor: &CacheTensor) -> usize {
    tensor.shape().get(2).copied().unwrap_or(0)
}
