//! Per-layer KV Cache
//!
//! One key/value buffer pair per transformer layer, each shaped
//! `[batch, max_seq_len, hidden_dim]`, plus a cursor counting the valid
//! sequence positions written so far.
//!
//! ## Layer states
//!
//! Every layer slot is in exactly one state:
//!
//! - **Uninitialized**: never written (or cleared); reads fail
//! - **Raw**: full-precision buffers allocated on the first write
//! - **Compressed**: the valid prefix quantized with per-tensor
//!   min/max/scale metadata
//!
//! Reads of a compressed layer dequantize transparently and leave the layer
//! compressed. Writes into a compressed layer restore the raw buffers first.
//!
//! ## Example
//!
//! ```rust,ignore
//! use inductionvm::kv_cache::{KvCache, KvCacheConfig};
//!
//! let mut cache = KvCache::new(KvCacheConfig { num_layers: 2, max_seq_len: 16, hidden_dim: 4 })?;
//! cache.write(0, &k, &v)?;
//! let (k_all, v_all) = cache.read(0)?;
//! ```

use crate::error::{InductionError, Result};
use crate::quantize::{quantize_values, CompressionMetadata, QuantizationMode, QuantizedTensor};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// KV cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCacheConfig {
    /// Number of transformer layers
    pub num_layers: usize,
    /// Maximum sequence positions per layer
    pub max_seq_len: usize,
    /// Hidden size of each cached position
    pub hidden_dim: usize,
}

impl Default for KvCacheConfig {
    fn default() -> Self {
        Self {
            num_layers: 32,
            max_seq_len: 2048,
            hidden_dim: 4096,
        }
    }
}

impl KvCacheConfig {
    /// Reject zero sizes
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("num_layers", self.num_layers),
            ("max_seq_len", self.max_seq_len),
            ("hidden_dim", self.hidden_dim),
        ] {
            if value == 0 {
                return Err(InductionError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

/// Full-precision layer buffers
#[derive(Debug, Clone)]
struct RawLayer {
    batch: usize,
    cursor: usize,
    /// `[batch, max_seq_len, hidden_dim]`
    keys: Vec<f32>,
    /// `[batch, max_seq_len, hidden_dim]`
    values: Vec<f32>,
}

/// Quantized valid prefix `[batch, cursor, hidden_dim]`
#[derive(Debug, Clone)]
struct CompressedLayer {
    batch: usize,
    cursor: usize,
    keys: QuantizedTensor,
    values: QuantizedTensor,
}

#[derive(Debug, Clone)]
enum LayerSlot {
    Uninitialized,
    Raw(RawLayer),
    Compressed(CompressedLayer),
}

impl LayerSlot {
    fn cursor(&self) -> usize {
        match self {
            Self::Uninitialized => 0,
            Self::Raw(raw) => raw.cursor,
            Self::Compressed(c) => c.cursor,
        }
    }

    fn batch(&self) -> Option<usize> {
        match self {
            Self::Uninitialized => None,
            Self::Raw(raw) => Some(raw.batch),
            Self::Compressed(c) => Some(c.batch),
        }
    }
}

/// Statistics over all layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvCacheStats {
    /// Layers holding data
    pub initialized_layers: usize,
    /// Layers in compressed form
    pub compressed_layers: usize,
    /// Sum of cursors across layers
    pub total_positions: usize,
    /// Bytes held by full-precision buffers
    pub raw_bytes: usize,
    /// Bytes held by quantized codes
    pub compressed_bytes: usize,
}

impl KvCacheStats {
    /// Total bytes held by the cache
    pub fn total_bytes(&self) -> usize {
        self.raw_bytes + self.compressed_bytes
    }
}

/// Arena of per-layer key/value buffers
#[derive(Debug, Clone)]
pub struct KvCache {
    config: KvCacheConfig,
    layers: Vec<LayerSlot>,
}

/// Copy the valid prefix `[batch, cursor, hidden]` out of a full buffer.
fn gather_prefix(
    buf: &[f32],
    batch: usize,
    cursor: usize,
    max_seq_len: usize,
    hidden: usize,
) -> Vec<f32> {
    let row = cursor * hidden;
    let stride = max_seq_len * hidden;
    let mut out = Vec::with_capacity(batch * row);
    for b in 0..batch {
        let start = b * stride;
        out.extend_from_slice(&buf[start..start + row]);
    }
    out
}

/// Copy `[batch, n, hidden]` data into a full buffer at `offset` positions.
fn scatter_rows(
    buf: &mut [f32],
    data: &[f32],
    batch: usize,
    offset: usize,
    max_seq_len: usize,
    hidden: usize,
) {
    let row = data.len() / batch;
    let stride = max_seq_len * hidden;
    for (b, chunk) in data.chunks_exact(row).enumerate() {
        let start = b * stride + offset * hidden;
        buf[start..start + row].copy_from_slice(chunk);
    }
}

impl KvCache {
    /// Create an empty cache with every layer uninitialized
    pub fn new(config: KvCacheConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            num_layers = config.num_layers,
            max_seq_len = config.max_seq_len,
            hidden_dim = config.hidden_dim,
            "KvCache initialized"
        );
        Ok(Self {
            config,
            layers: vec![LayerSlot::Uninitialized; config.num_layers],
        })
    }

    /// Cache configuration
    pub fn config(&self) -> &KvCacheConfig {
        &self.config
    }

    fn slot(&self, layer: usize) -> Result<&LayerSlot> {
        self.layers.get(layer).ok_or(InductionError::InvalidLayer {
            layer,
            num_layers: self.config.num_layers,
        })
    }

    fn slot_mut(&mut self, layer: usize) -> Result<&mut LayerSlot> {
        let num_layers = self.config.num_layers;
        self.layers
            .get_mut(layer)
            .ok_or(InductionError::InvalidLayer { layer, num_layers })
    }

    /// Check `k`/`v` shapes and return `(batch, seq_len)`.
    fn check_write_shapes(&self, k: &Tensor, v: &Tensor) -> Result<(usize, usize)> {
        if k.shape() != v.shape() {
            return Err(InductionError::ShapeMismatch(format!(
                "kv_write keys {:?} and values {:?} differ",
                k.shape(),
                v.shape()
            )));
        }
        match *k.shape() {
            [batch, seq, hidden] if hidden == self.config.hidden_dim => Ok((batch, seq)),
            _ => Err(InductionError::ShapeMismatch(format!(
                "kv_write expects [batch, seq, {}], got {:?}",
                self.config.hidden_dim,
                k.shape()
            ))),
        }
    }

    /// Append `k`/`v` (`[batch, seq, hidden_dim]`) at the layer's cursor.
    ///
    /// The first write allocates `[batch, max_seq_len, hidden_dim]`
    /// buffers; later writes must use the same batch. A write past
    /// `max_seq_len` fails and leaves the cursor unchanged.
    pub fn write(&mut self, layer: usize, k: &Tensor, v: &Tensor) -> Result<()> {
        let (batch, seq) = self.check_write_shapes(k, v)?;
        let keys = k.as_f32()?;
        let values = v.as_f32()?;
        let KvCacheConfig {
            max_seq_len,
            hidden_dim,
            ..
        } = self.config;

        let cursor = self.slot(layer)?.cursor();
        if cursor + seq > max_seq_len {
            tracing::warn!(
                layer,
                cursor,
                incoming = seq,
                max_seq_len,
                "KV write rejected: capacity exceeded"
            );
            return Err(InductionError::CacheCapacityExceeded {
                layer,
                cursor,
                incoming: seq,
                max_seq_len,
            });
        }

        // Must precede decompression: a rejected write leaves the slot untouched
        if let Some(stored) = self.slot(layer)?.batch() {
            if stored != batch {
                return Err(InductionError::ShapeMismatch(format!(
                    "kv_write batch {} does not match layer {} batch {}",
                    batch, layer, stored
                )));
            }
        }

        if matches!(self.slot(layer)?, LayerSlot::Compressed(_)) {
            tracing::debug!(layer, "Decompressing layer before write");
            self.decompress(layer)?;
        }

        let slot = self.slot_mut(layer)?;
        if let LayerSlot::Uninitialized = slot {
            tracing::debug!(layer, batch, "Allocating KV buffers");
            let len = batch * max_seq_len * hidden_dim;
            *slot = LayerSlot::Raw(RawLayer {
                batch,
                cursor: 0,
                keys: vec![0.0; len],
                values: vec![0.0; len],
            });
        }

        let LayerSlot::Raw(raw) = slot else {
            return Err(InductionError::UninitializedLayer(layer));
        };

        scatter_rows(&mut raw.keys, keys, batch, raw.cursor, max_seq_len, hidden_dim);
        scatter_rows(&mut raw.values, values, batch, raw.cursor, max_seq_len, hidden_dim);
        raw.cursor += seq;
        tracing::trace!(layer, cursor = raw.cursor, "KV write");
        Ok(())
    }

    /// Valid prefix `[batch, cursor, hidden_dim]` of keys and values.
    pub fn read(&self, layer: usize) -> Result<(Tensor, Tensor)> {
        let KvCacheConfig {
            max_seq_len,
            hidden_dim,
            ..
        } = self.config;

        match self.slot(layer)? {
            LayerSlot::Uninitialized => Err(InductionError::UninitializedLayer(layer)),
            LayerSlot::Raw(raw) => {
                let shape = vec![raw.batch, raw.cursor, hidden_dim];
                let k = gather_prefix(&raw.keys, raw.batch, raw.cursor, max_seq_len, hidden_dim);
                let v = gather_prefix(&raw.values, raw.batch, raw.cursor, max_seq_len, hidden_dim);
                Ok((Tensor::from_f32(shape.clone(), k)?, Tensor::from_f32(shape, v)?))
            }
            LayerSlot::Compressed(c) => Ok((c.keys.dequantize()?, c.values.dequantize()?)),
        }
    }

    /// Quantize the layer's valid prefix in place.
    ///
    /// Compressing an already compressed layer is a no-op. A prefix holding
    /// non-finite values fails and leaves the layer raw.
    pub fn compress(&mut self, layer: usize, mode: QuantizationMode) -> Result<()> {
        let KvCacheConfig {
            max_seq_len,
            hidden_dim,
            ..
        } = self.config;

        let slot = self.slot_mut(layer)?;
        let raw = match slot {
            LayerSlot::Uninitialized => return Err(InductionError::UninitializedLayer(layer)),
            LayerSlot::Compressed(_) => {
                tracing::debug!(layer, "Layer already compressed");
                return Ok(());
            }
            LayerSlot::Raw(raw) => raw,
        };

        let shape = vec![raw.batch, raw.cursor, hidden_dim];
        let k = gather_prefix(&raw.keys, raw.batch, raw.cursor, max_seq_len, hidden_dim);
        let v = gather_prefix(&raw.values, raw.batch, raw.cursor, max_seq_len, hidden_dim);
        let raw_bytes = (raw.keys.len() + raw.values.len()) * std::mem::size_of::<f32>();

        let compressed = CompressedLayer {
            batch: raw.batch,
            cursor: raw.cursor,
            keys: quantize_values(&k, shape.clone(), mode)?,
            values: quantize_values(&v, shape, mode)?,
        };
        tracing::debug!(
            layer,
            mode = %mode,
            "Compressed KV layer: {} -> {} bytes",
            raw_bytes,
            compressed.keys.nbytes() + compressed.values.nbytes()
        );
        *slot = LayerSlot::Compressed(compressed);
        Ok(())
    }

    /// Restore full-precision buffers for a compressed layer.
    ///
    /// A raw layer is left untouched.
    pub fn decompress(&mut self, layer: usize) -> Result<()> {
        let KvCacheConfig {
            max_seq_len,
            hidden_dim,
            ..
        } = self.config;

        let slot = self.slot_mut(layer)?;
        let c = match slot {
            LayerSlot::Uninitialized => return Err(InductionError::UninitializedLayer(layer)),
            LayerSlot::Raw(_) => return Ok(()),
            LayerSlot::Compressed(c) => c,
        };

        let len = c.batch * max_seq_len * hidden_dim;
        let mut keys = vec![0.0; len];
        let mut values = vec![0.0; len];
        scatter_rows(&mut keys, &c.keys.dequantize_values(), c.batch, 0, max_seq_len, hidden_dim);
        scatter_rows(&mut values, &c.values.dequantize_values(), c.batch, 0, max_seq_len, hidden_dim);

        *slot = LayerSlot::Raw(RawLayer {
            batch: c.batch,
            cursor: c.cursor,
            keys,
            values,
        });
        tracing::debug!(layer, "Decompressed KV layer");
        Ok(())
    }

    /// Discard a layer's buffers and reset its cursor.
    pub fn clear(&mut self, layer: usize) -> Result<()> {
        *self.slot_mut(layer)? = LayerSlot::Uninitialized;
        Ok(())
    }

    /// Discard every layer
    pub fn clear_all(&mut self) {
        for slot in &mut self.layers {
            *slot = LayerSlot::Uninitialized;
        }
        tracing::debug!("KV cache cleared");
    }

    /// Valid positions written to a layer (0 when uninitialized)
    pub fn cursor(&self, layer: usize) -> Result<usize> {
        Ok(self.slot(layer)?.cursor())
    }

    /// Whether the layer holds data
    pub fn is_initialized(&self, layer: usize) -> Result<bool> {
        Ok(!matches!(self.slot(layer)?, LayerSlot::Uninitialized))
    }

    /// Whether the layer is in compressed form
    pub fn is_compressed(&self, layer: usize) -> Result<bool> {
        Ok(matches!(self.slot(layer)?, LayerSlot::Compressed(_)))
    }

    /// Key and value metadata of a compressed layer
    pub fn compression_metadata(
        &self,
        layer: usize,
    ) -> Result<Option<(CompressionMetadata, CompressionMetadata)>> {
        Ok(match self.slot(layer)? {
            LayerSlot::Compressed(c) => Some((*c.keys.metadata(), *c.values.metadata())),
            _ => None,
        })
    }

    /// Bytes held by all layer buffers
    pub fn memory_bytes(&self) -> usize {
        self.stats().total_bytes()
    }

    /// Current statistics
    pub fn stats(&self) -> KvCacheStats {
        let mut stats = KvCacheStats::default();
        for slot in &self.layers {
            stats.total_positions += slot.cursor();
            match slot {
                LayerSlot::Uninitialized => {}
                LayerSlot::Raw(raw) => {
                    stats.initialized_layers += 1;
                    stats.raw_bytes +=
                        (raw.keys.len() + raw.values.len()) * std::mem::size_of::<f32>();
                }
                LayerSlot::Compressed(c) => {
                    stats.initialized_layers += 1;
                    stats.compressed_layers += 1;
                    stats.compressed_bytes += c.keys.nbytes() + c.values.nbytes();
                }
            }
        }
        stats
    }
}
