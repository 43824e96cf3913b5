//! Linear min/max quantization for KV tensors
//!
//! Each tensor is quantized with a single per-tensor range:
//!
//! ```text
//! scale = (max - min) / levels        (levels = 255 for int8, 15 for int4)
//! q     = round((x - min) / scale)
//! x'    = q * scale + min             |x - x'| <= scale / 2
//! ```
//!
//! `int8` codes are stored as `i8` shifted by -128; `int4` codes are packed
//! two per byte (low nibble first).
//!
//! Inputs containing NaN or infinity are rejected, as are inputs whose range
//! `max - min` overflows `f32` (e.g. `[-f32::MAX, f32::MAX]`): an infinite
//! scale would dequantize to NaN.

use crate::error::{InductionError, Result};
use crate::tensor::{DType, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported quantization schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantizationMode {
    /// 8-bit linear quantization (256 levels)
    #[serde(rename = "int8")]
    Int8,
    /// 4-bit linear quantization (16 levels, packed)
    #[serde(rename = "int4")]
    Int4,
}

impl Default for QuantizationMode {
    fn default() -> Self {
        Self::Int8
    }
}

impl QuantizationMode {
    /// Highest code value
    pub fn levels(&self) -> f32 {
        match self {
            Self::Int8 => 255.0,
            Self::Int4 => 15.0,
        }
    }

    /// Canonical mode name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int4 => "int4",
        }
    }

    /// Storage bytes for `numel` codes
    pub fn storage_bytes(&self, numel: usize) -> usize {
        match self {
            Self::Int8 => numel,
            Self::Int4 => numel.div_ceil(2),
        }
    }
}

impl fmt::Display for QuantizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationMode {
    type Err = InductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int8" | "int8-per-head" | "q8" => Ok(Self::Int8),
            "int4" | "q4" => Ok(Self::Int4),
            _ => Err(InductionError::QuantizationModeUnsupported(s.to_string())),
        }
    }
}

/// Everything needed to invert a quantization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetadata {
    /// Smallest original value
    pub min: f32,
    /// Largest original value
    pub max: f32,
    /// Step between adjacent codes
    pub scale: f32,
    /// Element type before quantization
    pub original_dtype: DType,
    /// Scheme used
    pub mode: QuantizationMode,
}

impl CompressionMetadata {
    /// Worst-case absolute reconstruction error
    pub fn max_error(&self) -> f32 {
        self.scale / 2.0
    }
}

/// Quantized codes
#[derive(Debug, Clone, PartialEq)]
pub enum QuantizedCodes {
    /// One shifted code per element
    Int8(Vec<i8>),
    /// Two codes per byte
    Int4(Vec<u8>),
}

/// A tensor in quantized form
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    shape: Vec<usize>,
    numel: usize,
    codes: QuantizedCodes,
    metadata: CompressionMetadata,
}

fn min_max(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (min, max)
}

/// Quantize raw `f32` values that will be viewed with `shape`.
///
/// Fails with [`InductionError::NonFiniteRange`] when the values or their
/// scale are not finite.
pub(crate) fn quantize_values(
    values: &[f32],
    shape: Vec<usize>,
    mode: QuantizationMode,
) -> Result<QuantizedTensor> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(InductionError::NonFiniteRange(format!(
            "input contains {}",
            bad
        )));
    }
    let (min, max) = min_max(values);
    let levels = mode.levels();
    let scale = (max - min) / levels;
    if !scale.is_finite() {
        return Err(InductionError::NonFiniteRange(format!(
            "range [{}, {}] overflows f32",
            min, max
        )));
    }

    let code = |v: f32| -> u8 {
        if scale > 0.0 {
            ((v - min) / scale).round().clamp(0.0, levels) as u8
        } else {
            0
        }
    };

    let codes = match mode {
        QuantizationMode::Int8 => {
            QuantizedCodes::Int8(values.iter().map(|&v| (code(v) as i16 - 128) as i8).collect())
        }
        QuantizationMode::Int4 => QuantizedCodes::Int4(
            values
                .chunks(2)
                .map(|pair| {
                    let lo = code(pair[0]);
                    let hi = pair.get(1).map_or(0, |&v| code(v));
                    lo | (hi << 4)
                })
                .collect(),
        ),
    };

    Ok(QuantizedTensor {
        shape,
        numel: values.len(),
        codes,
        metadata: CompressionMetadata {
            min,
            max,
            scale,
            original_dtype: DType::F32,
            mode,
        },
    })
}

/// Quantize an `f32` tensor.
///
/// Non-finite elements, or a range too wide for a finite scale, are
/// rejected rather than producing codes that dequantize to NaN.
pub fn quantize(tensor: &Tensor, mode: QuantizationMode) -> Result<QuantizedTensor> {
    let values = tensor.as_f32()?;
    quantize_values(values, tensor.shape().to_vec(), mode)
}

impl QuantizedTensor {
    /// Logical shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of logical elements
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Metadata needed for dequantization
    pub fn metadata(&self) -> &CompressionMetadata {
        &self.metadata
    }

    /// Raw codes
    pub fn codes(&self) -> &QuantizedCodes {
        &self.codes
    }

    /// Bytes occupied by the codes
    pub fn nbytes(&self) -> usize {
        match &self.codes {
            QuantizedCodes::Int8(c) => c.len(),
            QuantizedCodes::Int4(c) => c.len(),
        }
    }

    /// Unsigned code for element `i`
    #[inline]
    fn code(&self, i: usize) -> u8 {
        match &self.codes {
            QuantizedCodes::Int8(c) => (c[i] as i16 + 128) as u8,
            QuantizedCodes::Int4(c) => {
                let byte = c[i / 2];
                if i % 2 == 0 {
                    byte & 0x0f
                } else {
                    byte >> 4
                }
            }
        }
    }

    /// Reconstruct the `f32` values
    pub fn dequantize_values(&self) -> Vec<f32> {
        let CompressionMetadata { min, scale, .. } = self.metadata;
        (0..self.numel)
            .map(|i| self.code(i) as f32 * scale + min)
            .collect()
    }

    /// Reconstruct an `f32` tensor with the original shape
    pub fn dequantize(&self) -> Result<Tensor> {
        Tensor::from_f32(self.shape.clone(), self.dequantize_values())
    }

    /// View `int8` codes as an `i8` tensor.
    pub fn to_i8_tensor(&self) -> Result<Tensor> {
        match &self.codes {
            QuantizedCodes::Int8(c) => Tensor::from_i8(self.shape.clone(), c.clone()),
            QuantizedCodes::Int4(_) => Err(InductionError::QuantizationModeUnsupported(
                "int4 codes have no i8 tensor view".to_string(),
            )),
        }
    }
}

/// Compressed key/value pair with separate metadata per tensor
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedKv {
    /// Quantized keys
    pub keys: QuantizedTensor,
    /// Quantized values
    pub values: QuantizedTensor,
}

impl CompressedKv {
    /// Bytes occupied by both code buffers
    pub fn nbytes(&self) -> usize {
        self.keys.nbytes() + self.values.nbytes()
    }
}

/// Standalone key/value compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct KvCompressor {
    mode: QuantizationMode,
}

impl KvCompressor {
    /// Create a compressor for a fixed mode
    pub fn new(mode: QuantizationMode) -> Self {
        tracing::info!(mode = %mode, "KvCompressor initialized");
        Self { mode }
    }

    /// Create a compressor from a mode name
    pub fn from_mode_str(mode: &str) -> Result<Self> {
        Ok(Self::new(mode.parse()?))
    }

    /// Configured mode
    pub fn mode(&self) -> QuantizationMode {
        self.mode
    }

    /// Quantize a key/value pair
    pub fn compress(&self, k: &Tensor, v: &Tensor) -> Result<CompressedKv> {
        let compressed = CompressedKv {
            keys: quantize(k, self.mode)?,
            values: quantize(v, self.mode)?,
        };
        tracing::debug!(
            "Compressed KV pair: {} -> {} bytes",
            k.nbytes() + v.nbytes(),
            compressed.nbytes()
        );
        Ok(compressed)
    }

    /// Reconstruct a key/value pair
    pub fn decompress(&self, compressed: &CompressedKv) -> Result<(Tensor, Tensor)> {
        Ok((
            compressed.keys.dequantize()?,
            compressed.values.dequantize()?,
        ))
    }
}
