//! Rotary Position Embeddings (RoPE)
//!
//! ## Mathematical Background
//!
//! RoPE rotates pairs of query/key features by a position-dependent angle:
//! ```text
//! x_rotated = x * cos(theta) + rotate_half(x) * sin(theta)
//! where theta = position * base^(-2i/d)
//! ```
//!
//! Pairs use the rotate-half layout: feature `i` is paired with feature
//! `i + d/2` of the same row. Rotation by `-theta` undoes rotation by
//! `theta`, so the transform loses no information.
//!
//! For tensors of rank >= 2 the second-to-last axis is the sequence axis;
//! row `t` along it is rotated at `position + t`.

use crate::error::{InductionError, Result};
use crate::tensor::Tensor;

/// Default RoPE base frequency (Llama-2 / Mistral)
pub const DEFAULT_ROPE_BASE: f64 = 10000.0;

/// Inverse frequencies `1 / base^(2i/dim)` for `i` in `[0, dim/2)`.
pub fn inverse_frequencies(dim: usize, base: f64) -> Vec<f64> {
    (0..dim / 2)
        .map(|i| 1.0 / base.powf((2 * i) as f64 / dim as f64))
        .collect()
}

/// Precomputed cos/sin tables over positions `[0, max_position)`
#[derive(Debug, Clone, PartialEq)]
pub struct RopeTable {
    /// Cosine values (max_position, half_dim)
    cos: Vec<f32>,
    /// Sine values (max_position, half_dim)
    sin: Vec<f32>,
    half_dim: usize,
    max_position: usize,
}

impl RopeTable {
    /// Tabulate `cos(p * f)` and `sin(p * f)` for every position `p` and
    /// frequency `f`.
    pub fn from_frequencies(freqs: &[f64], max_position: usize) -> Self {
        let half_dim = freqs.len();
        let mut cos = vec![0.0f32; max_position * half_dim];
        let mut sin = vec![0.0f32; max_position * half_dim];

        for pos in 0..max_position {
            let offset = pos * half_dim;
            for (i, &freq) in freqs.iter().enumerate() {
                let theta = pos as f64 * freq;
                cos[offset + i] = theta.cos() as f32;
                sin[offset + i] = theta.sin() as f32;
            }
        }

        Self {
            cos,
            sin,
            half_dim,
            max_position,
        }
    }

    /// Unscaled table for `dim` features.
    pub fn precompute(dim: usize, max_position: usize, base: f64) -> Self {
        Self::from_frequencies(&inverse_frequencies(dim, base), max_position)
    }

    /// Get cos/sin for a specific position
    #[inline]
    pub fn get(&self, position: usize) -> (&[f32], &[f32]) {
        let offset = position * self.half_dim;
        (
            &self.cos[offset..offset + self.half_dim],
            &self.sin[offset..offset + self.half_dim],
        )
    }

    /// Full cosine table, row-major `(max_position, half_dim)`
    pub fn cos(&self) -> &[f32] {
        &self.cos
    }

    /// Full sine table, row-major `(max_position, half_dim)`
    pub fn sin(&self) -> &[f32] {
        &self.sin
    }

    /// Number of frequency pairs
    pub fn half_dim(&self) -> usize {
        self.half_dim
    }

    /// Number of tabulated positions
    pub fn max_position(&self) -> usize {
        self.max_position
    }

    /// Pack into a `[max_position, half_dim, 2]` tensor, `(cos, sin)` innermost.
    pub fn to_tensor(&self) -> Result<Tensor> {
        let mut data = Vec::with_capacity(self.cos.len() * 2);
        for (c, s) in self.cos.iter().zip(&self.sin) {
            data.push(*c);
            data.push(*s);
        }
        Tensor::from_f32(vec![self.max_position, self.half_dim, 2], data)
    }

    /// Inverse of [`RopeTable::to_tensor`].
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = tensor.shape();
        if shape.len() != 3 || shape[2] != 2 {
            return Err(InductionError::ShapeMismatch(format!(
                "rope table must be [max_position, half_dim, 2], got {:?}",
                shape
            )));
        }
        let data = tensor.as_f32()?;
        let (cos, sin): (Vec<f32>, Vec<f32>) = data.chunks_exact(2).map(|p| (p[0], p[1])).unzip();
        Ok(Self {
            cos,
            sin,
            half_dim: shape[1],
            max_position: shape[0],
        })
    }
}

/// Number of positions along the sequence axis (1 for rank-1 tensors).
fn seq_len(x: &Tensor) -> usize {
    if x.rank() >= 2 {
        x.shape()[x.rank() - 2]
    } else {
        1
    }
}

fn check_rotatable(x: &Tensor) -> Result<usize> {
    let dim = x.last_dim();
    if x.rank() == 0 || dim % 2 != 0 {
        return Err(InductionError::ShapeMismatch(format!(
            "rope needs an even last dimension, got {:?}",
            x.shape()
        )));
    }
    Ok(dim / 2)
}

/// Rotate every row of `x`; `angle(pos, i)` returns `(cos, sin)` for pair `i`.
fn rotate<F>(x: &Tensor, position: usize, inverse: bool, angle: F) -> Result<Tensor>
where
    F: Fn(usize, usize) -> (f32, f32),
{
    let half = check_rotatable(x)?;
    let dim = half * 2;
    let seq = seq_len(x);
    let mut out = x.as_f32()?.to_vec();

    for (row_idx, row) in out.chunks_exact_mut(dim).enumerate() {
        let pos = position + row_idx % seq;
        let (lo, hi) = row.split_at_mut(half);
        for i in 0..half {
            let (c, s) = angle(pos, i);
            let s = if inverse { -s } else { s };
            let (x0, x1) = (lo[i], hi[i]);
            lo[i] = x0 * c - x1 * s;
            hi[i] = x1 * c + x0 * s;
        }
    }

    Tensor::from_f32(x.shape().to_vec(), out)
}

fn rotate_pair(
    q: &Tensor,
    k: &Tensor,
    position: usize,
    base: f64,
    inverse: bool,
) -> Result<(Tensor, Tensor)> {
    let rot = |x: &Tensor| {
        let inv_freq = inverse_frequencies(x.last_dim(), base);
        rotate(x, position, inverse, |pos, i| {
            let theta = pos as f64 * inv_freq[i];
            (theta.cos() as f32, theta.sin() as f32)
        })
    };
    Ok((rot(q)?, rot(k)?))
}

/// Rotate query and key tensors starting at `position` with the default base.
pub fn rope_apply(q: &Tensor, k: &Tensor, position: usize) -> Result<(Tensor, Tensor)> {
    rotate_pair(q, k, position, DEFAULT_ROPE_BASE, false)
}

/// Undo [`rope_apply`] for the same `position`.
pub fn rope_apply_inverse(q: &Tensor, k: &Tensor, position: usize) -> Result<(Tensor, Tensor)> {
    rotate_pair(q, k, position, DEFAULT_ROPE_BASE, true)
}

/// Rotate query and key tensors using precomputed (possibly scaled) tables.
pub fn rope_apply_with_table(
    q: &Tensor,
    k: &Tensor,
    position: usize,
    table: &RopeTable,
) -> Result<(Tensor, Tensor)> {
    let rot = |x: &Tensor| {
        let half = check_rotatable(x)?;
        if half != table.half_dim {
            return Err(InductionError::ShapeMismatch(format!(
                "rope table has {} frequency pairs, tensor {:?} needs {}",
                table.half_dim,
                x.shape(),
                half
            )));
        }
        let last = position + seq_len(x) - 1;
        if last >= table.max_position {
            return Err(InductionError::ShapeMismatch(format!(
                "position {} beyond rope table of {} positions",
                last, table.max_position
            )));
        }
        rotate(x, position, false, |pos, i| {
            let (cos, sin) = table.get(pos);
            (cos[i], sin[i])
        })
    };
    Ok((rot(q)?, rot(k)?))
}
