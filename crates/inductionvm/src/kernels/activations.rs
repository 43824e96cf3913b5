//! Softmax
//!
//! Numerically stable: each slice has its maximum subtracted before
//! exponentiation, so large logits never overflow.

use super::normalize_axis;
use crate::error::Result;
use crate::tensor::Tensor;

/// In-place softmax over a contiguous slice
#[inline]
pub fn softmax_slice(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }

    let max_val = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }

    let inv_sum = 1.0 / sum;
    for v in x.iter_mut() {
        *v *= inv_sum;
    }
}

/// Softmax along `axis` (negative values count from the end).
pub fn softmax(x: &Tensor, axis: i64) -> Result<Tensor> {
    let data = x.as_f32()?;
    if x.rank() == 0 {
        return Ok(Tensor::scalar(1.0));
    }

    let shape = x.shape();
    let axis = normalize_axis(axis, shape.len())?;
    let outer: usize = shape[..axis].iter().product();
    let len = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();

    let mut out = data.to_vec();

    if inner == 1 {
        for row in out.chunks_exact_mut(len) {
            softmax_slice(row);
        }
    } else {
        // Strided axis: gather, normalize, scatter
        let mut scratch = vec![0.0f32; len];
        for o in 0..outer {
            let base = o * len * inner;
            for i in 0..inner {
                for (j, s) in scratch.iter_mut().enumerate() {
                    *s = out[base + j * inner + i];
                }
                softmax_slice(&mut scratch);
                for (j, s) in scratch.iter().enumerate() {
                    out[base + j * inner + i] = *s;
                }
            }
        }
    }

    Tensor::from_f32(shape.to_vec(), out)
}
