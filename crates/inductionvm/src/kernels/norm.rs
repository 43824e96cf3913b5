//! RMS normalization
//!
//! ```text
//! output = x / sqrt(mean(x^2) + eps) * weight
//! ```
//!
//! The mean is taken over the last axis; `weight` scales each position of
//! that axis.

use crate::error::{InductionError, Result};
use crate::tensor::Tensor;

/// Default epsilon for RMSNorm
pub const DEFAULT_RMS_EPS: f32 = 1e-6;

/// In-place RMSNorm over a single row
#[inline]
pub fn rms_norm_row(x: &mut [f32], weight: &[f32], eps: f32) {
    debug_assert_eq!(x.len(), weight.len());
    if x.is_empty() {
        return;
    }

    let sum_sq: f32 = x.iter().map(|v| v * v).sum();
    let inv_rms = 1.0 / (sum_sq / x.len() as f32 + eps).sqrt();

    for (v, w) in x.iter_mut().zip(weight) {
        *v = *v * inv_rms * w;
    }
}

/// RMSNorm over the last axis of `x`.
///
/// `weight` must hold exactly `x.shape().last()` elements.
pub fn rms_normalize(x: &Tensor, weight: &Tensor, eps: f32) -> Result<Tensor> {
    let dim = x.last_dim();
    if weight.numel() != dim || weight.last_dim() != dim {
        return Err(InductionError::ShapeMismatch(format!(
            "rmsnorm weight {:?} does not match last axis of {:?}",
            weight.shape(),
            x.shape()
        )));
    }
    if eps.is_nan() || eps < 0.0 {
        return Err(InductionError::InvalidAttribute {
            name: "eps".to_string(),
            reason: format!("must be non-negative, got {}", eps),
        });
    }

    let w = weight.as_f32()?;
    let mut out = x.as_f32()?.to_vec();
    for row in out.chunks_exact_mut(dim) {
        rms_norm_row(row, w, eps);
    }
    Tensor::from_f32(x.shape().to_vec(), out)
}
