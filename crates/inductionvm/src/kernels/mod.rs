//! CPU kernel library
//!
//! Pure, stateless tensor functions dispatched by the scheduler. Every
//! kernel validates shapes and element types up front and then runs to
//! completion; there is no partial failure.
//!
//! ## Kernel Categories
//!
//! - [`matmul`]: (batched) matrix multiplication
//! - [`elementwise`]: add, multiply
//! - [`norm`]: RMSNorm
//! - [`activations`]: numerically stable softmax
//! - [`rope`]: rotary position embeddings, plain and table-driven
//!
//! ## Memory Layout
//!
//! All tensors are dense row-major `f32`:
//!
//! - **Hidden states**: `[batch, seq_len, hidden_dim]`
//! - **Weights**: `[in_dim, out_dim]`
//! - **RoPE tables**: `[max_position, head_dim / 2]` for each of cos and sin

pub mod activations;
pub mod elementwise;
pub mod matmul;
pub mod norm;
pub mod rope;

pub use activations::softmax;
pub use elementwise::{add, multiply};
pub use matmul::{gemm, matmul};
pub use norm::{rms_normalize, DEFAULT_RMS_EPS};
pub use rope::{
    inverse_frequencies, rope_apply, rope_apply_inverse, rope_apply_with_table, RopeTable,
    DEFAULT_ROPE_BASE,
};

use crate::error::{InductionError, Result};
use crate::tensor::Tensor;

/// Fail unless both tensors have exactly the same shape.
pub(crate) fn ensure_same_shape(op: &str, a: &Tensor, b: &Tensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(InductionError::ShapeMismatch(format!(
            "{}: {:?} vs {:?}",
            op,
            a.shape(),
            b.shape()
        )));
    }
    Ok(())
}

/// Resolve a possibly negative axis against a rank.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i {
        return Err(InductionError::ShapeMismatch(format!(
            "axis {} out of range for rank {}",
            axis, rank
        )));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert_eq!(normalize_axis(0, 3).unwrap(), 0);
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
    }
}
