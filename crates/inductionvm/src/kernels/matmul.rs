//! Matrix multiplication
//!
//! `matmul(x, w)` multiplies the trailing two dimensions:
//!
//! - `x: [..., m, k]` times `w: [k, n]` broadcasts the weight across every
//!   leading batch index.
//! - `x: [..., m, k]` times `w: [..., k, n]` with identical leading
//!   dimensions multiplies batch by batch.
//! - A rank-1 `x: [k]` is treated as a single row and yields `[n]`.

use crate::error::{InductionError, Result};
use crate::tensor::Tensor;

/// Row-major GEMM: `c = a * b`
///
/// # Arguments
/// * `a` - Matrix A (m x k)
/// * `b` - Matrix B (k x n)
/// * `c` - Output (m x n), overwritten
#[inline]
pub fn gemm(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(c.len(), m * n);

    c.fill(0.0);

    // i-k-j order keeps the inner loop streaming over contiguous rows of B and C
    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for kk in 0..k {
            let a_ik = a[i * k + kk];
            if a_ik == 0.0 {
                continue;
            }
            let b_row = &b[kk * n..(kk + 1) * n];
            for (c_ij, &b_kj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ik * b_kj;
            }
        }
    }
}

/// Matrix product over the trailing two dimensions.
pub fn matmul(x: &Tensor, w: &Tensor) -> Result<Tensor> {
    let xs = x.shape();
    let ws = w.shape();

    if xs.is_empty() || ws.len() < 2 {
        return Err(InductionError::ShapeMismatch(format!(
            "matmul needs x of rank >= 1 and w of rank >= 2, got {:?} and {:?}",
            xs, ws
        )));
    }

    let (x_batch, m, k) = if xs.len() == 1 {
        (&xs[..0], 1, xs[0])
    } else {
        (&xs[..xs.len() - 2], xs[xs.len() - 2], xs[xs.len() - 1])
    };
    let (w_batch, kw, n) = (&ws[..ws.len() - 2], ws[ws.len() - 2], ws[ws.len() - 1]);

    if k != kw {
        return Err(InductionError::ShapeMismatch(format!(
            "matmul inner dimensions differ: {:?} x {:?} ({} != {})",
            xs, ws, k, kw
        )));
    }

    let shared_weight = w_batch.is_empty();
    if !shared_weight && w_batch != x_batch {
        return Err(InductionError::ShapeMismatch(format!(
            "matmul batch dimensions differ: {:?} vs {:?}",
            x_batch, w_batch
        )));
    }

    let xd = x.as_f32()?;
    let wd = w.as_f32()?;
    let batch: usize = x_batch.iter().product();

    let mut out = vec![0.0f32; batch * m * n];
    for b in 0..batch {
        let a = &xd[b * m * k..(b + 1) * m * k];
        let bw = if shared_weight {
            wd
        } else {
            &wd[b * k * n..(b + 1) * k * n]
        };
        gemm(a, bw, &mut out[b * m * n..(b + 1) * m * n], m, k, n);
    }

    let mut shape = x_batch.to_vec();
    if xs.len() > 1 {
        shape.push(m);
    }
    shape.push(n);
    Tensor::from_f32(shape, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], data: &[f32]) -> Tensor {
        Tensor::from_f32(shape.to_vec(), data.to_vec()).unwrap()
    }

    #[test]
    fn test_gemm_identity() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let eye = [1.0, 0.0, 0.0, 1.0];
        let mut c = [0.0; 4];
        gemm(&a, &eye, &mut c, 2, 2, 2);
        assert_eq!(c, a);
    }

    #[test]
    fn test_matmul_exact_integers() {
        let x = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let w = t(&[3, 2], &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.as_f32().unwrap(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_broadcast_weight() {
        let x = t(&[2, 1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let w = t(&[2, 1], &[1.0, 1.0]);
        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.shape(), &[2, 1, 1]);
        assert_eq!(y.as_f32().unwrap(), &[3.0, 7.0]);
    }

    #[test]
    fn test_matmul_batched_weight() {
        let x = t(&[2, 1, 2], &[1.0, 2.0, 3.0, 4.0]);
        let w = t(&[2, 2, 1], &[1.0, 0.0, 0.0, 1.0]);
        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.as_f32().unwrap(), &[1.0, 4.0]);
    }

    #[test]
    fn test_matmul_vector() {
        let x = t(&[2], &[1.0, 2.0]);
        let w = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.shape(), &[3]);
        assert_eq!(y.as_f32().unwrap(), &[9.0, 12.0, 15.0]);
    }

    #[test]
    fn test_matmul_inner_mismatch() {
        let x = t(&[2, 3], &[0.0; 6]);
        let w = t(&[2, 2], &[0.0; 4]);
        assert!(matches!(
            matmul(&x, &w),
            Err(InductionError::ShapeMismatch(_))
        ));
    }
}
