//! Elementwise binary kernels
//!
//! Both operands must have identical shapes; there is no broadcasting.

use super::ensure_same_shape;
use crate::error::Result;
use crate::tensor::Tensor;

fn zip_with(op: &str, a: &Tensor, b: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
    ensure_same_shape(op, a, b)?;
    let out: Vec<f32> = a
        .as_f32()?
        .iter()
        .zip(b.as_f32()?)
        .map(|(&x, &y)| f(x, y))
        .collect();
    Tensor::from_f32(a.shape().to_vec(), out)
}

/// Elementwise `a + b`
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    zip_with("add", a, b, |x, y| x + y)
}

/// Elementwise `a * b`
pub fn multiply(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    zip_with("multiply", a, b, |x, y| x * y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InductionError;

    #[test]
    fn test_add_and_multiply() {
        let a = Tensor::from_f32(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::from_f32(vec![2, 2], vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        assert_eq!(add(&a, &b).unwrap().as_f32().unwrap(), &[6.0, 8.0, 10.0, 12.0]);
        assert_eq!(
            multiply(&a, &b).unwrap().as_f32().unwrap(),
            &[5.0, 12.0, 21.0, 32.0]
        );
    }

    #[test]
    fn test_shape_must_match() {
        let a = Tensor::zeros(vec![2, 2]).unwrap();
        let b = Tensor::zeros(vec![4]).unwrap();
        assert!(matches!(add(&a, &b), Err(InductionError::ShapeMismatch(_))));
    }

    #[test]
    fn test_int8_rejected() {
        let a = Tensor::from_i8(vec![2], vec![1, 2]).unwrap();
        let b = Tensor::from_i8(vec![2], vec![1, 2]).unwrap();
        assert!(matches!(
            multiply(&a, &b),
            Err(InductionError::DTypeMismatch { .. })
        ));
    }
}
