//! Tensors and the named tensor environment
//!
//! A [`Tensor`] is a dense row-major buffer with a shape of positive
//! dimensions and one of the supported element types. The
//! [`TensorEnv`] is the name -> tensor mapping threaded through a single
//! graph execution; it owns every tensor it holds.

use crate::error::{InductionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Element types supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit float
    F32,
    /// 8-bit signed integer
    I8,
}

impl Default for DType {
    fn default() -> Self {
        Self::F32
    }
}

impl DType {
    /// Bytes per element
    pub fn size_of(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::I8 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "float32"),
            Self::I8 => write!(f, "int8"),
        }
    }
}

/// Typed element storage
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// 32-bit float elements
    F32(Vec<f32>),
    /// 8-bit signed integer elements
    I8(Vec<i8>),
}

impl TensorData {
    fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::I8(v) => v.len(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::I8(_) => DType::I8,
        }
    }
}

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: TensorData,
}

/// Check that every dimension is positive and return the element count.
pub(crate) fn checked_numel(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() {
        return Ok(1);
    }
    if let Some(pos) = shape.iter().position(|&d| d == 0) {
        return Err(InductionError::InvalidShape(format!(
            "dimension {} of {:?} is zero",
            pos, shape
        )));
    }
    Ok(shape.iter().product())
}

impl Tensor {
    fn new(shape: Vec<usize>, data: TensorData) -> Result<Self> {
        let numel = checked_numel(&shape)?;
        if numel != data.len() {
            return Err(InductionError::InvalidShape(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                numel,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build an `f32` tensor, validating the shape against the data length.
    pub fn from_f32(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self> {
        Self::new(shape.into(), TensorData::F32(data))
    }

    /// Build an `i8` tensor, validating the shape against the data length.
    pub fn from_i8(shape: impl Into<Vec<usize>>, data: Vec<i8>) -> Result<Self> {
        Self::new(shape.into(), TensorData::I8(data))
    }

    /// Zero-filled `f32` tensor
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        let numel = checked_numel(&shape)?;
        Ok(Self {
            shape,
            data: TensorData::F32(vec![0.0; numel]),
        })
    }

    /// Rank-0 `f32` tensor
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: TensorData::F32(vec![value]),
        }
    }

    /// Shape of the tensor
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total element count
    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Size of the last dimension (1 for scalars)
    #[inline]
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Raw typed storage
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Bytes occupied by the element buffer
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype().size_of()
    }

    /// Borrow the elements as `f32`, failing for other element types.
    pub fn as_f32(&self) -> Result<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Ok(v),
            other => Err(InductionError::DTypeMismatch {
                expected: DType::F32,
                found: other.dtype(),
            }),
        }
    }

    /// Borrow the elements as `i8`, failing for other element types.
    pub fn as_i8(&self) -> Result<&[i8]> {
        match &self.data {
            TensorData::I8(v) => Ok(v),
            other => Err(InductionError::DTypeMismatch {
                expected: DType::I8,
                found: other.dtype(),
            }),
        }
    }

    /// Consume the tensor and return its `f32` elements.
    pub fn into_f32(self) -> Result<Vec<f32>> {
        match self.data {
            TensorData::F32(v) => Ok(v),
            other => Err(InductionError::DTypeMismatch {
                expected: DType::F32,
                found: other.dtype(),
            }),
        }
    }

    /// Same data, new shape with the same element count.
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        Self::new(shape.into(), self.data)
    }
}

/// Owned name -> tensor mapping for one graph execution
#[derive(Debug, Clone, Default)]
pub struct TensorEnv {
    tensors: HashMap<String, Tensor>,
}

impl TensorEnv {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a named tensor
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    /// Look up a tensor by name
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Look up a tensor, failing with `UnknownTensor` when absent.
    pub fn require(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| InductionError::UnknownTensor(name.to_string()))
    }

    /// Remove a tensor from the environment
    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }

    /// Whether a name is bound
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Bound names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of bound tensors
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the environment is empty
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Consume the environment and return the underlying map
    pub fn into_inner(self) -> HashMap<String, Tensor> {
        self.tensors
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for TensorEnv {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl From<HashMap<String, Tensor>> for TensorEnv {
    fn from(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }
}
