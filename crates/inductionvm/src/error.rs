//! Error types for InductionVM
//!
//! Every failure in the engine is fatal to the current call. Nothing is
//! retried internally; the caller decides whether to retry with corrected
//! inputs, fall back to an uncompressed or unscaled path, or surface the
//! error.

use crate::ir::OpKind;
use crate::tensor::DType;
use thiserror::Error;

/// Result type alias for InductionVM operations
pub type Result<T> = std::result::Result<T, InductionError>;

/// Main error type for InductionVM
#[derive(Error, Debug)]
pub enum InductionError {
    /// Kernel input shapes are incompatible
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A node references a tensor that is not present in the environment
    #[error("Unknown tensor: '{0}'")]
    UnknownTensor(String),

    /// An operation name does not map to a supported op kind
    #[error("Unknown operation: '{0}'")]
    UnknownOperation(String),

    /// A KV cache write would run past `max_seq_len`
    #[error(
        "KV cache capacity exceeded on layer {layer}: cursor {cursor} + {incoming} > max_seq_len {max_seq_len}"
    )]
    CacheCapacityExceeded {
        /// Layer index
        layer: usize,
        /// Valid positions already written
        cursor: usize,
        /// Positions in the rejected write
        incoming: usize,
        /// Configured capacity
        max_seq_len: usize,
    },

    /// A layer was read (or compressed) before its first write
    #[error("KV cache layer {0} is not initialized")]
    UninitializedLayer(usize),

    /// Compression requested with a mode the quantizer does not implement
    #[error("Quantization mode not supported: '{0}'")]
    QuantizationModeUnsupported(String),

    /// Input holds NaN or infinity, or its range overflows `f32`
    #[error("Cannot quantize: {0}")]
    NonFiniteRange(String),

    /// Layer index outside `[0, num_layers)`
    #[error("Layer {layer} out of range (num_layers = {num_layers})")]
    InvalidLayer {
        /// Requested layer
        layer: usize,
        /// Configured layer count
        num_layers: usize,
    },

    /// Tensor name is not syntactically well-formed
    #[error("Invalid tensor name: '{0}'")]
    InvalidTensorName(String),

    /// Shape has a zero dimension or does not match the data length
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Kernel received an element type it cannot operate on
    #[error("DType mismatch: expected {expected}, found {found}")]
    DTypeMismatch {
        /// Required element type
        expected: DType,
        /// Element type received
        found: DType,
    },

    /// Required node attribute is absent
    #[error("Missing attribute '{0}'")]
    MissingAttribute(String),

    /// Node attribute has the wrong scalar type or an out-of-range value
    #[error("Invalid attribute '{name}': {reason}")]
    InvalidAttribute {
        /// Attribute key
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// Structural problem with a graph (node arity, declarations)
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// A graph node failed during execution
    #[error("Node {index} ({op}) failed: {source}")]
    Node {
        /// Position of the node in the graph
        index: usize,
        /// Operation kind of the failing node
        op: OpKind,
        /// Underlying failure
        #[source]
        source: Box<InductionError>,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Speculative generation errors (collaborator contract violations)
    #[error("Generation error: {0}")]
    Generation(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InductionError {
    /// Wrap an error with the graph node it came from.
    pub fn at_node(self, index: usize, op: OpKind) -> Self {
        InductionError::Node {
            index,
            op,
            source: Box::new(self),
        }
    }

    /// Strip node context and return the underlying failure.
    pub fn root_cause(&self) -> &InductionError {
        match self {
            InductionError::Node { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Index of the failing node, if this error came from graph execution.
    pub fn node_index(&self) -> Option<usize> {
        match self {
            InductionError::Node { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for InductionError {
    fn from(err: serde_json::Error) -> Self {
        InductionError::Serialization(err.to_string())
    }
}
