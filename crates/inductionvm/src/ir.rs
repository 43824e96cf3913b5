//! IR graph builder
//!
//! A [`Graph`] is an ordered list of [`Node`]s plus a declaration table of
//! tensor shapes. Execution order is insertion order; nothing is reordered
//! or fused. Builders never execute anything: they check tensor names and
//! node arity, record the node and hand back its [`NodeId`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use inductionvm::ir::Graph;
//!
//! let mut graph = Graph::new();
//! graph.declare("a", [2, 2], DType::F32)?;
//! graph.add("a", "b", "c")?;
//! graph.softmax("c", "probs", -1)?;
//! ```

use crate::error::{InductionError, Result};
use crate::kernels::DEFAULT_RMS_EPS;
use crate::quantize::QuantizationMode;
use crate::tensor::{DType, TensorEnv};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// The fixed set of IR operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Matrix product
    #[serde(rename = "matmul")]
    MatMul,
    /// Elementwise addition
    #[serde(rename = "add")]
    Add,
    /// Elementwise multiplication
    #[serde(rename = "mul")]
    Mul,
    /// RMS normalization
    #[serde(rename = "rmsnorm")]
    RmsNorm,
    /// Softmax along an axis
    #[serde(rename = "softmax")]
    Softmax,
    /// Rotary position embedding on a query/key pair
    #[serde(rename = "rope")]
    Rope,
    /// Append to the KV cache
    #[serde(rename = "kv_write")]
    KvWrite,
    /// Read the KV cache
    #[serde(rename = "kv_read")]
    KvRead,
    /// Quantize a KV cache layer
    #[serde(rename = "kv_compress")]
    KvCompress,
}

impl OpKind {
    /// Every operation kind
    pub const ALL: [OpKind; 9] = [
        OpKind::MatMul,
        OpKind::Add,
        OpKind::Mul,
        OpKind::RmsNorm,
        OpKind::Softmax,
        OpKind::Rope,
        OpKind::KvWrite,
        OpKind::KvRead,
        OpKind::KvCompress,
    ];

    /// Canonical op name
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::MatMul => "matmul",
            OpKind::Add => "add",
            OpKind::Mul => "mul",
            OpKind::RmsNorm => "rmsnorm",
            OpKind::Softmax => "softmax",
            OpKind::Rope => "rope",
            OpKind::KvWrite => "kv_write",
            OpKind::KvRead => "kv_read",
            OpKind::KvCompress => "kv_compress",
        }
    }

    /// Accepted input counts (inclusive range) and exact output count
    pub fn arity(&self) -> (usize, usize, usize) {
        match self {
            OpKind::MatMul | OpKind::Add | OpKind::Mul | OpKind::RmsNorm => (2, 2, 1),
            OpKind::Softmax => (1, 1, 1),
            // Optional third input is a precomputed cos/sin table
            OpKind::Rope => (2, 3, 2),
            OpKind::KvWrite => (2, 2, 0),
            OpKind::KvRead => (0, 0, 2),
            OpKind::KvCompress => (0, 0, 0),
        }
    }

    /// Whether the op mutates the KV cache
    pub fn has_side_effects(&self) -> bool {
        matches!(self, OpKind::KvWrite | OpKind::KvCompress)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = InductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "matmul" => Ok(OpKind::MatMul),
            "add" => Ok(OpKind::Add),
            "mul" | "multiply" => Ok(OpKind::Mul),
            "rmsnorm" | "rms_normalize" => Ok(OpKind::RmsNorm),
            "softmax" => Ok(OpKind::Softmax),
            "rope" | "rope_apply" => Ok(OpKind::Rope),
            "kv_write" => Ok(OpKind::KvWrite),
            "kv_read" => Ok(OpKind::KvRead),
            "kv_compress" => Ok(OpKind::KvCompress),
            other => Err(InductionError::UnknownOperation(other.to_string())),
        }
    }
}

/// Scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Integer (layer, position, axis)
    Int(i64),
    /// Float (eps)
    Float(f64),
    /// String (mode)
    Str(String),
}

impl AttrValue {
    /// Integer value, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float value; integers are widened
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Str(_) => None,
        }
    }

    /// String value, if this is a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<usize> for AttrValue {
    fn from(v: usize) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v as f64)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

/// Handle to a node: its position in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Position of the node in execution order
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Attribute map, ordered for stable debug output
pub type Attrs = BTreeMap<String, AttrValue>;

/// One IR operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Operation kind
    pub op: OpKind,
    /// Input tensor names, in order
    pub inputs: Vec<String>,
    /// Output tensor names, in order
    pub outputs: Vec<String>,
    /// Scalar attributes
    #[serde(default)]
    pub attrs: Attrs,
}

impl Node {
    /// Look up an attribute
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Required integer attribute
    pub fn int_attr(&self, name: &str) -> Result<i64> {
        let value = self
            .attr(name)
            .ok_or_else(|| InductionError::MissingAttribute(name.to_string()))?;
        value.as_int().ok_or_else(|| InductionError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("expected int, got {}", value.type_name()),
        })
    }

    /// Required non-negative integer attribute
    pub fn usize_attr(&self, name: &str) -> Result<usize> {
        let value = self.int_attr(name)?;
        usize::try_from(value).map_err(|_| InductionError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("must be non-negative, got {}", value),
        })
    }

    /// Optional integer attribute with a default
    pub fn int_attr_or(&self, name: &str, default: i64) -> Result<i64> {
        match self.attr(name) {
            None => Ok(default),
            Some(_) => self.int_attr(name),
        }
    }

    /// Optional float attribute with a default
    pub fn float_attr_or(&self, name: &str, default: f64) -> Result<f64> {
        match self.attr(name) {
            None => Ok(default),
            Some(value) => value.as_float().ok_or_else(|| InductionError::InvalidAttribute {
                name: name.to_string(),
                reason: format!("expected float, got {}", value.type_name()),
            }),
        }
    }

    /// Required string attribute
    pub fn str_attr(&self, name: &str) -> Result<&str> {
        let value = self
            .attr(name)
            .ok_or_else(|| InductionError::MissingAttribute(name.to_string()))?;
        value.as_str().ok_or_else(|| InductionError::InvalidAttribute {
            name: name.to_string(),
            reason: format!("expected string, got {}", value.type_name()),
        })
    }

    /// Check input and output counts against the op's arity.
    pub fn check_arity(&self) -> Result<()> {
        let (min_in, max_in, outs) = self.op.arity();
        let n_in = self.inputs.len();
        if n_in < min_in || n_in > max_in || self.outputs.len() != outs {
            let expected_in = if min_in == max_in {
                min_in.to_string()
            } else {
                format!("{}..={}", min_in, max_in)
            };
            return Err(InductionError::InvalidGraph(format!(
                "{} takes {} inputs and {} outputs, got {} and {}",
                self.op,
                expected_in,
                outs,
                n_in,
                self.outputs.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) -> ({})",
            self.op,
            self.inputs.join(", "),
            self.outputs.join(", ")
        )
    }
}

/// Declared shape and element type of a tensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDecl {
    /// Declared shape
    pub shape: Vec<usize>,
    /// Declared element type
    pub dtype: DType,
}

/// Check that a tensor name is non-empty and uses `[A-Za-z0-9_.:/-]` only.
pub fn validate_tensor_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '/' | '-'));
    if ok {
        Ok(())
    } else {
        Err(InductionError::InvalidTensorName(name.to_string()))
    }
}

/// Ordered IR graph with a tensor declaration table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
    #[serde(default)]
    declarations: BTreeMap<String, TensorDecl>,
}

impl Graph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes in execution order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node by handle
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Declaration table
    pub fn declarations(&self) -> &BTreeMap<String, TensorDecl> {
        &self.declarations
    }

    /// Declaration of one tensor
    pub fn declaration(&self, name: &str) -> Option<&TensorDecl> {
        self.declarations.get(name)
    }

    /// Record the shape and element type of a tensor.
    pub fn declare(
        &mut self,
        name: &str,
        shape: impl Into<Vec<usize>>,
        dtype: DType,
    ) -> Result<()> {
        validate_tensor_name(name)?;
        let shape = shape.into();
        crate::tensor::checked_numel(&shape)?;
        self.declarations
            .insert(name.to_string(), TensorDecl { shape, dtype });
        Ok(())
    }

    /// Append a node after checking names and arity.
    pub fn add_op(
        &mut self,
        op: OpKind,
        inputs: &[&str],
        outputs: &[&str],
        attrs: Attrs,
    ) -> Result<NodeId> {
        for name in inputs.iter().chain(outputs) {
            validate_tensor_name(name)?;
        }
        let node = Node {
            op,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attrs,
        };
        node.check_arity()?;

        let id = NodeId(self.nodes.len());
        tracing::trace!(index = id.0, node = %node, "IR node added");
        self.nodes.push(node);
        Ok(id)
    }

    /// Append a node given its op name; unknown names fail.
    pub fn add_op_named(
        &mut self,
        op: &str,
        inputs: &[&str],
        outputs: &[&str],
        attrs: Attrs,
    ) -> Result<NodeId> {
        self.add_op(op.parse()?, inputs, outputs, attrs)
    }

    /// `out = x @ w`
    pub fn matmul(&mut self, x: &str, w: &str, out: &str) -> Result<NodeId> {
        self.add_op(OpKind::MatMul, &[x, w], &[out], Attrs::new())
    }

    /// `out = a + b`
    pub fn add(&mut self, a: &str, b: &str, out: &str) -> Result<NodeId> {
        self.add_op(OpKind::Add, &[a, b], &[out], Attrs::new())
    }

    /// `out = a * b`
    pub fn mul(&mut self, a: &str, b: &str, out: &str) -> Result<NodeId> {
        self.add_op(OpKind::Mul, &[a, b], &[out], Attrs::new())
    }

    /// RMSNorm of `x` scaled by `weight`
    pub fn rmsnorm(&mut self, x: &str, weight: &str, out: &str, eps: f32) -> Result<NodeId> {
        let attrs = Attrs::from([("eps".to_string(), AttrValue::from(eps))]);
        self.add_op(OpKind::RmsNorm, &[x, weight], &[out], attrs)
    }

    /// Softmax of `x` along `axis`
    pub fn softmax(&mut self, x: &str, out: &str, axis: i64) -> Result<NodeId> {
        let attrs = Attrs::from([("axis".to_string(), AttrValue::Int(axis))]);
        self.add_op(OpKind::Softmax, &[x], &[out], attrs)
    }

    /// Rotate `q`/`k` starting at `position` with unscaled frequencies
    pub fn rope(
        &mut self,
        q: &str,
        k: &str,
        q_out: &str,
        k_out: &str,
        position: usize,
    ) -> Result<NodeId> {
        let attrs = Attrs::from([("position".to_string(), AttrValue::from(position))]);
        self.add_op(OpKind::Rope, &[q, k], &[q_out, k_out], attrs)
    }

    /// Rotate `q`/`k` using a `[max_position, dim/2, 2]` cos/sin table
    pub fn rope_scaled(
        &mut self,
        q: &str,
        k: &str,
        table: &str,
        q_out: &str,
        k_out: &str,
        position: usize,
    ) -> Result<NodeId> {
        let attrs = Attrs::from([("position".to_string(), AttrValue::from(position))]);
        self.add_op(OpKind::Rope, &[q, k, table], &[q_out, k_out], attrs)
    }

    /// Append `k`/`v` to the cache at `layer`
    pub fn kv_write(&mut self, k: &str, v: &str, layer: usize) -> Result<NodeId> {
        let attrs = Attrs::from([("layer".to_string(), AttrValue::from(layer))]);
        self.add_op(OpKind::KvWrite, &[k, v], &[], attrs)
    }

    /// Read the valid prefix of `layer` into `k_out`/`v_out`
    pub fn kv_read(&mut self, k_out: &str, v_out: &str, layer: usize) -> Result<NodeId> {
        let attrs = Attrs::from([("layer".to_string(), AttrValue::from(layer))]);
        self.add_op(OpKind::KvRead, &[], &[k_out, v_out], attrs)
    }

    /// Quantize `layer` in place
    pub fn kv_compress(&mut self, layer: usize, mode: QuantizationMode) -> Result<NodeId> {
        let attrs = Attrs::from([
            ("layer".to_string(), AttrValue::from(layer)),
            ("mode".to_string(), AttrValue::from(mode.as_str())),
        ]);
        self.add_op(OpKind::KvCompress, &[], &[], attrs)
    }

    /// Check provided inputs against the declaration table.
    pub fn check_inputs(&self, inputs: &TensorEnv) -> Result<()> {
        for (name, decl) in &self.declarations {
            let Some(tensor) = inputs.get(name) else {
                continue;
            };
            if tensor.dtype() != decl.dtype {
                return Err(InductionError::DTypeMismatch {
                    expected: decl.dtype,
                    found: tensor.dtype(),
                });
            }
            if tensor.shape() != decl.shape.as_slice() {
                return Err(InductionError::ShapeMismatch(format!(
                    "input '{}' declared {:?}, got {:?}",
                    name,
                    decl.shape,
                    tensor.shape()
                )));
            }
        }
        Ok(())
    }

    /// Statically check the graph against a set of inputs.
    ///
    /// Every node must have a valid arity and consume only graph inputs or
    /// outputs of earlier nodes. Failures carry the offending node.
    pub fn validate(&self, inputs: &TensorEnv) -> Result<()> {
        self.check_inputs(inputs)?;

        let mut available: HashSet<&str> = inputs.names().into_iter().collect();
        for (index, node) in self.nodes.iter().enumerate() {
            node.check_arity().map_err(|e| e.at_node(index, node.op))?;
            if let Some(missing) = node
                .inputs
                .iter()
                .find(|name| !available.contains(name.as_str()))
            {
                return Err(InductionError::UnknownTensor(missing.clone()).at_node(index, node.op));
            }
            available.extend(node.outputs.iter().map(String::as_str));
        }
        Ok(())
    }

    /// Canonicalize attributes without changing outputs.
    ///
    /// Fills default `eps` and `axis`, renames the legacy softmax `dim`
    /// attribute to `axis` and widens integer `eps` values to floats.
    /// Returns the number of rewritten nodes.
    pub fn optimize(&mut self) -> usize {
        let mut rewritten = 0;
        for node in &mut self.nodes {
            let changed = match node.op {
                OpKind::RmsNorm => match node.attrs.get("eps") {
                    None => {
                        node.attrs
                            .insert("eps".to_string(), AttrValue::from(DEFAULT_RMS_EPS));
                        true
                    }
                    Some(AttrValue::Int(v)) => {
                        let eps = *v as f64;
                        node.attrs.insert("eps".to_string(), AttrValue::Float(eps));
                        true
                    }
                    Some(_) => false,
                },
                OpKind::Softmax if !node.attrs.contains_key("axis") => {
                    let axis = node.attrs.remove("dim").unwrap_or(AttrValue::Int(-1));
                    node.attrs.insert("axis".to_string(), axis);
                    true
                }
                _ => false,
            };
            rewritten += changed as usize;
        }
        tracing::debug!(nodes = self.nodes.len(), rewritten, "IR optimize pass");
        rewritten
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph({} nodes, {} declared tensors)",
            self.nodes.len(),
            self.declarations.len()
        )
    }
}
