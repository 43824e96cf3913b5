//! Graph executor
//!
//! The [`Scheduler`] owns the KV cache and runs an IR [`Graph`] node by
//! node in insertion order. Each execution gets a fresh [`TensorEnv`]
//! seeded from the caller's inputs and returns it in full, intermediates
//! included.
//!
//! ## Failure policy
//!
//! The first failing node aborts execution with
//! [`InductionError::Node`] naming the node index and op. KV cache
//! mutations made by earlier nodes are not rolled back.

use crate::error::{InductionError, Result};
use crate::ir::{Graph, Node, OpKind};
use crate::kernels::{self, RopeTable, DEFAULT_RMS_EPS};
use crate::kv_cache::{KvCache, KvCacheConfig};
use crate::quantize::QuantizationMode;
use crate::tensor::{Tensor, TensorEnv};
use std::time::Instant;

/// Executes IR graphs against a KV cache
#[derive(Debug, Clone)]
pub struct Scheduler {
    cache: KvCache,
}

impl Scheduler {
    /// Create a scheduler with a fresh cache
    pub fn new(config: KvCacheConfig) -> Result<Self> {
        Ok(Self::with_cache(KvCache::new(config)?))
    }

    /// Create a scheduler around an existing cache
    pub fn with_cache(cache: KvCache) -> Self {
        Self { cache }
    }

    /// The KV cache
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }

    /// Mutable access to the KV cache
    pub fn cache_mut(&mut self) -> &mut KvCache {
        &mut self.cache
    }

    /// Run every node of `graph` in order, starting from `inputs`.
    pub fn execute(&mut self, graph: &Graph, inputs: TensorEnv) -> Result<TensorEnv> {
        graph.check_inputs(&inputs)?;

        let start = Instant::now();
        tracing::debug!(nodes = graph.len(), inputs = inputs.len(), "Executing graph");

        let mut env = inputs;
        for (index, node) in graph.nodes().iter().enumerate() {
            tracing::trace!(index, node = %node, "Dispatching node");
            if let Err(e) = self.execute_node(node, &mut env) {
                tracing::debug!(index, op = %node.op, error = %e, "Node failed");
                return Err(e.at_node(index, node.op));
            }
        }

        tracing::debug!(
            nodes = graph.len(),
            tensors = env.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Graph executed"
        );
        Ok(env)
    }

    fn execute_node(&mut self, node: &Node, env: &mut TensorEnv) -> Result<()> {
        node.check_arity()?;
        let input = |i: usize| env.require(&node.inputs[i]);

        match node.op {
            OpKind::MatMul => {
                let y = kernels::matmul(input(0)?, input(1)?)?;
                env.insert(node.outputs[0].clone(), y);
            }
            OpKind::Add => {
                let y = kernels::add(input(0)?, input(1)?)?;
                env.insert(node.outputs[0].clone(), y);
            }
            OpKind::Mul => {
                let y = kernels::multiply(input(0)?, input(1)?)?;
                env.insert(node.outputs[0].clone(), y);
            }
            OpKind::RmsNorm => {
                let eps = node.float_attr_or("eps", DEFAULT_RMS_EPS as f64)? as f32;
                let y = kernels::rms_normalize(input(0)?, input(1)?, eps)?;
                env.insert(node.outputs[0].clone(), y);
            }
            OpKind::Softmax => {
                let axis = match node.attr("axis") {
                    Some(_) => node.int_attr("axis")?,
                    None => node.int_attr_or("dim", -1)?,
                };
                let y = kernels::softmax(input(0)?, axis)?;
                env.insert(node.outputs[0].clone(), y);
            }
            OpKind::Rope => {
                let position = node.usize_attr("position")?;
                let (q, k) = match node.inputs.len() {
                    3 => {
                        let table = RopeTable::from_tensor(input(2)?)?;
                        kernels::rope_apply_with_table(input(0)?, input(1)?, position, &table)?
                    }
                    _ => kernels::rope_apply(input(0)?, input(1)?, position)?,
                };
                env.insert(node.outputs[0].clone(), q);
                env.insert(node.outputs[1].clone(), k);
            }
            OpKind::KvWrite => {
                let layer = node.usize_attr("layer")?;
                self.cache.write(layer, input(0)?, input(1)?)?;
            }
            OpKind::KvRead => {
                let layer = node.usize_attr("layer")?;
                let (k, v) = self.cache.read(layer)?;
                env.insert(node.outputs[0].clone(), k);
                env.insert(node.outputs[1].clone(), v);
            }
            OpKind::KvCompress => {
                let layer = node.usize_attr("layer")?;
                let mode: QuantizationMode = node.str_attr("mode")?.parse()?;
                self.cache.compress(layer, mode)?;
            }
        }
        Ok(())
    }

    /// Execute and return one named output.
    pub fn execute_for(&mut self, graph: &Graph, inputs: TensorEnv, output: &str) -> Result<Tensor> {
        let mut env = self.execute(graph, inputs)?;
        env.remove(output)
            .ok_or_else(|| InductionError::UnknownTensor(output.to_string()))
    }
}
