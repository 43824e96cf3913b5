//! # InductionVM - Inference Acceleration Core
//!
//! InductionVM sits between a model adapter and its numeric kernels. A
//! model step is described as a small IR graph of tensor operations, which
//! the scheduler runs against a per-layer KV cache. Around that core sit
//! three accelerators: RoPE frequency scaling for longer contexts, pattern
//! mining for cacheable prompts, and speculative decoding.
//!
//! ## Key Components
//!
//! - [`Graph`]: ordered IR nodes plus a tensor declaration table
//! - [`Scheduler`]: runs a graph node by node over a [`TensorEnv`]
//! - [`KvCache`]: per-layer key/value buffers with in-place quantization
//! - [`RopeScaler`]: `linear` / `yarn` / `ntk` frequency scaling
//! - [`PatternMiner`]: frequent subsequence counts and cache keys
//! - [`SpeculativeDecoder`]: draft, verify, accept the agreeing prefix
//! - [`InductionEngine`]: one loaded model instance wiring it all together
//!
//! ## Example
//!
//! ```rust,ignore
//! use inductionvm::{Graph, KvCacheConfig, Scheduler, Tensor, TensorEnv};
//!
//! let mut graph = Graph::new();
//! graph.add("a", "b", "c")?;
//!
//! let mut scheduler = Scheduler::new(KvCacheConfig::default())?;
//! let inputs: TensorEnv = [
//!     ("a", Tensor::from_f32([2, 2], vec![1.0, 2.0, 3.0, 4.0])?),
//!     ("b", Tensor::from_f32([2, 2], vec![5.0, 6.0, 7.0, 8.0])?),
//! ]
//! .into_iter()
//! .collect();
//! let env = scheduler.execute(&graph, inputs)?;
//! assert_eq!(env.require("c")?.as_f32()?, &[6.0, 8.0, 10.0, 12.0]);
//! ```
//!
//! The library only emits `tracing` events; installing a subscriber is up
//! to the binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod ir;
pub mod kernels;
pub mod kv_cache;
pub mod pattern_miner;
pub mod quantize;
pub mod rope_scaling;
pub mod scheduler;
pub mod speculative;
pub mod tensor;

pub use config::{InductionConfig, KvCompressConfig, PatternMinerConfig, RopeScalingConfig};
pub use engine::{EngineInfo, EngineStats, InductionEngine, PromptObservation};
pub use error::{InductionError, Result};
pub use ir::{AttrValue, Attrs, Graph, Node, NodeId, OpKind, TensorDecl};
pub use kernels::{RopeTable, DEFAULT_RMS_EPS, DEFAULT_ROPE_BASE};
pub use kv_cache::{KvCache, KvCacheConfig, KvCacheStats};
pub use pattern_miner::PatternMiner;
pub use quantize::{
    CompressedKv, CompressionMetadata, KvCompressor, QuantizationMode, QuantizedCodes,
    QuantizedTensor,
};
pub use rope_scaling::{RopeScaler, RopeScalingMode};
pub use scheduler::Scheduler;
pub use speculative::{
    accept_prefix, DraftModel, PromptLookupDraft, RoundOutcome, SchedulerVerifier,
    SpeculativeConfig, SpeculativeDecoder, SpeculativeStats, TokenId, Verifier,
};
pub use tensor::{DType, Tensor, TensorData, TensorEnv};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
