//! Engine facade
//!
//! [`InductionEngine`] wires the components together for one loaded model
//! instance: the scheduler (and its KV cache), the pattern miner, the
//! optional RoPE scaler, the KV compression mode and the optional
//! speculative decoder.
//!
//! # Architecture
//!
//! ```text
//! +-------------------+     +-------------------+
//! | InductionEngine   |---->| Scheduler         |
//! |                   |     |   KvCache         |
//! |                   |     +-------------------+
//! |                   |---->| PatternMiner      |
//! |                   |---->| RopeScaler        |
//! |                   |---->| SpeculativeDecoder|
//! +-------------------+     +-------------------+
//! ```
//!
//! Each component sits behind its own `parking_lot` lock, so one engine can
//! be shared across threads while graph execution stays serialized.

use crate::config::InductionConfig;
use crate::error::{InductionError, Result};
use crate::ir::Graph;
use crate::kernels::{RopeTable, DEFAULT_ROPE_BASE};
use crate::pattern_miner::PatternMiner;
use crate::quantize::QuantizationMode;
use crate::rope_scaling::RopeScaler;
use crate::scheduler::Scheduler;
use crate::speculative::{
    PromptLookupDraft, SpeculativeDecoder, SpeculativeStats, TokenId, Verifier,
};
use crate::tensor::TensorEnv;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Runtime statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Bytes held by the KV cache
    pub kv_cache_bytes: usize,
    /// Distinct patterns observed
    pub patterns_mined: usize,
    /// Patterns at or above the frequency threshold
    pub frequent_patterns: usize,
    /// KV layers currently compressed
    pub compressed_layers: usize,
}

impl EngineStats {
    /// KV cache size in MiB
    pub fn kv_cache_size_mb(&self) -> f64 {
        self.kv_cache_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Static description of an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Transformer layers
    pub num_layers: usize,
    /// Maximum cached positions
    pub max_seq_len: usize,
    /// Hidden size
    pub hidden_dim: usize,
    /// Whether speculative decoding is available
    pub spec_decode: bool,
    /// Draft model identifier when speculative decoding is on
    pub draft_model_id: Option<String>,
    /// Whether KV compression is available
    pub kv_compress: bool,
    /// Whether RoPE scaling is on
    pub rope_scale: bool,
}

/// Result of observing a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptObservation {
    /// Whether the prompt contains a frequent pattern
    pub cacheable: bool,
    /// Cache key, present when `cacheable`
    pub cache_key: Option<String>,
}

/// One loaded model instance
pub struct InductionEngine {
    config: InductionConfig,
    scheduler: Mutex<Scheduler>,
    pattern_miner: RwLock<PatternMiner<TokenId>>,
    rope_scaler: Option<RopeScaler>,
    kv_mode: Option<QuantizationMode>,
    decoder: Option<Mutex<SpeculativeDecoder<PromptLookupDraft>>>,
}

impl InductionEngine {
    /// Build every component from a validated configuration.
    pub fn new(config: InductionConfig) -> Result<Self> {
        config.validate()?;

        let scheduler = Scheduler::new(config.kv_cache())?;
        let pattern_miner = PatternMiner::new(
            config.pattern.min_frequency,
            config.pattern.max_pattern_length,
        )?;

        let rope_scaler = if config.rope.enabled {
            Some(RopeScaler::new(config.rope.scaling_mode()?, config.rope.factor)?)
        } else {
            None
        };

        let kv_mode = if config.kv_compress.enabled {
            Some(config.kv_compress.quantization_mode()?)
        } else {
            None
        };

        let decoder = if config.spec_decode.enabled {
            Some(Mutex::new(SpeculativeDecoder::with_prompt_lookup(
                config.spec_decode.clone(),
            )?))
        } else {
            None
        };

        tracing::info!(
            spec_decode = decoder.is_some(),
            kv_compress = kv_mode.is_some(),
            rope_scale = rope_scaler.is_some(),
            "InductionEngine initialized"
        );

        Ok(Self {
            config,
            scheduler: Mutex::new(scheduler),
            pattern_miner: RwLock::new(pattern_miner),
            rope_scaler,
            kv_mode,
            decoder,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &InductionConfig {
        &self.config
    }

    /// Execute a graph on this instance's scheduler.
    pub fn execute_ir(&self, graph: &Graph, inputs: TensorEnv) -> Result<TensorEnv> {
        tracing::debug!(graph = %graph, "Executing IR graph");
        self.scheduler.lock().execute(graph, inputs)
    }

    /// Run `f` with exclusive access to the scheduler.
    pub fn with_scheduler<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut self.scheduler.lock())
    }

    /// Compress one KV layer with the configured mode.
    pub fn compress_layer(&self, layer: usize) -> Result<()> {
        let mode = self
            .kv_mode
            .ok_or_else(|| InductionError::Config("KV compression is disabled".to_string()))?;
        self.scheduler.lock().cache_mut().compress(layer, mode)
    }

    /// Record a prompt in the pattern miner and look up its cache key.
    pub fn observe_prompt(&self, tokens: &[TokenId]) -> Result<PromptObservation> {
        let mut miner = self.pattern_miner.write();
        miner.observe(tokens);
        if !miner.is_cacheable(tokens) {
            return Ok(PromptObservation {
                cacheable: false,
                cache_key: None,
            });
        }
        let key = miner.get_pattern_cache_key(tokens)?;
        tracing::info!(cache_key = %key, "Cacheable pattern detected");
        Ok(PromptObservation {
            cacheable: true,
            cache_key: Some(key),
        })
    }

    /// Cos/sin table for `dim` features, scaled when RoPE scaling is on.
    pub fn rope_table(&self, dim: usize, max_position: usize) -> Result<RopeTable> {
        match &self.rope_scaler {
            Some(scaler) => scaler.compute_scaled_rope(dim, max_position, DEFAULT_ROPE_BASE),
            None => {
                if dim == 0 || dim % 2 != 0 || max_position == 0 {
                    return Err(InductionError::InvalidShape(format!(
                        "RoPE table needs an even dim and positive max_position, got {} x {}",
                        dim, max_position
                    )));
                }
                Ok(RopeTable::precompute(dim, max_position, DEFAULT_ROPE_BASE))
            }
        }
    }

    /// Generate with the speculative decoder.
    pub fn generate_speculative<V: Verifier + ?Sized>(
        &self,
        verifier: &mut V,
        prompt: &[TokenId],
        max_tokens: usize,
    ) -> Result<(Vec<TokenId>, SpeculativeStats)> {
        let decoder = self.decoder.as_ref().ok_or_else(|| {
            InductionError::Config("speculative decoding is disabled".to_string())
        })?;
        tracing::info!(max_tokens, "Using speculative decoding");
        decoder
            .lock()
            .generate_with_stats(verifier, prompt, max_tokens)
    }

    /// Current statistics
    pub fn stats(&self) -> EngineStats {
        let cache = self.scheduler.lock().cache().stats();
        let miner = self.pattern_miner.read();
        EngineStats {
            kv_cache_bytes: cache.total_bytes(),
            patterns_mined: miner.len(),
            frequent_patterns: miner.get_frequent_patterns(usize::MAX).len(),
            compressed_layers: cache.compressed_layers,
        }
    }

    /// Static description
    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            num_layers: self.config.num_layers,
            max_seq_len: self.config.max_seq_len,
            hidden_dim: self.config.hidden_dim,
            spec_decode: self.decoder.is_some(),
            draft_model_id: self
                .decoder
                .as_ref()
                .map(|d| d.lock().draft_model_id().to_string()),
            kv_compress: self.kv_mode.is_some(),
            rope_scale: self.rope_scaler.is_some(),
        }
    }

    /// Clear the KV cache.
    pub fn unload(&self) {
        self.scheduler.lock().cache_mut().clear_all();
        tracing::info!("InductionEngine unloaded");
    }
}
