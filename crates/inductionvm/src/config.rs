//! Engine configuration
//!
//! Mirrors the `induction` section of a model manifest. Every struct
//! deserializes with missing fields taking their defaults, so a manifest
//! only needs to name what it changes:
//!
//! ```json
//! {
//!   "num_layers": 2,
//!   "kv_compress": { "mode": "int8-per-head" },
//!   "rope": { "enabled": true, "mode": "ntk", "factor": 2.0 }
//! }
//! ```

use crate::error::{InductionError, Result};
use crate::kv_cache::KvCacheConfig;
use crate::quantize::QuantizationMode;
use crate::rope_scaling::RopeScalingMode;
use crate::speculative::SpeculativeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// KV compression settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvCompressConfig {
    /// Whether layers may be compressed
    pub enabled: bool,
    /// Quantization mode name (`int8`, `int8-per-head`, `int4`)
    pub mode: String,
}

impl Default for KvCompressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "int8".to_string(),
        }
    }
}

impl KvCompressConfig {
    /// Parsed quantization mode
    pub fn quantization_mode(&self) -> Result<QuantizationMode> {
        self.mode.parse()
    }
}

/// RoPE scaling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RopeScalingConfig {
    /// Whether scaled tables are produced
    pub enabled: bool,
    /// Scaling mode name (`yarn`, `ntk`, `linear`)
    pub mode: String,
    /// Scale factor (> 1.0 extends context)
    pub factor: f64,
}

impl Default for RopeScalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "yarn".to_string(),
            factor: 1.3,
        }
    }
}

impl RopeScalingConfig {
    /// Parsed scaling mode
    pub fn scaling_mode(&self) -> Result<RopeScalingMode> {
        self.mode.parse()
    }
}

/// Pattern miner settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternMinerConfig {
    /// Count at which a pattern becomes frequent
    pub min_frequency: u64,
    /// Longest tracked pattern
    pub max_pattern_length: usize,
}

impl Default for PatternMinerConfig {
    fn default() -> Self {
        Self {
            min_frequency: 3,
            max_pattern_length: 10,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InductionConfig {
    /// Transformer layers in the KV cache
    pub num_layers: usize,
    /// Maximum cached sequence positions
    pub max_seq_len: usize,
    /// Hidden size of each cached position
    pub hidden_dim: usize,
    /// KV compression
    pub kv_compress: KvCompressConfig,
    /// RoPE scaling
    pub rope: RopeScalingConfig,
    /// Speculative decoding
    pub spec_decode: SpeculativeConfig,
    /// Pattern mining
    pub pattern: PatternMinerConfig,
}

impl Default for InductionConfig {
    fn default() -> Self {
        Self {
            num_layers: 32,
            max_seq_len: 2048,
            hidden_dim: 4096,
            kv_compress: KvCompressConfig::default(),
            rope: RopeScalingConfig::default(),
            spec_decode: SpeculativeConfig::default(),
            pattern: PatternMinerConfig::default(),
        }
    }
}

impl InductionConfig {
    /// Parse from a JSON string and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loading induction config");
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// KV cache part of the configuration
    pub fn kv_cache(&self) -> KvCacheConfig {
        KvCacheConfig {
            num_layers: self.num_layers,
            max_seq_len: self.max_seq_len,
            hidden_dim: self.hidden_dim,
        }
    }

    /// Check sizes, mode names and factors.
    pub fn validate(&self) -> Result<()> {
        self.kv_cache().validate()?;

        self.kv_compress
            .quantization_mode()
            .map_err(|e| InductionError::Config(format!("kv_compress.mode: {}", e)))?;

        self.rope
            .scaling_mode()
            .map_err(|e| InductionError::Config(format!("rope.mode: {}", e)))?;
        if !self.rope.factor.is_finite() || self.rope.factor <= 0.0 {
            return Err(InductionError::Config(format!(
                "rope.factor must be positive, got {}",
                self.rope.factor
            )));
        }

        self.spec_decode.validate()?;

        if self.pattern.min_frequency == 0 {
            return Err(InductionError::Config(
                "pattern.min_frequency must be at least 1".to_string(),
            ));
        }
        if self.pattern.max_pattern_length < 2 {
            return Err(InductionError::Config(
                "pattern.max_pattern_length must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}
