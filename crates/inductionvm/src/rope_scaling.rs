//! RoPE frequency scaling for extended context
//!
//! Produces cos/sin tables whose frequencies have been stretched so a model
//! can attend over more positions than it was trained on.
//!
//! | Mode     | Frequency `i` of `n` becomes              |
//! |----------|-------------------------------------------|
//! | `linear` | `f_i / factor`                            |
//! | `yarn`   | `f_i / (1 + (factor - 1) * i / (n - 1))`  |
//! | `ntk`    | `f_i / factor^(1/dim)`                    |
//!
//! `yarn` leaves the highest frequency untouched and scales the lowest by
//! the full factor. `ntk` is equivalent to raising the base frequency.
//!
//! The `ntk` exponent uses the full embedding width `dim`, not the number
//! of frequencies (`dim / 2`). Formulations that divide by the frequency
//! count apply a larger adjustment: `factor^(2/dim)` rather than
//! `factor^(1/dim)`.
//! Tables are a pure function of `(dim, max_position, base, mode, factor)`.

use crate::error::{InductionError, Result};
use crate::kernels::inverse_frequencies;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use crate::kernels::RopeTable;

/// Frequency scaling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RopeScalingMode {
    /// Uniform division by the factor
    Linear,
    /// Graduated scale from 1.0 to the factor across the spectrum
    #[default]
    Yarn,
    /// Base-frequency reparameterization
    Ntk,
}

impl RopeScalingMode {
    /// Mode name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Yarn => "yarn",
            Self::Ntk => "ntk",
        }
    }
}

impl fmt::Display for RopeScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RopeScalingMode {
    type Err = InductionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "yarn" => Ok(Self::Yarn),
            "ntk" => Ok(Self::Ntk),
            other => Err(InductionError::Config(format!(
                "unknown RoPE scaling mode '{}'",
                other
            ))),
        }
    }
}

/// Stateless RoPE frequency scaler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RopeScaler {
    mode: RopeScalingMode,
    factor: f64,
}

impl RopeScaler {
    /// Create a scaler; `factor` must be finite and positive.
    pub fn new(mode: RopeScalingMode, factor: f64) -> Result<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(InductionError::Config(format!(
                "RoPE scale factor must be positive, got {}",
                factor
            )));
        }
        tracing::info!(mode = %mode, factor, "RopeScaler initialized");
        Ok(Self { mode, factor })
    }

    /// Scaling policy
    pub fn mode(&self) -> RopeScalingMode {
        self.mode
    }

    /// Scale factor
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Unscaled inverse frequencies `1 / base^(2i/dim)`
    pub fn base_frequencies(dim: usize, base: f64) -> Vec<f64> {
        inverse_frequencies(dim, base)
    }

    /// Apply the scaling policy to frequencies of a `dim`-wide embedding.
    ///
    /// `dim` only matters for `ntk`, where it is the exponent's denominator.
    pub fn scale_frequencies(&self, freqs: &[f64], dim: usize) -> Vec<f64> {
        match self.mode {
            RopeScalingMode::Linear => freqs.iter().map(|f| f / self.factor).collect(),
            RopeScalingMode::Yarn => {
                let steps = freqs.len().saturating_sub(1).max(1) as f64;
                freqs
                    .iter()
                    .enumerate()
                    .map(|(i, f)| f / (1.0 + (self.factor - 1.0) * i as f64 / steps))
                    .collect()
            }
            RopeScalingMode::Ntk => {
                let adjustment = self.factor.powf(1.0 / dim as f64);
                freqs.iter().map(|f| f / adjustment).collect()
            }
        }
    }

    /// Scaled cos/sin table over positions `[0, max_position)`.
    pub fn compute_scaled_rope(
        &self,
        dim: usize,
        max_position: usize,
        base: f64,
    ) -> Result<RopeTable> {
        if dim == 0 || dim % 2 != 0 {
            return Err(InductionError::InvalidShape(format!(
                "RoPE dimension must be even and positive, got {}",
                dim
            )));
        }
        if max_position == 0 {
            return Err(InductionError::InvalidShape(
                "max_position must be positive".to_string(),
            ));
        }
        if !base.is_finite() || base <= 1.0 {
            return Err(InductionError::Config(format!(
                "RoPE base must be greater than 1, got {}",
                base
            )));
        }

        let freqs = self.scale_frequencies(&Self::base_frequencies(dim, base), dim);
        tracing::debug!(
            mode = %self.mode,
            factor = self.factor,
            dim,
            max_position,
            "Computing scaled RoPE table"
        );
        Ok(RopeTable::from_frequencies(&freqs, max_position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::DEFAULT_ROPE_BASE;

    fn scaler(mode: RopeScalingMode, factor: f64) -> RopeScaler {
        RopeScaler::new(mode, factor).unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("YaRN".parse::<RopeScalingMode>().unwrap(), RopeScalingMode::Yarn);
        assert_eq!("ntk".parse::<RopeScalingMode>().unwrap(), RopeScalingMode::Ntk);
        assert!(matches!(
            "dynamic".parse::<RopeScalingMode>(),
            Err(InductionError::Config(_))
        ));
    }

    #[test]
    fn test_deterministic() {
        let s = scaler(RopeScalingMode::Yarn, 2.0);
        let a = s.compute_scaled_rope(16, 64, DEFAULT_ROPE_BASE).unwrap();
        let b = s.compute_scaled_rope(16, 64, DEFAULT_ROPE_BASE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_yarn_and_ntk_differ() {
        let yarn = scaler(RopeScalingMode::Yarn, 2.0)
            .compute_scaled_rope(16, 32, DEFAULT_ROPE_BASE)
            .unwrap();
        let ntk = scaler(RopeScalingMode::Ntk, 2.0)
            .compute_scaled_rope(16, 32, DEFAULT_ROPE_BASE)
            .unwrap();
        assert_ne!(yarn, ntk);
    }

    #[test]
    fn test_yarn_spares_high_frequencies() {
        let s = scaler(RopeScalingMode::Yarn, 4.0);
        let base = RopeScaler::base_frequencies(8, DEFAULT_ROPE_BASE);
        let scaled = s.scale_frequencies(&base, 8);
        assert_eq!(scaled[0], base[0]);
        assert!((scaled[3] - base[3] / 4.0).abs() < 1e-12);
        for i in 1..4 {
            assert!(scaled[i] / base[i] < scaled[i - 1] / base[i - 1]);
        }
    }

    #[test]
    fn test_ntk_is_uniform() {
        let s = scaler(RopeScalingMode::Ntk, 2.0);
        let base = RopeScaler::base_frequencies(8, DEFAULT_ROPE_BASE);
        let scaled = s.scale_frequencies(&base, 8);
        let expected = 2.0f64.powf(1.0 / 8.0);
        for (b, s) in base.iter().zip(&scaled) {
            assert!((b / s - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ntk_exponent_uses_embedding_width() {
        let s = scaler(RopeScalingMode::Ntk, 16.0);
        let base = RopeScaler::base_frequencies(8, DEFAULT_ROPE_BASE);
        let scaled = s.scale_frequencies(&base, 8);
        // 16^(1/8) = 2^(1/2), not 16^(1/4) = 2
        let ratio = base[0] / scaled[0];
        assert!((ratio - 2.0f64.sqrt()).abs() < 1e-12);
        assert!((ratio - 2.0).abs() > 0.5);
    }

    #[test]
    fn test_unit_factor_is_identity() {
        let plain = RopeTable::precompute(8, 16, DEFAULT_ROPE_BASE);
        for mode in [RopeScalingMode::Linear, RopeScalingMode::Yarn, RopeScalingMode::Ntk] {
            let table = scaler(mode, 1.0)
                .compute_scaled_rope(8, 16, DEFAULT_ROPE_BASE)
                .unwrap();
            assert_eq!(table, plain, "{}", mode);
        }
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(RopeScaler::new(RopeScalingMode::Linear, 0.0).is_err());
        assert!(RopeScaler::new(RopeScalingMode::Linear, f64::NAN).is_err());
        let s = scaler(RopeScalingMode::Linear, 2.0);
        assert!(s.compute_scaled_rope(7, 16, DEFAULT_ROPE_BASE).is_err());
        assert!(s.compute_scaled_rope(8, 0, DEFAULT_ROPE_BASE).is_err());
    }

    #[test]
    fn test_table_tensor_layout() {
        let table = scaler(RopeScalingMode::Linear, 2.0)
            .compute_scaled_rope(4, 3, DEFAULT_ROPE_BASE)
            .unwrap();
        let tensor = table.to_tensor().unwrap();
        assert_eq!(tensor.shape(), &[3, 2, 2]);
        // Position 0: cos = 1, sin = 0
        assert_eq!(&tensor.as_f32().unwrap()[..4], &[1.0, 0.0, 1.0, 0.0]);
    }
}
