//! Analysis configuration.
//!
//! All knobs are plain data. A configuration can be built in code with
//! [`AnalysisConfig::builder`] or read from a JSON settings object:
//!
//! ```json
//! { "fxp": { "maxUnroll": 64, "sizing": { "minFracBits": 8 } } }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

// ═══════════════════════════════════════════════════════════════════════════
// Sizing policy
// ═══════════════════════════════════════════════════════════════════════════

/// Bit budget used when deriving fixed-point formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SizingPolicy {
    pub min_total_bits: u32,
    pub min_frac_bits: u32,
    pub max_total_bits: u32,
    pub bit_increment: u32,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        Self {
            min_total_bits: 32,
            min_frac_bits: 3,
            max_total_bits: 64,
            bit_increment: 64,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Analysis configuration
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Body passes for loops without a known trip count.
    pub default_unroll: u32,
    /// Hard cap on body passes of any loop.
    pub max_unroll: u32,
    /// Analyze every function instead of only the starting points.
    pub propagate_all: bool,
    pub sizing: SizingPolicy,
    /// Recursive calls allowed before a call becomes opaque.
    pub max_recursion: u32,
    /// Comparison flag threshold, in percent of the operand range width.
    pub cmp_threshold_percent: f64,
    /// Report errors relative to the value magnitude.
    pub relative_error: bool,
    /// Literal constants carry no representation error.
    pub exact_constants: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_unroll: 1,
            max_unroll: 256,
            propagate_all: false,
            sizing: SizingPolicy::default(),
            max_recursion: 0,
            cmp_threshold_percent: 0.0,
            relative_error: false,
            exact_constants: false,
        }
    }
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Read the `fxp` section of a settings object. A missing section gives
    /// the defaults.
    pub fn from_settings(settings: &serde_json::Value) -> Result<Self, AnalysisError> {
        let Some(section) = settings.get("fxp") else {
            return Ok(Self::default());
        };
        let config: Self = serde_json::from_value(section.clone())
            .map_err(|e| AnalysisError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let invalid = |reason: &str| Err(AnalysisError::InvalidConfig(reason.to_string()));
        if self.max_unroll == 0 {
            return invalid("maxUnroll must be at least 1");
        }
        if self.sizing.bit_increment == 0 {
            return invalid("bitIncrement must be at least 1");
        }
        if self.sizing.min_total_bits == 0 || self.sizing.min_total_bits > self.sizing.max_total_bits {
            return invalid("minTotalBits must be in 1..=maxTotalBits");
        }
        if self.cmp_threshold_percent.is_nan() || self.cmp_threshold_percent < 0.0 {
            return invalid("cmpThresholdPercent must be non-negative");
        }
        Ok(())
    }
}

/// Builder for `AnalysisConfig` with fluent API.
#[derive(Default)]
pub struct AnalysisConfigBuilder {
    default_unroll: Option<u32>,
    max_unroll: Option<u32>,
    propagate_all: Option<bool>,
    sizing: Option<SizingPolicy>,
    max_recursion: Option<u32>,
    cmp_threshold_percent: Option<f64>,
    relative_error: Option<bool>,
    exact_constants: Option<bool>,
}

impl AnalysisConfigBuilder {
    pub fn default_unroll(mut self, passes: u32) -> Self {
        self.default_unroll = Some(passes);
        self
    }

    pub fn max_unroll(mut self, passes: u32) -> Self {
        self.max_unroll = Some(passes);
        self
    }

    pub fn propagate_all(mut self, enabled: bool) -> Self {
        self.propagate_all = Some(enabled);
        self
    }

    pub fn sizing(mut self, policy: SizingPolicy) -> Self {
        self.sizing = Some(policy);
        self
    }

    pub fn max_recursion(mut self, depth: u32) -> Self {
        self.max_recursion = Some(depth);
        self
    }

    pub fn cmp_threshold_percent(mut self, percent: f64) -> Self {
        self.cmp_threshold_percent = Some(percent);
        self
    }

    pub fn relative_error(mut self, enabled: bool) -> Self {
        self.relative_error = Some(enabled);
        self
    }

    pub fn exact_constants(mut self, enabled: bool) -> Self {
        self.exact_constants = Some(enabled);
        self
    }

    /// Build the `AnalysisConfig`, using defaults for unset values.
    pub fn build(self) -> AnalysisConfig {
        let defaults = AnalysisConfig::default();
        AnalysisConfig {
            default_unroll: self.default_unroll.unwrap_or(defaults.default_unroll),
            max_unroll: self.max_unroll.unwrap_or(defaults.max_unroll),
            propagate_all: self.propagate_all.unwrap_or(defaults.propagate_all),
            sizing: self.sizing.unwrap_or(defaults.sizing),
            max_recursion: self.max_recursion.unwrap_or(defaults.max_recursion),
            cmp_threshold_percent: self
                .cmp_threshold_percent
                .unwrap_or(defaults.cmp_threshold_percent),
            relative_error: self.relative_error.unwrap_or(defaults.relative_error),
            exact_constants: self.exact_constants.unwrap_or(defaults.exact_constants),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.default_unroll, 1);
        assert_eq!(config.max_unroll, 256);
        assert_eq!(config.sizing.min_total_bits, 32);
        assert_eq!(config.sizing.min_frac_bits, 3);
        assert_eq!(config.sizing.max_total_bits, 64);
        assert_eq!(config.sizing.bit_increment, 64);
        assert_eq!(config.max_recursion, 0);
        assert!(!config.propagate_all);
        assert_eq!(AnalysisConfig::builder().build(), config);
    }

    #[test]
    fn test_from_settings_partial() {
        let settings = json!({
            "fxp": {
                "maxUnroll": 16,
                "exactConstants": true,
                "sizing": { "minFracBits": 8 }
            }
        });
        let config = AnalysisConfig::from_settings(&settings).unwrap();
        assert_eq!(config.max_unroll, 16);
        assert!(config.exact_constants);
        assert_eq!(config.sizing.min_frac_bits, 8);
        assert_eq!(config.sizing.max_total_bits, 64);
        assert_eq!(config.default_unroll, 1);
    }

    #[test]
    fn test_from_settings_missing_section() {
        let config = AnalysisConfig::from_settings(&json!({ "other": {} })).unwrap();
        assert_eq!(config, AnalysisConfig::default());
    }

    #[test]
    fn test_from_settings_rejects_bad_values() {
        assert!(AnalysisConfig::from_settings(&json!({ "fxp": { "maxUnroll": "many" } })).is_err());
        assert!(AnalysisConfig::from_settings(&json!({ "fxp": { "maxUnroll": 0 } })).is_err());
        assert!(AnalysisConfig::from_settings(&json!({
            "fxp": { "sizing": { "minTotalBits": 128 } }
        }))
        .is_err());
    }
}
