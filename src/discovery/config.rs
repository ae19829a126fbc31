//! Configuration for pair discovery

use serde::{Deserialize, Serialize};

/// Which cointegration test gates candidate pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CointegrationMethod {
    /// Johansen trace test (rank 0 vs rank >= 1)
    #[default]
    Johansen,
    /// Engle-Granger two step: OLS hedge, ADF on residuals
    EngleGranger,
}

/// Series the correlation pre-filter is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationBasis {
    /// Simple one-period returns
    #[default]
    Returns,
    /// Raw price levels
    Levels,
}

/// Weights of the composite score. They need not sum to one; the score is
/// normalised by their total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_weight_cointegration")]
    pub cointegration: f64,
    #[serde(default = "default_weight_half_life")]
    pub half_life: f64,
    #[serde(default = "default_weight_correlation")]
    pub correlation: f64,
    #[serde(default = "default_weight_stationarity")]
    pub stationarity: f64,
}

fn default_weight_cointegration() -> f64 {
    0.4
}
fn default_weight_half_life() -> f64 {
    0.2
}
fn default_weight_correlation() -> f64 {
    0.2
}
fn default_weight_stationarity() -> f64 {
    0.2
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cointegration: default_weight_cointegration(),
            half_life: default_weight_half_life(),
            correlation: default_weight_correlation(),
            stationarity: default_weight_stationarity(),
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.cointegration + self.half_life + self.correlation + self.stationarity
    }
}

/// Configuration for the discovery pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Minimum absolute Pearson correlation (0.0-1.0)
    #[serde(default = "default_min_correlation")]
    pub min_correlation: f64,

    /// Series the correlation is computed on
    #[serde(default)]
    pub correlation_basis: CorrelationBasis,

    /// Trailing window for the correlation pre-filter (observations)
    #[serde(default = "default_correlation_window")]
    pub correlation_window: usize,

    /// Cointegration test used after the pre-filter
    #[serde(default)]
    pub method: CointegrationMethod,

    /// Significance level of the cointegration and ADF tests.
    /// Tabulated levels are 0.10, 0.05 and 0.01.
    #[serde(default = "default_significance")]
    pub significance: f64,

    /// Shortest acceptable half-life (bars); faster spreads are noise
    #[serde(default = "default_min_half_life")]
    pub min_half_life: f64,

    /// Longest acceptable half-life (bars); slower spreads tie up capital
    #[serde(default = "default_max_half_life")]
    pub max_half_life: f64,

    /// Minimum aligned observations per instrument
    #[serde(default = "default_min_history")]
    pub min_history: usize,

    /// Trailing observations used by the tests (0 = all available)
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Number of top-ranked candidates promoted per cycle
    #[serde(default = "default_top_m")]
    pub top_m: usize,

    /// Hard cap on concurrently active pairs
    #[serde(default = "default_max_active_pairs")]
    pub max_active_pairs: usize,

    /// Composite score weights
    #[serde(default)]
    pub weights: ScoreWeights,
}

// Default value functions for serde
fn default_min_correlation() -> f64 {
    0.5
}
fn default_correlation_window() -> usize {
    252
}
fn default_significance() -> f64 {
    0.05
}
fn default_min_half_life() -> f64 {
    5.0
}
fn default_max_half_life() -> f64 {
    60.0
}
fn default_min_history() -> usize {
    252
}
fn default_lookback() -> usize {
    0
}
fn default_top_m() -> usize {
    20
}
fn default_max_active_pairs() -> usize {
    20
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            min_correlation: default_min_correlation(),
            correlation_basis: CorrelationBasis::default(),
            correlation_window: default_correlation_window(),
            method: CointegrationMethod::default(),
            significance: default_significance(),
            min_half_life: default_min_half_life(),
            max_half_life: default_max_half_life(),
            min_history: default_min_history(),
            lookback: default_lookback(),
            top_m: default_top_m(),
            max_active_pairs: default_max_active_pairs(),
            weights: ScoreWeights::default(),
        }
    }
}

/// Significance levels with tabulated critical values.
pub const SUPPORTED_SIGNIFICANCE: [f64; 3] = [0.10, 0.05, 0.01];

impl DiscoveryConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_correlation) {
            return Err(format!(
                "min_correlation must be between 0.0 and 1.0, got {}",
                self.min_correlation
            ));
        }
        if self.correlation_window < 3 {
            return Err("correlation_window must be at least 3".to_string());
        }
        if !SUPPORTED_SIGNIFICANCE
            .iter()
            .any(|s| (s - self.significance).abs() < 1e-12)
        {
            return Err(format!(
                "significance must be one of {:?}, got {}",
                SUPPORTED_SIGNIFICANCE, self.significance
            ));
        }
        if self.min_half_life <= 0.0 || self.max_half_life <= self.min_half_life {
            return Err(format!(
                "half-life range must satisfy 0 < min < max, got [{}, {}]",
                self.min_half_life, self.max_half_life
            ));
        }
        if self.min_history < 30 {
            return Err(format!(
                "min_history must be at least 30, got {}",
                self.min_history
            ));
        }
        if self.lookback != 0 && self.lookback < self.min_history {
            return Err("lookback must be 0 or at least min_history".to_string());
        }
        if self.top_m == 0 || self.max_active_pairs == 0 {
            return Err("top_m and max_active_pairs must be at least 1".to_string());
        }
        let w = &self.weights;
        if [w.cointegration, w.half_life, w.correlation, w.stationarity]
            .iter()
            .any(|v| *v < 0.0)
            || w.total() <= 0.0
        {
            return Err("score weights must be non-negative with a positive total".to_string());
        }
        Ok(())
    }

    /// Number of pairs promoted per cycle: top-M bounded by the cap.
    pub fn promotion_limit(&self) -> usize {
        self.top_m.min(self.max_active_pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_correlation() {
        let config = DiscoveryConfig {
            min_correlation: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_untabulated_significance_invalid() {
        let config = DiscoveryConfig {
            significance: 0.02,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_half_life_range_invalid() {
        let config = DiscoveryConfig {
            min_half_life: 50.0,
            max_half_life: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_promotion_limit_respects_cap() {
        let config = DiscoveryConfig {
            top_m: 30,
            max_active_pairs: 5,
            ..Default::default()
        };
        assert_eq!(config.promotion_limit(), 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{"method": "engle_granger", "min_correlation": 0.7}"#)
                .unwrap();
        assert_eq!(config.method, CointegrationMethod::EngleGranger);
        assert_eq!(config.min_correlation, 0.7);
        assert_eq!(config.min_history, 252);
    }
}
