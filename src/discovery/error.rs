//! Error types for the discovery module

use thiserror::Error;

/// Conditions that abort a discovery cycle. The previous active set is
/// retained whenever one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryError {
    /// Insufficient historical data for analysis
    #[error("Insufficient data: expected at least {expected} data points, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    /// Fewer than two instruments with usable history
    #[error("Universe too small: {0} usable instruments")]
    UniverseTooSmall(usize),

    /// Regression normal equations could not be inverted
    #[error("Singular regression: {0}")]
    SingularRegression(String),

    /// Every pairwise correlation was undefined (constant or non-finite series)
    #[error("Degenerate correlation matrix over {instruments} instruments")]
    DegenerateCorrelation { instruments: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DiscoveryError {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryError::InsufficientData { .. } => "insufficient_data",
            DiscoveryError::UniverseTooSmall(_) => "universe_too_small",
            DiscoveryError::SingularRegression(_) => "singular_regression",
            DiscoveryError::DegenerateCorrelation { .. } => "degenerate_correlation",
            DiscoveryError::InvalidConfig(_) => "invalid_config",
        }
    }
}
