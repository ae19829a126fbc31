//! Kalman Filter for dynamic hedge ratio estimation.
//!
//! Tracks the hedge ratio (beta) and intercept between the two legs of a
//! pair. The filter adapts to drifting cointegration relationships without
//! periodic re-regression.
//!
//! # Mathematical Model
//!
//! **State equation** (random walk):
//! ```text
//! x[t] = x[t-1] + w,   x = [beta, intercept],  w ~ N(0, Q)
//! ```
//!
//! **Observation equation**:
//! ```text
//! y[t] = beta[t] * x[t] + intercept[t] + v,   v ~ N(0, R)
//! ```
//!
//! Where:
//! - `y[t]` is the dependent leg price
//! - `x[t]` is the independent leg price
//! - `Q = diag(q_beta, q_intercept)` is process noise (how fast the state drifts)
//! - `R` is observation noise (measurement uncertainty)
//!
//! The innovation `y - (beta * x + intercept)` is the spread. An
//! exponentially weighted variance of the spread normalises it into a
//! z-score. The z-score divides by the variance known *before* the
//! observation: folding the current spread in first caps `|z|` below
//! `1/sqrt(alpha)` (about 4.47 at the default alpha), which would leave
//! stop-loss thresholds near that bound unreachable.
//!
//! # Usage
//!
//! ```rust
//! use statarb::math::{KalmanConfig, KalmanHedgeRatio};
//!
//! let mut kalman = KalmanHedgeRatio::new(KalmanConfig::default(), 1.0, 0.0);
//! let update = kalman.update(100.0, 98.5).unwrap();
//! println!("beta={} spread={}", update.beta, update.spread);
//! ```
//!
//! # References
//!
//! - Chan, E. (2013). "Algorithmic Trading: Winning Strategies and Their Rationale"

use super::linalg::{mat2_det, Mat2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Innovation variance below which the gain is numerically meaningless.
const MIN_INNOVATION_VARIANCE: f64 = 1e-12;

/// Relative tolerance on the covariance determinant before it counts as
/// non-positive-semi-definite.
const PSD_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KalmanError {
    /// Non-finite price: the observation is dropped and the state held.
    #[error("Invalid observation: x={x}, y={y}")]
    InvalidObservation { x: f64, y: f64 },

    /// Covariance breakdown: the update was rejected and the covariance
    /// reset to the prior.
    #[error("Numeric instability: {0}")]
    NumericInstability(String),
}

/// Fixed filter parameters. Q and R are not re-estimated online.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalmanConfig {
    /// Process noise on beta (how fast the hedge ratio may drift)
    #[serde(default = "default_process_noise")]
    pub beta_process_noise: f64,
    /// Process noise on the intercept
    #[serde(default = "default_process_noise")]
    pub intercept_process_noise: f64,
    /// Observation noise variance R
    #[serde(default = "default_observation_noise")]
    pub observation_noise: f64,
    /// Diagonal of the prior state covariance
    #[serde(default = "default_prior_covariance")]
    pub prior_covariance: f64,
    /// EWMA weight of the newest squared spread in the spread variance
    #[serde(default = "default_spread_variance_alpha")]
    pub spread_variance_alpha: f64,
    /// Updates absorbed before z-scores are published
    #[serde(default = "default_warmup_updates")]
    pub warmup_updates: u64,
}

fn default_process_noise() -> f64 {
    1e-4
}
fn default_observation_noise() -> f64 {
    1.0
}
fn default_prior_covariance() -> f64 {
    1.0
}
fn default_spread_variance_alpha() -> f64 {
    0.05
}
fn default_warmup_updates() -> u64 {
    50
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            beta_process_noise: default_process_noise(),
            intercept_process_noise: default_process_noise(),
            observation_noise: default_observation_noise(),
            prior_covariance: default_prior_covariance(),
            spread_variance_alpha: default_spread_variance_alpha(),
            warmup_updates: default_warmup_updates(),
        }
    }
}

impl KalmanConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.beta_process_noise < 0.0 || self.intercept_process_noise < 0.0 {
            return Err("process noise cannot be negative".to_string());
        }
        if self.observation_noise < 0.0 {
            return Err("observation_noise cannot be negative".to_string());
        }
        if self.prior_covariance < 0.0 {
            return Err("prior_covariance cannot be negative".to_string());
        }
        if !(self.spread_variance_alpha > 0.0 && self.spread_variance_alpha <= 1.0) {
            return Err(format!(
                "spread_variance_alpha must be in (0, 1], got {}",
                self.spread_variance_alpha
            ));
        }
        Ok(())
    }

    fn prior_matrix(&self) -> Mat2 {
        [[self.prior_covariance, 0.0], [0.0, self.prior_covariance]]
    }
}

/// Per-pair filter state. Serializable so it can be snapshotted and
/// restored across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanState {
    /// Hedge ratio estimate
    pub beta: f64,
    /// Intercept estimate
    pub intercept: f64,
    /// State covariance, ordered [beta, intercept]
    pub covariance: Mat2,
    /// Process noise diagonal (beta, intercept)
    pub process_noise: (f64, f64),
    /// Observation noise variance
    pub observation_noise: f64,
    /// Latest spread (innovation)
    pub spread: f64,
    /// Exponentially weighted spread variance
    pub spread_variance: f64,
    /// Successful updates since the last (re)initialization
    pub update_count: u64,
    /// Set when the covariance was reset; cleared by the next good update
    pub degraded: bool,
}

/// Output of one successful filter step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanUpdate {
    pub beta: f64,
    pub intercept: f64,
    /// Innovation of this observation against the predicted state
    pub spread: f64,
    /// Spread variance after absorbing this observation
    pub spread_variance: f64,
    /// Spread normalised by the variance known before this observation.
    /// `None` until the filter is warmed up.
    pub z_score: Option<f64>,
    /// True when this update cleared a degraded flag
    pub recovered: bool,
}

/// Two-state Kalman filter for estimating dynamic hedge ratios.
///
/// # Performance
///
/// - O(1) per update (constant time, no historical data storage)
/// - Suitable for tick-by-tick updates
#[derive(Debug, Clone)]
pub struct KalmanHedgeRatio {
    config: KalmanConfig,
    prior_beta: f64,
    prior_intercept: f64,
    state: KalmanState,
}

impl KalmanHedgeRatio {
    /// Create a filter seeded with a prior hedge ratio and intercept.
    ///
    /// Use the static hedge ratio from discovery as the prior when one is
    /// available; otherwise 1.0 / 0.0.
    pub fn new(config: KalmanConfig, prior_beta: f64, prior_intercept: f64) -> Self {
        let state = Self::prior_state(&config, prior_beta, prior_intercept);
        Self {
            config,
            prior_beta,
            prior_intercept,
            state,
        }
    }

    /// Rebuild a filter from a snapshot.
    pub fn from_state(
        config: KalmanConfig,
        prior_beta: f64,
        prior_intercept: f64,
        state: KalmanState,
    ) -> Self {
        Self {
            config,
            prior_beta,
            prior_intercept,
            state,
        }
    }

    fn prior_state(config: &KalmanConfig, beta: f64, intercept: f64) -> KalmanState {
        KalmanState {
            beta,
            intercept,
            covariance: config.prior_matrix(),
            process_noise: (config.beta_process_noise, config.intercept_process_noise),
            observation_noise: config.observation_noise,
            spread: 0.0,
            spread_variance: 0.0,
            update_count: 0,
            degraded: false,
        }
    }

    /// Update the estimate with one synchronized price pair.
    ///
    /// # Errors
    ///
    /// - [`KalmanError::InvalidObservation`] for non-finite prices; the state
    ///   is left untouched.
    /// - [`KalmanError::NumericInstability`] when the innovation variance
    ///   collapses or the updated covariance is not positive semi-definite.
    ///   The state estimate is kept, the covariance is reset to the prior and
    ///   the degraded flag is raised.
    pub fn update(&mut self, x: f64, y: f64) -> Result<KalmanUpdate, KalmanError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(KalmanError::InvalidObservation { x, y });
        }

        let st = &self.state;
        let (q_beta, q_intercept) = st.process_noise;

        // === PREDICT STEP ===
        // State is a random walk: x_pred = x, P_pred = P + Q
        let p = [
            [st.covariance[0][0] + q_beta, st.covariance[0][1]],
            [st.covariance[1][0], st.covariance[1][1] + q_intercept],
        ];

        // === UPDATE STEP ===
        // H = [x, 1]
        let innovation = y - (st.beta * x + st.intercept);
        let ph = [p[0][0] * x + p[0][1], p[1][0] * x + p[1][1]];
        let s = x * ph[0] + ph[1] + st.observation_noise;

        if !s.is_finite() || s <= MIN_INNOVATION_VARIANCE {
            return Err(self.reject(format!("innovation variance {s:.3e} is not positive")));
        }

        let gain = [ph[0] / s, ph[1] / s];

        // P = P_pred - K (P_pred H')'
        let mut cov = [
            [p[0][0] - gain[0] * ph[0], p[0][1] - gain[0] * ph[1]],
            [p[1][0] - gain[1] * ph[0], p[1][1] - gain[1] * ph[1]],
        ];
        let off = 0.5 * (cov[0][1] + cov[1][0]);
        cov[0][1] = off;
        cov[1][0] = off;

        if let Some(reason) = psd_violation(&cov) {
            return Err(self.reject(reason));
        }

        let beta = st.beta + gain[0] * innovation;
        let intercept = st.intercept + gain[1] * innovation;
        if !beta.is_finite() || !intercept.is_finite() {
            return Err(self.reject("state estimate is not finite".to_string()));
        }

        let prior_variance = st.spread_variance;
        let z_score = if st.update_count >= self.config.warmup_updates
            && prior_variance > MIN_INNOVATION_VARIANCE
        {
            Some(innovation / prior_variance.sqrt())
        } else {
            None
        };

        // Cumulative mean of squared spreads until 1/n drops below alpha,
        // exponential weighting afterwards.
        let alpha = self
            .config
            .spread_variance_alpha
            .max(1.0 / (st.update_count + 1) as f64);
        let spread_variance = (1.0 - alpha) * prior_variance + alpha * innovation * innovation;

        let recovered = st.degraded;
        let state = &mut self.state;
        state.beta = beta;
        state.intercept = intercept;
        state.covariance = cov;
        state.spread = innovation;
        state.spread_variance = spread_variance;
        state.update_count += 1;
        state.degraded = false;

        Ok(KalmanUpdate {
            beta,
            intercept,
            spread: innovation,
            spread_variance,
            z_score,
            recovered,
        })
    }

    /// Reject the pending update: keep the estimate, reset covariance.
    fn reject(&mut self, reason: String) -> KalmanError {
        self.state.covariance = self.config.prior_matrix();
        self.state.degraded = true;
        KalmanError::NumericInstability(reason)
    }

    /// Spread of a price pair under the current estimate.
    #[inline]
    pub fn spread_for(&self, x: f64, y: f64) -> f64 {
        y - (self.state.beta * x + self.state.intercept)
    }

    /// Get the current hedge ratio estimate.
    #[inline]
    pub fn beta(&self) -> f64 {
        self.state.beta
    }

    #[inline]
    pub fn intercept(&self) -> f64 {
        self.state.intercept
    }

    /// Get the current state covariance.
    #[inline]
    pub fn covariance(&self) -> Mat2 {
        self.state.covariance
    }

    /// Get the number of updates processed.
    #[inline]
    pub fn update_count(&self) -> u64 {
        self.state.update_count
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.state.degraded
    }

    /// Check if the filter has absorbed enough updates to publish z-scores.
    pub fn is_warmed_up(&self) -> bool {
        self.state.update_count >= self.config.warmup_updates
    }

    /// Snapshot of the full state.
    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    /// Reset the filter to its prior.
    pub fn reset(&mut self) {
        self.state = Self::prior_state(&self.config, self.prior_beta, self.prior_intercept);
    }
}

/// Returns a description of the violation when `cov` is not PSD.
fn psd_violation(cov: &Mat2) -> Option<String> {
    if cov.iter().flat_map(|r| r.iter()).any(|v| !v.is_finite()) {
        return Some("covariance is not finite".to_string());
    }
    if cov[0][0] < 0.0 || cov[1][1] < 0.0 {
        return Some(format!(
            "negative variance term (beta={:.3e}, intercept={:.3e})",
            cov[0][0], cov[1][1]
        ));
    }
    let det = mat2_det(cov);
    if det < -PSD_TOLERANCE * cov[0][0] * cov[1][1] {
        return Some(format!("negative covariance determinant {det:.3e}"));
    }
    None
}

/// Whether a covariance matrix is positive semi-definite (within tolerance).
pub fn is_positive_semi_definite(cov: &Mat2) -> bool {
    psd_violation(cov).is_none()
}
