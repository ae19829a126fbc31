//! Hysteresis state machine on the spread z-score.
//!
//! ```text
//!   Flat ──z ≤ -e──▶ LongSpread ──|z| ≤ x──▶ Flat (Exit)
//!   Flat ──z ≥ +e──▶ ShortSpread ─|z| ≥ s──▶ Flat (StopLoss)
//! ```
//!
//! Only transitions emit. The stop band is checked before the exit band.

use super::SignalKind;
use crate::types::SpreadSide;
use serde::{Deserialize, Serialize};

/// Whether a z-score exactly on a threshold triggers the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    /// `z ≥ e`, `|z| ≤ x`, `|z| ≥ s`
    #[default]
    Inclusive,
    /// `z > e`, `|z| < x`, `|z| > s`
    Exclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Entry threshold e (σ)
    #[serde(default = "default_entry_z")]
    pub entry_z: f64,
    /// Exit threshold x (σ)
    #[serde(default = "default_exit_z")]
    pub exit_z: f64,
    /// Stop threshold s (σ)
    #[serde(default = "default_stop_z")]
    pub stop_z: f64,
    #[serde(default)]
    pub boundary: BoundaryMode,
    /// Confidence of an entry exactly at the entry threshold
    #[serde(default = "default_min_entry_confidence")]
    pub min_entry_confidence: f64,
}

fn default_entry_z() -> f64 {
    2.0
}
fn default_exit_z() -> f64 {
    0.5
}
fn default_stop_z() -> f64 {
    4.0
}
fn default_min_entry_confidence() -> f64 {
    0.5
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            entry_z: default_entry_z(),
            exit_z: default_exit_z(),
            stop_z: default_stop_z(),
            boundary: BoundaryMode::default(),
            min_entry_confidence: default_min_entry_confidence(),
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0 <= self.exit_z && self.exit_z < self.entry_z && self.entry_z < self.stop_z) {
            return Err(format!(
                "thresholds must satisfy 0 <= exit < entry < stop, got exit={} entry={} stop={}",
                self.exit_z, self.entry_z, self.stop_z
            ));
        }
        if !(0.0..=1.0).contains(&self.min_entry_confidence) {
            return Err("min_entry_confidence must be in [0, 1]".to_string());
        }
        Ok(())
    }

    #[inline]
    fn at_least(&self, value: f64, threshold: f64) -> bool {
        match self.boundary {
            BoundaryMode::Inclusive => value >= threshold,
            BoundaryMode::Exclusive => value > threshold,
        }
    }

    #[inline]
    fn at_most(&self, value: f64, threshold: f64) -> bool {
        match self.boundary {
            BoundaryMode::Inclusive => value <= threshold,
            BoundaryMode::Exclusive => value < threshold,
        }
    }
}

/// A state change produced by one z-score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub kind: SignalKind,
    pub confidence: f64,
    /// State before the transition, for rollback
    pub from: SpreadSide,
}

/// Per-pair signal state machine.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    config: SignalConfig,
    state: SpreadSide,
}

impl SignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            state: SpreadSide::Flat,
        }
    }

    pub fn state(&self) -> SpreadSide {
        self.state
    }

    /// Evaluate one z-score. `allow_entry = false` suppresses entries (pair
    /// winding down) while exits and stops still fire.
    pub fn on_z_score(&mut self, z: f64, allow_entry: bool) -> Option<Transition> {
        if !z.is_finite() {
            return None;
        }
        let cfg = &self.config;
        let from = self.state;

        let (kind, next, confidence) = match from {
            SpreadSide::Flat => {
                if !allow_entry {
                    return None;
                }
                if cfg.at_most(z, -cfg.entry_z) {
                    (SignalKind::LongSpread, SpreadSide::LongSpread, self.entry_confidence(z))
                } else if cfg.at_least(z, cfg.entry_z) {
                    (SignalKind::ShortSpread, SpreadSide::ShortSpread, self.entry_confidence(z))
                } else {
                    return None;
                }
            }
            SpreadSide::LongSpread | SpreadSide::ShortSpread => {
                let magnitude = z.abs();
                if cfg.at_least(magnitude, cfg.stop_z) {
                    (SignalKind::StopLoss, SpreadSide::Flat, 1.0)
                } else if cfg.at_most(magnitude, cfg.exit_z) {
                    let confidence = if cfg.exit_z > 0.0 {
                        (1.0 - magnitude / cfg.exit_z).clamp(0.0, 1.0)
                    } else {
                        1.0
                    };
                    (SignalKind::Exit, SpreadSide::Flat, confidence)
                } else {
                    return None;
                }
            }
        };

        self.state = next;
        Some(Transition {
            kind,
            confidence,
            from,
        })
    }

    /// Confidence grows linearly from `min_entry_confidence` at the entry
    /// threshold to 1.0 at the stop threshold.
    fn entry_confidence(&self, z: f64) -> f64 {
        let cfg = &self.config;
        let past = ((z.abs() - cfg.entry_z) / (cfg.stop_z - cfg.entry_z)).clamp(0.0, 1.0);
        cfg.min_entry_confidence + (1.0 - cfg.min_entry_confidence) * past
    }

    /// Overwrite the state, e.g. to roll back a transition whose order was
    /// rejected or failed, or to align with a restored position.
    pub fn force_state(&mut self, state: SpreadSide) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(zs: &[f64]) -> Vec<SignalKind> {
        let mut generator = SignalGenerator::new(SignalConfig::default());
        zs.iter()
            .filter_map(|z| generator.on_z_score(*z, true))
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_short_entry_then_exit() {
        let events = run(&[0.0, 1.0, 2.1, 2.5, 1.5, 0.8, 0.4, 0.1]);
        assert_eq!(events, vec![SignalKind::ShortSpread, SignalKind::Exit]);
    }

    #[test]
    fn test_stop_loss_before_exit() {
        let events = run(&[0.0, 2.1, 3.0, 4.2, 0.3]);
        assert_eq!(events, vec![SignalKind::ShortSpread, SignalKind::StopLoss]);
    }

    #[test]
    fn test_long_entry_on_negative_z() {
        let events = run(&[-1.0, -2.0, -0.5]);
        assert_eq!(events, vec![SignalKind::LongSpread, SignalKind::Exit]);
    }

    #[test]
    fn test_no_transition_inside_bands() {
        assert!(run(&[0.0, 1.9, -1.9, 0.6, 1.99]).is_empty());
        // In position, values between exit and stop hold
        assert_eq!(run(&[2.0, 1.0, 3.9, -3.9, 0.51]).len(), 1);
    }

    #[test]
    fn test_exclusive_boundaries() {
        let mut generator = SignalGenerator::new(SignalConfig {
            boundary: BoundaryMode::Exclusive,
            ..Default::default()
        });
        assert!(generator.on_z_score(2.0, true).is_none());
        assert!(generator.on_z_score(2.0001, true).is_some());
        assert!(generator.on_z_score(0.5, true).is_none());
        assert!(generator.on_z_score(4.0, true).is_none());
        assert_eq!(
            generator.on_z_score(4.01, true).map(|t| t.kind),
            Some(SignalKind::StopLoss)
        );
    }

    #[test]
    fn test_entry_confidence_scales_with_distance() {
        let mut generator = SignalGenerator::new(SignalConfig::default());
        let at_threshold = generator.on_z_score(2.0, true).unwrap();
        assert!((at_threshold.confidence - 0.5).abs() < 1e-12);

        generator.force_state(SpreadSide::Flat);
        let deep = generator.on_z_score(-3.0, true).unwrap();
        assert!((deep.confidence - 0.75).abs() < 1e-12);

        generator.force_state(SpreadSide::Flat);
        let beyond_stop = generator.on_z_score(6.0, true).unwrap();
        assert_eq!(beyond_stop.confidence, 1.0);
    }

    #[test]
    fn test_entries_suppressed_when_winding_down() {
        let mut generator = SignalGenerator::new(SignalConfig::default());
        assert!(generator.on_z_score(3.0, false).is_none());
        generator.force_state(SpreadSide::ShortSpread);
        assert_eq!(
            generator.on_z_score(0.2, false).map(|t| t.kind),
            Some(SignalKind::Exit)
        );
    }

    #[test]
    fn test_rollback_restores_prior_state() {
        let mut generator = SignalGenerator::new(SignalConfig::default());
        let t = generator.on_z_score(-2.5, true).unwrap();
        assert_eq!(generator.state(), SpreadSide::LongSpread);
        generator.force_state(t.from);
        assert_eq!(generator.state(), SpreadSide::Flat);
    }

    #[test]
    fn test_nan_ignored() {
        let mut generator = SignalGenerator::new(SignalConfig::default());
        assert!(generator.on_z_score(f64::NAN, true).is_none());
        assert_eq!(generator.state(), SpreadSide::Flat);
    }

    #[test]
    fn test_config_validation() {
        assert!(SignalConfig::default().validate().is_ok());
        let bad = SignalConfig {
            exit_z: 3.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
