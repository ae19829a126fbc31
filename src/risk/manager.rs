//! Authorization gate for every portfolio mutation.

use super::drawdown::{DrawdownGuard, DrawdownStatus};
use crate::portfolio::Portfolio;
use crate::types::PairId;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Max gross exposure of one pair as a fraction of equity
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    /// Max pairs with an open position
    #[serde(default = "default_max_open_pairs")]
    pub max_open_pairs: usize,
    /// Drawdown at which new entries are halted
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    /// Drawdown below which entries resume
    #[serde(default = "default_resume_drawdown_pct")]
    pub resume_drawdown_pct: f64,
}

fn default_max_position_pct() -> f64 {
    0.05
}
fn default_max_open_pairs() -> usize {
    20
}
fn default_max_drawdown_pct() -> f64 {
    0.15
}
fn default_resume_drawdown_pct() -> f64 {
    0.10
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_pct: default_max_position_pct(),
            max_open_pairs: default_max_open_pairs(),
            max_drawdown_pct: default_max_drawdown_pct(),
            resume_drawdown_pct: default_resume_drawdown_pct(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_position_pct > 0.0 && self.max_position_pct <= 1.0) {
            return Err("max_position_pct must be in (0, 1]".to_string());
        }
        if self.max_open_pairs == 0 {
            return Err("max_open_pairs must be at least 1".to_string());
        }
        if !(self.max_drawdown_pct > 0.0 && self.max_drawdown_pct <= 1.0) {
            return Err("max_drawdown_pct must be in (0, 1]".to_string());
        }
        if !(0.0..=self.max_drawdown_pct).contains(&self.resume_drawdown_pct) {
            return Err("resume_drawdown_pct must be in [0, max_drawdown_pct]".to_string());
        }
        Ok(())
    }
}

/// A change the execution engine wants to make to the portfolio.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposedDelta {
    /// Open a position with this gross exposure (mid prices). `entry_cost`
    /// is the slippage and commission the entry is expected to realize.
    Open {
        pair: PairId,
        gross_exposure: Decimal,
        entry_cost: Decimal,
    },
    Close {
        pair: PairId,
    },
}

impl ProposedDelta {
    pub fn pair(&self) -> &PairId {
        match self {
            ProposedDelta::Open { pair, .. } | ProposedDelta::Close { pair } => pair,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    PairExposureLimit { exposure: Decimal, limit: Decimal },
    MaxOpenPairs { open: usize, limit: usize },
    DrawdownKillSwitch { drawdown: f64 },
    DuplicatePosition,
}

impl RejectReason {
    /// Stable code for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::PairExposureLimit { .. } => "pair_exposure_limit",
            RejectReason::MaxOpenPairs { .. } => "max_open_pairs",
            RejectReason::DrawdownKillSwitch { .. } => "drawdown_kill_switch",
            RejectReason::DuplicatePosition => "duplicate_position",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::PairExposureLimit { exposure, limit } => {
                write!(f, "pair exposure {exposure} exceeds limit {limit}")
            }
            RejectReason::MaxOpenPairs { open, limit } => {
                write!(f, "{open} pairs open, limit {limit}")
            }
            RejectReason::DrawdownKillSwitch { drawdown } => {
                write!(f, "drawdown kill-switch engaged at {:.2}%", drawdown * 100.0)
            }
            RejectReason::DuplicatePosition => write!(f, "pair already has an open position"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved,
    Rejected(RejectReason),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved)
    }
}

/// Checks a proposed delta against exposure, open-pair and drawdown limits.
/// Never resizes: a delta either passes as proposed or is rejected.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    drawdown: DrawdownGuard,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let drawdown = DrawdownGuard::new(config.max_drawdown_pct, config.resume_drawdown_pct);
        Self { config, drawdown }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn max_position_pct(&self) -> Decimal {
        Decimal::from_f64(self.config.max_position_pct).unwrap_or(Decimal::ZERO)
    }

    /// Largest gross exposure one pair may carry once `entry_cost` has come
    /// out of the current equity.
    pub fn exposure_limit(&self, portfolio: &Portfolio, entry_cost: Decimal) -> Decimal {
        ((portfolio.equity() - entry_cost) * self.max_position_pct()).max(Decimal::ZERO)
    }

    /// Feed the current drawdown to the kill-switch.
    pub fn observe(&mut self, portfolio: &Portfolio) -> DrawdownStatus {
        self.drawdown.observe(portfolio.drawdown())
    }

    pub fn is_halted(&self) -> bool {
        self.drawdown.is_halted()
    }

    pub fn authorize(&mut self, portfolio: &Portfolio, delta: &ProposedDelta) -> RiskDecision {
        let status = self.observe(portfolio);

        let (gross_exposure, entry_cost) = match delta {
            // Exits always pass
            ProposedDelta::Close { .. } => return RiskDecision::Approved,
            ProposedDelta::Open {
                gross_exposure,
                entry_cost,
                ..
            } => (*gross_exposure, *entry_cost),
        };

        if status == DrawdownStatus::Halted {
            return RiskDecision::Rejected(RejectReason::DrawdownKillSwitch {
                drawdown: self.drawdown.last_drawdown(),
            });
        }
        if portfolio.has_position(delta.pair()) {
            return RiskDecision::Rejected(RejectReason::DuplicatePosition);
        }
        let open = portfolio.open_count();
        if open >= self.config.max_open_pairs {
            return RiskDecision::Rejected(RejectReason::MaxOpenPairs {
                open,
                limit: self.config.max_open_pairs,
            });
        }
        let limit = self.exposure_limit(portfolio, entry_cost);
        if gross_exposure > limit {
            return RiskDecision::Rejected(RejectReason::PairExposureLimit {
                exposure: gross_exposure,
                limit,
            });
        }
        RiskDecision::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::tests::long_position;
    use rust_decimal_macros::dec;

    fn open(pair: &PairId, gross: Decimal) -> ProposedDelta {
        ProposedDelta::Open {
            pair: pair.clone(),
            gross_exposure: gross,
            entry_cost: Decimal::ZERO,
        }
    }

    #[test]
    fn test_exposure_cap() {
        let mut risk = RiskManager::new(RiskConfig::default());
        let portfolio = Portfolio::new(dec!(100000));
        let pair = PairId::new("A", "B");

        assert!(risk.authorize(&portfolio, &open(&pair, dec!(5000))).is_approved());
        match risk.authorize(&portfolio, &open(&pair, dec!(5000.01))) {
            RiskDecision::Rejected(reason) => assert_eq!(reason.code(), "pair_exposure_limit"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_entry_cost_comes_out_of_equity_first() {
        let mut risk = RiskManager::new(RiskConfig::default());
        let portfolio = Portfolio::new(dec!(100000));
        let pair = PairId::new("A", "B");
        let costly = |gross| ProposedDelta::Open {
            pair: pair.clone(),
            gross_exposure: gross,
            entry_cost: dec!(100),
        };

        // 5% of (100000 - 100) = 4995
        assert_eq!(risk.exposure_limit(&portfolio, dec!(100)), dec!(4995));
        assert!(risk.authorize(&portfolio, &costly(dec!(4995))).is_approved());
        assert_eq!(
            risk.authorize(&portfolio, &costly(dec!(5000))),
            RiskDecision::Rejected(RejectReason::PairExposureLimit {
                exposure: dec!(5000),
                limit: dec!(4995),
            })
        );
    }

    #[test]
    fn test_open_pair_cap_and_duplicate() {
        let mut risk = RiskManager::new(RiskConfig {
            max_open_pairs: 1,
            ..Default::default()
        });
        let mut portfolio = Portfolio::new(dec!(100000));
        let held = PairId::new("A", "B");
        portfolio.open(long_position(held.clone(), dec!(1), dec!(1)));

        assert_eq!(
            risk.authorize(&portfolio, &open(&held, dec!(10))),
            RiskDecision::Rejected(RejectReason::DuplicatePosition)
        );
        assert_eq!(
            risk.authorize(&portfolio, &open(&PairId::new("C", "D"), dec!(10))),
            RiskDecision::Rejected(RejectReason::MaxOpenPairs { open: 1, limit: 1 })
        );
    }

    #[test]
    fn test_kill_switch_blocks_entries_not_exits() {
        let mut risk = RiskManager::new(RiskConfig::default());
        let mut portfolio = Portfolio::new(dec!(1000));
        let pair = PairId::new("A", "B");
        portfolio.open(long_position(pair.clone(), dec!(10), dec!(0)));
        // 10 * (80 - 100) = -200 → 20% drawdown
        portfolio.mark(&pair, dec!(80), dec!(50));

        let other = PairId::new("C", "D");
        match risk.authorize(&portfolio, &open(&other, dec!(1))) {
            RiskDecision::Rejected(reason) => assert_eq!(reason.code(), "drawdown_kill_switch"),
            other => panic!("expected kill-switch, got {other:?}"),
        }
        assert!(risk
            .authorize(&portfolio, &ProposedDelta::Close { pair })
            .is_approved());
        assert!(risk.is_halted());
    }

    #[test]
    fn test_config_validation() {
        assert!(RiskConfig::default().validate().is_ok());
        let bad = RiskConfig {
            resume_drawdown_pct: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
