//! Transaction cost model: bps slippage against the trader and a fixed plus
//! proportional commission.

use crate::types::OrderSide;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const BPS: Decimal = dec!(10000);

/// Slippage never exceeds 1% of the reference price.
const MAX_SLIPPAGE: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub slippage_bps: Decimal,
    pub commission_bps: Decimal,
    /// Per-order flat fee
    pub commission_fixed: Decimal,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(dec!(3), dec!(5), Decimal::ZERO)
    }
}

impl CostModel {
    pub fn new(slippage_bps: Decimal, commission_bps: Decimal, commission_fixed: Decimal) -> Self {
        Self {
            slippage_bps,
            commission_bps,
            commission_fixed,
        }
    }

    /// Zero-cost model for tests and dry runs.
    pub fn frictionless() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
    }

    /// Price after market impact: buys pay up, sells receive less.
    pub fn fill_price(&self, side: OrderSide, reference: Decimal) -> Decimal {
        let impact = (self.slippage_bps / BPS).min(MAX_SLIPPAGE);
        match side {
            OrderSide::Buy => reference * (Decimal::ONE + impact),
            OrderSide::Sell => reference * (Decimal::ONE - impact),
        }
    }

    pub fn commission(&self, notional: Decimal) -> Decimal {
        self.commission_fixed + notional.abs() * self.commission_bps / BPS
    }

    /// Equity given up by one order at the modelled fill: slippage marked
    /// against the reference price plus commission on the fill notional.
    pub fn order_cost(&self, side: OrderSide, quantity: Decimal, reference: Decimal) -> Decimal {
        let fill = self.fill_price(side, reference);
        (fill - reference).abs() * quantity + self.commission(fill * quantity)
    }

    /// Largest two-leg gross notional `G` for which `G <= pct * (equity -
    /// cost(G))` holds, bounding `cost(G)` by `G * (impact + (1 + impact) *
    /// commission) + 2 * fixed`.
    pub fn max_gross_after_costs(&self, equity: Decimal, pct: Decimal) -> Decimal {
        let impact = (self.slippage_bps / BPS).min(MAX_SLIPPAGE);
        let rate = impact + (Decimal::ONE + impact) * self.commission_bps / BPS;
        let net = equity - self.commission_fixed * Decimal::TWO;
        if net <= Decimal::ZERO || pct <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (pct * net / (Decimal::ONE + pct * rate))
            .round_dp_with_strategy(8, RoundingStrategy::ToZero)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.slippage_bps < Decimal::ZERO
            || self.commission_bps < Decimal::ZERO
            || self.commission_fixed < Decimal::ZERO
        {
            return Err("cost parameters must be non-negative".to_string());
        }
        Ok(())
    }
}
