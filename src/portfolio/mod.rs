//! Portfolio aggregate: pair positions, cash, equity and closed trades.
//!
//! The portfolio is a plain owned value. Serialization of access is the
//! caller's job (the execution engine keeps it behind one lock together with
//! the risk manager).

use crate::strategy::SignalKind;
use crate::types::{PairId, SpreadSide};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    MeanReversion,
    StopLoss,
    /// Forced flatten: demoted from the active set, or closed out at shutdown
    Demotion,
}

impl ExitReason {
    pub fn from_signal(kind: SignalKind) -> Option<Self> {
        match kind {
            SignalKind::Exit => Some(ExitReason::MeanReversion),
            SignalKind::StopLoss => Some(ExitReason::StopLoss),
            SignalKind::Flat => Some(ExitReason::Demotion),
            SignalKind::LongSpread | SignalKind::ShortSpread => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MeanReversion => write!(f, "mean_reversion"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::Demotion => write!(f, "demotion"),
        }
    }
}

/// Open position on one pair. Quantities are signed (positive long).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPosition {
    pub pair: PairId,
    pub side: SpreadSide,
    pub entry_z: f64,
    pub hedge_ratio: f64,
    pub dependent_qty: Decimal,
    pub independent_qty: Decimal,
    pub dependent_entry: Decimal,
    pub independent_entry: Decimal,
    pub dependent_mark: Decimal,
    pub independent_mark: Decimal,
    /// Commission paid to open
    pub entry_cost: Decimal,
    /// Feed timestamp of the entry signal (ms)
    pub opened_at: i64,
}

impl PairPosition {
    /// Gross market value of both legs at the latest marks.
    pub fn gross_exposure(&self) -> Decimal {
        self.dependent_qty.abs() * self.dependent_mark
            + self.independent_qty.abs() * self.independent_mark
    }

    pub fn entry_notional(&self) -> Decimal {
        self.dependent_qty.abs() * self.dependent_entry
            + self.independent_qty.abs() * self.independent_entry
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.dependent_qty * (self.dependent_mark - self.dependent_entry)
            + self.independent_qty * (self.independent_mark - self.independent_entry)
    }

    pub fn mark(&mut self, dependent: Decimal, independent: Decimal) {
        self.dependent_mark = dependent;
        self.independent_mark = independent;
    }
}

/// A closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub pair: PairId,
    pub side: SpreadSide,
    pub entry_z: f64,
    pub exit_z: f64,
    pub opened_at: i64,
    pub closed_at: i64,
    /// Net of entry and exit commissions
    pub pnl: Decimal,
    /// `pnl` over entry notional
    pub return_pct: f64,
    pub reason: ExitReason,
}

impl TradeRecord {
    pub fn holding_ms(&self) -> i64 {
        self.closed_at - self.opened_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: i64,
    pub equity: Decimal,
    pub cash: Decimal,
    pub unrealized: Decimal,
    pub drawdown: f64,
    pub open_positions: usize,
    #[serde(default)]
    pub high_water_mark: Decimal,
}

/// Fill prices and commission for closing a position.
#[derive(Debug, Clone, Copy)]
pub struct CloseFill {
    pub dependent_price: Decimal,
    pub independent_price: Decimal,
    pub commission: Decimal,
    pub exit_z: f64,
    pub closed_at: i64,
    pub reason: ExitReason,
}

/// Cash holds initial capital plus realized P&L net of costs; equity adds
/// the open positions' unrealized P&L.
#[derive(Debug, Clone)]
pub struct Portfolio {
    initial_capital: Decimal,
    cash: Decimal,
    high_water_mark: Decimal,
    positions: BTreeMap<(String, String), PairPosition>,
    trades: Vec<TradeRecord>,
}

impl Portfolio {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            high_water_mark: initial_capital,
            positions: BTreeMap::new(),
            trades: Vec::new(),
        }
    }

    /// Rebuild a book persisted by a previous run. Positions keep their
    /// last marks; the high-water mark never sits below current equity.
    pub fn restore(
        initial_capital: Decimal,
        snapshot: &EquitySnapshot,
        positions: impl IntoIterator<Item = PairPosition>,
    ) -> Self {
        let mut portfolio = Self {
            initial_capital,
            cash: snapshot.cash,
            high_water_mark: snapshot.high_water_mark,
            positions: positions
                .into_iter()
                .map(|p| (p.pair.canonical_key(), p))
                .collect(),
            trades: Vec::new(),
        };
        portfolio.refresh_high_water_mark();
        portfolio
    }

    pub fn initial_capital(&self) -> Decimal {
        self.initial_capital
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(PairPosition::unrealized_pnl).sum()
    }

    pub fn equity(&self) -> Decimal {
        self.cash + self.unrealized_pnl()
    }

    pub fn high_water_mark(&self) -> Decimal {
        self.high_water_mark
    }

    /// Fractional drawdown from the equity high-water mark.
    pub fn drawdown(&self) -> f64 {
        if self.high_water_mark <= Decimal::ZERO {
            return 0.0;
        }
        let dd = (self.high_water_mark - self.equity()) / self.high_water_mark;
        dd.to_f64().unwrap_or(0.0).max(0.0)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_position(&self, pair: &PairId) -> bool {
        self.positions.contains_key(&pair.canonical_key())
    }

    pub fn position(&self, pair: &PairId) -> Option<&PairPosition> {
        self.positions.get(&pair.canonical_key())
    }

    pub fn positions(&self) -> impl Iterator<Item = &PairPosition> {
        self.positions.values()
    }

    /// Gross exposure of a pair, zero when flat.
    pub fn exposure(&self, pair: &PairId) -> Decimal {
        self.position(pair)
            .map(PairPosition::gross_exposure)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn mark(&mut self, pair: &PairId, dependent: Decimal, independent: Decimal) {
        if let Some(position) = self.positions.get_mut(&pair.canonical_key()) {
            position.mark(dependent, independent);
        }
        self.refresh_high_water_mark();
    }

    /// Book a new position, paying its entry commission.
    pub fn open(&mut self, position: PairPosition) {
        self.cash -= position.entry_cost;
        self.positions
            .insert(position.pair.canonical_key(), position);
        self.refresh_high_water_mark();
    }

    /// Realize a position at the given fills. `None` when the pair is flat.
    pub fn close(&mut self, pair: &PairId, fill: CloseFill) -> Option<TradeRecord> {
        let mut position = self.positions.remove(&pair.canonical_key())?;
        position.mark(fill.dependent_price, fill.independent_price);

        let gross = position.unrealized_pnl();
        let pnl = gross - position.entry_cost - fill.commission;
        self.cash += gross - fill.commission;

        let notional = position.entry_notional();
        let return_pct = if notional > Decimal::ZERO {
            (pnl / notional).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let record = TradeRecord {
            pair: position.pair,
            side: position.side,
            entry_z: position.entry_z,
            exit_z: fill.exit_z,
            opened_at: position.opened_at,
            closed_at: fill.closed_at,
            pnl,
            return_pct,
            reason: fill.reason,
        };
        self.trades.push(record.clone());
        self.refresh_high_water_mark();
        Some(record)
    }

    /// Realized cash flow outside a round trip (unwound partial fills).
    pub fn adjust_cash(&mut self, amount: Decimal) {
        self.cash += amount;
        self.refresh_high_water_mark();
    }

    pub fn snapshot(&self, timestamp: i64) -> EquitySnapshot {
        EquitySnapshot {
            timestamp,
            equity: self.equity(),
            cash: self.cash,
            unrealized: self.unrealized_pnl(),
            drawdown: self.drawdown(),
            open_positions: self.open_count(),
            high_water_mark: self.high_water_mark,
        }
    }

    fn refresh_high_water_mark(&mut self) {
        let equity = self.equity();
        if equity > self.high_water_mark {
            self.high_water_mark = equity;
        }
    }
}
