//! Signal → risk-checked, costed, two-leg execution against the shared book.

use super::cost::CostModel;
use super::order::{DispatchError, Fill, OrderDispatcher, OrderKind, OrderRequest};
use crate::metrics;
use crate::portfolio::{CloseFill, EquitySnapshot, ExitReason, PairPosition, Portfolio, TradeRecord};
use crate::risk::{ProposedDelta, RejectReason, RiskConfig, RiskDecision, RiskManager};
use crate::strategy::{Signal, SignalKind};
use crate::types::{Leg, OrderSide, PairId, SpreadSide};

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Entry notional at confidence 1.0, as a fraction of equity
    #[serde(default = "default_base_size_pct")]
    pub base_size_pct: f64,
    /// Quantities are rounded down to a multiple of this
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: Decimal,
    #[serde(default = "default_commission_bps")]
    pub commission_bps: Decimal,
    #[serde(default)]
    pub commission_fixed: Decimal,
    /// Send limit orders this many bps through the reference price;
    /// market orders when unset
    #[serde(default)]
    pub limit_offset_bps: Option<Decimal>,
}

fn default_initial_capital() -> Decimal {
    dec!(10000000)
}
fn default_base_size_pct() -> f64 {
    0.05
}
fn default_lot_size() -> Decimal {
    Decimal::ONE
}
fn default_slippage_bps() -> Decimal {
    dec!(3)
}
fn default_commission_bps() -> Decimal {
    dec!(5)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            base_size_pct: default_base_size_pct(),
            lot_size: default_lot_size(),
            slippage_bps: default_slippage_bps(),
            commission_bps: default_commission_bps(),
            commission_fixed: Decimal::ZERO,
            limit_offset_bps: None,
        }
    }
}

impl ExecutionConfig {
    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.slippage_bps, self.commission_bps, self.commission_fixed)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_capital <= Decimal::ZERO {
            return Err("initial_capital must be positive".to_string());
        }
        if !(self.base_size_pct > 0.0 && self.base_size_pct <= 1.0) {
            return Err("base_size_pct must be in (0, 1]".to_string());
        }
        if self.lot_size <= Decimal::ZERO {
            return Err("lot_size must be positive".to_string());
        }
        if matches!(self.limit_offset_bps, Some(bps) if bps < Decimal::ZERO) {
            return Err("limit_offset_bps must be non-negative".to_string());
        }
        self.cost_model().validate()
    }
}

/// Portfolio and risk state, mutated together under one lock.
#[derive(Debug)]
pub struct Book {
    pub portfolio: Portfolio,
    pub risk: RiskManager,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("{leg} leg failed, other leg unwound: {source}")]
    LegFailed { leg: Leg, source: DispatchError },
    #[error("both legs failed: dependent: {dependent}; independent: {independent}")]
    BothLegsFailed {
        dependent: DispatchError,
        independent: DispatchError,
    },
    #[error("{leg} leg failed ({source}) and unwinding the other leg failed: {unwind}")]
    UnwindFailed {
        leg: Leg,
        source: DispatchError,
        unwind: DispatchError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Exit for a pair with no position
    NoPosition,
    /// Sizing rounded a leg to zero
    ZeroQuantity,
    InvalidHedgeRatio,
    InvalidPrice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub pair: PairId,
    pub kind: SignalKind,
    pub dependent: Fill,
    pub independent: Fill,
    pub commission: Decimal,
    /// Entry notional was cut to the per-pair limit
    pub size_capped: bool,
    pub signal_to_order: Duration,
    /// Closed round trip, for exits
    pub trade: Option<TradeRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled(Box<ExecutionReport>),
    Rejected(RejectReason),
    Failed(ExecutionError),
    Skipped(SkipReason),
}

/// Both leg quantities for an entry of `notional`: `N_y = notional /
/// (p_y + |beta|·p_x)`, `N_x = |beta|·N_y`, each rounded down to the lot.
pub fn size_legs(
    notional: Decimal,
    abs_beta: Decimal,
    dependent_price: Decimal,
    independent_price: Decimal,
    lot: Decimal,
) -> Option<(Decimal, Decimal)> {
    let unit = dependent_price + abs_beta * independent_price;
    if unit <= Decimal::ZERO || lot <= Decimal::ZERO || notional <= Decimal::ZERO {
        return None;
    }
    let round = |q: Decimal| (q / lot).floor() * lot;
    let qty_y = round(notional / unit);
    let qty_x = round(abs_beta * qty_y);
    if qty_y.is_zero() || qty_x.is_zero() {
        None
    } else {
        Some((qty_y, qty_x))
    }
}

pub struct ExecutionEngine {
    config: ExecutionConfig,
    cost: CostModel,
    dispatcher: Arc<dyn OrderDispatcher>,
    book: Mutex<Book>,
}

impl ExecutionEngine {
    pub fn new(
        config: ExecutionConfig,
        risk: RiskConfig,
        dispatcher: Arc<dyn OrderDispatcher>,
    ) -> Self {
        let book = Book {
            portfolio: Portfolio::new(config.initial_capital),
            risk: RiskManager::new(risk),
        };
        Self {
            cost: config.cost_model(),
            config,
            dispatcher,
            book: Mutex::new(book),
        }
    }

    /// Authorize, dispatch and book one signal as a single unit.
    #[instrument(skip(self, signal), fields(pair = %signal.pair, kind = %signal.kind))]
    pub async fn execute(&self, signal: &Signal, emitted_at: Instant) -> ExecutionOutcome {
        let mut book = self.book.lock().await;
        let Book { portfolio, risk } = &mut *book;
        portfolio.mark(
            &signal.pair,
            signal.dependent_price,
            signal.independent_price,
        );

        let outcome = match signal.kind.entry_side() {
            Some(side) => self.open(portfolio, risk, signal, side, emitted_at).await,
            None => self.close(portfolio, risk, signal, emitted_at).await,
        };

        publish_portfolio(portfolio);
        outcome
    }

    async fn open(
        &self,
        portfolio: &mut Portfolio,
        risk: &mut RiskManager,
        signal: &Signal,
        side: SpreadSide,
        emitted_at: Instant,
    ) -> ExecutionOutcome {
        let (py, px) = (signal.dependent_price, signal.independent_price);
        if py <= Decimal::ZERO || px <= Decimal::ZERO {
            return ExecutionOutcome::Skipped(SkipReason::InvalidPrice);
        }
        let Some(abs_beta) = Decimal::from_f64(signal.hedge_ratio.abs()) else {
            return ExecutionOutcome::Skipped(SkipReason::InvalidHedgeRatio);
        };

        let equity = portfolio.equity();
        // Cap the notional so the position still fits once its own entry
        // costs have come out of equity
        let limit = self
            .cost
            .max_gross_after_costs(equity, risk.max_position_pct());
        let scale = Decimal::from_f64(self.config.base_size_pct * signal.confidence.clamp(0.0, 1.0))
            .unwrap_or(Decimal::ZERO);
        let base = equity * scale;
        let size_capped = base > limit;
        let notional = base.min(limit);

        let Some((qty_y, qty_x)) = size_legs(notional, abs_beta, py, px, self.config.lot_size)
        else {
            return ExecutionOutcome::Skipped(SkipReason::ZeroQuantity);
        };
        let gross_exposure = qty_y * py + qty_x * px;

        let y_side = match side {
            SpreadSide::ShortSpread => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        // Negative beta: both legs move the same way
        let x_side = if signal.hedge_ratio >= 0.0 {
            y_side.opposite()
        } else {
            y_side
        };

        let delta = ProposedDelta::Open {
            pair: signal.pair.clone(),
            gross_exposure,
            entry_cost: self.cost.order_cost(y_side, qty_y, py)
                + self.cost.order_cost(x_side, qty_x, px),
        };
        if let RiskDecision::Rejected(reason) = risk.authorize(portfolio, &delta) {
            metrics::record_risk_rejection(reason.code());
            warn!(reason = reason.code(), detail = %reason, "Entry rejected by risk manager");
            return ExecutionOutcome::Rejected(reason);
        }

        let y_order = self.order(&signal.pair, Leg::Dependent, y_side, qty_y, py);
        let x_order = self.order(&signal.pair, Leg::Independent, x_side, qty_x, px);

        let (y_fill, x_fill, latency) =
            match self.dispatch_legs(portfolio, &y_order, &x_order, emitted_at).await {
                Ok(fills) => fills,
                Err(e) => return ExecutionOutcome::Failed(e),
            };

        let commission =
            self.cost.commission(y_fill.notional()) + self.cost.commission(x_fill.notional());
        portfolio.open(PairPosition {
            pair: signal.pair.clone(),
            side,
            entry_z: signal.z_score,
            hedge_ratio: signal.hedge_ratio,
            dependent_qty: signed(y_side, y_fill.quantity),
            independent_qty: signed(x_side, x_fill.quantity),
            dependent_entry: y_fill.price,
            independent_entry: x_fill.price,
            dependent_mark: py,
            independent_mark: px,
            entry_cost: commission,
            opened_at: signal.timestamp,
        });

        info!(
            side = %side,
            qty_y = %qty_y,
            qty_x = %qty_x,
            gross = %gross_exposure,
            size_capped,
            "Position opened"
        );
        ExecutionOutcome::Filled(Box::new(ExecutionReport {
            pair: signal.pair.clone(),
            kind: signal.kind,
            dependent: y_fill,
            independent: x_fill,
            commission,
            size_capped,
            signal_to_order: latency,
            trade: None,
        }))
    }

    async fn close(
        &self,
        portfolio: &mut Portfolio,
        risk: &mut RiskManager,
        signal: &Signal,
        emitted_at: Instant,
    ) -> ExecutionOutcome {
        let Some(position) = portfolio.position(&signal.pair).cloned() else {
            return ExecutionOutcome::Skipped(SkipReason::NoPosition);
        };
        let delta = ProposedDelta::Close {
            pair: signal.pair.clone(),
        };
        if let RiskDecision::Rejected(reason) = risk.authorize(portfolio, &delta) {
            metrics::record_risk_rejection(reason.code());
            return ExecutionOutcome::Rejected(reason);
        }

        let y_order = self.order(
            &signal.pair,
            Leg::Dependent,
            closing_side(position.dependent_qty),
            position.dependent_qty.abs(),
            signal.dependent_price,
        );
        let x_order = self.order(
            &signal.pair,
            Leg::Independent,
            closing_side(position.independent_qty),
            position.independent_qty.abs(),
            signal.independent_price,
        );

        let (y_fill, x_fill, latency) =
            match self.dispatch_legs(portfolio, &y_order, &x_order, emitted_at).await {
                Ok(fills) => fills,
                Err(e) => return ExecutionOutcome::Failed(e),
            };

        let commission =
            self.cost.commission(y_fill.notional()) + self.cost.commission(x_fill.notional());
        let reason = ExitReason::from_signal(signal.kind).unwrap_or(ExitReason::MeanReversion);
        let trade = portfolio.close(
            &signal.pair,
            CloseFill {
                dependent_price: y_fill.price,
                independent_price: x_fill.price,
                commission,
                exit_z: signal.z_score,
                closed_at: signal.timestamp,
                reason,
            },
        );

        if let Some(trade) = &trade {
            info!(
                reason = %reason,
                pnl = %trade.pnl,
                holding_ms = trade.holding_ms(),
                "Position closed"
            );
        }
        ExecutionOutcome::Filled(Box::new(ExecutionReport {
            pair: signal.pair.clone(),
            kind: signal.kind,
            dependent: y_fill,
            independent: x_fill,
            commission,
            size_capped: false,
            signal_to_order: latency,
            trade,
        }))
    }

    fn order(
        &self,
        pair: &PairId,
        leg: Leg,
        side: OrderSide,
        quantity: Decimal,
        reference: Decimal,
    ) -> OrderRequest {
        let order = OrderRequest::market(pair, leg, side, quantity, reference);
        match self.config.limit_offset_bps {
            Some(bps) => {
                let offset = bps / dec!(10000);
                let limit = match side {
                    OrderSide::Buy => reference * (Decimal::ONE + offset),
                    OrderSide::Sell => reference * (Decimal::ONE - offset),
                };
                order.with_kind(OrderKind::Limit(limit))
            }
            None => order,
        }
    }

    /// Send both legs concurrently. On a one-sided failure the filled leg is
    /// unwound at market and the round-trip cost is charged to cash; the
    /// position itself is never booked.
    async fn dispatch_legs(
        &self,
        portfolio: &mut Portfolio,
        dependent: &OrderRequest,
        independent: &OrderRequest,
        emitted_at: Instant,
    ) -> Result<(Fill, Fill, Duration), ExecutionError> {
        let latency = emitted_at.elapsed();
        metrics::record_signal_to_order_latency(latency.as_secs_f64());

        let (y_res, x_res) = tokio::join!(
            self.dispatcher.dispatch(dependent),
            self.dispatcher.dispatch(independent)
        );
        metrics::record_order(&dependent.side.to_string(), y_res.is_ok());
        metrics::record_order(&independent.side.to_string(), x_res.is_ok());

        match (y_res, x_res) {
            (Ok(y), Ok(x)) => Ok((y, x, latency)),
            (Err(dependent), Err(independent)) => {
                error!(
                    dependent_error = %dependent,
                    independent_error = %independent,
                    "Both legs failed - no position change"
                );
                Err(ExecutionError::BothLegsFailed {
                    dependent,
                    independent,
                })
            }
            (Err(e), Ok(fill)) => Err(self.unwind(portfolio, independent, fill, Leg::Dependent, e).await),
            (Ok(fill), Err(e)) => Err(self.unwind(portfolio, dependent, fill, Leg::Independent, e).await),
        }
    }

    async fn unwind(
        &self,
        portfolio: &mut Portfolio,
        filled: &OrderRequest,
        fill: Fill,
        failed_leg: Leg,
        source: DispatchError,
    ) -> ExecutionError {
        let unwind = filled.unwind();
        match self.dispatcher.dispatch(&unwind).await {
            Ok(back) => {
                metrics::record_order(&unwind.side.to_string(), true);
                let round_trip = match filled.side {
                    OrderSide::Buy => (back.price - fill.price) * back.quantity,
                    OrderSide::Sell => (fill.price - back.price) * back.quantity,
                };
                let costs = self.cost.commission(fill.notional()) + self.cost.commission(back.notional());
                portfolio.adjust_cash(round_trip - costs);
                warn!(
                    failed_leg = %failed_leg,
                    error = %source,
                    unwound = %filled.instrument,
                    "Leg failed - filled leg unwound"
                );
                ExecutionError::LegFailed {
                    leg: failed_leg,
                    source,
                }
            }
            Err(unwind_error) => {
                metrics::record_order(&unwind.side.to_string(), false);
                error!(
                    failed_leg = %failed_leg,
                    error = %source,
                    unwind_error = %unwind_error,
                    instrument = %filled.instrument,
                    quantity = %fill.quantity,
                    "CRITICAL: Unwind failed - naked leg at venue. MANUAL INTERVENTION REQUIRED."
                );
                ExecutionError::UnwindFailed {
                    leg: failed_leg,
                    source,
                    unwind: unwind_error,
                }
            }
        }
    }

    /// Replace the book with one persisted by a previous run. Closed trades
    /// are not carried over.
    pub async fn restore(&self, equity: &EquitySnapshot, positions: Vec<PairPosition>) {
        let mut book = self.book.lock().await;
        let Book { portfolio, risk } = &mut *book;
        *portfolio = Portfolio::restore(self.config.initial_capital, equity, positions);
        let status = risk.observe(portfolio);
        publish_portfolio(portfolio);
        info!(
            cash = %portfolio.cash(),
            equity = %portfolio.equity(),
            open_positions = portfolio.open_count(),
            drawdown_status = ?status,
            "Book restored"
        );
    }

    /// Mark a pair's position and return the resulting equity snapshot.
    pub async fn mark(
        &self,
        pair: &PairId,
        dependent: Decimal,
        independent: Decimal,
        timestamp: i64,
    ) -> EquitySnapshot {
        let mut book = self.book.lock().await;
        let Book { portfolio, risk } = &mut *book;
        portfolio.mark(pair, dependent, independent);
        risk.observe(portfolio);
        publish_portfolio(portfolio);
        portfolio.snapshot(timestamp)
    }

    pub async fn snapshot(&self, timestamp: i64) -> EquitySnapshot {
        self.book.lock().await.portfolio.snapshot(timestamp)
    }

    pub async fn has_position(&self, pair: &PairId) -> bool {
        self.book.lock().await.portfolio.has_position(pair)
    }

    pub async fn position(&self, pair: &PairId) -> Option<PairPosition> {
        self.book.lock().await.portfolio.position(pair).cloned()
    }

    /// Whether the drawdown kill-switch is blocking entries.
    pub async fn is_halted(&self) -> bool {
        self.book.lock().await.risk.is_halted()
    }

    /// Canonical keys of every pair with an open position.
    pub async fn open_pair_keys(&self) -> HashSet<(String, String)> {
        self.book
            .lock()
            .await
            .portfolio
            .positions()
            .map(|p| p.pair.canonical_key())
            .collect()
    }

    pub async fn positions(&self) -> Vec<PairPosition> {
        self.book.lock().await.portfolio.positions().cloned().collect()
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.book.lock().await.portfolio.trades().to_vec()
    }
}

fn signed(side: OrderSide, quantity: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => quantity,
        OrderSide::Sell => -quantity,
    }
}

fn closing_side(quantity: Decimal) -> OrderSide {
    if quantity > Decimal::ZERO {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

fn publish_portfolio(portfolio: &Portfolio) {
    use rust_decimal::prelude::ToPrimitive;
    metrics::set_portfolio(
        portfolio.equity().to_f64().unwrap_or(0.0),
        portfolio.drawdown(),
        portfolio.open_count(),
    );
}
