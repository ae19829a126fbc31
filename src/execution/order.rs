//! Broker-facing order types and the dispatch seam.

use super::cost::CostModel;
use crate::types::{Leg, OrderSide, PairId};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    /// Worst acceptable price
    Limit(Decimal),
}

/// One leg order. `(pair, leg, side, quantity, kind)` is the broker
/// contract; the client order id makes dispatch idempotent downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub pair: PairId,
    pub leg: Leg,
    pub instrument: String,
    pub side: OrderSide,
    /// Always positive
    pub quantity: Decimal,
    pub kind: OrderKind,
    /// Price the order was sized against
    pub reference_price: Decimal,
}

impl OrderRequest {
    pub fn market(
        pair: &PairId,
        leg: Leg,
        side: OrderSide,
        quantity: Decimal,
        reference_price: Decimal,
    ) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            instrument: pair.symbol(leg).to_string(),
            pair: pair.clone(),
            leg,
            side,
            quantity,
            kind: OrderKind::Market,
            reference_price,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: OrderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Market order that reverses this one.
    pub fn unwind(&self) -> Self {
        Self::market(
            &self.pair,
            self.leg,
            self.side.opposite(),
            self.quantity,
            self.reference_price,
        )
    }
}

/// Confirmed execution of an order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub client_order_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("order rejected by venue: {0}")]
    Rejected(String),
    #[error("limit {limit} not marketable at {price}")]
    NotMarketable { limit: Decimal, price: Decimal },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Sends an order and waits for its fill. Implementations must not retry a
/// failed order on their own.
///
/// `Fill::price` is the realized execution price, slippage included. The
/// engine books fills as returned and charges commission on top; its
/// `CostModel` slippage is only a projection used to size entries.
#[async_trait]
pub trait OrderDispatcher: Send + Sync {
    async fn dispatch(&self, order: &OrderRequest) -> Result<Fill, DispatchError>;
}

/// Fills every order immediately at the reference price moved by the cost
/// model's slippage.
#[derive(Debug, Default)]
pub struct PaperDispatcher {
    cost: CostModel,
    dispatched: AtomicU64,
}

impl PaperDispatcher {
    pub fn new(cost: CostModel) -> Self {
        Self {
            cost,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Orders dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderDispatcher for PaperDispatcher {
    async fn dispatch(&self, order: &OrderRequest) -> Result<Fill, DispatchError> {
        if order.quantity <= Decimal::ZERO {
            return Err(DispatchError::Rejected(format!(
                "non-positive quantity {}",
                order.quantity
            )));
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let price = self.cost.fill_price(order.side, order.reference_price);
        if let OrderKind::Limit(limit) = order.kind {
            let marketable = match order.side {
                OrderSide::Buy => price <= limit,
                OrderSide::Sell => price >= limit,
            };
            if !marketable {
                return Err(DispatchError::NotMarketable { limit, price });
            }
        }

        Ok(Fill {
            client_order_id: order.client_order_id,
            price,
            quantity: order.quantity,
        })
    }
}
