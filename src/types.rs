//! Common Types Module
//!
//! Shared types used across the codebase to avoid circular dependencies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that unwinds this one.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// A single price update for one instrument.
///
/// Timestamps are milliseconds and strictly increasing per instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument identifier (e.g., "CI_A00").
    pub instrument: String,
    /// Exchange or bar timestamp in milliseconds.
    pub timestamp: i64,
    /// Last traded or bar-close price.
    pub price: Decimal,
}

impl Tick {
    pub fn new(instrument: impl Into<String>, timestamp: i64, price: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            timestamp,
            price,
        }
    }
}

/// Identifier of a traded pair.
///
/// The pair is ordered: `dependent` is the Y leg and `independent` the X leg
/// of the observation model `y = beta * x + intercept`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairId {
    pub dependent: String,
    pub independent: String,
}

impl PairId {
    pub fn new(dependent: impl Into<String>, independent: impl Into<String>) -> Self {
        Self {
            dependent: dependent.into(),
            independent: independent.into(),
        }
    }

    /// Order-insensitive key: `A/B` and `B/A` are the same instrument pair.
    #[must_use]
    pub fn canonical_key(&self) -> (String, String) {
        if self.dependent <= self.independent {
            (self.dependent.clone(), self.independent.clone())
        } else {
            (self.independent.clone(), self.dependent.clone())
        }
    }

    /// Same two instruments, in either leg order.
    #[must_use]
    pub fn same_instruments(&self, other: &PairId) -> bool {
        self.canonical_key() == other.canonical_key()
    }

    /// Symbol of the requested leg.
    #[must_use]
    pub fn symbol(&self, leg: Leg) -> &str {
        match leg {
            Leg::Dependent => &self.dependent,
            Leg::Independent => &self.independent,
        }
    }

    /// Whether `instrument` is one of the two legs.
    #[must_use]
    pub fn contains(&self, instrument: &str) -> bool {
        self.dependent == instrument || self.independent == instrument
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dependent, self.independent)
    }
}

/// Leg of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    /// Y leg (the regressand).
    Dependent,
    /// X leg (the regressor, hedged by beta).
    Independent,
}

impl Leg {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Leg::Dependent => Leg::Independent,
            Leg::Independent => Leg::Dependent,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Dependent => write!(f, "dependent"),
            Leg::Independent => write!(f, "independent"),
        }
    }
}

/// Direction of a spread position.
///
/// Long spread = buy Y, sell beta·X. Short spread = sell Y, buy beta·X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpreadSide {
    #[default]
    Flat,
    LongSpread,
    ShortSpread,
}

impl SpreadSide {
    #[must_use]
    pub fn is_open(self) -> bool {
        !matches!(self, SpreadSide::Flat)
    }

    /// Order side for the dependent (Y) leg when opening this side.
    #[must_use]
    pub fn dependent_entry_side(self) -> Option<OrderSide> {
        match self {
            SpreadSide::Flat => None,
            SpreadSide::LongSpread => Some(OrderSide::Buy),
            SpreadSide::ShortSpread => Some(OrderSide::Sell),
        }
    }
}

impl fmt::Display for SpreadSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpreadSide::Flat => write!(f, "flat"),
            SpreadSide::LongSpread => write!(f, "long_spread"),
            SpreadSide::ShortSpread => write!(f, "short_spread"),
        }
    }
}
