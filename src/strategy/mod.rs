//! Per-pair hot path: tick routing, synchronization, hedge-ratio update and
//! signal generation.

pub mod processor;
pub mod signal_generator;
pub mod tick_router;
pub mod worker;

use crate::types::{PairId, SpreadSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use processor::{PairProcessor, TickOutcome, TickSynchronizer};
pub use signal_generator::{BoundaryMode, SignalConfig, SignalGenerator};
pub use tick_router::{BackpressurePolicy, TickRouter};
pub use worker::{PairWorker, WorkerCommand, WorkerHandle};

/// Kind of trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Forced flatten at market (demotion or shutdown)
    Flat,
    /// Buy Y, sell beta·X
    LongSpread,
    /// Sell Y, buy beta·X
    ShortSpread,
    /// Mean reversion complete
    Exit,
    /// Divergence beyond the stop band
    StopLoss,
}

impl SignalKind {
    pub fn is_entry(self) -> bool {
        matches!(self, SignalKind::LongSpread | SignalKind::ShortSpread)
    }

    /// Side opened by an entry signal.
    pub fn entry_side(self) -> Option<SpreadSide> {
        match self {
            SignalKind::LongSpread => Some(SpreadSide::LongSpread),
            SignalKind::ShortSpread => Some(SpreadSide::ShortSpread),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Flat => "flat",
            SignalKind::LongSpread => "long_spread",
            SignalKind::ShortSpread => "short_spread",
            SignalKind::Exit => "exit",
            SignalKind::StopLoss => "stop_loss",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition of one pair, with the market context that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub pair: PairId,
    pub kind: SignalKind,
    pub z_score: f64,
    /// 0-1 strength; scales entry size
    pub confidence: f64,
    /// Kalman hedge ratio at emission
    pub hedge_ratio: f64,
    pub dependent_price: Decimal,
    pub independent_price: Decimal,
    /// Timestamp of the synchronized tick pair (ms)
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_classification() {
        assert!(SignalKind::LongSpread.is_entry());
        assert!(!SignalKind::Exit.is_entry());
        assert_eq!(
            SignalKind::ShortSpread.entry_side(),
            Some(SpreadSide::ShortSpread)
        );
        assert_eq!(SignalKind::StopLoss.entry_side(), None);
        assert_eq!(SignalKind::StopLoss.to_string(), "stop_loss");
    }
}
