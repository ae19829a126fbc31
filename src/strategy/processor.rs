//! Per-pair tick processing: synchronize the two legs, update the hedge
//! ratio, evaluate the signal state machine.

use super::signal_generator::{SignalConfig, SignalGenerator};
use super::{Signal, SignalKind};
use crate::discovery::PairStatus;
use crate::math::{KalmanError, KalmanHedgeRatio, KalmanUpdate};
use crate::types::{Leg, PairId, SpreadSide, Tick};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// A tick that could not be paired with its other leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataGap {
    /// Timestamp not after the last one seen for this leg
    OutOfOrder { leg: Leg, timestamp: i64, last: i64 },
    /// Pending tick on `leg` superseded before the other leg arrived
    Unmatched { leg: Leg, timestamp: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Waiting for the other leg
    Pending,
    /// Both legs observed at the same timestamp
    Synchronized {
        timestamp: i64,
        dependent: Decimal,
        independent: Decimal,
    },
    Gap(DataGap),
    /// Tick for an instrument outside the pair
    Foreign,
}

/// Joins the legs of a pair on exact timestamps. Interpolation is the
/// feed's job; mismatches are reported, never filled in.
#[derive(Debug, Clone)]
pub struct TickSynchronizer {
    pair: PairId,
    pending: [Option<(i64, Decimal)>; 2],
    last_seen: [Option<i64>; 2],
}

fn slot(leg: Leg) -> usize {
    match leg {
        Leg::Dependent => 0,
        Leg::Independent => 1,
    }
}

impl TickSynchronizer {
    pub fn new(pair: PairId) -> Self {
        Self {
            pair,
            pending: [None, None],
            last_seen: [None, None],
        }
    }

    pub fn push(&mut self, tick: &Tick) -> SyncEvent {
        let leg = if tick.instrument == self.pair.dependent {
            Leg::Dependent
        } else if tick.instrument == self.pair.independent {
            Leg::Independent
        } else {
            return SyncEvent::Foreign;
        };
        let other_leg = leg.other();
        let (me, other) = (slot(leg), slot(other_leg));

        if let Some(last) = self.last_seen[me] {
            if tick.timestamp <= last {
                return SyncEvent::Gap(DataGap::OutOfOrder {
                    leg,
                    timestamp: tick.timestamp,
                    last,
                });
            }
        }
        self.last_seen[me] = Some(tick.timestamp);

        match self.pending[other] {
            Some((ts, price)) if ts == tick.timestamp => {
                self.pending = [None, None];
                let (dependent, independent) = if me == 0 {
                    (tick.price, price)
                } else {
                    (price, tick.price)
                };
                SyncEvent::Synchronized {
                    timestamp: ts,
                    dependent,
                    independent,
                }
            }
            Some((ts, _)) if ts < tick.timestamp => {
                // The other leg never arrived for `ts`
                self.pending[other] = None;
                self.pending[me] = Some((tick.timestamp, tick.price));
                SyncEvent::Gap(DataGap::Unmatched {
                    leg: other_leg,
                    timestamp: ts,
                })
            }
            Some(_) => {
                // The other leg is already ahead; this tick can never match
                SyncEvent::Gap(DataGap::Unmatched {
                    leg,
                    timestamp: tick.timestamp,
                })
            }
            None => {
                let superseded = self.pending[me].replace((tick.timestamp, tick.price));
                match superseded {
                    Some((ts, _)) => SyncEvent::Gap(DataGap::Unmatched { leg, timestamp: ts }),
                    None => SyncEvent::Pending,
                }
            }
        }
    }

    /// Pending tick of a leg, if any.
    pub fn pending(&self, leg: Leg) -> Option<(i64, Decimal)> {
        self.pending[slot(leg)]
    }
}

/// Result of feeding one tick to a pair.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Pending,
    Foreign,
    Gap(DataGap),
    /// The filter refused the observation; state held
    Rejected(KalmanError),
    Updated {
        update: KalmanUpdate,
        signal: Option<Signal>,
    },
}

/// Owns everything mutable about one pair's signal path.
#[derive(Debug)]
pub struct PairProcessor {
    pair: PairId,
    sync: TickSynchronizer,
    kalman: KalmanHedgeRatio,
    generator: SignalGenerator,
    status: PairStatus,
    last_prices: Option<(i64, Decimal, Decimal)>,
    /// Last z-score the filter produced
    last_z: f64,
    last_transition_from: Option<SpreadSide>,
}

impl PairProcessor {
    pub fn new(pair: PairId, kalman: KalmanHedgeRatio, signal: SignalConfig) -> Self {
        Self {
            sync: TickSynchronizer::new(pair.clone()),
            pair,
            kalman,
            generator: SignalGenerator::new(signal),
            status: PairStatus::Active,
            last_prices: None,
            last_z: 0.0,
            last_transition_from: None,
        }
    }

    pub fn pair(&self) -> &PairId {
        &self.pair
    }

    pub fn kalman(&self) -> &KalmanHedgeRatio {
        &self.kalman
    }

    pub fn state(&self) -> SpreadSide {
        self.generator.state()
    }

    pub fn status(&self) -> PairStatus {
        self.status
    }

    /// Timestamp and (dependent, independent) prices of the last
    /// synchronized update.
    pub fn last_prices(&self) -> Option<(i64, Decimal, Decimal)> {
        self.last_prices
    }

    pub fn set_status(&mut self, status: PairStatus) {
        self.status = status;
    }

    pub fn on_tick(&mut self, tick: &Tick) -> TickOutcome {
        let (timestamp, dependent, independent) = match self.sync.push(tick) {
            SyncEvent::Synchronized {
                timestamp,
                dependent,
                independent,
            } => (timestamp, dependent, independent),
            SyncEvent::Pending => return TickOutcome::Pending,
            SyncEvent::Foreign => return TickOutcome::Foreign,
            SyncEvent::Gap(gap) => return TickOutcome::Gap(gap),
        };

        let x = independent.to_f64().unwrap_or(f64::NAN);
        let y = dependent.to_f64().unwrap_or(f64::NAN);
        let update = match self.kalman.update(x, y) {
            Ok(update) => update,
            Err(e) => return TickOutcome::Rejected(e),
        };
        self.last_prices = Some((timestamp, dependent, independent));
        if let Some(z) = update.z_score {
            self.last_z = z;
        }

        let signal = update.z_score.and_then(|z| {
            let allow_entry = self.status == PairStatus::Active;
            let transition = self.generator.on_z_score(z, allow_entry)?;
            self.last_transition_from = Some(transition.from);
            Some(Signal {
                pair: self.pair.clone(),
                kind: transition.kind,
                z_score: z,
                confidence: transition.confidence,
                hedge_ratio: update.beta,
                dependent_price: dependent,
                independent_price: independent,
                timestamp,
            })
        });

        TickOutcome::Updated { update, signal }
    }

    /// Undo the last transition after its order was rejected or failed.
    pub fn revert_last_transition(&mut self) {
        if let Some(from) = self.last_transition_from.take() {
            self.generator.force_state(from);
        }
    }

    /// Align the state machine with the book (e.g. position closed elsewhere).
    pub fn force_state(&mut self, state: SpreadSide) {
        self.last_transition_from = None;
        self.generator.force_state(state);
    }

    /// Market flatten at the last synchronized prices, if a position is
    /// believed open and prices are known.
    pub fn flatten_signal(&mut self) -> Option<Signal> {
        let (timestamp, dependent, independent) = self.last_prices?;
        let from = self.generator.state();
        if !from.is_open() {
            return None;
        }
        self.generator.force_state(SpreadSide::Flat);
        self.last_transition_from = Some(from);
        Some(Signal {
            pair: self.pair.clone(),
            kind: SignalKind::Flat,
            z_score: self.last_z,
            confidence: 1.0,
            hedge_ratio: self.kalman.beta(),
            dependent_price: dependent,
            independent_price: independent,
            timestamp,
        })
    }
}
