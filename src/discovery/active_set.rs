//! Active pair set and its atomic publication.
//!
//! Discovery builds a fresh immutable [`ActivePairSet`] each cycle and
//! publishes it through a `watch` channel holding an `Arc`. Readers on the
//! tick path clone the `Arc` and never observe a half-built set.

use super::engine::PairCandidate;
use crate::types::PairId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Trading status of an active pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// In the current top-M; entries allowed
    Active,
    /// Dropped from the ranking but still cointegrated with an open
    /// position; exits only
    WindingDown,
}

/// A promoted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePair {
    pub id: PairId,
    pub candidate: PairCandidate,
    pub status: PairStatus,
    pub promoted_at: DateTime<Utc>,
}

impl ActivePair {
    pub fn accepts_entries(&self) -> bool {
        self.status == PairStatus::Active
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pair {0} duplicates an active pair over the same instruments")]
pub struct DuplicatePair(pub PairId);

/// Immutable snapshot of the tradable pairs. At most one entry per
/// distinct instrument pair, regardless of leg order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivePairSet {
    generation: u64,
    pairs: BTreeMap<(String, String), ActivePair>,
}

impl ActivePairSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set, rejecting two entries over the same instruments.
    pub fn from_pairs(
        generation: u64,
        pairs: impl IntoIterator<Item = ActivePair>,
    ) -> Result<Self, DuplicatePair> {
        let mut map = BTreeMap::new();
        for pair in pairs {
            let key = pair.id.canonical_key();
            if map.contains_key(&key) {
                return Err(DuplicatePair(pair.id));
            }
            map.insert(key, pair);
        }
        Ok(Self {
            generation,
            pairs: map,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Lookup by either leg order.
    pub fn get(&self, id: &PairId) -> Option<&ActivePair> {
        self.pairs.get(&id.canonical_key())
    }

    pub fn contains(&self, id: &PairId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivePair> {
        self.pairs.values()
    }

    pub fn ids(&self) -> Vec<PairId> {
        self.pairs.values().map(|p| p.id.clone()).collect()
    }

    /// Pairs that include `instrument` as either leg.
    pub fn pairs_with(&self, instrument: &str) -> impl Iterator<Item = &ActivePair> + '_ {
        let instrument = instrument.to_string();
        self.pairs
            .values()
            .filter(move |p| p.id.contains(&instrument))
    }
}

/// Outcome of moving from one active set to the next.
#[derive(Debug, Clone, Default)]
pub struct Handoff {
    pub next: ActivePairSet,
    /// Newly active this cycle
    pub promoted: Vec<PairId>,
    /// Left the ranking but kept, winding down an open position
    pub retained: Vec<PairId>,
    /// Failed the cointegration retest; open positions must be force-closed
    pub demoted: Vec<PairId>,
    /// Left the ranking while flat; removed without action
    pub dropped: Vec<PairId>,
}

/// Plan the next active set.
///
/// Pairs already active that are re-selected keep their promotion time.
/// Pairs that fell out of the ranking are demoted only when
/// `still_cointegrated` returns `Some(false)`; otherwise they are retained
/// while `has_open_position` holds and dropped once flat. Retained pairs
/// occupy cap slots before new promotions.
pub fn plan_handoff<C, O>(
    current: &ActivePairSet,
    selected: Vec<PairCandidate>,
    max_active_pairs: usize,
    still_cointegrated: C,
    has_open_position: O,
) -> Handoff
where
    C: Fn(&PairId) -> Option<bool>,
    O: Fn(&PairId) -> bool,
{
    let now = Utc::now();
    let mut handoff = Handoff::default();
    let mut next: BTreeMap<(String, String), ActivePair> = BTreeMap::new();

    let selected_keys: Vec<(String, String)> =
        selected.iter().map(|c| c.pair.canonical_key()).collect();

    for pair in current.iter() {
        let key = pair.id.canonical_key();
        if selected_keys.contains(&key) {
            continue;
        }
        match still_cointegrated(&pair.id) {
            Some(false) => handoff.demoted.push(pair.id.clone()),
            _ if has_open_position(&pair.id) => {
                handoff.retained.push(pair.id.clone());
                next.insert(
                    key,
                    ActivePair {
                        status: PairStatus::WindingDown,
                        ..pair.clone()
                    },
                );
            }
            _ => handoff.dropped.push(pair.id.clone()),
        }
    }

    for candidate in selected {
        if next.len() >= max_active_pairs {
            break;
        }
        let key = candidate.pair.canonical_key();
        if next.contains_key(&key) {
            continue;
        }
        let (id, promoted_at) = match current.get(&candidate.pair) {
            // Keep the existing leg order so the running estimator stays valid
            Some(existing) => (existing.id.clone(), existing.promoted_at),
            None => {
                handoff.promoted.push(candidate.pair.clone());
                (candidate.pair.clone(), now)
            }
        };
        next.insert(
            key,
            ActivePair {
                id,
                candidate,
                status: PairStatus::Active,
                promoted_at,
            },
        );
    }

    handoff.next = ActivePairSet {
        generation: current.generation + 1,
        pairs: next,
    };
    handoff
}

/// Writer side of the published active set.
#[derive(Debug)]
pub struct ActiveSetPublisher {
    tx: watch::Sender<Arc<ActivePairSet>>,
}

impl ActiveSetPublisher {
    pub fn new(initial: ActivePairSet) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Atomically replace the published set.
    pub fn publish(&self, set: ActivePairSet) {
        self.tx.send_replace(Arc::new(set));
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<ActivePairSet> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ActivePairSet>> {
        self.tx.subscribe()
    }
}
