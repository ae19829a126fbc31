//! Tick Router for per-pair market data distribution
//!
//! Fans each instrument's ticks out to the queues of every active pair that
//! trades it. Routes are rebuilt when the active pair set is swapped.

use crate::metrics;
use crate::types::{PairId, Tick};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// What the router does when a pair's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Drop the tick and count it; the feed is never slowed down
    #[default]
    DropNewest,
    /// Await queue capacity (replays and tests)
    Wait,
}

/// Type alias for route entries: (Sender, PairID)
type RouteEntry = (mpsc::Sender<Arc<Tick>>, PairId);

/// Type alias for routes map to reduce complexity
type RoutesMap = DashMap<String, Vec<RouteEntry>>;

/// Thread-safe tick router.
///
/// Uses `DashMap` for concurrent access when routing ticks to pair workers.
///
/// # Example
///
/// ```ignore
/// let router = TickRouter::new(BackpressurePolicy::DropNewest);
/// router.register_pair(&PairId::new("KO", "PEP"), tx);
/// router.route(Arc::new(tick)).await;
/// ```
pub struct TickRouter {
    /// Instrument -> List of (Sender, PairID)
    routes: RoutesMap,
    policy: BackpressurePolicy,
}

impl Default for TickRouter {
    fn default() -> Self {
        Self::new(BackpressurePolicy::default())
    }
}

impl TickRouter {
    pub fn new(policy: BackpressurePolicy) -> Self {
        Self {
            routes: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Register one worker queue for both legs of a pair.
    pub fn register_pair(&self, pair: &PairId, sender: mpsc::Sender<Arc<Tick>>) {
        for symbol in [&pair.dependent, &pair.independent] {
            self.routes
                .entry(symbol.clone())
                .or_default()
                .push((sender.clone(), pair.clone()));
        }
    }

    /// Route a tick to every pair trading its instrument.
    ///
    /// Returns the number of queues that accepted the tick.
    pub async fn route(&self, tick: Arc<Tick>) -> usize {
        match self.policy {
            BackpressurePolicy::DropNewest => self.try_route(tick),
            BackpressurePolicy::Wait => self.route_waiting(tick).await,
        }
    }

    /// Non-blocking fan-out. Drops ticks on backpressure and increments
    /// Prometheus counters. Closed channel cleanup is deferred to
    /// `remove_pair()` to avoid write-lock contention on the hot path.
    #[inline]
    pub fn try_route(&self, tick: Arc<Tick>) -> usize {
        let Some(senders) = self.routes.get(&tick.instrument) else {
            return 0;
        };

        let mut delivered = 0;
        for (sender, pair_id) in senders.iter() {
            match sender.try_send(tick.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_tick(&tick.instrument);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::record_dropped_tick(&tick.instrument, "backpressure");
                    debug!(
                        pair_id = %pair_id,
                        instrument = %tick.instrument,
                        "Dropping tick: pair queue full"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    metrics::record_dropped_tick(&tick.instrument, "closed");
                    debug!(
                        pair_id = %pair_id,
                        instrument = %tick.instrument,
                        "Channel closed, deferred cleanup on next remove_pair()"
                    );
                }
            }
        }
        delivered
    }

    /// Fan-out that waits for queue capacity. Senders are cloned out of the
    /// map first so no shard lock is held across an await point.
    async fn route_waiting(&self, tick: Arc<Tick>) -> usize {
        let senders: Vec<RouteEntry> = match self.routes.get(&tick.instrument) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (sender, pair_id) in senders {
            if sender.send(tick.clone()).await.is_ok() {
                delivered += 1;
                metrics::record_tick(&tick.instrument);
            } else {
                metrics::record_dropped_tick(&tick.instrument, "closed");
                debug!(pair_id = %pair_id, "Channel closed while waiting");
            }
        }
        delivered
    }

    /// Remove all routes for a pair (demotion or restart).
    ///
    /// NOTE: Acquires write-locks on each shard sequentially via `iter_mut()`.
    /// This briefly contends with `route()` per-shard. Acceptable because
    /// active-set swaps are rare events.
    pub fn remove_pair(&self, pair_id: &PairId) {
        let mut empty_symbols = Vec::new();
        self.routes.iter_mut().for_each(|mut entry| {
            entry
                .value_mut()
                .retain(|(sender, pid)| pid != pair_id && !sender.is_closed());
            if entry.value().is_empty() {
                empty_symbols.push(entry.key().clone());
            }
        });
        // Clean up empty entries to keep symbol_count() accurate
        for sym in &empty_symbols {
            self.routes.remove_if(sym, |_, v| v.is_empty());
        }
        info!(pair_id = %pair_id, removed_symbols = empty_symbols.len(), "Removed pair routes");
    }

    /// Get the number of registered instruments.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.routes.len()
    }

    /// Check if an instrument has any registered routes.
    #[must_use]
    pub fn has_routes(&self, symbol: &str) -> bool {
        self.routes
            .get(symbol)
            .map(|senders| !senders.is_empty())
            .unwrap_or(false)
    }
}
