//! End-to-end wiring.
//!
//! The pipeline owns the price history used by discovery, the published
//! active-pair set, the tick router and one worker per routed pair. It is
//! driven by a single task calling [`Pipeline::on_tick`]; workers run on
//! their own tasks and share the execution engine. Scheduled discovery runs
//! on the blocking pool and is applied on the first bar after it finishes.

use crate::config::AppConfig;
use crate::discovery::{
    ActivePair, ActivePairSet, ActiveSetPublisher, DiscoveryCycle, DiscoveryError, Handoff,
    PairCandidate, PairDiscoveryEngine, PairStatus, PriceUniverse,
};
use crate::execution::{ExecutionEngine, OrderDispatcher};
use crate::health::{self, HealthState};
use crate::math::KalmanConfig;
use crate::metrics;
use crate::monitor::{DegradationKind, Monitor, MonitorReport};
use crate::persistence::{restore_kalman, PersistenceError, SnapshotStore};
use crate::portfolio::{EquitySnapshot, TradeRecord};
use crate::strategy::worker::{WorkerContext, WorkerSummary};
use crate::strategy::{
    BackpressurePolicy, PairProcessor, PairWorker, SignalConfig, TickRouter, WorkerCommand,
    WorkerHandle,
};
use crate::types::{PairId, Tick};

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-pair tick queue depth
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
    /// Bars between discovery cycles; 0 runs discovery only on demand
    #[serde(default = "default_rediscover_every")]
    pub rediscover_every: usize,
    /// Trailing observations kept per instrument; 0 keeps everything
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Synchronized updates between Kalman snapshots
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Older Kalman snapshots are ignored on restore
    #[serde(default = "default_max_snapshot_age_secs")]
    pub max_snapshot_age_secs: u64,
    #[serde(default = "default_log_throttle_secs")]
    pub log_throttle_secs: u64,
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_rediscover_every() -> usize {
    252
}
fn default_history_capacity() -> usize {
    1000
}
fn default_snapshot_every() -> u64 {
    100
}
fn default_max_snapshot_age_secs() -> u64 {
    86_400
}
fn default_log_throttle_secs() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            rediscover_every: default_rediscover_every(),
            history_capacity: default_history_capacity(),
            snapshot_every: default_snapshot_every(),
            max_snapshot_age_secs: default_max_snapshot_age_secs(),
            log_throttle_secs: default_log_throttle_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".to_string());
        }
        if self.max_snapshot_age_secs > i64::MAX as u64 {
            return Err("max_snapshot_age_secs out of range".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Discovery task aborted: {0}")]
    Join(String),
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub workers: Vec<WorkerSummary>,
    pub trades: Vec<TradeRecord>,
    pub equity: EquitySnapshot,
    pub monitor: MonitorReport,
    pub discovery_cycles: u64,
    pub discovery_failures: u64,
}

struct RunningWorker {
    handle: WorkerHandle,
    status: PairStatus,
}

type DiscoveryTask = JoinHandle<Result<DiscoveryCycle, DiscoveryError>>;

pub struct Pipeline {
    config: PipelineConfig,
    kalman: KalmanConfig,
    signal: SignalConfig,
    discovery: Arc<PairDiscoveryEngine>,
    publisher: ActiveSetPublisher,
    router: TickRouter,
    engine: Arc<ExecutionEngine>,
    monitor: Arc<Monitor>,
    store: Arc<dyn SnapshotStore>,
    workers: HashMap<(String, String), RunningWorker>,
    /// Pairs that left the active set, still closing or winding down
    retiring: HashMap<(String, String), WorkerHandle>,
    finished: Vec<WorkerSummary>,
    history: PriceUniverse,
    /// Scheduled discovery running on the blocking pool
    pending_discovery: Option<DiscoveryTask>,
    last_bar: Option<i64>,
    bars_since_discovery: usize,
    discovery_cycles: u64,
    discovery_failures: u64,
    health: Option<HealthState>,
    started: Instant,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        dispatcher: Arc<dyn OrderDispatcher>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let AppConfig {
            kalman,
            discovery,
            signal,
            execution,
            risk,
            monitor,
            pipeline,
        } = config;

        Ok(Self {
            discovery: Arc::new(PairDiscoveryEngine::new(discovery)?),
            publisher: ActiveSetPublisher::new(ActivePairSet::empty()),
            router: TickRouter::new(pipeline.backpressure),
            engine: Arc::new(ExecutionEngine::new(execution, risk, dispatcher)),
            monitor: Arc::new(Monitor::new(monitor)),
            store,
            config: pipeline,
            kalman,
            signal,
            workers: HashMap::new(),
            retiring: HashMap::new(),
            finished: Vec::new(),
            history: PriceUniverse::new(),
            pending_discovery: None,
            last_bar: None,
            bars_since_discovery: 0,
            discovery_cycles: 0,
            discovery_failures: 0,
            health: None,
            started: Instant::now(),
        })
    }

    /// Refresh this health state on every bar.
    pub fn with_health(mut self, state: HealthState) -> Self {
        self.health = Some(state);
        self
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn active_set(&self) -> Arc<ActivePairSet> {
        self.publisher.current()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Arc<ActivePairSet>> {
        self.publisher.subscribe()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len() + self.retiring.len()
    }

    /// A scheduled discovery cycle has started and not been applied yet.
    pub fn discovery_in_flight(&self) -> bool {
        self.pending_discovery.is_some()
    }

    /// Preload price history, e.g. bars preceding the live feed.
    pub fn seed_history(&mut self, universe: PriceUniverse) {
        for (instrument, series) in universe {
            let history = self.history.entry(instrument).or_default();
            history.extend(series);
            trim(history, self.config.history_capacity);
        }
    }

    /// Reactivate the pairs and the book persisted by a previous run.
    /// Returns the number of active pairs.
    ///
    /// Saved positions are restored before any worker starts, so each
    /// worker adopts its pair's open side. Positions on pairs missing from
    /// the saved active set get a worker that runs them to their exit and
    /// then stops.
    pub async fn resume(&mut self) -> Result<usize, PipelineError> {
        let positions = self.store.load_positions().await?;
        let saved_equity = self.store.load_equity().await?;
        if saved_equity.is_some() || !positions.is_empty() {
            let equity = match saved_equity {
                Some(equity) => equity,
                None => {
                    warn!("Positions saved without equity, restoring against initial capital");
                    self.engine.snapshot(0).await
                }
            };
            self.engine.restore(&equity, positions.clone()).await;
        }

        let now = Utc::now();
        let pairs: Vec<ActivePair> = self
            .store
            .load_active_pairs()
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|candidate| ActivePair {
                id: candidate.pair.clone(),
                candidate,
                status: PairStatus::Active,
                promoted_at: now,
            })
            .collect();
        let set = ActivePairSet::from_pairs(1, pairs)
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        for pair in set.iter() {
            self.spawn_worker(pair).await;
        }
        let count = set.len();
        metrics::set_active_pairs(count);
        self.publisher.publish(set.clone());

        let orphans: Vec<_> = positions
            .iter()
            .filter(|p| !set.contains(&p.pair))
            .collect();
        for position in &orphans {
            warn!(pair = %position.pair, side = ?position.side, "Open position outside the active set, winding down");
            let key = position.pair.canonical_key();
            let handle = self
                .start_worker(&position.pair, PairStatus::WindingDown, (position.hedge_ratio, 0.0))
                .await;
            handle.send(WorkerCommand::Retire).await;
            self.retiring.insert(key, handle);
        }

        info!(
            pairs = count,
            positions = positions.len(),
            orphans = orphans.len(),
            "Active pairs resumed"
        );
        Ok(count)
    }

    /// Feed one tick. Returns the number of pair queues it reached.
    pub async fn on_tick(&mut self, tick: Tick) -> usize {
        if self.last_bar.map_or(true, |last| tick.timestamp > last) {
            self.on_new_bar(tick.timestamp).await;
        }

        if let Some(price) = tick.price.to_f64() {
            let history = self.history.entry(tick.instrument.clone()).or_default();
            history.push(price);
            trim(history, self.config.history_capacity);
        }

        self.router.route(Arc::new(tick)).await
    }

    async fn on_new_bar(&mut self, timestamp: i64) {
        if self.last_bar.is_some() {
            self.bars_since_discovery += 1;
        }
        self.last_bar = Some(timestamp);
        self.monitor.check_throughput();
        self.reap_retired().await;

        // Apply a finished cycle; never wait on a running one
        if self
            .pending_discovery
            .as_ref()
            .is_some_and(JoinHandle::is_finished)
        {
            if let Some(Err(e)) = self.wait_for_discovery().await {
                warn!(error = %e, "Discovery cycle skipped, keeping previous active set");
            }
        }
        if self.config.rediscover_every > 0
            && self.bars_since_discovery >= self.config.rediscover_every
            && self.pending_discovery.is_none()
        {
            self.pending_discovery = Some(self.start_discovery());
        }

        if let Some(state) = &self.health {
            let equity = self.engine.snapshot(timestamp).await;
            let halted = self.engine.is_halted().await;
            health::update_health(
                state,
                self.started,
                self.publisher.current().len(),
                &equity,
                &self.monitor.report(),
                halted,
            )
            .await;
        }
    }

    /// Run one discovery cycle over the current history and hand off to
    /// the new active set. On failure the previous set stays published.
    #[instrument(skip(self))]
    pub async fn run_discovery(&mut self) -> Result<Handoff, PipelineError> {
        if let Some(Err(e)) = self.wait_for_discovery().await {
            warn!(error = %e, "Scheduled discovery cycle failed");
        }
        let task = self.start_discovery();
        self.finish_discovery(task).await
    }

    /// Wait for the scheduled cycle, if any, and apply it.
    pub async fn wait_for_discovery(&mut self) -> Option<Result<Handoff, PipelineError>> {
        let task = self.pending_discovery.take()?;
        Some(self.finish_discovery(task).await)
    }

    /// Evaluate the universe on the blocking pool against a copy of the
    /// history and the current set.
    fn start_discovery(&mut self) -> DiscoveryTask {
        self.bars_since_discovery = 0;
        self.discovery_cycles += 1;
        let universe = self.history.clone();
        let current = self.publisher.current();
        let engine = self.discovery.clone();
        debug!(instruments = universe.len(), "Discovery cycle started");
        tokio::task::spawn_blocking(move || engine.evaluate(&universe, &current))
    }

    async fn finish_discovery(&mut self, task: DiscoveryTask) -> Result<Handoff, PipelineError> {
        match task.await {
            Ok(Ok(cycle)) => {
                metrics::record_discovery_cycle("ok");
                Ok(self.apply_cycle(&cycle).await)
            }
            Ok(Err(e)) => {
                self.discovery_failed(e.kind(), &e.to_string());
                Err(e.into())
            }
            Err(e) => {
                self.discovery_failed("aborted", &e.to_string());
                Err(PipelineError::Join(e.to_string()))
            }
        }
    }

    fn discovery_failed(&mut self, kind: &str, detail: &str) {
        self.discovery_failures += 1;
        metrics::record_discovery_cycle(kind);
        self.monitor
            .record_degradation(DegradationKind::DiscoveryFailure, None, detail);
    }

    /// Plan against the positions open right now and apply.
    async fn apply_cycle(&mut self, cycle: &DiscoveryCycle) -> Handoff {
        let open = self.engine.open_pair_keys().await;
        let current = self.publisher.current();
        let handoff = cycle.plan(&current, |pair: &PairId| open.contains(&pair.canonical_key()));
        self.apply_handoff(&handoff).await;
        handoff
    }

    async fn apply_handoff(&mut self, handoff: &Handoff) {
        let next = handoff.next.clone();
        self.publisher.publish(next.clone());
        metrics::set_active_pairs(next.len());

        let candidates: Vec<PairCandidate> = next.iter().map(|p| p.candidate.clone()).collect();
        if let Err(e) = self.store.save_active_pairs(&candidates).await {
            warn!(error = %e, "Failed to persist active pairs");
        }

        for pair in &handoff.demoted {
            self.retire(pair, WorkerCommand::Flatten).await;
        }
        // Flat when planned, but a position may have opened since
        for pair in &handoff.dropped {
            self.retire(pair, WorkerCommand::Retire).await;
        }

        for pair in next.iter() {
            let key = pair.id.canonical_key();
            match self.workers.get_mut(&key) {
                Some(running) if running.status != pair.status => {
                    running.status = pair.status;
                    running.handle.send(WorkerCommand::SetStatus(pair.status)).await;
                }
                Some(_) => {}
                None => self.spawn_worker(pair).await,
            }
        }

        info!(
            generation = next.generation(),
            workers = self.workers.len(),
            retiring = self.retiring.len(),
            "Active set handed off"
        );
    }

    async fn spawn_worker(&mut self, pair: &ActivePair) {
        let handle = self
            .start_worker(
                &pair.id,
                pair.status,
                (pair.candidate.hedge_ratio, pair.candidate.intercept),
            )
            .await;
        info!(pair = %pair.id, score = pair.candidate.score, beta = pair.candidate.hedge_ratio, "Pair worker spawned");
        self.workers.insert(
            pair.id.canonical_key(),
            RunningWorker {
                handle,
                status: pair.status,
            },
        );
    }

    /// Start a routed worker for `id` seeded with `(beta, intercept)`
    /// unless a usable Kalman snapshot exists.
    async fn start_worker(
        &mut self,
        id: &PairId,
        status: PairStatus,
        (prior_beta, prior_intercept): (f64, f64),
    ) -> WorkerHandle {
        if let Some(previous) = self.retiring.remove(&id.canonical_key()) {
            // The new worker adopts any position the old one still holds
            previous.send(WorkerCommand::Shutdown).await;
            self.router.remove_pair(&previous.pair);
            if let Some(summary) = previous.join().await {
                self.finished.push(summary);
            }
        }

        let max_age = chrono::Duration::seconds(self.config.max_snapshot_age_secs as i64);
        let kalman = restore_kalman(
            self.store.as_ref(),
            id,
            self.kalman.clone(),
            prior_beta,
            prior_intercept,
            max_age,
        )
        .await;

        let mut processor = PairProcessor::new(id.clone(), kalman, self.signal.clone());
        processor.set_status(status);
        if let Some(position) = self.engine.position(id).await {
            processor.force_state(position.side);
        }

        let ctx = WorkerContext {
            engine: self.engine.clone(),
            monitor: self.monitor.clone(),
            store: self.store.clone(),
            snapshot_every: self.config.snapshot_every,
            log_throttle_secs: self.config.log_throttle_secs,
        };
        let handle = PairWorker::new(processor, ctx).spawn(self.config.queue_capacity);
        self.router.register_pair(id, handle.ticks.clone());
        handle
    }

    /// Take a pair out of service. Routing stays in place until the worker
    /// stops, so it can still exit on live prices.
    async fn retire(&mut self, pair: &PairId, command: WorkerCommand) {
        let key = pair.canonical_key();
        let Some(running) = self.workers.remove(&key) else {
            return;
        };
        info!(pair = %pair, ?command, "Retiring pair");
        if !running.handle.send(command).await {
            warn!(pair = %pair, "Worker already stopped");
        }
        self.retiring.insert(key, running.handle);
    }

    async fn reap_retired(&mut self) {
        let done: Vec<(String, String)> = self
            .retiring
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        for key in done {
            if let Some(handle) = self.retiring.remove(&key) {
                self.router.remove_pair(&handle.pair);
                if let Some(summary) = handle.join().await {
                    self.finished.push(summary);
                }
            }
        }
    }

    /// Stop every worker after it drains its queue and persist the book.
    /// Open positions are left open.
    pub async fn shutdown(self) -> Result<PipelineReport, PipelineError> {
        self.stop(WorkerCommand::Shutdown).await
    }

    /// Like [`Pipeline::shutdown`], but every worker closes its position at
    /// the last synchronized prices before it stops.
    pub async fn close_out(self) -> Result<PipelineReport, PipelineError> {
        self.stop(WorkerCommand::CloseOut).await
    }

    async fn stop(mut self, command: WorkerCommand) -> Result<PipelineReport, PipelineError> {
        if self.pending_discovery.take().is_some() {
            info!("Pending discovery cycle discarded");
        }

        let handles: Vec<WorkerHandle> = self
            .workers
            .drain()
            .map(|(_, running)| running.handle)
            .chain(self.retiring.drain().map(|(_, handle)| handle))
            .collect();

        for handle in &handles {
            handle.send(command).await;
        }
        for handle in handles {
            self.router.remove_pair(&handle.pair);
            match handle.join().await {
                Some(summary) => self.finished.push(summary),
                None => error!("Worker lost during shutdown"),
            }
        }

        let timestamp = self.last_bar.unwrap_or_default();
        let equity = self.engine.snapshot(timestamp).await;
        let positions = self.engine.positions().await;
        self.store.save_positions(&positions).await?;
        self.store.save_equity(&equity).await?;
        self.monitor.record_equity(&equity);

        info!(
            equity = %equity.equity,
            drawdown = equity.drawdown,
            open_positions = positions.len(),
            ?command,
            "Pipeline stopped"
        );

        Ok(PipelineReport {
            workers: self.finished,
            trades: self.engine.trades().await,
            equity,
            monitor: self.monitor.report(),
            discovery_cycles: self.discovery_cycles,
            discovery_failures: self.discovery_failures,
        })
    }
}

fn trim(history: &mut Vec<f64>, capacity: usize) {
    if capacity > 0 && history.len() > capacity {
        let excess = history.len() - capacity;
        history.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PaperDispatcher;
    use crate::persistence::MemoryStore;
    use crate::portfolio::ExitReason;
    use crate::sandbox::{SyntheticConfig, SyntheticUniverse};
    use crate::strategy::{Signal, SignalKind};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.discovery.min_half_life = 1.0;
        config.discovery.max_half_life = 100.0;
        config.pipeline.rediscover_every = 0;
        config.pipeline.history_capacity = 0;
        config
    }

    fn pipeline_with(config: AppConfig, store: Arc<MemoryStore>) -> Pipeline {
        let dispatcher = Arc::new(PaperDispatcher::new(config.execution.cost_model()));
        Pipeline::new(config, dispatcher, store).unwrap()
    }

    fn pipeline(store: Arc<MemoryStore>) -> Pipeline {
        pipeline_with(config(), store)
    }

    fn universe() -> SyntheticUniverse {
        SyntheticUniverse::generate(&SyntheticConfig {
            cointegrated_pairs: 1,
            noise_instruments: 4,
            length: 1500,
            seed: 21,
            base_price_range: (100.0, 200.0),
            spread_std: 0.5,
            noise_std: 0.2,
            ..Default::default()
        })
    }

    fn planted() -> PairId {
        PairId::new("CI00_A", "CI00_B")
    }

    /// A cycle that no longer ranks `pair` but finds it still cointegrated.
    fn unranked_cycle(pair: &PairId) -> DiscoveryCycle {
        DiscoveryCycle {
            selected: Vec::new(),
            retests: HashMap::from([(pair.canonical_key(), Some(true))]),
            max_active_pairs: 20,
        }
    }

    fn entry(pair: &PairId) -> Signal {
        Signal {
            pair: pair.clone(),
            kind: SignalKind::LongSpread,
            z_score: -2.5,
            confidence: 1.0,
            hedge_ratio: 1.0,
            dependent_price: dec!(150),
            independent_price: dec!(120),
            timestamp: 5_000,
        }
    }

    #[test]
    fn test_trim_keeps_tail() {
        let mut history: Vec<f64> = (0..10).map(f64::from).collect();
        trim(&mut history, 3);
        assert_eq!(history, vec![7.0, 8.0, 9.0]);
        trim(&mut history, 0);
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_discovery_keeps_previous_set() {
        let store = Arc::new(MemoryStore::new());
        let mut pipeline = pipeline(store);
        let mut short = PriceUniverse::new();
        short.insert("A".to_string(), vec![100.0; 10]);
        short.insert("B".to_string(), vec![50.0; 10]);
        pipeline.seed_history(short);

        let err = pipeline.run_discovery().await.unwrap_err();
        assert!(matches!(err, PipelineError::Discovery(_)));
        assert!(pipeline.active_set().is_empty());

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.discovery_cycles, 1);
        assert_eq!(report.discovery_failures, 1);
        assert_eq!(report.equity.equity, dec!(10000000));
    }

    #[tokio::test]
    async fn test_discovery_spawns_worker_and_routes_ticks() {
        let store = Arc::new(MemoryStore::new());
        let mut pipeline = pipeline(store.clone());
        pipeline.seed_history(universe().histories());

        let handoff = pipeline.run_discovery().await.unwrap();
        let planted = planted();
        assert!(handoff.promoted.contains(&planted));
        assert!(pipeline.active_set().contains(&planted));
        assert!(store.load_active_pairs().await.unwrap().is_some());

        let delivered = pipeline
            .on_tick(Tick::new("CI00_A", 1_000_000, Decimal::from(150)))
            .await;
        assert!(delivered >= 1);

        let report = pipeline.shutdown().await.unwrap();
        assert!(report.workers.iter().any(|w| w.pair == planted && w.ticks == 1));
        assert!(store.load_kalman(&planted).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scheduled_discovery_runs_off_the_tick_path() {
        let mut config = config();
        config.pipeline.rediscover_every = 5;
        let mut pipeline = pipeline_with(config, Arc::new(MemoryStore::new()));
        let universe = universe();
        pipeline.seed_history(universe.head(1400));

        // Six bars: the first tick of the sixth schedules the cycle
        for tick in universe.ticks(1400..1406) {
            pipeline.on_tick(tick).await;
        }
        assert!(pipeline.discovery_in_flight());
        assert!(pipeline.active_set().is_empty());
        assert_eq!(pipeline.worker_count(), 0);

        let handoff = pipeline
            .wait_for_discovery()
            .await
            .expect("cycle scheduled")
            .unwrap();
        assert!(handoff.promoted.contains(&planted()));
        assert!(!pipeline.discovery_in_flight());
        assert!(pipeline.active_set().contains(&planted()));
        assert!(pipeline.wait_for_discovery().await.is_none());

        let report = pipeline.shutdown().await.unwrap();
        assert_eq!(report.discovery_cycles, 1);
        assert_eq!(report.discovery_failures, 0);
    }

    #[tokio::test]
    async fn test_position_opened_after_evaluation_is_retained() {
        let mut pipeline = pipeline(Arc::new(MemoryStore::new()));
        pipeline.seed_history(universe().histories());
        pipeline.run_discovery().await.unwrap();
        let planted = planted();

        // Evaluated while flat; a position opens before the handoff applies
        let cycle = unranked_cycle(&planted);
        let engine = pipeline.engine().clone();
        assert!(matches!(
            engine.execute(&entry(&planted), std::time::Instant::now()).await,
            crate::execution::ExecutionOutcome::Filled(_)
        ));

        let handoff = pipeline.apply_cycle(&cycle).await;
        assert_eq!(handoff.retained, vec![planted.clone()]);
        assert!(!handoff.dropped.contains(&planted));
        assert_eq!(
            pipeline.active_set().get(&planted).map(|p| p.status),
            Some(PairStatus::WindingDown)
        );
        assert!(engine.has_position(&planted).await);

        let report = pipeline.shutdown().await.unwrap();
        assert!(report.trades.is_empty());
        assert_eq!(report.equity.open_positions, 1);
    }

    #[tokio::test]
    async fn test_dropped_pair_retires_without_forced_close() {
        let mut pipeline = pipeline(Arc::new(MemoryStore::new()));
        pipeline.seed_history(universe().histories());
        pipeline.run_discovery().await.unwrap();
        let planted = planted();

        let handoff = pipeline.apply_cycle(&unranked_cycle(&planted)).await;
        assert!(handoff.dropped.contains(&planted));
        assert!(handoff.demoted.is_empty());
        assert!(!pipeline.active_set().contains(&planted));
        assert!(pipeline.retiring.contains_key(&planted.canonical_key()));

        // Flat, so the worker stops on its own and is reaped on the next bar
        for _ in 0..100 {
            if pipeline.retiring.values().all(WorkerHandle::is_finished) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        pipeline
            .on_tick(Tick::new("CI00_A", 1_000_000, Decimal::from(150)))
            .await;
        assert_eq!(pipeline.worker_count(), 0);

        let report = pipeline.shutdown().await.unwrap();
        assert!(report
            .trades
            .iter()
            .all(|t| t.reason != ExitReason::Demotion));
        assert!(report.workers.iter().any(|w| w.pair == planted && w.signals == 0));
    }

    #[tokio::test]
    async fn test_resume_restores_book_and_winds_down_orphans() {
        let store = Arc::new(MemoryStore::new());
        let orphan = PairId::new("OLD_A", "OLD_B");
        {
            let pipeline = pipeline(store.clone());
            let outcome = pipeline
                .engine()
                .execute(&entry(&orphan), std::time::Instant::now())
                .await;
            assert!(matches!(
                outcome,
                crate::execution::ExecutionOutcome::Filled(_)
            ));
            pipeline.shutdown().await.unwrap();
        }
        let saved = store.equity().expect("equity saved");
        assert_eq!(saved.open_positions, 1);

        let mut pipeline = pipeline(store.clone());
        assert_eq!(pipeline.resume().await.unwrap(), 0);
        assert_eq!(pipeline.engine().snapshot(saved.timestamp).await, saved);
        assert!(pipeline.engine().has_position(&orphan).await);
        assert_eq!(pipeline.worker_count(), 1);

        let report = pipeline.shutdown().await.unwrap();
        let worker = report
            .workers
            .iter()
            .find(|w| w.pair == orphan)
            .expect("orphan worker");
        assert_eq!(worker.final_state, crate::types::SpreadSide::LongSpread);
        assert_eq!(report.equity.cash, saved.cash);
    }
}
