//! One task per active pair.
//!
//! A worker owns its pair's `PairProcessor` exclusively: ticks arrive on a
//! bounded queue fed by the `TickRouter`, control commands on a separate
//! channel. Signals go to the shared `ExecutionEngine`, which serializes
//! every portfolio mutation behind its own lock.

use super::processor::{DataGap, PairProcessor, TickOutcome};
use super::Signal;
use crate::discovery::PairStatus;
use crate::execution::{ExecutionEngine, ExecutionOutcome, SkipReason};
use crate::logging::PairLogThrottler;
use crate::math::KalmanError;
use crate::metrics;
use crate::monitor::{DegradationKind, Monitor};
use crate::persistence::{KalmanSnapshot, SnapshotStore};
use crate::types::{PairId, SpreadSide, Tick};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

const CONTROL_CAPACITY: usize = 16;

/// Control messages from the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    SetStatus(PairStatus),
    /// Stop taking entries; stop once the pair is flat. Open positions run
    /// to their normal exit or stop.
    Retire,
    /// Close any open position at market, then stop
    Flatten,
    /// Drain queued ticks and stop; positions stay open
    Shutdown,
    /// Drain queued ticks, close any open position at market, then stop
    CloseOut,
}

/// Shared services every worker talks to.
#[derive(Clone)]
pub struct WorkerContext {
    pub engine: Arc<ExecutionEngine>,
    pub monitor: Arc<Monitor>,
    pub store: Arc<dyn SnapshotStore>,
    /// Synchronized updates between Kalman snapshots; 0 saves only on exit
    pub snapshot_every: u64,
    pub log_throttle_secs: u64,
}

/// What a worker did before it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSummary {
    pub pair: PairId,
    pub ticks: u64,
    pub updates: u64,
    pub signals: u64,
    pub final_state: SpreadSide,
}

/// Pipeline-side handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub pair: PairId,
    pub ticks: mpsc::Sender<Arc<Tick>>,
    control: mpsc::Sender<WorkerCommand>,
    join: JoinHandle<WorkerSummary>,
}

impl WorkerHandle {
    /// Deliver a command; false when the worker has already stopped.
    pub async fn send(&self, command: WorkerCommand) -> bool {
        self.control.send(command).await.is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker to stop.
    pub async fn join(self) -> Option<WorkerSummary> {
        match self.join.await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(pair = %self.pair, error = %e, "Pair worker panicked");
                None
            }
        }
    }
}

pub struct PairWorker {
    processor: PairProcessor,
    ctx: WorkerContext,
    throttle: PairLogThrottler,
    updates_since_snapshot: u64,
    flatten_pending: bool,
    retire_pending: bool,
    summary: WorkerSummary,
}

impl PairWorker {
    pub fn new(processor: PairProcessor, ctx: WorkerContext) -> Self {
        let summary = WorkerSummary {
            pair: processor.pair().clone(),
            ticks: 0,
            updates: 0,
            signals: 0,
            final_state: processor.state(),
        };
        Self {
            throttle: PairLogThrottler::new(ctx.log_throttle_secs),
            processor,
            ctx,
            updates_since_snapshot: 0,
            flatten_pending: false,
            retire_pending: false,
            summary,
        }
    }

    /// Start the worker on the runtime with a tick queue of `queue_capacity`.
    pub fn spawn(self, queue_capacity: usize) -> WorkerHandle {
        let pair = self.processor.pair().clone();
        let (tick_tx, tick_rx) = mpsc::channel(queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let span = info_span!("pair_worker", pair = %pair);
        let join = tokio::spawn(self.run(tick_rx, control_rx).instrument(span));
        WorkerHandle {
            pair,
            ticks: tick_tx,
            control: control_tx,
            join,
        }
    }

    pub async fn run(
        mut self,
        mut ticks: mpsc::Receiver<Arc<Tick>>,
        mut control: mpsc::Receiver<WorkerCommand>,
    ) -> WorkerSummary {
        info!(state = ?self.processor.state(), "Pair worker started");

        loop {
            tokio::select! {
                biased;

                command = control.recv() => match command {
                    Some(WorkerCommand::SetStatus(status)) => {
                        if status != self.processor.status() {
                            info!(?status, "Pair status changed");
                            self.processor.set_status(status);
                        }
                    }
                    Some(WorkerCommand::Retire) => {
                        self.processor.set_status(PairStatus::WindingDown);
                        self.retire_pending = true;
                        if self.is_flat().await {
                            break;
                        }
                        info!(state = ?self.processor.state(), "Retiring once flat");
                    }
                    Some(WorkerCommand::Flatten) => {
                        self.processor.set_status(PairStatus::WindingDown);
                        self.flatten_pending = true;
                        if self.try_flatten().await {
                            break;
                        }
                    }
                    Some(WorkerCommand::Shutdown) | None => {
                        self.drain(&mut ticks).await;
                        break;
                    }
                    Some(WorkerCommand::CloseOut) => {
                        self.drain(&mut ticks).await;
                        self.processor.set_status(PairStatus::WindingDown);
                        if !self.try_flatten().await {
                            error!("Close-out left a position open");
                        }
                        break;
                    }
                },

                tick = ticks.recv() => match tick {
                    Some(tick) => {
                        self.handle_tick(&tick).await;
                        if self.flatten_pending && self.try_flatten().await {
                            break;
                        }
                        if self.retire_pending && self.is_flat().await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.save_snapshot().await;
        self.summary.final_state = self.processor.state();
        info!(
            ticks = self.summary.ticks,
            signals = self.summary.signals,
            state = ?self.summary.final_state,
            "Pair worker stopped"
        );
        self.summary
    }

    async fn drain(&mut self, ticks: &mut mpsc::Receiver<Arc<Tick>>) {
        ticks.close();
        while let Some(tick) = ticks.recv().await {
            self.handle_tick(&tick).await;
        }
    }

    /// Neither the state machine nor the book holds a position.
    async fn is_flat(&self) -> bool {
        !self.processor.state().is_open()
            && !self.ctx.engine.has_position(self.processor.pair()).await
    }

    async fn handle_tick(&mut self, tick: &Tick) {
        let started = Instant::now();
        self.summary.ticks += 1;

        // Ingestion to signal; execution is timed separately
        let outcome = self.processor.on_tick(tick);
        self.ctx
            .monitor
            .record_tick(self.processor.pair(), started.elapsed());

        match outcome {
            TickOutcome::Pending | TickOutcome::Foreign => {}
            TickOutcome::Gap(gap) => self.on_gap(gap),
            TickOutcome::Rejected(e) => self.on_rejected(e),
            TickOutcome::Updated { update, signal } => {
                self.summary.updates += 1;
                self.updates_since_snapshot += 1;
                if update.recovered {
                    info!(beta = update.beta, "Hedge ratio estimator recovered");
                }

                match signal {
                    Some(signal) => self.on_signal(signal).await,
                    None if self.processor.state().is_open() => self.mark().await,
                    None => {}
                }

                if self.ctx.snapshot_every > 0
                    && self.updates_since_snapshot >= self.ctx.snapshot_every
                {
                    self.save_snapshot().await;
                }
            }
        }
    }

    fn on_gap(&mut self, gap: DataGap) {
        let pair = self.processor.pair().clone();
        // Gaps can arrive on every tick of a broken feed; events share the log throttle
        if self.throttle.data_gap.should_log() {
            let suppressed = self.throttle.data_gap.get_and_reset_suppressed_count();
            debug!(?gap, suppressed, "Data gap, holding last state");
            self.ctx.monitor.record_degradation(
                DegradationKind::DataGap,
                Some(&pair),
                format!("{gap:?} ({suppressed} suppressed)"),
            );
        }
    }

    fn on_rejected(&mut self, error: KalmanError) {
        let pair = self.processor.pair().clone();
        if matches!(error, KalmanError::NumericInstability(_)) {
            metrics::record_kalman_reset(&pair.to_string());
            self.ctx.monitor.record_degradation(
                DegradationKind::KalmanReset,
                Some(&pair),
                error.to_string(),
            );
        }
        if self.throttle.degraded.should_log() {
            let suppressed = self.throttle.degraded.get_and_reset_suppressed_count();
            warn!(error = %error, suppressed, "Kalman update rejected");
        }
    }

    async fn on_signal(&mut self, signal: Signal) {
        let emitted_at = Instant::now();
        self.emit(&signal).await;

        match self.ctx.engine.execute(&signal, emitted_at).await {
            ExecutionOutcome::Filled(report) => {
                self.ctx
                    .monitor
                    .record_signal_to_order(&signal.pair, report.signal_to_order);
                if let Some(trade) = &report.trade {
                    info!(
                        pnl = %trade.pnl,
                        reason = %trade.reason,
                        holding_ms = trade.holding_ms(),
                        "Position closed"
                    );
                }
                let snapshot = self.ctx.engine.snapshot(signal.timestamp).await;
                self.ctx.monitor.record_equity(&snapshot);
            }
            ExecutionOutcome::Rejected(reason) => {
                self.processor.revert_last_transition();
                if self.throttle.rejection.should_log() {
                    let suppressed = self.throttle.rejection.get_and_reset_suppressed_count();
                    info!(reason = reason.code(), suppressed, "Signal dropped by risk manager");
                }
            }
            ExecutionOutcome::Failed(e) => {
                self.processor.revert_last_transition();
                error!(error = %e, kind = %signal.kind, "Execution failed");
                self.ctx.monitor.record_degradation(
                    DegradationKind::ExecutionFailure,
                    Some(&signal.pair),
                    e.to_string(),
                );
            }
            ExecutionOutcome::Skipped(SkipReason::NoPosition) => {
                // The book is flat; follow it
                self.processor.force_state(SpreadSide::Flat);
            }
            ExecutionOutcome::Skipped(reason) => {
                self.processor.revert_last_transition();
                debug!(?reason, "Signal skipped");
            }
        }
    }

    async fn emit(&mut self, signal: &Signal) {
        self.summary.signals += 1;
        info!(
            kind = %signal.kind,
            z = signal.z_score,
            beta = signal.hedge_ratio,
            confidence = signal.confidence,
            "Signal"
        );
        self.ctx.monitor.record_signal(signal);
        if let Err(e) = self.ctx.store.append_signal(signal).await {
            warn!(error = %e, "Failed to persist signal");
        }
    }

    async fn mark(&mut self) {
        let Some((timestamp, dependent, independent)) = self.processor.last_prices() else {
            return;
        };
        let snapshot = self
            .ctx
            .engine
            .mark(self.processor.pair(), dependent, independent, timestamp)
            .await;
        self.ctx.monitor.record_equity(&snapshot);
    }

    /// Close the pair's position at market. True once the book holds no
    /// position for this pair.
    #[instrument(skip(self))]
    async fn try_flatten(&mut self) -> bool {
        let pair = self.processor.pair().clone();
        let Some(position) = self.ctx.engine.position(&pair).await else {
            self.processor.force_state(SpreadSide::Flat);
            return true;
        };
        if !self.processor.state().is_open() {
            self.processor.force_state(position.side);
        }

        let Some(signal) = self.processor.flatten_signal() else {
            debug!("No synchronized prices yet, flatten deferred");
            return false;
        };
        self.emit(&signal).await;

        match self.ctx.engine.execute(&signal, Instant::now()).await {
            ExecutionOutcome::Filled(report) => {
                self.ctx
                    .monitor
                    .record_signal_to_order(&pair, report.signal_to_order);
                let snapshot = self.ctx.engine.snapshot(signal.timestamp).await;
                self.ctx.monitor.record_equity(&snapshot);
                info!("Position force-closed");
                true
            }
            ExecutionOutcome::Skipped(SkipReason::NoPosition) => {
                self.processor.force_state(SpreadSide::Flat);
                true
            }
            outcome => {
                self.processor.revert_last_transition();
                error!(?outcome, "Flatten failed, retrying on next tick");
                false
            }
        }
    }

    async fn save_snapshot(&mut self) {
        self.updates_since_snapshot = 0;
        let snapshot = KalmanSnapshot::new(
            self.processor.pair().clone(),
            self.processor.kalman().state().clone(),
        );
        if let Err(e) = self.ctx.store.save_kalman(&snapshot).await {
            warn!(error = %e, "Failed to persist Kalman snapshot");
        }
    }
}
