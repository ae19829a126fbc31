//! Read-only observer of the trading path.
//!
//! Collects processing and signal-to-order latency, throughput and
//! drawdown, raises degradation events on configured thresholds and keeps a
//! bounded audit log of recent signals. Nothing here feeds back into
//! trading decisions.

pub mod latency;

pub use latency::{LatencyStats, LatencySummary};

use crate::metrics;
use crate::portfolio::EquitySnapshot;
use crate::strategy::Signal;
use crate::types::PairId;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_latency_alert_ms")]
    pub latency_alert_ms: u64,
    #[serde(default = "default_drawdown_alert_pct")]
    pub drawdown_alert_pct: f64,
    /// Minimum ticks/sec over a window; 0 disables the check
    #[serde(default)]
    pub min_throughput_tps: f64,
    #[serde(default = "default_throughput_window_secs")]
    pub throughput_window_secs: u64,
    /// Samples kept for avg/p95
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_latency_alert_ms() -> u64 {
    100
}
fn default_drawdown_alert_pct() -> f64 {
    0.10
}
fn default_throughput_window_secs() -> u64 {
    5
}
fn default_latency_window() -> usize {
    4096
}
fn default_audit_capacity() -> usize {
    1000
}
fn default_event_capacity() -> usize {
    256
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency_alert_ms: default_latency_alert_ms(),
            drawdown_alert_pct: default_drawdown_alert_pct(),
            min_throughput_tps: 0.0,
            throughput_window_secs: default_throughput_window_secs(),
            latency_window: default_latency_window(),
            audit_capacity: default_audit_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.latency_alert_ms == 0 {
            return Err("latency_alert_ms must be positive".to_string());
        }
        if !(self.drawdown_alert_pct > 0.0 && self.drawdown_alert_pct <= 1.0) {
            return Err("drawdown_alert_pct must be in (0, 1]".to_string());
        }
        if self.min_throughput_tps < 0.0 {
            return Err("min_throughput_tps cannot be negative".to_string());
        }
        if self.throughput_window_secs == 0 {
            return Err("throughput_window_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationKind {
    TickLatency,
    SignalToOrderLatency,
    Throughput,
    Drawdown,
    KalmanReset,
    DataGap,
    DiscoveryFailure,
    ExecutionFailure,
}

impl DegradationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DegradationKind::TickLatency => "tick_latency",
            DegradationKind::SignalToOrderLatency => "signal_to_order_latency",
            DegradationKind::Throughput => "throughput",
            DegradationKind::Drawdown => "drawdown",
            DegradationKind::KalmanReset => "kalman_reset",
            DegradationKind::DataGap => "data_gap",
            DegradationKind::DiscoveryFailure => "discovery_failure",
            DegradationKind::ExecutionFailure => "execution_failure",
        }
    }
}

impl fmt::Display for DegradationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationEvent {
    pub kind: DegradationKind,
    pub pair: Option<PairId>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of everything the monitor aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub ticks: u64,
    pub throughput_tps: f64,
    pub tick_latency: LatencySummary,
    pub signal_to_order: LatencySummary,
    pub signals: u64,
    pub drawdown: f64,
    pub max_drawdown: f64,
    pub degradation_events: u64,
}

#[derive(Debug)]
struct MonitorState {
    tick_latency: LatencyStats,
    signal_to_order: LatencyStats,
    ticks: u64,
    window_ticks: u64,
    window_started: Instant,
    throughput_tps: f64,
    signals: u64,
    drawdown: f64,
    max_drawdown: f64,
    drawdown_alerting: bool,
    degradation_count: u64,
    events: VecDeque<DegradationEvent>,
    audit: VecDeque<Signal>,
}

#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let state = MonitorState {
            tick_latency: LatencyStats::new(config.latency_window),
            signal_to_order: LatencyStats::new(config.latency_window),
            ticks: 0,
            window_ticks: 0,
            window_started: Instant::now(),
            throughput_tps: 0.0,
            signals: 0,
            drawdown: 0.0,
            max_drawdown: 0.0,
            drawdown_alerting: false,
            degradation_count: 0,
            events: VecDeque::with_capacity(config.event_capacity),
            audit: VecDeque::with_capacity(config.audit_capacity),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        // A panicked writer leaves plain counters behind; keep observing
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn latency_alert(&self) -> Duration {
        Duration::from_millis(self.config.latency_alert_ms)
    }

    /// One tick processed by a pair worker.
    pub fn record_tick(&self, pair: &PairId, latency: Duration) {
        metrics::record_tick_latency(latency.as_secs_f64());
        let mut state = self.lock();
        state.tick_latency.record(latency);
        state.ticks += 1;
        state.window_ticks += 1;
        if latency > self.latency_alert() {
            self.push_event(
                &mut state,
                DegradationKind::TickLatency,
                Some(pair.clone()),
                format!("tick processed in {latency:?}"),
            );
        }
        self.roll_window(&mut state, Instant::now());
    }

    pub fn record_signal(&self, signal: &Signal) {
        metrics::record_signal(signal.kind.as_str());
        let mut state = self.lock();
        state.signals += 1;
        if state.audit.len() >= self.config.audit_capacity.max(1) {
            state.audit.pop_front();
        }
        state.audit.push_back(signal.clone());
    }

    pub fn record_signal_to_order(&self, pair: &PairId, latency: Duration) {
        let mut state = self.lock();
        state.signal_to_order.record(latency);
        if latency > self.latency_alert() {
            self.push_event(
                &mut state,
                DegradationKind::SignalToOrderLatency,
                Some(pair.clone()),
                format!("signal to order took {latency:?}"),
            );
        }
    }

    /// Track drawdown; alerts once per excursion above the threshold.
    pub fn record_equity(&self, snapshot: &EquitySnapshot) {
        let mut state = self.lock();
        state.drawdown = snapshot.drawdown;
        state.max_drawdown = state.max_drawdown.max(snapshot.drawdown);

        let breached = snapshot.drawdown >= self.config.drawdown_alert_pct;
        if breached && !state.drawdown_alerting {
            state.drawdown_alerting = true;
            self.push_event(
                &mut state,
                DegradationKind::Drawdown,
                None,
                format!("drawdown {:.2}% at equity {}", snapshot.drawdown * 100.0, snapshot.equity),
            );
        } else if !breached {
            state.drawdown_alerting = false;
        }
    }

    pub fn record_degradation(&self, kind: DegradationKind, pair: Option<&PairId>, detail: impl Into<String>) {
        let mut state = self.lock();
        self.push_event(&mut state, kind, pair.cloned(), detail.into());
    }

    /// Close the throughput window if it has elapsed. Call periodically so
    /// a stalled feed is noticed even when no ticks arrive.
    pub fn check_throughput(&self) {
        let mut state = self.lock();
        self.roll_window(&mut state, Instant::now());
    }

    fn roll_window(&self, state: &mut MonitorState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.window_started);
        if elapsed < Duration::from_secs(self.config.throughput_window_secs) {
            return;
        }
        let tps = state.window_ticks as f64 / elapsed.as_secs_f64();
        state.throughput_tps = tps;
        state.window_ticks = 0;
        state.window_started = now;

        if self.config.min_throughput_tps > 0.0 && tps < self.config.min_throughput_tps {
            self.push_event(
                state,
                DegradationKind::Throughput,
                None,
                format!(
                    "{tps:.1} ticks/s below minimum {:.1}",
                    self.config.min_throughput_tps
                ),
            );
        }
    }

    fn push_event(
        &self,
        state: &mut MonitorState,
        kind: DegradationKind,
        pair: Option<PairId>,
        detail: String,
    ) {
        metrics::record_degradation(kind.as_str());
        warn!(kind = %kind, pair = ?pair.as_ref().map(ToString::to_string), detail = %detail, "Degradation event");
        state.degradation_count += 1;
        if state.events.len() >= self.config.event_capacity.max(1) {
            state.events.pop_front();
        }
        state.events.push_back(DegradationEvent {
            kind,
            pair,
            detail,
            at: Utc::now(),
        });
    }

    pub fn events(&self) -> Vec<DegradationEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Most recent signals, oldest first.
    pub fn recent_signals(&self, limit: usize) -> Vec<Signal> {
        let state = self.lock();
        let skip = state.audit.len().saturating_sub(limit);
        state.audit.iter().skip(skip).cloned().collect()
    }

    pub fn report(&self) -> MonitorReport {
        let state = self.lock();
        MonitorReport {
            ticks: state.ticks,
            throughput_tps: state.throughput_tps,
            tick_latency: state.tick_latency.summary(),
            signal_to_order: state.signal_to_order.summary(),
            signals: state.signals,
            drawdown: state.drawdown,
            max_drawdown: state.max_drawdown,
            degradation_events: state.degradation_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SignalKind;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(drawdown: f64) -> EquitySnapshot {
        EquitySnapshot {
            timestamp: 0,
            equity: dec!(100),
            cash: dec!(100),
            unrealized: Decimal::ZERO,
            drawdown,
            open_positions: 0,
            high_water_mark: dec!(100),
        }
    }

    fn signal(i: i64) -> Signal {
        Signal {
            pair: PairId::new("A", "B"),
            kind: SignalKind::Exit,
            z_score: 0.1,
            confidence: 0.8,
            hedge_ratio: 1.0,
            dependent_price: dec!(1),
            independent_price: dec!(1),
            timestamp: i,
        }
    }

    #[test]
    fn test_latency_alert_raises_event() {
        let monitor = Monitor::new(MonitorConfig::default());
        let pair = PairId::new("A", "B");
        monitor.record_tick(&pair, Duration::from_micros(20));
        assert!(monitor.events().is_empty());

        monitor.record_tick(&pair, Duration::from_millis(150));
        let events = monitor.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DegradationKind::TickLatency);
        assert_eq!(monitor.report().ticks, 2);
    }

    #[test]
    fn test_drawdown_alert_once_per_excursion() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.record_equity(&snapshot(0.11));
        monitor.record_equity(&snapshot(0.12));
        monitor.record_equity(&snapshot(0.05));
        monitor.record_equity(&snapshot(0.10));
        let kinds: Vec<_> = monitor.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![DegradationKind::Drawdown, DegradationKind::Drawdown]);
        assert!((monitor.report().max_drawdown - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_throughput_below_minimum() {
        let monitor = Monitor::new(MonitorConfig {
            min_throughput_tps: 1000.0,
            throughput_window_secs: 1,
            ..Default::default()
        });
        {
            let mut state = monitor.lock();
            state.window_ticks = 10;
            let later = state.window_started + Duration::from_secs(2);
            monitor.roll_window(&mut state, later);
            assert!((state.throughput_tps - 5.0).abs() < 1e-9);
        }
        assert_eq!(monitor.events()[0].kind, DegradationKind::Throughput);
    }

    #[test]
    fn test_audit_log_is_bounded() {
        let monitor = Monitor::new(MonitorConfig {
            audit_capacity: 3,
            ..Default::default()
        });
        for i in 0..5 {
            monitor.record_signal(&signal(i));
        }
        let recent = monitor.recent_signals(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, 2);
        assert_eq!(monitor.recent_signals(1)[0].timestamp, 4);
        assert_eq!(monitor.report().signals, 5);
    }
}
