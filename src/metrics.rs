//! Prometheus Metrics Module
//!
//! Pre-registered metrics for production observability.
//! All metrics use lock-free atomics for minimal hot-path overhead.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_gauge, register_histogram, register_int_counter_vec, register_int_gauge,
    Encoder, Gauge, Histogram, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // --- Market Data Metrics ---

    /// Ticks delivered to pair queues
    pub static ref TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_ticks_total", "Ticks delivered to pair workers"),
        &["instrument"]
    ).expect("FATAL: Failed to register TICKS_TOTAL metric - check for duplicate registration");

    /// Ticks dropped (backpressure or closed queue)
    pub static ref TICKS_DROPPED: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_ticks_dropped_total", "Ticks dropped before reaching a pair worker"),
        &["instrument", "reason"]
    ).expect("FATAL: Failed to register TICKS_DROPPED metric - check for duplicate registration");

    /// Tick processing latency in seconds (receive to signal evaluated)
    pub static ref TICK_LATENCY: Histogram = register_histogram!(
        "statarb_tick_latency_seconds",
        "Per-tick processing latency",
        vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
    ).expect("FATAL: Failed to register TICK_LATENCY metric - check for duplicate registration");

    // --- Strategy Metrics ---

    /// Signals emitted by kind
    pub static ref SIGNALS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_signals_total", "Signals emitted"),
        &["kind"]
    ).expect("FATAL: Failed to register SIGNALS_TOTAL metric - check for duplicate registration");

    /// Kalman covariance resets after a rejected update
    pub static ref KALMAN_RESETS: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_kalman_resets_total", "Kalman covariance resets"),
        &["pair"]
    ).expect("FATAL: Failed to register KALMAN_RESETS metric - check for duplicate registration");

    /// Currently active pairs
    pub static ref ACTIVE_PAIRS: IntGauge = register_int_gauge!(
        opts!("statarb_active_pairs", "Pairs in the active set")
    ).expect("FATAL: Failed to register ACTIVE_PAIRS metric - check for duplicate registration");

    /// Discovery cycles by outcome
    pub static ref DISCOVERY_CYCLES: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_discovery_cycles_total", "Discovery cycles"),
        &["outcome"]
    ).expect("FATAL: Failed to register DISCOVERY_CYCLES metric - check for duplicate registration");

    // --- Order Metrics ---

    /// Orders by leg side and status
    pub static ref ORDERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_orders_total", "Orders dispatched"),
        &["side", "status"]
    ).expect("FATAL: Failed to register ORDERS_TOTAL metric - check for duplicate registration");

    /// Signal-to-order latency in seconds
    pub static ref SIGNAL_TO_ORDER_LATENCY: Histogram = register_histogram!(
        "statarb_signal_to_order_latency_seconds",
        "Signal emission to order dispatch latency",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]
    ).expect("FATAL: Failed to register SIGNAL_TO_ORDER_LATENCY metric - check for duplicate registration");

    /// Risk rejections by reason code
    pub static ref RISK_REJECTIONS: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_risk_rejections_total", "Signals rejected by the risk manager"),
        &["reason"]
    ).expect("FATAL: Failed to register RISK_REJECTIONS metric - check for duplicate registration");

    // --- Portfolio Metrics ---

    pub static ref EQUITY: Gauge = register_gauge!(
        opts!("statarb_equity", "Portfolio equity")
    ).expect("FATAL: Failed to register EQUITY metric - check for duplicate registration");

    pub static ref DRAWDOWN: Gauge = register_gauge!(
        opts!("statarb_drawdown_ratio", "Drawdown from the equity high-water mark")
    ).expect("FATAL: Failed to register DRAWDOWN metric - check for duplicate registration");

    pub static ref OPEN_PAIRS: IntGauge = register_int_gauge!(
        opts!("statarb_open_pairs", "Pairs with an open position")
    ).expect("FATAL: Failed to register OPEN_PAIRS metric - check for duplicate registration");

    // --- Monitor ---

    /// Degradation events by kind
    pub static ref DEGRADATION_EVENTS: IntCounterVec = register_int_counter_vec!(
        opts!("statarb_degradation_events_total", "Degradation events raised by the monitor"),
        &["kind"]
    ).expect("FATAL: Failed to register DEGRADATION_EVENTS metric - check for duplicate registration");
}

/// Record a tick delivered to a worker queue
pub fn record_tick(instrument: &str) {
    TICKS_TOTAL.with_label_values(&[instrument]).inc();
}

/// Record dropped tick
pub fn record_dropped_tick(instrument: &str, reason: &str) {
    TICKS_DROPPED.with_label_values(&[instrument, reason]).inc();
}

pub fn record_tick_latency(latency_secs: f64) {
    TICK_LATENCY.observe(latency_secs);
}

pub fn record_signal(kind: &str) {
    SIGNALS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_kalman_reset(pair: &str) {
    KALMAN_RESETS.with_label_values(&[pair]).inc();
}

pub fn set_active_pairs(count: usize) {
    ACTIVE_PAIRS.set(count as i64);
}

pub fn record_discovery_cycle(outcome: &str) {
    DISCOVERY_CYCLES.with_label_values(&[outcome]).inc();
}

/// Record an order dispatch
pub fn record_order(side: &str, success: bool) {
    let status = if success { "filled" } else { "failed" };
    ORDERS_TOTAL.with_label_values(&[side, status]).inc();
}

/// Record signal-to-order latency
pub fn record_signal_to_order_latency(latency_secs: f64) {
    SIGNAL_TO_ORDER_LATENCY.observe(latency_secs);
}

pub fn record_risk_rejection(reason: &str) {
    RISK_REJECTIONS.with_label_values(&[reason]).inc();
}

/// Update portfolio gauges
pub fn set_portfolio(equity: f64, drawdown: f64, open_pairs: usize) {
    EQUITY.set(equity);
    DRAWDOWN.set(drawdown);
    OPEN_PAIRS.set(open_pairs as i64);
}

pub fn record_degradation(kind: &str) {
    DEGRADATION_EVENTS.with_label_values(&[kind]).inc();
}

/// Get metrics as text for /metrics endpoint
///
/// Encoding errors are logged and yield an empty body.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_order() {
        record_order("buy", true);
        assert!(ORDERS_TOTAL.with_label_values(&["buy", "filled"]).get() >= 1);
    }

    #[test]
    fn test_gather_metrics() {
        // Trigger lazy initialization of at least one metric
        record_signal("long_spread");

        let output = gather_metrics();
        assert!(
            output.contains("statarb_signals_total"),
            "Expected metrics output to contain 'statarb_signals_total', got: {}",
            &output[..output.len().min(200)]
        );
    }
}
