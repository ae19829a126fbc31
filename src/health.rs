//! Health check and Prometheus scrape endpoint

use crate::metrics;
use crate::monitor::MonitorReport;
use crate::portfolio::EquitySnapshot;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String, // "healthy", "degraded", "halted"
    pub version: String,
    pub active_pairs: usize,
    pub open_positions: usize,
    pub equity: String,
    pub drawdown: f64,
    pub ticks: u64,
    pub degradation_events: u64,
    pub uptime_seconds: u64,
    pub timestamp: i64,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_pairs: 0,
            open_positions: 0,
            equity: "0".to_string(),
            drawdown: 0.0,
            ticks: 0,
            degradation_events: 0,
            uptime_seconds: 0,
            timestamp: Utc::now().timestamp(),
        }
    }
}

pub type HealthState = Arc<RwLock<HealthResponse>>;

pub fn create_health_state() -> HealthState {
    Arc::new(RwLock::new(HealthResponse::default()))
}

/// Refresh the shared health view from the latest pipeline state.
pub async fn update_health(
    state: &HealthState,
    started: Instant,
    active_pairs: usize,
    equity: &EquitySnapshot,
    report: &MonitorReport,
    halted: bool,
) {
    let mut health = state.write().await;
    health.active_pairs = active_pairs;
    health.open_positions = equity.open_positions;
    health.equity = equity.equity.to_string();
    health.drawdown = equity.drawdown;
    health.ticks = report.ticks;
    health.degradation_events = report.degradation_events;
    health.uptime_seconds = started.elapsed().as_secs();
    health.timestamp = Utc::now().timestamp();
    health.status = health_status(halted, report).to_string();
}

fn health_status(halted: bool, report: &MonitorReport) -> &'static str {
    if halted {
        "halted"
    } else if report.degradation_events > 0 {
        "degraded"
    } else {
        "healthy"
    }
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> Json<HealthResponse> {
    let health = state.read().await.clone();
    Json(health)
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

pub async fn run_health_server(port: u16, state: HealthState) {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("Health check server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(
                "Health server failed to bind to {}: {}. Continuing without health endpoint.",
                addr,
                e
            );
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Health check server failed: {}", e);
    }
}
