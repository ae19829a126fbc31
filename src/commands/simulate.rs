//! Paper-trading command handler.
//!
//! Implements the `simulate` subcommand: discovery on a warm-up window of a
//! synthetic universe, then a tick-by-tick replay of the remainder through
//! the full pipeline.

use crate::config::AppConfig;
use crate::execution::PaperDispatcher;
use crate::health::{create_health_state, run_health_server};
use crate::persistence::{JsonFileStore, MemoryStore, SnapshotStore};
use crate::pipeline::Pipeline;
use crate::sandbox::{SyntheticConfig, SyntheticUniverse};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Bars handed to discovery before the replay starts
    pub warmup_bars: usize,
    /// Persist snapshots here; in-memory when unset
    pub state_dir: Option<PathBuf>,
    /// Serve /health and /metrics on this port
    pub metrics_port: Option<u16>,
    /// Close open positions at the last prices instead of carrying them
    pub flatten_on_exit: bool,
}

pub async fn run_simulate(
    config: AppConfig,
    synthetic: &SyntheticConfig,
    options: SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let universe = SyntheticUniverse::generate(synthetic);
    if options.warmup_bars >= universe.len() {
        return Err(format!(
            "warm-up of {} bars leaves nothing to replay from {} bars",
            options.warmup_bars,
            universe.len()
        )
        .into());
    }

    let store: Arc<dyn SnapshotStore> = match &options.state_dir {
        Some(dir) => Arc::new(JsonFileStore::open(dir.clone()).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let dispatcher = Arc::new(PaperDispatcher::new(config.execution.cost_model()));
    let mut pipeline = Pipeline::new(config, dispatcher, store)?;

    if let Some(port) = options.metrics_port {
        let health = create_health_state();
        tokio::spawn(run_health_server(port, health.clone()));
        pipeline = pipeline.with_health(health);
    }

    let resumed = pipeline.resume().await?;
    pipeline.seed_history(universe.head(options.warmup_bars));
    if let Err(e) = pipeline.run_discovery().await {
        if resumed == 0 {
            return Err(e.into());
        }
        warn!(error = %e, resumed, "Initial discovery failed, trading resumed pairs");
    }

    let ticks = universe.ticks(options.warmup_bars..universe.len());
    info!(ticks = ticks.len(), "Replaying synthetic feed");
    for tick in ticks {
        pipeline.on_tick(tick).await;
    }

    let report = if options.flatten_on_exit {
        pipeline.close_out().await?
    } else {
        pipeline.shutdown().await?
    };

    println!("\n=== SIMULATION REPORT ===");
    println!("Discovery cycles: {} ({} failed)", report.discovery_cycles, report.discovery_failures);
    println!("Pairs traded:     {}", report.workers.len());
    println!("Ticks processed:  {}", report.monitor.ticks);
    println!("Signals:          {}", report.monitor.signals);
    println!("Closed trades:    {}", report.trades.len());
    println!("Open positions:   {}", report.equity.open_positions);
    println!("Equity:           {}", report.equity.equity.round_dp(2));
    println!("Max drawdown:     {:.2}%", report.monitor.max_drawdown * 100.0);
    println!(
        "Tick latency:     avg {:.1}us p95 {:.1}us max {:.1}us",
        report.monitor.tick_latency.avg_us,
        report.monitor.tick_latency.p95_us,
        report.monitor.tick_latency.max_us
    );
    println!("Degradations:     {}", report.monitor.degradation_events);

    let wins = report.trades.iter().filter(|t| t.pnl.is_sign_positive()).count();
    info!(
        trades = report.trades.len(),
        wins,
        equity = %report.equity.equity,
        "Simulation complete"
    );
    Ok(())
}
