//! End-to-end paper run over a synthetic universe: discovery, per-pair
//! workers, risk-gated execution and persistence wired together.

use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use statarb::config::AppConfig;
use statarb::execution::PaperDispatcher;
use statarb::persistence::{MemoryStore, SnapshotStore};
use statarb::pipeline::Pipeline;
use statarb::portfolio::{EquitySnapshot, PairPosition};
use statarb::sandbox::{SyntheticConfig, SyntheticUniverse};
use statarb::strategy::{BackpressurePolicy, SignalKind};
use statarb::types::{PairId, SpreadSide};

fn universe(length: usize, noise: usize) -> SyntheticUniverse {
    SyntheticUniverse::generate(&SyntheticConfig {
        cointegrated_pairs: 1,
        noise_instruments: noise,
        length,
        seed: 21,
        base_price_range: (100.0, 200.0),
        spread_std: 0.5,
        noise_std: 0.2,
        ..Default::default()
    })
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.discovery.min_half_life = 1.0;
    config.discovery.max_half_life = 100.0;
    config.kalman.warmup_updates = 30;
    config.pipeline.backpressure = BackpressurePolicy::Wait;
    config.pipeline.rediscover_every = 0;
    config.pipeline.history_capacity = 0;
    config.pipeline.snapshot_every = 250;
    config
}

fn planted() -> PairId {
    PairId::new("CI00_A", "CI00_B")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_synthetic_pair_trades_end_to_end() {
    let universe = universe(10_000, 2);
    let store = Arc::new(MemoryStore::new());
    let config = config();
    let dispatcher = Arc::new(PaperDispatcher::new(config.execution.cost_model()));
    let mut pipeline = Pipeline::new(config, dispatcher, store.clone()).unwrap();

    pipeline.seed_history(universe.histories());
    let handoff = pipeline.run_discovery().await.unwrap();
    let planted = planted();
    assert!(handoff.promoted.contains(&planted), "{:?}", handoff.promoted);

    let ticks = universe.ticks(0..universe.len());
    assert_eq!(ticks.len(), 40_000);
    for tick in ticks {
        pipeline.on_tick(tick).await;
    }

    let engine = pipeline.engine().clone();
    let report = pipeline.close_out().await.unwrap();

    // Every tick of both legs reached the planted pair's worker
    let worker = report
        .workers
        .iter()
        .find(|w| w.pair == planted)
        .expect("planted pair worker");
    assert_eq!(worker.ticks, 20_000);
    assert_eq!(worker.updates, 10_000);
    assert_eq!(worker.final_state, SpreadSide::Flat);

    // Closed out: nothing left on the book
    assert!(engine.positions().await.is_empty());
    assert_eq!(report.equity.open_positions, 0);
    assert_eq!(report.equity.unrealized, Decimal::ZERO);
    assert!(store.positions().is_empty());

    let signals: Vec<_> = store
        .signals()
        .into_iter()
        .filter(|s| s.pair == planted)
        .collect();
    let entries = signals.iter().filter(|s| s.kind.is_entry()).count();
    let closes = signals
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                SignalKind::Exit | SignalKind::StopLoss | SignalKind::Flat
            )
        })
        .count();
    let trades = report.trades.iter().filter(|t| t.pair == planted).count();

    assert!(entries >= 2, "only {entries} entries in {} bars", universe.len());
    assert_eq!(entries, trades);
    assert_eq!(closes, trades);
    assert!(report
        .trades
        .iter()
        .all(|t| t.closed_at >= t.opened_at));

    assert!(report.monitor.ticks >= 20_000);
    assert!(report.monitor.signals as usize >= signals.len());
    assert!(store.load_kalman(&planted).await.unwrap().is_some());
    assert_eq!(store.equity(), Some(report.equity.clone()));
}

#[tokio::test]
async fn test_restart_resumes_active_pairs_filters_and_book() {
    let universe = universe(1500, 4);
    let store = Arc::new(MemoryStore::new());
    let planted = planted();

    {
        let config = config();
        let dispatcher = Arc::new(PaperDispatcher::new(config.execution.cost_model()));
        let mut pipeline = Pipeline::new(config, dispatcher, store.clone()).unwrap();
        pipeline.seed_history(universe.histories());
        pipeline.run_discovery().await.unwrap();
        for tick in universe.ticks(0..200) {
            pipeline.on_tick(tick).await;
        }
        pipeline.shutdown().await.unwrap();
    }

    let saved = store.load_kalman(&planted).await.unwrap().unwrap();
    assert_eq!(saved.state.update_count, 200);

    // The previous run stopped holding a short spread on the planted pair
    let history = universe.histories();
    let price = |symbol: &str| {
        Decimal::from_f64(history[symbol][199])
            .unwrap()
            .round_dp(4)
    };
    let (py, px) = (price("CI00_A"), price("CI00_B"));
    let held = PairPosition {
        pair: planted.clone(),
        side: SpreadSide::ShortSpread,
        entry_z: 2.4,
        hedge_ratio: 1.0,
        dependent_qty: dec!(-100),
        independent_qty: dec!(100),
        dependent_entry: py,
        independent_entry: px,
        dependent_mark: py,
        independent_mark: px,
        entry_cost: dec!(12),
        opened_at: 123,
    };
    store.save_positions(&[held.clone()]).await.unwrap();
    store
        .save_equity(&EquitySnapshot {
            timestamp: 199,
            equity: dec!(9990000),
            cash: dec!(9990000),
            unrealized: Decimal::ZERO,
            drawdown: 0.006,
            open_positions: 1,
            high_water_mark: dec!(10050000),
        })
        .await
        .unwrap();

    let config = config();
    let dispatcher = Arc::new(PaperDispatcher::new(config.execution.cost_model()));
    let mut pipeline = Pipeline::new(config, dispatcher, store.clone()).unwrap();
    let resumed = pipeline.resume().await.unwrap();
    assert!(resumed >= 1);
    assert!(pipeline.active_set().contains(&planted));

    // The book continues from the saved cash, high-water mark and position
    let engine = pipeline.engine().clone();
    let restored = engine.snapshot(199).await;
    assert_eq!(restored.cash, dec!(9990000));
    assert_eq!(restored.high_water_mark, dec!(10050000));
    assert!(restored.drawdown > 0.0);
    assert_eq!(engine.position(&planted).await, Some(held.clone()));

    for tick in universe.ticks(200..210) {
        pipeline.on_tick(tick).await;
    }
    let report = pipeline.shutdown().await.unwrap();

    // The resumed filter continued from the snapshot
    let saved = store.load_kalman(&planted).await.unwrap().unwrap();
    assert_eq!(saved.state.update_count, 210);

    // The resumed worker adopted the short side: it either still holds it
    // or closed the restored position
    let worker = report
        .workers
        .iter()
        .find(|w| w.pair == planted)
        .expect("planted pair worker");
    match engine.position(&planted).await {
        Some(position) => {
            assert_eq!(position.opened_at, held.opened_at);
            assert_eq!(worker.final_state, SpreadSide::ShortSpread);
        }
        None => {
            let trade = report
                .trades
                .iter()
                .find(|t| t.pair == planted)
                .expect("restored position closed");
            assert_eq!(trade.opened_at, held.opened_at);
            assert_eq!(trade.side, SpreadSide::ShortSpread);
        }
    }
}
