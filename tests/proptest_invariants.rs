//! Property-based tests over the public API
//!
//! These tests use proptest to verify the filter, risk and execution
//! invariants across many random inputs.

use std::sync::Arc;
use std::time::Instant;

use proptest::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use statarb::execution::{ExecutionConfig, ExecutionEngine, ExecutionOutcome, PaperDispatcher};
use statarb::math::kalman::is_positive_semi_definite;
use statarb::math::{KalmanConfig, KalmanHedgeRatio};
use statarb::portfolio::{PairPosition, Portfolio};
use statarb::risk::{ProposedDelta, RiskConfig, RiskManager};
use statarb::strategy::{Signal, SignalKind};
use statarb::types::{PairId, SpreadSide};

const PAIRS: usize = 6;

fn position(pair: PairId, qty: Decimal, price: Decimal) -> PairPosition {
    PairPosition {
        pair,
        side: SpreadSide::LongSpread,
        entry_z: -2.0,
        hedge_ratio: 1.0,
        dependent_qty: qty,
        independent_qty: -qty,
        dependent_entry: price,
        independent_entry: price,
        dependent_mark: price,
        independent_mark: price,
        entry_cost: Decimal::ZERO,
        opened_at: 0,
    }
}

/// One step of a random signal stream.
#[derive(Debug, Clone)]
enum Step {
    Enter {
        pair: usize,
        long: bool,
        confidence: f64,
        beta: f64,
    },
    Exit {
        pair: usize,
        stop: bool,
    },
    /// Move both legs by these factors and mark the book
    Move {
        pair: usize,
        dependent: f64,
        independent: f64,
    },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..PAIRS, any::<bool>(), 0.0f64..1.0, -3.0f64..3.0).prop_map(
            |(pair, long, confidence, beta)| Step::Enter {
                pair,
                long,
                confidence,
                beta,
            }
        ),
        (0..PAIRS, any::<bool>()).prop_map(|(pair, stop)| Step::Exit { pair, stop }),
        (0..PAIRS, 0.9f64..1.1, 0.9f64..1.1).prop_map(|(pair, dependent, independent)| {
            Step::Move {
                pair,
                dependent,
                independent,
            }
        }),
    ]
}

fn pair(i: usize) -> PairId {
    PairId::new(format!("Y{i}"), format!("X{i}"))
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ONE).round_dp(4)
}

proptest! {
    /// Covariance stays symmetric PSD after every accepted update
    #[test]
    fn kalman_covariance_stays_psd(
        beta in -3.0f64..3.0,
        prior in -3.0f64..3.0,
        observations in prop::collection::vec((1.0f64..500.0, -5.0f64..5.0), 1..200)
    ) {
        let mut kalman = KalmanHedgeRatio::new(KalmanConfig::default(), prior, 0.0);
        for (x, noise) in observations {
            let accepted = kalman.update(x, beta * x + 10.0 + noise).is_ok();
            let cov = kalman.covariance();
            prop_assert!(is_positive_semi_definite(&cov), "cov {:?}", cov);
            prop_assert_eq!(cov[0][1], cov[1][0]);
            prop_assert!(kalman.beta().is_finite());
            if !accepted {
                prop_assert!(kalman.is_degraded());
            }
        }
    }

    /// An entry is approved exactly when it fits under the per-pair cap
    /// left once its own costs are paid
    #[test]
    fn entry_approved_iff_within_exposure_cap(
        capital in 1_000u32..10_000_000,
        gross in 0u32..2_000_000,
        cost in 0u32..5_000,
        pct in 0.01f64..0.5,
    ) {
        let mut risk = RiskManager::new(RiskConfig {
            max_position_pct: pct,
            ..Default::default()
        });
        let portfolio = Portfolio::new(Decimal::from(capital));
        let entry_cost = Decimal::from(cost);
        let limit = risk.exposure_limit(&portfolio, entry_cost);
        let delta = ProposedDelta::Open {
            pair: PairId::new("A", "B"),
            gross_exposure: Decimal::from(gross),
            entry_cost,
        };
        let approved = risk.authorize(&portfolio, &delta).is_approved();
        prop_assert_eq!(approved, Decimal::from(gross) <= limit);
    }

    /// However many entries are attempted, open pairs never exceed the cap
    #[test]
    fn open_pairs_never_exceed_cap(
        cap in 1usize..8,
        attempts in 1usize..30,
        price in 10u32..500,
    ) {
        let mut risk = RiskManager::new(RiskConfig {
            max_open_pairs: cap,
            ..Default::default()
        });
        let mut portfolio = Portfolio::new(Decimal::from(1_000_000u32));
        let price = Decimal::from(price);
        let qty = Decimal::from_f64(10.0).unwrap_or(Decimal::ONE);

        for i in 0..attempts {
            let pair = PairId::new(format!("Y{i}"), format!("X{i}"));
            let pos = position(pair.clone(), qty, price);
            let delta = ProposedDelta::Open {
                pair,
                gross_exposure: pos.gross_exposure(),
                entry_cost: Decimal::ZERO,
            };
            if risk.authorize(&portfolio, &delta).is_approved() {
                portfolio.open(pos);
            }
            prop_assert!(portfolio.open_count() <= cap);
        }
        prop_assert_eq!(portfolio.open_count(), attempts.min(cap));
    }

    /// Random signal streams through the engine, with costs, exits and
    /// moving marks: every filled entry fits the exposure cap of the equity
    /// left after paying for it, and open pairs never exceed their cap.
    #[test]
    fn engine_entries_respect_caps_after_costs(
        cap in 1usize..5,
        pct in 0.01f64..0.2,
        base_size_pct in 0.01f64..0.5,
        slippage_bps in 0u32..25,
        commission_bps in 0u32..15,
        commission_fixed in 0u32..20,
        steps in prop::collection::vec(step(), 1..60),
    ) {
        let config = ExecutionConfig {
            initial_capital: Decimal::from(1_000_000u32),
            base_size_pct,
            slippage_bps: Decimal::from(slippage_bps),
            commission_bps: Decimal::from(commission_bps),
            commission_fixed: Decimal::from(commission_fixed),
            ..Default::default()
        };
        let risk = RiskConfig {
            max_position_pct: pct,
            max_open_pairs: cap,
            ..Default::default()
        };
        let dispatcher = Arc::new(PaperDispatcher::new(config.cost_model()));
        let engine = ExecutionEngine::new(config, risk, dispatcher);
        let limit_pct = Decimal::from_f64(pct).unwrap_or(Decimal::ZERO);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut prices: Vec<(f64, f64)> = (0..PAIRS)
                .map(|i| (100.0 + 10.0 * i as f64, 50.0 + 5.0 * i as f64))
                .collect();

            for (t, step) in steps.into_iter().enumerate() {
                let timestamp = t as i64 * 1_000;
                match step {
                    Step::Enter { pair: i, long, confidence, beta } => {
                        let (py, px) = prices[i];
                        let signal = Signal {
                            pair: pair(i),
                            kind: if long { SignalKind::LongSpread } else { SignalKind::ShortSpread },
                            z_score: if long { -2.5 } else { 2.5 },
                            confidence,
                            hedge_ratio: beta,
                            dependent_price: decimal(py),
                            independent_price: decimal(px),
                            timestamp,
                        };
                        let outcome = engine.execute(&signal, Instant::now()).await;
                        if matches!(outcome, ExecutionOutcome::Filled(_)) {
                            let opened = engine.position(&pair(i)).await;
                            prop_assert!(opened.is_some());
                            let gross = opened.map(|p| p.gross_exposure()).unwrap_or_default();
                            let equity = engine.snapshot(timestamp).await.equity;
                            prop_assert!(
                                gross <= limit_pct * equity,
                                "gross {} > {} x equity {}", gross, limit_pct, equity
                            );
                        }
                    }
                    Step::Exit { pair: i, stop } => {
                        let (py, px) = prices[i];
                        let signal = Signal {
                            pair: pair(i),
                            kind: if stop { SignalKind::StopLoss } else { SignalKind::Exit },
                            z_score: 0.0,
                            confidence: 1.0,
                            hedge_ratio: 1.0,
                            dependent_price: decimal(py),
                            independent_price: decimal(px),
                            timestamp,
                        };
                        engine.execute(&signal, Instant::now()).await;
                        prop_assert!(!engine.has_position(&pair(i)).await);
                    }
                    Step::Move { pair: i, dependent, independent } => {
                        let (py, px) = &mut prices[i];
                        *py = (*py * dependent).max(1.0);
                        *px = (*px * independent).max(1.0);
                        engine.mark(&pair(i), decimal(*py), decimal(*px), timestamp).await;
                    }
                }
                prop_assert!(engine.positions().await.len() <= cap);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
