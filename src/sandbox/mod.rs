//! Synthetic market for paper runs and tests.
//!
//! Generates a universe of cointegrated pairs (`CIxx_A = beta * CIxx_B + c +
//! OU spread + noise`) plus independent geometric random walks (`RW_xx`),
//! and replays it as a synchronized tick stream.

use crate::discovery::PriceUniverse;
use crate::types::{PairId, Tick};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Price floor, as in a delisting guard.
const MIN_PRICE: f64 = 1.0;

/// Milliseconds between synthetic bars.
pub const BAR_INTERVAL_MS: i64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub cointegrated_pairs: usize,
    pub noise_instruments: usize,
    /// Bars per instrument
    pub length: usize,
    pub seed: u64,
    /// Spread half-life drawn uniformly from this range (bars)
    pub half_life_range: (f64, f64),
    /// Hedge ratio drawn uniformly from this range
    pub beta_range: (f64, f64),
    /// Starting price of every random walk drawn from this range
    pub base_price_range: (f64, f64),
    /// Per-bar log-return volatility of the random walks
    pub volatility: f64,
    /// OU innovation standard deviation of the spread
    pub spread_std: f64,
    /// Independent observation noise on the dependent leg
    pub noise_std: f64,
    /// Final bars in which the spread decays with no fresh shocks
    pub calm_tail: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            cointegrated_pairs: 1,
            noise_instruments: 0,
            length: 756,
            seed: 42,
            half_life_range: (8.0, 45.0),
            beta_range: (0.6, 1.8),
            base_price_range: (30.0, 300.0),
            volatility: 0.015,
            spread_std: 1.0,
            noise_std: 0.5,
            calm_tail: 0,
        }
    }
}

/// Ground truth of a generated pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantedPair {
    pub pair: PairId,
    pub beta: f64,
    pub intercept: f64,
    pub half_life: f64,
}

#[derive(Debug, Clone)]
pub struct SyntheticUniverse {
    prices: BTreeMap<String, Vec<f64>>,
    planted: Vec<PlantedPair>,
}

impl SyntheticUniverse {
    pub fn generate(config: &SyntheticConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut prices = BTreeMap::new();
        let mut planted = Vec::with_capacity(config.cointegrated_pairs);

        for i in 0..config.cointegrated_pairs {
            let half_life = uniform(&mut rng, config.half_life_range);
            let beta = uniform(&mut rng, config.beta_range);
            let intercept = uniform(&mut rng, (5.0, 50.0));
            let base = uniform(&mut rng, config.base_price_range);

            let x = geometric_walk(&mut rng, base, config.volatility, config.length);
            let y = dependent_leg(&mut rng, &x, beta, intercept, half_life, config);

            let pair = PairId::new(format!("CI{i:02}_A"), format!("CI{i:02}_B"));
            prices.insert(pair.dependent.clone(), y);
            prices.insert(pair.independent.clone(), x);
            planted.push(PlantedPair {
                pair,
                beta,
                intercept,
                half_life,
            });
        }

        for i in 0..config.noise_instruments {
            let base = uniform(&mut rng, config.base_price_range);
            let walk = geometric_walk(&mut rng, base, config.volatility, config.length);
            prices.insert(format!("RW_{i:02}"), walk);
        }

        info!(
            pairs = config.cointegrated_pairs,
            noise = config.noise_instruments,
            bars = config.length,
            "Synthetic universe generated"
        );
        Self { prices, planted }
    }

    pub fn planted(&self) -> &[PlantedPair] {
        &self.planted
    }

    pub fn histories(&self) -> PriceUniverse {
        self.prices.clone()
    }

    /// First `bars` observations of every instrument.
    pub fn head(&self, bars: usize) -> PriceUniverse {
        self.prices
            .iter()
            .map(|(k, v)| (k.clone(), v[..bars.min(v.len())].to_vec()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.prices.values().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ticks for bars `range`, ordered by bar then instrument. Every
    /// instrument ticks once per bar at the same timestamp.
    pub fn ticks(&self, range: std::ops::Range<usize>) -> Vec<Tick> {
        let end = range.end.min(self.len());
        let mut out = Vec::with_capacity((end.saturating_sub(range.start)) * self.prices.len());
        for bar in range.start..end {
            let timestamp = bar as i64 * BAR_INTERVAL_MS;
            for (symbol, series) in &self.prices {
                if let Some(price) = Decimal::from_f64(series[bar]) {
                    out.push(Tick::new(symbol.as_str(), timestamp, price.round_dp(4)));
                }
            }
        }
        out
    }
}

fn uniform(rng: &mut StdRng, (lo, hi): (f64, f64)) -> f64 {
    if hi > lo {
        rng.random_range(lo..hi)
    } else {
        lo
    }
}

fn shock(rng: &mut StdRng) -> f64 {
    rng.sample::<f64, _>(StandardNormal)
}

fn geometric_walk(rng: &mut StdRng, base: f64, volatility: f64, length: usize) -> Vec<f64> {
    let mut log_price = base.ln();
    (0..length)
        .map(|t| {
            if t > 0 {
                log_price += volatility * shock(rng);
            }
            log_price.exp()
        })
        .collect()
}

fn dependent_leg(
    rng: &mut StdRng,
    x: &[f64],
    beta: f64,
    intercept: f64,
    half_life: f64,
    config: &SyntheticConfig,
) -> Vec<f64> {
    let theta = std::f64::consts::LN_2 / half_life;
    let calm_from = config.length.saturating_sub(config.calm_tail);
    let mut spread = 0.0;

    x.iter()
        .enumerate()
        .map(|(t, xi)| {
            let calm = t >= calm_from;
            if t > 0 {
                spread -= theta * spread;
                if !calm {
                    spread += config.spread_std * shock(rng);
                }
            }
            let noise = if calm {
                0.0
            } else {
                config.noise_std * shock(rng)
            };
            (beta * xi + intercept + spread + noise).max(MIN_PRICE)
        })
        .collect()
}
