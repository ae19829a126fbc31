//! Pair discovery engine
//!
//! Screens a price universe for tradable pairs, cheapest test first:
//!
//! 1. Trailing-window Pearson correlation pre-filter
//! 2. Cointegration test (Johansen trace by default)
//! 3. AR(1) half-life of the OLS spread, bounded to a trading horizon
//! 4. ADF stationarity confirmation of the spread
//! 5. Weighted composite score, ranked descending, top-M under the cap

use crate::math::{KalmanConfig, KalmanHedgeRatio};
use crate::types::PairId;

use super::active_set::{plan_handoff, ActivePairSet, Handoff};
use super::config::{CorrelationBasis, DiscoveryConfig};
use super::error::DiscoveryError;
use super::stat_test::{
    cointegration_test, AugmentedDickeyFuller, CointegrationTest, StationarityTest,
};
use super::stats::{
    ar1_coefficient, half_life, level_correlation, mean_std, ols_spread, pearson, simple_returns,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Aligned price histories keyed by instrument. Series are aligned at their
/// most recent observation.
pub type PriceUniverse = BTreeMap<String, Vec<f64>>;

/// Ranking and retest results of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryCycle {
    pub selected: Vec<PairCandidate>,
    /// Cointegration retest of each current pair outside the selection,
    /// keyed by canonical instrument pair
    pub retests: HashMap<(String, String), Option<bool>>,
    pub max_active_pairs: usize,
}

impl DiscoveryCycle {
    /// Plan the handoff from `current`. Cheap; meant to run with fresh
    /// position data right before the new set is applied.
    pub fn plan<F>(&self, current: &ActivePairSet, has_open_position: F) -> Handoff
    where
        F: Fn(&PairId) -> bool,
    {
        let handoff = plan_handoff(
            current,
            self.selected.clone(),
            self.max_active_pairs,
            |pair: &PairId| self.retests.get(&pair.canonical_key()).copied().flatten(),
            has_open_position,
        );
        info!(
            generation = handoff.next.generation(),
            active = handoff.next.len(),
            promoted = handoff.promoted.len(),
            retained = handoff.retained.len(),
            demoted = handoff.demoted.len(),
            dropped = handoff.dropped.len(),
            "Discovery cycle planned"
        );
        handoff
    }
}

/// A pair that passed every screen in one discovery cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCandidate {
    pub pair: PairId,
    /// Pearson correlation on the configured basis
    pub correlation: f64,
    /// Cointegration statistic (Johansen trace for rank 0, or EG τ)
    pub trace_statistic: f64,
    /// Cointegration p-value
    pub cointegration_p_value: f64,
    /// Statistic over its critical value
    pub cointegration_strength: f64,
    /// Static hedge ratio from the cointegration test
    pub hedge_ratio: f64,
    /// Mean of `y - hedge_ratio·x`, used as the Kalman intercept prior
    pub intercept: f64,
    /// Half-life of the OLS spread (bars)
    pub half_life: f64,
    /// ADF τ on the spread
    pub adf_statistic: f64,
    pub adf_p_value: f64,
    pub spread_std: f64,
    /// Composite score in [0, 1]
    pub score: f64,
}

impl PairCandidate {
    /// Hedge-ratio estimator seeded with this candidate's static fit.
    pub fn estimator(&self, config: &KalmanConfig) -> KalmanHedgeRatio {
        KalmanHedgeRatio::new(config.clone(), self.hedge_ratio, self.intercept)
    }
}

/// Counters for one scan, reported in logs and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub pairs_considered: usize,
    pub rejected_correlation: usize,
    pub rejected_cointegration: usize,
    pub rejected_half_life: usize,
    pub rejected_stationarity: usize,
    pub failed_numeric: usize,
    pub passed: usize,
}

/// Batch scanner. Holds no state between cycles.
pub struct PairDiscoveryEngine {
    config: DiscoveryConfig,
    cointegration: Box<dyn CointegrationTest>,
    stationarity: Box<dyn StationarityTest>,
}

impl PairDiscoveryEngine {
    pub fn new(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let cointegration = cointegration_test(config.method);
        Self::with_tests(config, cointegration, Box::new(AugmentedDickeyFuller::default()))
    }

    /// Build with explicit test implementations.
    pub fn with_tests(
        config: DiscoveryConfig,
        cointegration: Box<dyn CointegrationTest>,
        stationarity: Box<dyn StationarityTest>,
    ) -> Result<Self, DiscoveryError> {
        config.validate().map_err(DiscoveryError::InvalidConfig)?;
        Ok(Self {
            config,
            cointegration,
            stationarity,
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Screen every pair in the universe and return passing candidates
    /// ranked by descending score.
    pub fn scan(
        &self,
        universe: &PriceUniverse,
    ) -> Result<(Vec<PairCandidate>, ScanStats), DiscoveryError> {
        let cfg = &self.config;
        let series = self.usable_series(universe)?;
        let symbols: Vec<&String> = series.keys().copied().collect();

        info!(
            instruments = symbols.len(),
            candidate_pairs = symbols.len() * (symbols.len() - 1) / 2,
            min_corr = cfg.min_correlation,
            method = self.cointegration.name(),
            "Scanning universe for cointegrated pairs"
        );

        let mut stats = ScanStats::default();
        let mut defined_correlations = 0usize;
        let mut candidates = Vec::new();

        for i in 0..symbols.len() {
            for j in (i + 1)..symbols.len() {
                stats.pairs_considered += 1;
                let (sym_y, sym_x) = (symbols[i], symbols[j]);
                let y = series[sym_y];
                let x = series[sym_x];

                // Stage 1: correlation pre-filter
                let Some(correlation) = self.correlation(y, x) else {
                    stats.rejected_correlation += 1;
                    continue;
                };
                defined_correlations += 1;
                if correlation.abs() < cfg.min_correlation {
                    stats.rejected_correlation += 1;
                    continue;
                }

                let pair = PairId::new(sym_y.as_str(), sym_x.as_str());
                match self.test_pair(&pair, y, x, correlation, &mut stats) {
                    Ok(Some(candidate)) => {
                        info!(
                            pair = %candidate.pair,
                            correlation = format!("{:.3}", candidate.correlation),
                            trace = format!("{:.2}", candidate.trace_statistic),
                            half_life = format!("{:.1}", candidate.half_life),
                            adf_p = format!("{:.4}", candidate.adf_p_value),
                            score = format!("{:.3}", candidate.score),
                            "Viable pair found"
                        );
                        stats.passed += 1;
                        candidates.push(candidate);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(pair = %pair, error = %e, "Pair test failed numerically");
                        stats.failed_numeric += 1;
                    }
                }
            }
        }

        if defined_correlations == 0 {
            return Err(DiscoveryError::DegenerateCorrelation {
                instruments: symbols.len(),
            });
        }
        let tested = stats.pairs_considered - stats.rejected_correlation;
        if tested > 0 && stats.failed_numeric == tested {
            return Err(DiscoveryError::SingularRegression(format!(
                "all {tested} correlated pairs failed numerically"
            )));
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(
            passed = stats.passed,
            rejected_corr = stats.rejected_correlation,
            rejected_coint = stats.rejected_cointegration,
            rejected_hl = stats.rejected_half_life,
            rejected_adf = stats.rejected_stationarity,
            numeric_failures = stats.failed_numeric,
            "Scan complete"
        );
        Ok((candidates, stats))
    }

    /// Scan, select top-M under the cap and retest every current pair that
    /// fell out of the ranking. The handoff itself is planned later, against
    /// the positions held at that moment.
    pub fn evaluate(
        &self,
        universe: &PriceUniverse,
        current: &ActivePairSet,
    ) -> Result<DiscoveryCycle, DiscoveryError> {
        let (ranked, _) = self.scan(universe)?;
        let selected: Vec<PairCandidate> = ranked
            .into_iter()
            .take(self.config.promotion_limit())
            .collect();

        let retests = current
            .iter()
            .filter(|active| !selected.iter().any(|c| c.pair.same_instruments(&active.id)))
            .map(|active| (active.id.canonical_key(), self.retest(universe, &active.id)))
            .collect();

        Ok(DiscoveryCycle {
            selected,
            retests,
            max_active_pairs: self.config.max_active_pairs,
        })
    }

    /// Evaluate and plan in one step.
    pub fn run_cycle<F>(
        &self,
        universe: &PriceUniverse,
        current: &ActivePairSet,
        has_open_position: F,
    ) -> Result<Handoff, DiscoveryError>
    where
        F: Fn(&PairId) -> bool,
    {
        Ok(self.evaluate(universe, current)?.plan(current, has_open_position))
    }

    /// Re-run the cointegration test for a pair. `None` when the pair's
    /// history is unavailable or the test cannot be evaluated.
    pub fn retest(&self, universe: &PriceUniverse, pair: &PairId) -> Option<bool> {
        let y = universe.get(&pair.dependent)?;
        let x = universe.get(&pair.independent)?;
        let n = self.window_len(y.len().min(x.len()));
        if n < self.config.min_history {
            return None;
        }
        let y = &y[y.len() - n..];
        let x = &x[x.len() - n..];
        match self.cointegration.test(y, x, self.config.significance) {
            Ok(outcome) => Some(outcome.outcome.rejected),
            Err(e) => {
                warn!(pair = %pair, error = %e, "Cointegration retest failed");
                None
            }
        }
    }

    fn window_len(&self, available: usize) -> usize {
        if self.config.lookback == 0 {
            available
        } else {
            available.min(self.config.lookback)
        }
    }

    /// Trailing windows of every instrument with enough finite history.
    fn usable_series<'a>(
        &self,
        universe: &'a PriceUniverse,
    ) -> Result<BTreeMap<&'a String, &'a [f64]>, DiscoveryError> {
        let min_history = self.config.min_history;
        let mut shortest = usize::MAX;
        let mut longest = 0usize;
        let eligible: Vec<(&String, &Vec<f64>)> = universe
            .iter()
            .filter(|(symbol, prices)| {
                longest = longest.max(prices.len());
                let ok = prices.len() >= min_history
                    && prices.iter().all(|p| p.is_finite() && *p > 0.0);
                if !ok {
                    debug!(symbol = %symbol, len = prices.len(), "Instrument skipped");
                }
                ok
            })
            .inspect(|(_, prices)| shortest = shortest.min(prices.len()))
            .collect();

        if eligible.is_empty() {
            return Err(DiscoveryError::InsufficientData {
                expected: min_history,
                actual: longest,
            });
        }
        if eligible.len() < 2 {
            return Err(DiscoveryError::UniverseTooSmall(eligible.len()));
        }

        let n = self.window_len(shortest);
        Ok(eligible
            .into_iter()
            .map(|(symbol, prices)| (symbol, &prices[prices.len() - n..]))
            .collect())
    }

    fn correlation(&self, y: &[f64], x: &[f64]) -> Option<f64> {
        let window = self.config.correlation_window.min(y.len());
        let y = &y[y.len() - window..];
        let x = &x[x.len() - window..];
        match self.config.correlation_basis {
            CorrelationBasis::Returns => pearson(&simple_returns(y), &simple_returns(x)),
            CorrelationBasis::Levels => level_correlation(y, x),
        }
    }

    /// Stages 2-5 for one correlated pair. `Ok(None)` is a statistical
    /// rejection, `Err` a numeric failure.
    fn test_pair(
        &self,
        pair: &PairId,
        y: &[f64],
        x: &[f64],
        correlation: f64,
        stats: &mut ScanStats,
    ) -> Result<Option<PairCandidate>, DiscoveryError> {
        let cfg = &self.config;

        // Stage 2: cointegration
        let coint = self.cointegration.test(y, x, cfg.significance)?;
        if !coint.outcome.rejected {
            debug!(
                pair = %pair,
                stat = format!("{:.2}", coint.outcome.statistic),
                critical = format!("{:.2}", coint.outcome.critical_value),
                "Failed cointegration test"
            );
            stats.rejected_cointegration += 1;
            return Ok(None);
        }

        // Stage 3: half-life of the OLS spread
        let (_, ols_beta, ols_residuals) = ols_spread(y, x).ok_or_else(|| {
            DiscoveryError::SingularRegression(format!("OLS spread for {pair}"))
        })?;
        let hl = ar1_coefficient(&ols_residuals).and_then(half_life);
        let Some(hl) = hl.filter(|h| (cfg.min_half_life..=cfg.max_half_life).contains(h)) else {
            debug!(pair = %pair, half_life = ?hl, "Half-life outside trading horizon");
            stats.rejected_half_life += 1;
            return Ok(None);
        };

        // Stage 4: stationarity of the spread
        let hedge_ratio = coint
            .hedge_ratio
            .filter(|b| b.is_finite())
            .unwrap_or(ols_beta);
        let spread: Vec<f64> = y
            .iter()
            .zip(x)
            .map(|(yi, xi)| yi - hedge_ratio * xi)
            .collect();
        let adf = self.stationarity.test(&spread, cfg.significance)?;
        if !adf.rejected {
            debug!(
                pair = %pair,
                adf = format!("{:.2}", adf.statistic),
                p = format!("{:.3}", adf.p_value),
                "Spread is non-stationary"
            );
            stats.rejected_stationarity += 1;
            return Ok(None);
        }

        let (intercept, spread_std) = mean_std(&spread);

        // Stage 5: composite score
        let score = self.composite_score(coint.strength, hl, correlation, adf.p_value);

        Ok(Some(PairCandidate {
            pair: pair.clone(),
            correlation,
            trace_statistic: coint.outcome.statistic,
            cointegration_p_value: coint.outcome.p_value,
            cointegration_strength: coint.strength,
            hedge_ratio,
            intercept,
            half_life: hl,
            adf_statistic: adf.statistic,
            adf_p_value: adf.p_value,
            spread_std,
            score,
        }))
    }

    /// Weighted mean of components normalised to [0, 1]:
    /// cointegration `1 - 1/strength`, half-life speed across the allowed
    /// range, `|correlation|`, and `1 - adf_p`.
    pub fn composite_score(
        &self,
        strength: f64,
        half_life: f64,
        correlation: f64,
        adf_p_value: f64,
    ) -> f64 {
        let cfg = &self.config;
        let w = &cfg.weights;

        let coint = if strength > 1.0 { 1.0 - 1.0 / strength } else { 0.0 };
        let speed = ((cfg.max_half_life - half_life) / (cfg.max_half_life - cfg.min_half_life))
            .clamp(0.0, 1.0);
        let corr = correlation.abs().min(1.0);
        let stationarity = (1.0 - adf_p_value).clamp(0.0, 1.0);

        (w.cointegration * coint
            + w.half_life * speed
            + w.correlation * corr
            + w.stationarity * stationarity)
            / w.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::config::CointegrationMethod;
    use crate::sandbox::{SyntheticConfig, SyntheticUniverse};

    fn test_config() -> DiscoveryConfig {
        DiscoveryConfig {
            min_half_life: 1.0,
            max_half_life: 100.0,
            ..Default::default()
        }
    }

    fn universe(pairs: usize, noise: usize, seed: u64) -> PriceUniverse {
        SyntheticUniverse::generate(&SyntheticConfig {
            cointegrated_pairs: pairs,
            noise_instruments: noise,
            length: 1500,
            seed,
            base_price_range: (100.0, 200.0),
            spread_std: 0.5,
            noise_std: 0.2,
            ..Default::default()
        })
        .histories()
    }

    #[test]
    fn test_finds_planted_pair() {
        let engine = PairDiscoveryEngine::new(test_config()).unwrap();
        let (candidates, stats) = engine.scan(&universe(1, 4, 21)).unwrap();

        assert!(!candidates.is_empty(), "{stats:?}");
        let top = &candidates[0];
        assert_eq!(top.pair, PairId::new("CI00_A", "CI00_B"));
        assert!(top.score > 0.0 && top.score <= 1.0);
        assert!(top.half_life >= 1.0 && top.half_life <= 100.0);
        assert_eq!(stats.pairs_considered, 15);
    }

    #[test]
    fn test_engle_granger_finds_planted_pair() {
        let config = DiscoveryConfig {
            method: CointegrationMethod::EngleGranger,
            ..test_config()
        };
        let engine = PairDiscoveryEngine::new(config).unwrap();
        let (candidates, _) = engine.scan(&universe(1, 2, 5)).unwrap();
        assert!(candidates
            .iter()
            .any(|c| c.pair == PairId::new("CI00_A", "CI00_B")));
    }

    #[test]
    fn test_ranked_descending() {
        let engine = PairDiscoveryEngine::new(test_config()).unwrap();
        let (candidates, _) = engine.scan(&universe(3, 2, 8)).unwrap();
        assert!(candidates.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_insufficient_history_fails_cycle() {
        let engine = PairDiscoveryEngine::new(DiscoveryConfig::default()).unwrap();
        let mut u = PriceUniverse::new();
        u.insert("A".to_string(), vec![100.0; 50]);
        u.insert("B".to_string(), vec![100.0; 50]);
        assert!(matches!(
            engine.scan(&u),
            Err(DiscoveryError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_constant_prices_are_degenerate() {
        let engine = PairDiscoveryEngine::new(DiscoveryConfig::default()).unwrap();
        let mut u = PriceUniverse::new();
        u.insert("A".to_string(), vec![100.0; 300]);
        u.insert("B".to_string(), vec![50.0; 300]);
        assert!(matches!(
            engine.scan(&u),
            Err(DiscoveryError::DegenerateCorrelation { instruments: 2 })
        ));
    }

    #[test]
    fn test_single_instrument_is_too_small() {
        let engine = PairDiscoveryEngine::new(DiscoveryConfig::default()).unwrap();
        let mut u = PriceUniverse::new();
        u.insert("A".to_string(), (0..300).map(|i| 100.0 + i as f64).collect());
        assert!(matches!(
            engine.scan(&u),
            Err(DiscoveryError::UniverseTooSmall(1))
        ));
    }

    #[test]
    fn test_composite_score_prefers_faster_reversion() {
        let engine = PairDiscoveryEngine::new(DiscoveryConfig::default()).unwrap();
        let fast = engine.composite_score(2.0, 10.0, 0.8, 0.01);
        let slow = engine.composite_score(2.0, 50.0, 0.8, 0.01);
        assert!(fast > slow);
        assert!(engine.composite_score(0.5, 60.0, 0.0, 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cycle_promotes_into_empty_set() {
        let engine = PairDiscoveryEngine::new(test_config()).unwrap();
        let handoff = engine
            .run_cycle(&universe(1, 2, 13), &ActivePairSet::empty(), |_| false)
            .unwrap();
        assert!(handoff
            .promoted
            .contains(&PairId::new("CI00_A", "CI00_B")));
        assert_eq!(handoff.next.generation(), 1);
    }

    #[test]
    fn test_evaluate_retests_pairs_outside_selection() {
        let engine = PairDiscoveryEngine::new(test_config()).unwrap();
        let universe = universe(1, 2, 13);
        let first = engine
            .run_cycle(&universe, &ActivePairSet::empty(), |_| false)
            .unwrap();

        // A stale pair over two noise series sits in the current set
        let mut current: Vec<_> = first.next.iter().cloned().collect();
        let stale = PairId::new("RW_00", "RW_01");
        let mut template = current[0].clone();
        template.id = stale.clone();
        template.candidate.pair = stale.clone();
        current.push(template);
        let current = ActivePairSet::from_pairs(2, current).unwrap();

        let cycle = engine.evaluate(&universe, &current).unwrap();
        assert!(cycle.retests.contains_key(&stale.canonical_key()));
        assert!(!cycle
            .retests
            .contains_key(&PairId::new("CI00_A", "CI00_B").canonical_key()));

        // The same evaluation plans differently depending on positions at apply time
        let flat = cycle.plan(&current, |_| false);
        let holding = cycle.plan(&current, |id| id == &stale);
        let still = cycle.retests[&stale.canonical_key()];
        if still == Some(false) {
            assert_eq!(flat.demoted, vec![stale.clone()]);
            assert_eq!(holding.demoted, vec![stale]);
        } else {
            assert_eq!(flat.dropped, vec![stale.clone()]);
            assert_eq!(holding.retained, vec![stale]);
        }
    }
}
