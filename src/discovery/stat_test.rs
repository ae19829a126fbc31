//! Pluggable statistical tests.
//!
//! Every test takes aligned series and returns a statistic with a p-value.
//! Discovery picks a [`CointegrationTest`] from configuration and always
//! confirms the spread with a [`StationarityTest`].

use super::config::CointegrationMethod;
use super::error::DiscoveryError;
use super::johansen::johansen_trace;
use super::stats::{adf_regression, mackinnon_critical_value, mackinnon_p_value, ols_spread};

/// Lagged differences in the ADF regression.
pub const ADF_LAGS: usize = 1;

/// Statistic and p-value of a hypothesis test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
    /// Critical value at the requested significance
    pub critical_value: f64,
    /// Null hypothesis rejected at the requested significance
    pub rejected: bool,
}

/// Common capability of every test.
pub trait StatisticalTest: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Unit-root test on a single series (H0: non-stationary).
pub trait StationarityTest: StatisticalTest {
    fn test(&self, series: &[f64], significance: f64) -> Result<TestOutcome, DiscoveryError>;
}

/// Outcome of a cointegration test, with the static hedge ratio it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CointegrationOutcome {
    pub outcome: TestOutcome,
    /// Ratio `beta` of `y ≈ beta·x + c`
    pub hedge_ratio: Option<f64>,
    /// Statistic divided by its critical value; above 1.0 means rejected
    pub strength: f64,
}

/// Cointegration test on a dependent/independent pair (H0: no cointegration).
pub trait CointegrationTest: StatisticalTest {
    fn test(
        &self,
        y: &[f64],
        x: &[f64],
        significance: f64,
    ) -> Result<CointegrationOutcome, DiscoveryError>;
}

/// Augmented Dickey-Fuller with a constant.
#[derive(Debug, Clone, Copy)]
pub struct AugmentedDickeyFuller {
    pub lags: usize,
}

impl Default for AugmentedDickeyFuller {
    fn default() -> Self {
        Self { lags: ADF_LAGS }
    }
}

impl StatisticalTest for AugmentedDickeyFuller {
    fn name(&self) -> &'static str {
        "adf"
    }
}

impl StationarityTest for AugmentedDickeyFuller {
    fn test(&self, series: &[f64], significance: f64) -> Result<TestOutcome, DiscoveryError> {
        let adf = adf_regression(series, self.lags).ok_or_else(|| {
            DiscoveryError::SingularRegression("ADF regression failed".to_string())
        })?;
        let p_value = mackinnon_p_value(adf.statistic, 1);
        Ok(TestOutcome {
            statistic: adf.statistic,
            p_value,
            critical_value: mackinnon_critical_value(significance, 1),
            rejected: p_value <= significance,
        })
    }
}

/// Johansen trace test, rank 0 against rank ≥ 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct JohansenTrace;

impl StatisticalTest for JohansenTrace {
    fn name(&self) -> &'static str {
        "johansen"
    }
}

impl CointegrationTest for JohansenTrace {
    fn test(
        &self,
        y: &[f64],
        x: &[f64],
        significance: f64,
    ) -> Result<CointegrationOutcome, DiscoveryError> {
        let result = johansen_trace(y, x)?;
        let critical_value = super::johansen::JohansenResult::critical_value(significance);
        Ok(CointegrationOutcome {
            outcome: TestOutcome {
                statistic: result.trace_r0,
                p_value: result.p_value(),
                critical_value,
                rejected: result.rejects_no_cointegration(significance),
            },
            hedge_ratio: result.hedge_ratio(),
            strength: result.trace_r0 / critical_value,
        })
    }
}

/// Engle-Granger two step: OLS hedge, then ADF on the residuals with
/// two-variable MacKinnon p-values.
#[derive(Debug, Clone, Copy)]
pub struct EngleGranger {
    pub lags: usize,
}

impl Default for EngleGranger {
    fn default() -> Self {
        Self { lags: ADF_LAGS }
    }
}

impl StatisticalTest for EngleGranger {
    fn name(&self) -> &'static str {
        "engle_granger"
    }
}

impl CointegrationTest for EngleGranger {
    fn test(
        &self,
        y: &[f64],
        x: &[f64],
        significance: f64,
    ) -> Result<CointegrationOutcome, DiscoveryError> {
        let (_, beta, residuals) = ols_spread(y, x).ok_or_else(|| {
            DiscoveryError::SingularRegression("cointegrating regression failed".to_string())
        })?;
        let adf = adf_regression(&residuals, self.lags).ok_or_else(|| {
            DiscoveryError::SingularRegression("residual ADF regression failed".to_string())
        })?;
        let p_value = mackinnon_p_value(adf.statistic, 2);
        let critical_value = mackinnon_critical_value(significance, 2);
        Ok(CointegrationOutcome {
            outcome: TestOutcome {
                statistic: adf.statistic,
                p_value,
                critical_value,
                rejected: p_value <= significance,
            },
            hedge_ratio: Some(beta),
            // Both negative: more negative τ is stronger evidence
            strength: adf.statistic / critical_value,
        })
    }
}

/// Cointegration test selected by configuration.
pub fn cointegration_test(method: CointegrationMethod) -> Box<dyn CointegrationTest> {
    match method {
        CointegrationMethod::Johansen => Box::new(JohansenTrace),
        CointegrationMethod::EngleGranger => Box::new(EngleGranger::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn cointegrated(n: usize, beta: f64, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        let (mut xv, mut s) = (50.0, 0.0);
        for _ in 0..n {
            xv += noise.sample(&mut rng);
            s = 0.7 * s + noise.sample(&mut rng);
            x.push(xv);
            y.push(beta * xv + 5.0 + s);
        }
        (y, x)
    }

    #[test]
    fn test_both_methods_detect_cointegration() {
        let (y, x) = cointegrated(800, 2.0, 17);
        for method in [CointegrationMethod::Johansen, CointegrationMethod::EngleGranger] {
            let test = cointegration_test(method);
            let result = test.test(&y, &x, 0.05).unwrap();
            assert!(result.outcome.rejected, "{} failed: {result:?}", test.name());
            assert!(result.strength > 1.0);
            let beta = result.hedge_ratio.unwrap();
            assert!((beta - 2.0).abs() < 0.1, "{} beta = {beta}", test.name());
        }
    }

    #[test]
    fn test_adf_outcome_on_stationary_series() {
        let (y, x) = cointegrated(800, 1.0, 3);
        let spread: Vec<f64> = y.iter().zip(&x).map(|(a, b)| a - b).collect();
        let outcome = AugmentedDickeyFuller::default().test(&spread, 0.05).unwrap();
        assert!(outcome.rejected);
        assert!(outcome.statistic < outcome.critical_value);
        assert_eq!(outcome.critical_value, -2.86);
    }

    #[test]
    fn test_adf_degenerate_series_is_error() {
        let result = AugmentedDickeyFuller::default().test(&[1.0; 40], 0.05);
        assert!(matches!(result, Err(DiscoveryError::SingularRegression(_))));
    }
}
