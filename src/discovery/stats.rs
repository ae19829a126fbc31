//! Statistical primitives for pair screening
//!
//! Correlation, AR(1) half-life and the augmented Dickey-Fuller regression
//! with MacKinnon (2010) approximate p-values.

use crate::math::linalg::{ols, ols_with_intercept};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

/// Maximum safe price ratio for level correlations.
/// Beyond this ratio, f64 precision loss may affect results
const MAX_PRICE_RATIO: f64 = 1e9;

/// Minimum observations for the ADF regression to be meaningful
pub const ADF_MIN_OBSERVATIONS: usize = 20;

/// Calculate Pearson correlation coefficient between two series
///
/// Returns a value in [-1.0, 1.0], or None when the series are mismatched,
/// too short, or either has zero variance.
///
/// # Mathematical Definition
/// r = Σ[(xi - x̄)(yi - ȳ)] / √[Σ(xi - x̄)² × Σ(yi - ȳ)²]
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }

    let n = a.len() as f64;
    let mean_a: f64 = a.iter().sum::<f64>() / n;
    let mean_b: f64 = b.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        covariance += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }

    let correlation = covariance / (var_a.sqrt() * var_b.sqrt());
    correlation.is_finite().then_some(correlation)
}

/// Pearson correlation of price levels with a precision guard.
///
/// Returns None if the mean price ratio exceeds `MAX_PRICE_RATIO`.
pub fn level_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mean_a: f64 = a.iter().sum::<f64>() / a.len() as f64;
    let mean_b: f64 = b.iter().sum::<f64>() / b.len() as f64;

    if mean_b != 0.0 {
        let ratio = (mean_a / mean_b).abs();
        if !(1.0 / MAX_PRICE_RATIO..=MAX_PRICE_RATIO).contains(&ratio) {
            warn!(
                ratio = format!("{:.2e}", ratio),
                limit = format!("{:.2e}", MAX_PRICE_RATIO),
                "Price ratio exceeds safe bounds for correlation calculation"
            );
            return None;
        }
    }
    pearson(a, b)
}

/// One-period simple returns. Non-positive base prices yield 0.0.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// Sample mean and standard deviation.
pub fn mean_std(series: &[f64]) -> (f64, f64) {
    if series.len() < 2 {
        return (series.first().copied().unwrap_or(0.0), 0.0);
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// OLS spread `y - (alpha + beta x)` together with its coefficients.
pub fn ols_spread(y: &[f64], x: &[f64]) -> Option<(f64, f64, Vec<f64>)> {
    let (alpha, beta) = ols_with_intercept(y, x)?;
    let spread = y
        .iter()
        .zip(x)
        .map(|(yi, xi)| yi - alpha - beta * xi)
        .collect();
    Some((alpha, beta, spread))
}

/// AR(1) coefficient φ of `s[t] = c + φ s[t-1] + e`.
pub fn ar1_coefficient(series: &[f64]) -> Option<f64> {
    if series.len() < 3 {
        return None;
    }
    let lagged = &series[..series.len() - 1];
    let current = &series[1..];
    ols_with_intercept(current, lagged).map(|(_, phi)| phi)
}

/// Mean-reversion half-life for an AR(1) coefficient.
///
/// half_life = ln(2) / -ln(φ). Only defined for 0 < φ < 1; φ ≥ 1 is a unit
/// root or explosive, φ ≤ 0 oscillates.
pub fn half_life(phi: f64) -> Option<f64> {
    if phi > 0.0 && phi < 1.0 {
        Some(std::f64::consts::LN_2 / -phi.ln())
    } else {
        None
    }
}

/// Raw output of the ADF regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfRegression {
    /// t-statistic of γ in Δs[t] = α + γ s[t-1] + Σ δ Δs[t-i] + e
    pub statistic: f64,
    /// Estimated γ
    pub gamma: f64,
    /// Observations used in the regression
    pub nobs: usize,
}

/// Augmented Dickey-Fuller regression with a constant and `lags` lagged
/// differences.
///
/// # Mathematical Foundation
/// Under H0 (unit root): s[t] = s[t-1] + ε  (non-stationary random walk)
/// Under H1 (stationary): γ = ρ - 1 < 0
///
/// Returns None for short or degenerate (constant) series.
pub fn adf_regression(series: &[f64], lags: usize) -> Option<AdfRegression> {
    if series.len() < ADF_MIN_OBSERVATIONS.max(lags + 3) {
        return None;
    }

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    // Row t of the regression uses diffs[t], series[t], diffs[t-1..t-lags]
    let start = lags;
    let nobs = diffs.len() - start;

    let dy: Vec<f64> = diffs[start..].to_vec();
    let mut columns = Vec::with_capacity(lags + 2);
    columns.push(vec![1.0; nobs]);
    columns.push(series[start..start + nobs].to_vec());
    for lag in 1..=lags {
        columns.push(diffs[start - lag..start - lag + nobs].to_vec());
    }

    let fit = ols(&dy, &columns)?;
    let statistic = fit.t_stat(1)?;
    statistic.is_finite().then_some(AdfRegression {
        statistic,
        gamma: fit.coefficients[1],
        nobs,
    })
}

// MacKinnon (2010) response surface, constant-only regression.
// Index 0: single series (ADF). Index 1: two-variable residual (Engle-Granger).
const TAU_MAX: [f64; 2] = [2.74, 0.92];
const TAU_MIN: [f64; 2] = [-18.83, -18.86];
const TAU_STAR: [f64; 2] = [-1.61, -2.62];
const TAU_SMALLP: [[f64; 3]; 2] = [[2.1659, 1.4412, 0.038269], [2.92, 1.5012, 0.039796]];
const TAU_LARGEP: [[f64; 4]; 2] = [
    [1.7339, 0.93202, -0.12745, -0.010368],
    [2.1945, 0.64695, -0.29198, -0.042377],
];

/// Asymptotic critical values (1%, 5%, 10%) for the same two cases.
const TAU_CRITICAL: [[f64; 3]; 2] = [[-3.43, -2.86, -2.57], [-3.90, -3.34, -3.04]];

/// Approximate p-value of a Dickey-Fuller τ statistic.
///
/// `n_vars` is 1 for a plain ADF test and 2 for residuals of a two-variable
/// cointegrating regression.
pub fn mackinnon_p_value(tau: f64, n_vars: usize) -> f64 {
    let idx = n_vars.clamp(1, 2) - 1;
    if tau > TAU_MAX[idx] {
        return 1.0;
    }
    if tau < TAU_MIN[idx] {
        return 0.0;
    }
    let poly = if tau <= TAU_STAR[idx] {
        let c = TAU_SMALLP[idx];
        c[0] + c[1] * tau + c[2] * tau * tau
    } else {
        let c = TAU_LARGEP[idx];
        c[0] + c[1] * tau + c[2] * tau * tau + c[3] * tau * tau * tau
    };
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(poly),
        Err(_) => 1.0,
    }
}

/// Critical τ at a tabulated significance level (0.01, 0.05 or 0.10).
pub fn mackinnon_critical_value(significance: f64, n_vars: usize) -> f64 {
    let idx = n_vars.clamp(1, 2) - 1;
    let col = if significance <= 0.01 {
        0
    } else if significance <= 0.05 {
        1
    } else {
        2
    };
    TAU_CRITICAL[idx][col]
}
