//! Johansen trace test for a two-variable system.
//!
//! VECM with a constant (series demeaned) and one lagged difference:
//!
//! ```text
//! Δz[t] = Π z[t-1] + Γ Δz[t-1] + c + e,   z = [y, x]
//! ```
//!
//! Concentrating out Γ leaves residual moment matrices S00, S01, S11; the
//! eigenvalues λ of S11⁻¹ S10 S00⁻¹ S01 give the trace statistics
//! `-n Σ ln(1 - λ_i)` for the hypotheses rank = 0 and rank ≤ 1.

use crate::math::linalg::{mat2_inverse, mat2_mul, mat2_transpose, Mat2};

use super::error::DiscoveryError;

/// Trace critical values for rank 0, two variables, constant term
/// (90%, 95%, 99%). Osterwald-Lenum.
pub const TRACE_CRITICAL_R0: [f64; 3] = [13.4294, 15.4943, 19.9349];

/// Trace critical values for rank ≤ 1 (90%, 95%, 99%).
pub const TRACE_CRITICAL_R1: [f64; 3] = [2.7055, 3.8415, 6.6349];

const SIGNIFICANCE_LEVELS: [f64; 3] = [0.10, 0.05, 0.01];

/// Result of the trace test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JohansenResult {
    /// Eigenvalues, descending
    pub eigenvalues: [f64; 2],
    /// Trace statistic for H0: rank = 0
    pub trace_r0: f64,
    /// Trace statistic for H0: rank ≤ 1
    pub trace_r1: f64,
    /// Cointegrating vector for the largest eigenvalue, ordered [y, x]
    pub eigenvector: [f64; 2],
    /// Observations in the concentrated regression
    pub nobs: usize,
}

impl JohansenResult {
    /// Static hedge ratio implied by the cointegrating vector:
    /// `v0·y + v1·x` stationary ⇒ `y ≈ (-v1/v0)·x`.
    pub fn hedge_ratio(&self) -> Option<f64> {
        let [v0, v1] = self.eigenvector;
        if v0.abs() < f64::EPSILON {
            return None;
        }
        let beta = -v1 / v0;
        beta.is_finite().then_some(beta)
    }

    /// Critical value of the rank-0 trace statistic at `significance`.
    pub fn critical_value(significance: f64) -> f64 {
        TRACE_CRITICAL_R0[level_index(significance)]
    }

    /// Upper bound on the p-value from the tabulated levels: the smallest
    /// level at which rank 0 is rejected, or 1.0 when it never is.
    pub fn p_value(&self) -> f64 {
        for idx in (0..3).rev() {
            if self.trace_r0 >= TRACE_CRITICAL_R0[idx] {
                return SIGNIFICANCE_LEVELS[idx];
            }
        }
        1.0
    }

    /// Whether rank 0 is rejected at `significance`.
    pub fn rejects_no_cointegration(&self, significance: f64) -> bool {
        self.trace_r0 >= Self::critical_value(significance)
    }
}

fn level_index(significance: f64) -> usize {
    if significance <= 0.01 {
        2
    } else if significance <= 0.05 {
        1
    } else {
        0
    }
}

/// Run the trace test on aligned series `y` and `x`.
pub fn johansen_trace(y: &[f64], x: &[f64]) -> Result<JohansenResult, DiscoveryError> {
    if y.len() != x.len() {
        return Err(DiscoveryError::InsufficientData {
            expected: y.len(),
            actual: x.len(),
        });
    }
    let t = y.len();
    if t < 10 {
        return Err(DiscoveryError::InsufficientData {
            expected: 10,
            actual: t,
        });
    }

    // Rows run over t = 2..T: Δz[t], Δz[t-1], z[t-1]
    let n = t - 2;
    let mut d0 = Vec::with_capacity(n);
    let mut d1 = Vec::with_capacity(n);
    let mut lv = Vec::with_capacity(n);
    for i in 2..t {
        d0.push([y[i] - y[i - 1], x[i] - x[i - 1]]);
        d1.push([y[i - 1] - y[i - 2], x[i - 1] - x[i - 2]]);
        lv.push([y[i - 1], x[i - 1]]);
    }
    demean(&mut d0);
    demean(&mut d1);
    demean(&mut lv);

    let r0 = residualize(&d0, &d1)?;
    let r1 = residualize(&lv, &d1)?;

    let nf = n as f64;
    let s00 = scale(cross(&r0, &r0), nf);
    let s11 = scale(cross(&r1, &r1), nf);
    let s01 = scale(cross(&r0, &r1), nf);
    let s10 = mat2_transpose(&s01);

    let s00_inv = mat2_inverse(&s00)
        .ok_or_else(|| DiscoveryError::SingularRegression("S00 is singular".to_string()))?;
    let s11_inv = mat2_inverse(&s11)
        .ok_or_else(|| DiscoveryError::SingularRegression("S11 is singular".to_string()))?;

    let m = mat2_mul(&s11_inv, &mat2_mul(&s10, &mat2_mul(&s00_inv, &s01)));
    let (lambda_max, lambda_min) = eigenvalues(&m)?;

    let l1 = lambda_max.clamp(0.0, 1.0 - 1e-12);
    let l2 = lambda_min.clamp(0.0, 1.0 - 1e-12);
    let trace_r1 = -nf * (1.0 - l2).ln();
    let trace_r0 = -nf * (1.0 - l1).ln() + trace_r1;

    Ok(JohansenResult {
        eigenvalues: [lambda_max, lambda_min],
        trace_r0,
        trace_r1,
        eigenvector: eigenvector(&m, lambda_max),
        nobs: n,
    })
}

fn demean(rows: &mut [[f64; 2]]) {
    let n = rows.len() as f64;
    let mut mean = [0.0; 2];
    for r in rows.iter() {
        mean[0] += r[0] / n;
        mean[1] += r[1] / n;
    }
    for r in rows.iter_mut() {
        r[0] -= mean[0];
        r[1] -= mean[1];
    }
}

/// Σ a[t]' b[t]
fn cross(a: &[[f64; 2]], b: &[[f64; 2]]) -> Mat2 {
    let mut out = [[0.0; 2]; 2];
    for (ra, rb) in a.iter().zip(b) {
        for i in 0..2 {
            for j in 0..2 {
                out[i][j] += ra[i] * rb[j];
            }
        }
    }
    out
}

fn scale(m: Mat2, n: f64) -> Mat2 {
    [[m[0][0] / n, m[0][1] / n], [m[1][0] / n, m[1][1] / n]]
}

/// Residuals of regressing each column of `target` on `regressors`.
fn residualize(
    target: &[[f64; 2]],
    regressors: &[[f64; 2]],
) -> Result<Vec<[f64; 2]>, DiscoveryError> {
    let zz = cross(regressors, regressors);
    let zt = cross(regressors, target);
    let zz_inv = mat2_inverse(&zz).ok_or_else(|| {
        DiscoveryError::SingularRegression("lagged differences are collinear".to_string())
    })?;
    let coef = mat2_mul(&zz_inv, &zt);
    Ok(target
        .iter()
        .zip(regressors)
        .map(|(t, z)| {
            [
                t[0] - (z[0] * coef[0][0] + z[1] * coef[1][0]),
                t[1] - (z[0] * coef[0][1] + z[1] * coef[1][1]),
            ]
        })
        .collect())
}

/// Real eigenvalues of a 2x2 matrix, (larger, smaller).
fn eigenvalues(m: &Mat2) -> Result<(f64, f64), DiscoveryError> {
    let tr = m[0][0] + m[1][1];
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    let disc = tr * tr / 4.0 - det;
    if !disc.is_finite() {
        return Err(DiscoveryError::SingularRegression(
            "eigenvalue problem is not finite".to_string(),
        ));
    }
    // The product matrix is similar to a symmetric PSD one; a slightly
    // negative discriminant is rounding.
    let root = disc.max(0.0).sqrt();
    Ok((tr / 2.0 + root, tr / 2.0 - root))
}

fn eigenvector(m: &Mat2, lambda: f64) -> [f64; 2] {
    let v = if m[0][1].abs() > 1e-15 {
        [m[0][1], lambda - m[0][0]]
    } else if m[1][0].abs() > 1e-15 {
        [lambda - m[1][1], m[1][0]]
    } else if (m[0][0] - lambda).abs() <= (m[1][1] - lambda).abs() {
        [1.0, 0.0]
    } else {
        [0.0, 1.0]
    };
    let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if norm > 0.0 {
        [v[0] / norm, v[1] / norm]
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_walk(n: usize, rng: &mut StdRng) -> Vec<f64> {
        let noise = Normal::new(0.0, 1.0).unwrap();
        let mut v = 100.0;
        (0..n)
            .map(|_| {
                v += noise.sample(rng);
                v
            })
            .collect()
    }

    #[test]
    fn test_cointegrated_pair_rejects_rank_zero() {
        let mut rng = StdRng::seed_from_u64(42);
        let noise = Normal::new(0.0, 1.0).unwrap();
        let x = random_walk(1000, &mut rng);
        let mut s = 0.0;
        let y: Vec<f64> = x
            .iter()
            .map(|xi| {
                s = 0.8 * s + noise.sample(&mut rng);
                1.5 * xi + 10.0 + s
            })
            .collect();

        let result = johansen_trace(&y, &x).unwrap();
        assert!(result.trace_r0 > TRACE_CRITICAL_R0[2], "{result:?}");
        assert!(result.rejects_no_cointegration(0.05));
        assert_eq!(result.p_value(), 0.01);

        let beta = result.hedge_ratio().unwrap();
        assert!((beta - 1.5).abs() < 0.1, "beta = {beta}");
    }

    #[test]
    fn test_independent_walks_usually_not_cointegrated() {
        let mut rng = StdRng::seed_from_u64(1234);
        let x = random_walk(1000, &mut rng);
        let y = random_walk(1000, &mut rng);
        let result = johansen_trace(&y, &x).unwrap();
        assert!(result.eigenvalues[0] >= result.eigenvalues[1]);
        assert!(result.trace_r0 >= result.trace_r1);
        assert!(result.trace_r0 < TRACE_CRITICAL_R0[2], "{result:?}");
    }

    #[test]
    fn test_constant_series_is_singular() {
        let y = vec![1.0; 100];
        let x: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert!(matches!(
            johansen_trace(&y, &x),
            Err(DiscoveryError::SingularRegression(_))
        ));
    }

    #[test]
    fn test_short_series_is_insufficient() {
        assert!(matches!(
            johansen_trace(&[1.0, 2.0], &[1.0, 2.0]),
            Err(DiscoveryError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_p_value_buckets() {
        let mut r = JohansenResult {
            eigenvalues: [0.0, 0.0],
            trace_r0: 16.0,
            trace_r1: 0.0,
            eigenvector: [1.0, -1.0],
            nobs: 100,
        };
        assert_eq!(r.p_value(), 0.05);
        r.trace_r0 = 5.0;
        assert_eq!(r.p_value(), 1.0);
        assert_eq!(r.hedge_ratio(), Some(1.0));
    }
}
