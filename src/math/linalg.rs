//! Small dense linear algebra used by the statistical tests.
//!
//! Regressions in discovery have at most a handful of regressors, so a
//! Gauss-Jordan inverse of the normal equations is both adequate and cheap.

/// 2x2 matrix, row-major.
pub type Mat2 = [[f64; 2]; 2];

/// Pivot magnitude below which a matrix is treated as singular.
const SINGULAR_EPS: f64 = 1e-12;

/// Result of an ordinary least squares fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Coefficients, in the same order as the regressor columns.
    pub coefficients: Vec<f64>,
    /// Standard errors of the coefficients.
    pub std_errors: Vec<f64>,
    /// In-sample residuals `y - X b`.
    pub residuals: Vec<f64>,
    /// Residual variance estimate `SSE / (n - k)`.
    pub sigma2: f64,
}

impl OlsFit {
    /// t-statistic of coefficient `i`.
    pub fn t_stat(&self, i: usize) -> Option<f64> {
        let se = *self.std_errors.get(i)?;
        if se <= 0.0 || !se.is_finite() {
            return None;
        }
        Some(self.coefficients[i] / se)
    }
}

/// Fit `y = X b + e` where `columns` holds the regressors column by column.
///
/// Returns `None` when dimensions mismatch, there are no residual degrees of
/// freedom, or `X'X` is numerically singular.
pub fn ols(y: &[f64], columns: &[Vec<f64>]) -> Option<OlsFit> {
    let n = y.len();
    let k = columns.len();
    if k == 0 || n <= k || columns.iter().any(|c| c.len() != n) {
        return None;
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for i in 0..k {
        for j in i..k {
            let v: f64 = columns[i].iter().zip(&columns[j]).map(|(a, b)| a * b).sum();
            xtx[i][j] = v;
            xtx[j][i] = v;
        }
        xty[i] = columns[i].iter().zip(y).map(|(a, b)| a * b).sum();
    }

    let inv = invert(xtx)?;
    let coefficients: Vec<f64> = (0..k)
        .map(|i| (0..k).map(|j| inv[i][j] * xty[j]).sum())
        .collect();

    let residuals: Vec<f64> = (0..n)
        .map(|t| {
            let fitted: f64 = (0..k).map(|i| coefficients[i] * columns[i][t]).sum();
            y[t] - fitted
        })
        .collect();

    let sse: f64 = residuals.iter().map(|r| r * r).sum();
    let sigma2 = sse / (n - k) as f64;
    let std_errors = (0..k).map(|i| (sigma2 * inv[i][i]).max(0.0).sqrt()).collect();

    if coefficients.iter().any(|c| !c.is_finite()) {
        return None;
    }

    Some(OlsFit {
        coefficients,
        std_errors,
        residuals,
        sigma2,
    })
}

/// Simple regression with intercept: returns `(alpha, beta)` for `y = alpha + beta x`.
pub fn ols_with_intercept(y: &[f64], x: &[f64]) -> Option<(f64, f64)> {
    let ones = vec![1.0; x.len()];
    let fit = ols(y, &[ones, x.to_vec()])?;
    Some((fit.coefficients[0], fit.coefficients[1]))
}

/// Gauss-Jordan inverse with partial pivoting.
fn invert(mut a: Vec<Vec<f64>>) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()))
        .max(1.0);
    let mut inv: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| {
            a[r1][col]
                .abs()
                .partial_cmp(&a[r2][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row][col].abs() < SINGULAR_EPS * scale {
            return None;
        }
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = a[col][col];
        for j in 0..n {
            a[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = a[row][col];
                if factor != 0.0 {
                    for j in 0..n {
                        a[row][j] -= factor * a[col][j];
                        inv[row][j] -= factor * inv[col][j];
                    }
                }
            }
        }
    }
    Some(inv)
}

#[inline]
pub fn mat2_mul(a: &Mat2, b: &Mat2) -> Mat2 {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

#[inline]
pub fn mat2_det(a: &Mat2) -> f64 {
    a[0][0] * a[1][1] - a[0][1] * a[1][0]
}

#[inline]
pub fn mat2_transpose(a: &Mat2) -> Mat2 {
    [[a[0][0], a[1][0]], [a[0][1], a[1][1]]]
}

pub fn mat2_inverse(a: &Mat2) -> Option<Mat2> {
    let det = mat2_det(a);
    let scale = a
        .iter()
        .flat_map(|r| r.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()));
    if !det.is_finite() || det.abs() <= SINGULAR_EPS * scale * scale {
        return None;
    }
    Some([
        [a[1][1] / det, -a[0][1] / det],
        [-a[1][0] / det, a[0][0] / det],
    ])
}
