//! Householder QR with column pivoting.
//!
//! `A P = Q R`, where at every step the remaining column of largest norm is
//! moved to the front. The magnitudes on the diagonal of `R` are then
//! non-increasing, which makes the factorization rank revealing.

use nalgebra::{DMatrix, DVector};

/// Column-pivoted QR factorization of a dense matrix.
///
/// nalgebra's `ColPivQR` pivots on the largest single entry of the trailing
/// block, so its `R` diagonal is not ordered and its pivot order does not
/// rank columns by remaining norm. Rank decisions and the choice of which
/// requests stay independent both rely on the norm order kept here.
///
/// # Example
///
/// ```
/// use nalgebra::DMatrix;
/// use sim_constraint::PivotedQr;
///
/// // second column is twice the first
/// let a = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 0.0, 0.0, 1.0, 2.0]);
/// let qr = PivotedQr::factor(&a);
/// assert_eq!(qr.rank(1e-10), 1);
/// assert_eq!(qr.column_permutation()[0], 1);
/// ```
#[derive(Debug, Clone)]
pub struct PivotedQr {
    r: DMatrix<f64>,
    /// Householder vectors, each of length `m - k` for step `k`.
    reflectors: Vec<DVector<f64>>,
    perm: Vec<usize>,
}

impl PivotedQr {
    /// Factor `a`.
    #[must_use]
    pub fn factor(a: &DMatrix<f64>) -> Self {
        let (m, n) = a.shape();
        let mut r = a.clone();
        let mut perm: Vec<usize> = (0..n).collect();
        let steps = m.min(n);
        let mut reflectors = Vec::with_capacity(steps);

        for k in 0..steps {
            // pivot: largest remaining column norm below row k
            let mut best = k;
            let mut best_norm = -1.0;
            for j in k..n {
                let norm = r.view((k, j), (m - k, 1)).norm_squared();
                if norm > best_norm {
                    best_norm = norm;
                    best = j;
                }
            }
            if best != k {
                r.swap_columns(k, best);
                perm.swap(k, best);
            }

            let x: DVector<f64> = r.view((k, k), (m - k, 1)).column(0).into_owned();
            let xnorm = x.norm();
            let mut v = x;
            if xnorm > 0.0 {
                let alpha = if v[0] >= 0.0 { -xnorm } else { xnorm };
                v[0] -= alpha;
                let vnorm = v.norm();
                if vnorm > 0.0 {
                    v /= vnorm;
                    let mut block = r.view_mut((k, k), (m - k, n - k));
                    let proj = v.transpose() * &block;
                    block -= &v * proj * 2.0;
                } else {
                    v.fill(0.0);
                }
            } else {
                v.fill(0.0);
            }
            reflectors.push(v);
        }

        Self {
            r,
            reflectors,
            perm,
        }
    }

    /// Number of rows of the factored matrix.
    #[must_use]
    pub fn nrows(&self) -> usize {
        self.r.nrows()
    }

    /// Number of columns of the factored matrix.
    #[must_use]
    pub fn ncols(&self) -> usize {
        self.r.ncols()
    }

    /// Absolute values of the diagonal of `R`.
    #[must_use]
    pub fn r_diagonal(&self) -> Vec<f64> {
        (0..self.reflectors.len()).map(|k| self.r[(k, k)].abs()).collect()
    }

    /// Numerical rank relative to the largest diagonal entry of `R`.
    #[must_use]
    pub fn rank(&self, tol: f64) -> usize {
        let diag = self.r_diagonal();
        match diag.first() {
            Some(&d0) if d0 > 0.0 => diag.iter().take_while(|&&d| d > tol * d0).count(),
            _ => 0,
        }
    }

    /// Numerical rank with an absolute tolerance.
    #[must_use]
    pub fn abs_rank(&self, tol: f64) -> usize {
        self.r_diagonal().iter().take_while(|&&d| d > tol).count()
    }

    /// First `rank` columns of the orthogonal factor Q.
    #[must_use]
    pub fn q(&self, rank: usize) -> DMatrix<f64> {
        let m = self.r.nrows();
        let rank = rank.min(m);
        let mut q = DMatrix::<f64>::identity(m, rank);
        for (k, v) in self.reflectors.iter().enumerate().rev() {
            let mut block = q.view_mut((k, 0), (m - k, rank));
            let proj = v.transpose() * &block;
            block -= v * proj * 2.0;
        }
        q
    }

    /// Column permutation: entry `k` is the original index of column `k`
    /// of `A P`.
    #[must_use]
    pub fn column_permutation(&self) -> &[usize] {
        &self.perm
    }

    /// The upper-triangular factor.
    #[must_use]
    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn permuted(a: &DMatrix<f64>, perm: &[usize]) -> DMatrix<f64> {
        DMatrix::from_fn(a.nrows(), perm.len(), |i, j| a[(i, perm[j])])
    }

    #[test]
    fn test_reconstruction() {
        let a = DMatrix::from_row_slice(
            4,
            3,
            &[1.0, 4.0, 0.5, 2.0, -1.0, 0.0, 0.0, 3.0, 1.0, 1.0, 0.0, -2.0],
        );
        let qr = PivotedQr::factor(&a);
        assert_eq!(qr.rank(1e-12), 3);
        let q = qr.q(4);
        let ap = permuted(&a, qr.column_permutation());
        let recon = &q * qr.r();
        assert_relative_eq!(recon, ap, epsilon = 1e-12);
        assert_relative_eq!(q.transpose() * &q, DMatrix::identity(4, 4), epsilon = 1e-12);
    }

    #[test]
    fn test_diagonal_non_increasing() {
        let a = DMatrix::from_row_slice(3, 3, &[0.1, 5.0, 1.0, 0.0, 1.0, 2.0, 0.2, 0.0, 3.0]);
        let d = PivotedQr::factor(&a).r_diagonal();
        assert!(d.windows(2).all(|w| w[0] + 1e-12 >= w[1]));
    }

    #[test]
    fn test_pivots_on_column_norm() {
        // column 0 holds the largest entry, column 1 the largest norm
        let a = DMatrix::from_row_slice(3, 2, &[3.0, 2.0, 0.0, 2.0, 0.0, 2.0]);
        let qr = PivotedQr::factor(&a);
        assert_eq!(qr.column_permutation(), &[1, 0]);
        assert_relative_eq!(qr.r_diagonal()[0], 12f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_rank_deficient() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 1.0, 0.0, 1.0]);
        let qr = PivotedQr::factor(&a);
        assert_eq!(qr.rank(1e-10), 2);
        assert_eq!(qr.abs_rank(1e-10), 2);
        // leading Q columns span the column space
        let q = qr.q(2);
        let col = a.column(2).into_owned();
        let residual = &col - &q * (q.transpose() * &col);
        assert_relative_eq!(residual.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_and_zero() {
        let qr = PivotedQr::factor(&DMatrix::zeros(3, 0));
        assert_eq!(qr.rank(1e-7), 0);
        assert_eq!(qr.q(0).shape(), (3, 0));

        let qr = PivotedQr::factor(&DMatrix::zeros(2, 2));
        assert_eq!(qr.rank(1e-7), 0);
        assert_eq!(qr.abs_rank(1e-7), 0);
    }
}
