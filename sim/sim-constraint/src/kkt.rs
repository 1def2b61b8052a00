//! KKT solver for equality- and inequality-constrained quadratic steps.
//!
//! Solves
//!
//! ```text
//! minimize   1/2 dq^T S dq - f^T dq
//! subject to G dq  = bg
//!            N dq >= bn
//! ```
//!
//! with stationarity `S dq - f = G^T lambda + N^T theta`, `theta >= 0`.
//!
//! Equality rows are handled by a null-space method built on an SVD of the
//! stacked active rows, so redundant rows are tolerated. The reduced Hessian
//! is factored with nalgebra's Cholesky, with a relative pivot check on top. Inequality rows go through a primal active-set
//! loop.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use sim_types::{Result, SimError};
use tracing::{trace, warn};

/// Symmetry class of the solve matrix `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KktMatrixType {
    /// Symmetric, possibly indefinite: failed pivots are perturbed.
    #[default]
    Symmetric,
    /// Symmetric positive definite: a failed factorization is an error.
    SymmetricPositiveDefinite,
}

/// Solution of one KKT solve.
#[derive(Debug, Clone)]
pub struct KktSolution {
    /// Primal step.
    pub dq: DVector<f64>,
    /// Equality multipliers.
    pub lambda: DVector<f64>,
    /// Inequality multipliers; zero for inactive rows.
    pub theta: DVector<f64>,
}

/// Dense KKT solver.
#[derive(Debug, Clone)]
pub struct KktSolver {
    matrix_type: KktMatrixType,
    size: usize,
    num_bilateral: usize,
    s: DMatrix<f64>,
    g: DMatrix<f64>,
    n: DMatrix<f64>,
    tol: f64,
    perturbed_pivots: usize,
}

impl Default for KktSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KktSolver {
    /// Create a solver with no system analyzed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            matrix_type: KktMatrixType::Symmetric,
            size: 0,
            num_bilateral: 0,
            s: DMatrix::zeros(0, 0),
            g: DMatrix::zeros(0, 0),
            n: DMatrix::zeros(0, 0),
            tol: 1e-12,
            perturbed_pivots: 0,
        }
    }

    /// Record the structure of a system: the size of `S`, the number of
    /// equality rows, and the symmetry class.
    pub fn analyze(
        &mut self,
        s: &DMatrix<f64>,
        g: &DMatrix<f64>,
        matrix_type: KktMatrixType,
    ) -> Result<()> {
        if !s.is_square() {
            return Err(SimError::size_mismatch("KKT solve matrix", s.nrows(), s.ncols()));
        }
        if g.ncols() != s.nrows() {
            return Err(SimError::size_mismatch("KKT bilateral columns", s.nrows(), g.ncols()));
        }
        self.matrix_type = matrix_type;
        self.size = s.nrows();
        self.num_bilateral = g.nrows();
        Ok(())
    }

    /// Load the numeric values of a system previously analyzed.
    pub fn factor(&mut self, s: &DMatrix<f64>, g: &DMatrix<f64>, n: &DMatrix<f64>) -> Result<()> {
        if s.shape() != (self.size, self.size) {
            return Err(SimError::size_mismatch("KKT solve matrix", self.size, s.nrows()));
        }
        if g.shape() != (self.num_bilateral, self.size) {
            return Err(SimError::size_mismatch("KKT bilateral rows", self.num_bilateral, g.nrows()));
        }
        if n.ncols() != self.size && n.nrows() > 0 {
            return Err(SimError::size_mismatch("KKT unilateral columns", self.size, n.ncols()));
        }
        self.s = s.clone();
        self.g = g.clone();
        self.n = if n.nrows() == 0 {
            DMatrix::zeros(0, self.size)
        } else {
            n.clone()
        };
        self.perturbed_pivots = 0;
        Ok(())
    }

    /// Number of Cholesky pivots perturbed since the last [`factor`](Self::factor).
    #[must_use]
    pub fn num_perturbed_pivots(&self) -> usize {
        self.perturbed_pivots
    }

    /// Solve for the step and multipliers.
    pub fn solve(
        &mut self,
        f: &DVector<f64>,
        bg: &DVector<f64>,
        bn: &DVector<f64>,
    ) -> Result<KktSolution> {
        if f.len() != self.size {
            return Err(SimError::size_mismatch("KKT right-hand side", self.size, f.len()));
        }
        if bg.len() != self.g.nrows() {
            return Err(SimError::size_mismatch("KKT bilateral offsets", self.g.nrows(), bg.len()));
        }
        if bn.len() != self.n.nrows() {
            return Err(SimError::size_mismatch("KKT unilateral offsets", self.n.nrows(), bn.len()));
        }

        let mg = self.g.nrows();
        let mn = self.n.nrows();
        let mut active: Vec<usize> = (0..mn).collect();
        let max_passes = 2 * mn + 5;

        let mut dq = DVector::zeros(self.size);
        let mut mult = DVector::zeros(mg);
        let mut solved = active.clone();
        for pass in 0..max_passes {
            let (a, b) = self.stacked_rows(&active, bg, bn);
            dq = self.solve_equality(f, &a, &b)?;
            mult = multipliers(&self.s, f, &a, &dq)?;
            solved.clone_from(&active);

            // release the most negative inequality multiplier
            let release = active
                .iter()
                .enumerate()
                .map(|(k, &row)| (k, row, mult[mg + k]))
                .filter(|&(_, _, theta)| theta < -self.tol)
                .min_by(|x, y| x.2.total_cmp(&y.2));
            if let Some((k, row, theta)) = release {
                trace!(pass, row, theta, "releasing unilateral row");
                active.remove(k);
                continue;
            }

            // admit the most violated inactive row
            let violation = (0..mn)
                .filter(|row| !active.contains(row))
                .map(|row| (row, self.n.row(row).dot(&dq.transpose()) - bn[row]))
                .filter(|&(_, r)| r < -self.tol)
                .min_by(|x, y| x.1.total_cmp(&y.1));
            match violation {
                Some((row, r)) => {
                    trace!(pass, row, residual = r, "admitting unilateral row");
                    active.push(row);
                    active.sort_unstable();
                }
                None => break,
            }
        }

        let lambda = mult.rows(0, mg).into_owned();
        let mut theta = DVector::zeros(mn);
        for (k, &row) in solved.iter().enumerate() {
            if mg + k < mult.len() {
                theta[row] = mult[mg + k].max(0.0);
            }
        }
        Ok(KktSolution { dq, lambda, theta })
    }

    fn stacked_rows(
        &self,
        active: &[usize],
        bg: &DVector<f64>,
        bn: &DVector<f64>,
    ) -> (DMatrix<f64>, DVector<f64>) {
        let mg = self.g.nrows();
        let rows = mg + active.len();
        let a = DMatrix::from_fn(rows, self.size, |i, j| {
            if i < mg {
                self.g[(i, j)]
            } else {
                self.n[(active[i - mg], j)]
            }
        });
        let b = DVector::from_fn(rows, |i, _| if i < mg { bg[i] } else { bn[active[i - mg]] });
        (a, b)
    }

    /// Minimize over `A dq = b` by the null-space method.
    fn solve_equality(
        &mut self,
        f: &DVector<f64>,
        a: &DMatrix<f64>,
        b: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let n = self.size;
        let (dq_p, proj) = if a.nrows() == 0 {
            (DVector::zeros(n), DMatrix::identity(n, n))
        } else {
            let pinv = pseudo_inverse(a, PINV_TOL)?;
            let dq_p = &pinv * b;
            let proj = DMatrix::identity(n, n) - &pinv * a;
            (dq_p, proj)
        };

        // (P S P + (I - P)) y = P (f - S dq_p)
        let reduced = &proj * &self.s * &proj + (DMatrix::identity(n, n) - &proj);
        let rhs = &proj * (f - &self.s * &dq_p);
        let y = self.cholesky_solve(reduced, &rhs)?;
        Ok(dq_p + &proj * y)
    }

    fn cholesky_solve(&mut self, m: DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let n = m.nrows();
        if let Some(chol) = checked_cholesky(m.clone()) {
            return Ok(chol.solve(rhs));
        }
        if self.matrix_type == KktMatrixType::SymmetricPositiveDefinite {
            return Err(SimError::NotPositiveDefinite {
                what: "KKT reduced matrix".into(),
            });
        }
        let scale = (m.trace().abs() / n.max(1) as f64).max(1.0);
        let mut delta = 1e-10 * scale;
        for _ in 0..12 {
            self.perturbed_pivots += 1;
            if let Some(chol) = checked_cholesky(&m + DMatrix::identity(n, n) * delta) {
                warn!(delta, "perturbed KKT reduced matrix to factor it");
                return Ok(chol.solve(rhs));
            }
            delta *= 10.0;
        }
        Err(SimError::NotPositiveDefinite {
            what: "KKT reduced matrix after perturbation".into(),
        })
    }
}

/// Pivots at or below this fraction of the largest diagonal entry fail.
const PIVOT_TOL: f64 = 1e-13;

/// Relative singular value cutoff of the pseudo-inverse.
const PINV_TOL: f64 = 1e-10;

/// Cholesky factorization that also rejects pivots that are positive but
/// negligible next to the largest diagonal entry.
fn checked_cholesky(m: DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    let max_diag = m.diagonal().iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
    let min_pivot = PIVOT_TOL * max_diag.max(f64::MIN_POSITIVE);
    let chol = m.cholesky()?;
    let l = chol.l_dirty();
    (0..l.nrows())
        .all(|j| {
            let pivot = l[(j, j)] * l[(j, j)];
            pivot.is_finite() && pivot > min_pivot
        })
        .then_some(chol)
}

/// Moore-Penrose pseudo-inverse with a cutoff relative to the largest
/// singular value.
fn pseudo_inverse(a: &DMatrix<f64>, rel_tol: f64) -> Result<DMatrix<f64>> {
    if a.is_empty() {
        return Ok(DMatrix::zeros(a.ncols(), a.nrows()));
    }
    let svd = a.clone().svd(true, true);
    let smax = svd.singular_values.max();
    let eps = rel_tol * smax.max(f64::MIN_POSITIVE);
    svd.pseudo_inverse(eps)
        .map_err(|e| SimError::numerical_failure(format!("pseudo-inverse: {e}")))
}

/// Least-squares multipliers from `A^T x = S dq - f`.
fn multipliers(
    s: &DMatrix<f64>,
    f: &DVector<f64>,
    a: &DMatrix<f64>,
    dq: &DVector<f64>,
) -> Result<DVector<f64>> {
    if a.nrows() == 0 {
        return Ok(DVector::zeros(0));
    }
    let r = s * dq - f;
    Ok(pseudo_inverse(&a.transpose(), PINV_TOL)? * r)
}
