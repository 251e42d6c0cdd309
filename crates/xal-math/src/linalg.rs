//! Linear algebra utilities.
//!
//! LU factorization with partial pivoting for small fixed-size systems, and
//! Jacobi eigendecomposition of real symmetric matrices.

use ndarray::{Array1, Array2};

/// LU factorization `P·A = L·U` of an N×N matrix, packed in place.
#[derive(Debug, Clone, Copy)]
pub struct LuFactors<const N: usize> {
    lu: [[f64; N]; N],
    perm: [usize; N],
    swaps: usize,
}

impl<const N: usize> LuFactors<N> {
    /// Factor `a`. Returns `None` when a pivot column is exactly zero.
    pub fn factor(a: &[[f64; N]; N]) -> Option<Self> {
        let mut lu = *a;
        let mut perm = [0usize; N];
        for (i, p) in perm.iter_mut().enumerate() {
            *p = i;
        }
        let mut swaps = 0;

        for k in 0..N {
            let mut pivot_row = k;
            let mut pivot_abs = lu[k][k].abs();
            for (r, row) in lu.iter().enumerate().skip(k + 1) {
                if row[k].abs() > pivot_abs {
                    pivot_abs = row[k].abs();
                    pivot_row = r;
                }
            }
            if pivot_abs == 0.0 || !pivot_abs.is_finite() {
                return None;
            }
            if pivot_row != k {
                lu.swap(pivot_row, k);
                perm.swap(pivot_row, k);
                swaps += 1;
            }
            for r in (k + 1)..N {
                let factor = lu[r][k] / lu[k][k];
                lu[r][k] = factor;
                for c in (k + 1)..N {
                    lu[r][c] -= factor * lu[k][c];
                }
            }
        }

        Some(Self { lu, perm, swaps })
    }

    pub fn determinant(&self) -> f64 {
        let diag: f64 = (0..N).map(|i| self.lu[i][i]).product();
        if self.swaps % 2 == 0 {
            diag
        } else {
            -diag
        }
    }

    /// Solve `A·x = b` using the stored factors.
    pub fn solve(&self, b: &[f64; N]) -> [f64; N] {
        let mut y = [0.0; N];
        for i in 0..N {
            let mut sum = b[self.perm[i]];
            for (j, yj) in y.iter().enumerate().take(i) {
                sum -= self.lu[i][j] * yj;
            }
            y[i] = sum;
        }
        let mut x = [0.0; N];
        for i in (0..N).rev() {
            let mut sum = y[i];
            for (j, xj) in x.iter().enumerate().skip(i + 1) {
                sum -= self.lu[i][j] * xj;
            }
            x[i] = sum / self.lu[i][i];
        }
        x
    }
}

/// Eigendecomposition of a real symmetric matrix by cyclic Jacobi rotations.
///
/// Returns (eigenvalues, eigenvectors) with eigenvectors stored as columns,
/// so that `A = V · diag(λ) · Vᵀ`. Eigenvalues are not sorted; column `k`
/// of `V` belongs to eigenvalue `k`.
pub fn symmetric_eigen(a: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols(), "symmetric_eigen requires a square matrix");

    let mut m = a.clone();
    let mut v = Array2::eye(n);
    let max_sweeps = 100;

    for _ in 0..max_sweeps {
        let mut off_diag = 0.0;
        let mut scale = 0.0;
        for i in 0..n {
            scale += m[[i, i]].abs();
            for j in (i + 1)..n {
                off_diag += m[[i, j]].abs();
            }
        }
        if off_diag <= 1e-15 * scale.max(f64::MIN_POSITIVE) {
            break;
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if m[[i, j]].abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let tau = (m[[j, j]] - m[[i, i]]) / (2.0 * m[[i, j]]);
                let t = if tau >= 0.0 {
                    1.0 / (tau + (1.0 + tau * tau).sqrt())
                } else {
                    -1.0 / (-tau + (1.0 + tau * tau).sqrt())
                };
                let cos = 1.0 / (1.0 + t * t).sqrt();
                let sin = t * cos;

                let mii = m[[i, i]];
                let mjj = m[[j, j]];
                let mij = m[[i, j]];
                m[[i, i]] = mii - t * mij;
                m[[j, j]] = mjj + t * mij;
                m[[i, j]] = 0.0;
                m[[j, i]] = 0.0;

                for r in 0..n {
                    if r == i || r == j {
                        continue;
                    }
                    let ri = m[[r, i]];
                    let rj = m[[r, j]];
                    m[[r, i]] = cos * ri - sin * rj;
                    m[[i, r]] = m[[r, i]];
                    m[[r, j]] = sin * ri + cos * rj;
                    m[[j, r]] = m[[r, j]];
                }

                for r in 0..n {
                    let vi = v[[r, i]];
                    let vj = v[[r, j]];
                    v[[r, i]] = cos * vi - sin * vj;
                    v[[r, j]] = sin * vi + cos * vj;
                }
            }
        }
    }

    let eigenvalues = Array1::from_shape_fn(n, |i| m[[i, i]]);
    (eigenvalues, v)
}
