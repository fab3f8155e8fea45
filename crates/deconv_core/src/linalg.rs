//! Small dense linear algebra for the hybrid bidiagonalization solver.
//!
//! The projected problems HyBR solves are tiny (one row and column per
//! iteration), so a one-sided Jacobi SVD is plenty and keeps the crate free
//! of a LAPACK binding.

use ndarray::{Array1, Array2};

use crate::float_trait::DeconvFloat;

/// Lower bidiagonal matrix of shape `(k+1, k)`, grown one Lanczos step at a
/// time.
#[derive(Debug, Clone)]
pub struct Bidiagonal<F: DeconvFloat> {
    diag: Vec<F>,
    subdiag: Vec<F>,
}

impl<F: DeconvFloat> Bidiagonal<F> {
    pub fn new() -> Self {
        Self {
            diag: Vec::new(),
            subdiag: Vec::new(),
        }
    }

    /// Appends one column: `alpha` on the diagonal, `beta` below it.
    pub fn push(&mut self, alpha: F, beta: F) {
        self.diag.push(alpha);
        self.subdiag.push(beta);
    }

    pub fn cols(&self) -> usize {
        self.diag.len()
    }

    pub fn rows(&self) -> usize {
        self.diag.len() + 1
    }

    /// Entry below the diagonal of column `j`.
    pub fn subdiag(&self, j: usize) -> F {
        self.subdiag[j]
    }

    pub fn to_dense(&self) -> Array2<F> {
        let k = self.cols();
        let mut dense = Array2::zeros((k + 1, k));
        for j in 0..k {
            dense[[j, j]] = self.diag[j];
            dense[[j + 1, j]] = self.subdiag[j];
        }
        dense
    }
}

impl<F: DeconvFloat> Default for Bidiagonal<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Full SVD `A = U diag(s) Vᵀ` of an `m x n` matrix with `m >= n`:
/// `u` is `m x m`, `s` has `n` entries in descending order, `v` is `n x n`.
pub struct Svd<F: DeconvFloat> {
    pub u: Array2<F>,
    pub s: Vec<F>,
    pub v: Array2<F>,
}

/// One-sided Jacobi SVD. Rotates column pairs of a working copy of `A`
/// until they are mutually orthogonal; the column norms are the singular
/// values and the accumulated rotations give `V`.
pub fn svd_full<F: DeconvFloat>(a: &Array2<F>) -> Svd<F> {
    let (m, n) = a.dim();
    debug_assert!(m >= n);
    let mut w = a.clone();
    let mut v = Array2::eye(n);
    let eps = F::machine_eps();
    let max_sweeps = 30;

    for _ in 0..max_sweeps {
        let mut rotated = false;
        for p in 0..n {
            for q in (p + 1)..n {
                let mut app = F::zero();
                let mut aqq = F::zero();
                let mut apq = F::zero();
                for i in 0..m {
                    app += w[[i, p]] * w[[i, p]];
                    aqq += w[[i, q]] * w[[i, q]];
                    apq += w[[i, p]] * w[[i, q]];
                }
                if apq.abs() <= eps * (app * aqq).sqrt() {
                    continue;
                }
                rotated = true;
                let two = F::usize_as(2);
                let zeta = (aqq - app) / (two * apq);
                let t = if zeta >= F::zero() {
                    F::one() / (zeta + (F::one() + zeta * zeta).sqrt())
                } else {
                    -F::one() / (-zeta + (F::one() + zeta * zeta).sqrt())
                };
                let c = F::one() / (F::one() + t * t).sqrt();
                let s = c * t;
                for i in 0..m {
                    let wp = w[[i, p]];
                    let wq = w[[i, q]];
                    w[[i, p]] = c * wp - s * wq;
                    w[[i, q]] = s * wp + c * wq;
                }
                for i in 0..n {
                    let vp = v[[i, p]];
                    let vq = v[[i, q]];
                    v[[i, p]] = c * vp - s * vq;
                    v[[i, q]] = s * vp + c * vq;
                }
            }
        }
        if !rotated {
            break;
        }
    }

    // Column norms are the singular values; sort descending.
    let mut order: Vec<usize> = (0..n).collect();
    let mut sigma: Vec<F> = (0..n)
        .map(|j| {
            let mut sum = F::zero();
            for i in 0..m {
                sum += w[[i, j]] * w[[i, j]];
            }
            sum.sqrt()
        })
        .collect();
    order.sort_by(|&a, &b| {
        sigma[b]
            .partial_cmp(&sigma[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sigma.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut u = Array2::zeros((m, m));
    let mut v_sorted = Array2::zeros((n, n));
    let mut filled = 0usize;
    for (dst, &src) in order.iter().enumerate() {
        for i in 0..n {
            v_sorted[[i, dst]] = v[[i, src]];
        }
        if sigma[dst] > F::zero() {
            for i in 0..m {
                u[[i, dst]] = w[[i, src]] / sigma[dst];
            }
            filled = dst + 1;
        }
    }
    complete_basis(&mut u, filled);

    Svd {
        u,
        s: sigma,
        v: v_sorted,
    }
}

/// Extends the first `filled` orthonormal columns of `u` to a full basis by
/// Gram-Schmidt over the standard basis vectors.
fn complete_basis<F: DeconvFloat>(u: &mut Array2<F>, filled: usize) {
    let m = u.nrows();
    let mut next = filled;
    let mut candidate = 0usize;
    while next < m && candidate < m {
        let mut vec: Array1<F> = Array1::zeros(m);
        vec[candidate] = F::one();
        candidate += 1;
        // Project out the existing columns twice for stability.
        for _ in 0..2 {
            for j in 0..next {
                let mut dot = F::zero();
                for i in 0..m {
                    dot += vec[i] * u[[i, j]];
                }
                for i in 0..m {
                    vec[i] -= dot * u[[i, j]];
                }
            }
        }
        let mut norm = F::zero();
        for i in 0..m {
            norm += vec[i] * vec[i];
        }
        let norm = norm.sqrt();
        if norm > F::sqrt_eps() {
            for i in 0..m {
                u[[i, next]] = vec[i] / norm;
            }
            next += 1;
        }
    }
}

/// `y = Aᵀ x` for a dense m x n matrix and a length-m vector.
pub fn mat_t_vec<F: DeconvFloat>(a: &Array2<F>, x: &[F]) -> Vec<F> {
    let (m, n) = a.dim();
    let mut y = vec![F::zero(); n];
    for j in 0..n {
        let mut sum = F::zero();
        for i in 0..m {
            sum += a[[i, j]] * x[i];
        }
        y[j] = sum;
    }
    y
}

/// `y = A x` for a dense m x n matrix and a length-n vector.
pub fn mat_vec<F: DeconvFloat>(a: &Array2<F>, x: &[F]) -> Vec<F> {
    let (m, n) = a.dim();
    let mut y = vec![F::zero(); m];
    for i in 0..m {
        let mut sum = F::zero();
        for j in 0..n {
            sum += a[[i, j]] * x[j];
        }
        y[i] = sum;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn reconstruct(svd: &Svd<f64>, m: usize, n: usize) -> Array2<f64> {
        let mut out = Array2::zeros((m, n));
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += svd.u[[i, k]] * svd.s[k] * svd.v[[j, k]];
                }
                out[[i, j]] = sum;
            }
        }
        out
    }

    fn assert_orthonormal(q: &Array2<f64>) {
        let k = q.ncols();
        for a in 0..k {
            for b in 0..k {
                let mut dot = 0.0;
                for i in 0..q.nrows() {
                    dot += q[[i, a]] * q[[i, b]];
                }
                let want = if a == b { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(dot, want, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_svd_diagonal_matrix() {
        let mut a = Array2::zeros((3, 2));
        a[[0, 0]] = 3.0;
        a[[1, 1]] = 5.0;
        let svd = svd_full(&a);
        assert_relative_eq!(svd.s[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(svd.s[1], 3.0, epsilon = 1e-12);
        assert_orthonormal(&svd.u);
        assert_orthonormal(&svd.v);
    }

    #[test]
    fn test_svd_reconstructs_bidiagonal() {
        let mut bd = Bidiagonal::new();
        bd.push(2.0, 1.0);
        bd.push(1.5, 0.5);
        bd.push(0.75, 0.25);
        let dense = bd.to_dense();
        let svd = svd_full(&dense);
        let back = reconstruct(&svd, 4, 3);
        for i in 0..4 {
            for j in 0..3 {
                assert_abs_diff_eq!(dense[[i, j]], back[[i, j]], epsilon = 1e-10);
            }
        }
        assert!(svd.s[0] >= svd.s[1] && svd.s[1] >= svd.s[2]);
        assert_orthonormal(&svd.u);
    }

    #[test]
    fn test_svd_rank_deficient() {
        // Two proportional columns: second singular value is zero but U must
        // still be a complete orthonormal basis.
        let mut a = Array2::zeros((3, 2));
        for i in 0..3 {
            a[[i, 0]] = (i + 1) as f64;
            a[[i, 1]] = 2.0 * (i + 1) as f64;
        }
        let svd = svd_full(&a);
        assert_abs_diff_eq!(svd.s[1], 0.0, epsilon = 1e-10);
        assert_orthonormal(&svd.u);
    }

    #[test]
    fn test_bidiagonal_layout() {
        let mut bd = Bidiagonal::<f64>::new();
        bd.push(1.0, 2.0);
        bd.push(3.0, 4.0);
        let dense = bd.to_dense();
        assert_eq!(dense.dim(), (3, 2));
        assert_eq!(dense[[0, 0]], 1.0);
        assert_eq!(dense[[1, 0]], 2.0);
        assert_eq!(dense[[1, 1]], 3.0);
        assert_eq!(dense[[2, 1]], 4.0);
        assert_eq!(dense[[0, 1]], 0.0);
    }

    #[test]
    fn test_mat_vec_round_trip() {
        let mut a = Array2::zeros((3, 2));
        a[[0, 0]] = 1.0;
        a[[0, 1]] = 2.0;
        a[[1, 0]] = 3.0;
        a[[2, 1]] = 4.0;
        let y = mat_vec(&a, &[1.0, 1.0]);
        assert_eq!(y, vec![3.0, 3.0, 4.0]);
        let z = mat_t_vec(&a, &[1.0, 1.0, 1.0]);
        assert_eq!(z, vec![4.0, 6.0]);
    }
}
