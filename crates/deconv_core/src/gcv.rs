//! Generalized Cross-Validation parameter selection.
//!
//! Tikhonov-style filters pick alpha by minimizing the GCV functional over
//! the interval spanned by the spectral magnitudes; TSVD picks a cutoff by
//! ranking singular magnitudes against the cumulative residual energy.

use std::cmp::Ordering;

use ndarray::ArrayD;

use crate::float_trait::DeconvFloat;
use crate::fmin::fmin;

/// GCV-optimal alpha for the plain Tikhonov filter `1/(s^2 + alpha^2)`.
///
/// Minimizes `f(alpha) = sum((|bhat|*phi)^2) / (sum phi)^2` over
/// `[min|s|, max|s|]`.
pub fn gcv_tikhonov<F: DeconvFloat>(s_mag: &ArrayD<F>, b_mag: &ArrayD<F>) -> F {
    let smin = s_mag.iter().copied().fold(F::infinity(), F::min);
    let smax = s_mag.iter().copied().fold(F::neg_infinity(), F::max);
    let s2: Vec<F> = s_mag.iter().map(|&v| v * v).collect();
    let b: Vec<F> = b_mag.iter().copied().collect();
    fmin(
        smin,
        smax,
        |alpha| {
            let a2 = alpha * alpha;
            let mut sum_phi = F::zero();
            let mut num = F::zero();
            for (&s2i, &bi) in s2.iter().zip(b.iter()) {
                let phi = F::one() / (s2i + a2);
                sum_phi += phi;
                let t = bi * phi;
                num += t * t;
            }
            num / (sum_phi * sum_phi)
        },
        F::FMIN_TOL,
    )
}

/// GCV-optimal alpha for the generalized Tikhonov filter with operator
/// spectrum `sa` and regularization-stencil spectrum `sd`:
/// `phi = sd^2 / (sa^2 + alpha^2 * sd^2)`, searched over `[min|sa|, max|sa|]`.
pub fn gcv_gtikhonov<F: DeconvFloat>(
    sa_mag: &ArrayD<F>,
    sd_mag: &ArrayD<F>,
    b_mag: &ArrayD<F>,
) -> F {
    let smin = sa_mag.iter().copied().fold(F::infinity(), F::min);
    let smax = sa_mag.iter().copied().fold(F::neg_infinity(), F::max);
    let sa2: Vec<F> = sa_mag.iter().map(|&v| v * v).collect();
    let sd2: Vec<F> = sd_mag.iter().map(|&v| v * v).collect();
    let b: Vec<F> = b_mag.iter().copied().collect();
    fmin(
        smin,
        smax,
        |alpha| {
            let a2 = alpha * alpha;
            let mut sum_phi = F::zero();
            let mut num = F::zero();
            for ((&sa2i, &sd2i), &bi) in sa2.iter().zip(sd2.iter()).zip(b.iter()) {
                let phi = sd2i / (sa2i + a2 * sd2i);
                sum_phi += phi;
                let t = bi * phi;
                num += t * t;
            }
            num / (sum_phi * sum_phi)
        },
        F::FMIN_TOL,
    )
}

/// Singular magnitudes sorted descending alongside the GCV ranking curve
/// `G[k] = rho[k] / (n-k-1)^2`, with tied adjacent magnitudes marked
/// infinite so a cutoff never falls between equal singular values.
pub(crate) fn tsvd_gcv_curve<F: DeconvFloat>(s_mag: &[F], b_mag: &[F]) -> (Vec<F>, Vec<F>) {
    let n = s_mag.len();
    let mut indices: Vec<usize> = (0..n).collect();
    // Descending, NaNs last.
    indices.sort_by(|&a, &b| {
        let (x, y) = (s_mag[a], s_mag[b]);
        match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        }
    });
    let s: Vec<F> = indices.iter().map(|&i| s_mag[i]).collect();
    let b: Vec<F> = indices.iter().map(|&i| b_mag[i]).collect();

    // Cumulative residual energy from the tail.
    let mut g = vec![F::zero(); n - 1];
    let mut rho = b[n - 1] * b[n - 1];
    g[n - 2] = rho;
    for k in (1..=n - 2).rev() {
        rho += b[k] * b[k];
        let denom = F::usize_as(n - k) * F::usize_as(n - k);
        g[k - 1] = rho / denom;
    }
    for k in 0..n.saturating_sub(3) {
        if s[k] == s[k + 1] {
            g[k] = F::infinity();
        }
    }
    (s, g)
}

/// Cutoff magnitude for the TSVD filter: the singular magnitude at the
/// minimum of the GCV ranking curve.
pub fn tsvd_cutoff<F: DeconvFloat>(s_mag: &ArrayD<F>, b_mag: &ArrayD<F>) -> F {
    let s_flat: Vec<F> = s_mag.iter().copied().collect();
    let b_flat: Vec<F> = b_mag.iter().copied().collect();
    if s_flat.len() < 2 {
        return s_flat.first().copied().unwrap_or_else(F::zero);
    }
    let (s, g) = tsvd_gcv_curve(&s_flat, &b_flat);
    let mut best = 0;
    for (k, &v) in g.iter().enumerate() {
        if v < g[best] {
            best = k;
        }
    }
    s[best]
}
