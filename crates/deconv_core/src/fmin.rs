//! Derivative-free 1D minimization over a bracketing interval.
//!
//! Golden-section search with parabolic interpolation (Forsythe, Malcolm and
//! Moler's `fmin`). The GCV functionals minimized here are smooth and
//! unimodal over the singular-value interval, so convergence is fast; the
//! returned abscissa is within roughly `eps*|x| + tol/3` of a local minimum.

use crate::float_trait::DeconvFloat;

/// Find an approximate minimizer of `f` on `[a, b]`.
pub fn fmin<F, G>(a: F, b: F, f: G, tol: F) -> F
where
    F: DeconvFloat,
    G: Fn(F) -> F,
{
    let half = F::from_f64_c(0.5);
    let two = F::from_f64_c(2.0);
    let three = F::from_f64_c(3.0);
    // Squared inverse of the golden ratio.
    let c = half * (three - F::from_f64_c(5.0).sqrt());

    let eps = F::machine_eps().sqrt();
    let tol3 = tol / three;

    let (mut a, mut b) = (a, b);
    let mut v = a + c * (b - a);
    let mut w = v;
    let mut x = v;
    let mut d = F::zero();
    let mut e = F::zero();
    let mut fx = f(x);
    let mut fv = fx;
    let mut fw = fx;

    loop {
        let xm = half * (a + b);
        let tol1 = eps * x.abs() + tol3;
        let t2 = two * tol1;

        if (x - xm).abs() <= t2 - half * (b - a) {
            return x;
        }

        let mut p = F::zero();
        let mut q = F::zero();
        let mut r = F::zero();

        if e.abs() > tol1 {
            // Fit a parabola through (v, fv), (w, fw), (x, fx).
            r = (x - w) * (fx - fv);
            q = (x - v) * (fx - fw);
            p = (x - v) * q - (x - w) * r;
            q = two * (q - r);
            if q > F::zero() {
                p = -p;
            } else {
                q = -q;
            }
            r = e;
            e = d;
        }

        if p.abs() < (half * q * r).abs() && p > q * (a - x) && p < q * (b - x) {
            // Parabolic interpolation step.
            d = p / q;
            let u = x + d;
            if u - a < t2 || b - u < t2 {
                d = if x < xm { tol1 } else { -tol1 };
            }
        } else {
            // Golden-section step.
            e = if x < xm { b - x } else { a - x };
            d = c * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else if d > F::zero() {
            x + tol1
        } else {
            x - tol1
        };
        let fu = f(u);

        if fu <= fx {
            if u < x {
                b = x;
            } else {
                a = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_minimum() {
        let x = fmin(0.0f64, 5.0, |x| (x - 2.0) * (x - 2.0), 1e-8);
        assert!((x - 2.0).abs() < 1e-6, "got {x}");
    }

    #[test]
    fn test_quartic_minimum() {
        let x = fmin(-3.0f64, 3.0, |x| x.powi(4) - 2.0 * x * x, 1e-10);
        // Minima at +-1; the bracketing keeps the search inside [-3, 3].
        assert!((x.abs() - 1.0).abs() < 1e-5, "got {x}");
    }

    #[test]
    fn test_monotone_returns_boundary() {
        // Strictly decreasing on the interval: converges to the right end.
        let x = fmin(0.0f64, 1.0, |x| -x, 1e-8);
        assert!(x > 0.999, "got {x}");
    }

    #[test]
    fn test_f32_precision() {
        let x = fmin(0.0f32, 4.0, |x| (x - 1.5) * (x - 1.5), 1e-4);
        assert!((x - 1.5).abs() < 1e-3, "got {x}");
    }
}
