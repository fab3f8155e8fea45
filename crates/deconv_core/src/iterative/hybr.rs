//! Hybrid bidiagonalization regularization: Lanczos bidiagonalization of the
//! blur operator with a weighted-GCV Tikhonov solve on the small projected
//! problem, and a GCV-curve stopping rule with bump detection.

use log::debug;
use ndarray::ArrayD;

use crate::error::{DeconvError, DeconvResult};
use crate::float_trait::DeconvFloat;
use crate::fmin::fmin;
use crate::image::{validate_shapes, Blurred, Deblurred, PixelType, PsfBank};
use crate::iterative::{apply_threshold, axpy, IterativeConfig, Preconditioning};
use crate::linalg::{mat_t_vec, mat_vec, svd_full, Bidiagonal, Svd};
use crate::operator::BlurOperator;
use crate::preconditioner::FftPreconditioner;
use crate::utils::{inner_product, norm2};

/// Regularization parameter selection for the projected Tikhonov solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegMethod<F: DeconvFloat> {
    /// Standard GCV (`omega = 1`).
    Gcv,
    /// Weighted GCV with a fixed weight.
    Wgcv { omega: F },
    /// Weighted GCV with the weight re-estimated each iteration and
    /// averaged over the run.
    AdaptWgcv,
    /// Caller-supplied parameter, no search.
    Fixed { alpha: F },
}

#[derive(Debug, Clone)]
pub struct HybrOptions<F: DeconvFloat> {
    pub reg_method: RegMethod<F>,
    /// First iteration (1-based) at which regularization is applied.
    pub beg_reg: usize,
    /// Relative flatness of the GCV curve that stops the iteration.
    pub flat_tol: F,
    /// Reorthogonalize the Lanczos vectors each step.
    pub reorth: bool,
}

impl<F: DeconvFloat> Default for HybrOptions<F> {
    fn default() -> Self {
        Self {
            reg_method: RegMethod::AdaptWgcv,
            beg_reg: 2,
            flat_tol: F::from_f64_c(1e-6),
            reorth: false,
        }
    }
}

pub struct HybrDeconvolver<F: DeconvFloat> {
    op: BlurOperator<F>,
    precond: Option<FftPreconditioner<F>>,
    b: ArrayD<F>,
    output: PixelType,
    max_iterations: usize,
    options: HybrOptions<F>,
    gcv: Vec<F>,
}

impl<F: DeconvFloat> HybrDeconvolver<F> {
    pub fn new(
        image: &Blurred<F>,
        bank: &PsfBank<F>,
        config: &IterativeConfig<F>,
        options: HybrOptions<F>,
    ) -> DeconvResult<Self> {
        validate_shapes(image.data(), &bank.tiles()[0])?;
        if config.max_iterations == 0 {
            return Err(DeconvError::BadConfig(
                "HyBR needs at least one iteration".into(),
            ));
        }
        if options.beg_reg < 2 {
            return Err(DeconvError::BadConfig(
                "beg_reg must be at least 2".into(),
            ));
        }
        let op = BlurOperator::new(
            bank,
            image.shape(),
            config.boundary,
            config.resize,
            config.exec,
        )?;
        let precond = match config.preconditioner {
            Preconditioning::None => None,
            Preconditioning::Fft { tolerance } => Some(FftPreconditioner::new(
                bank,
                image.data(),
                config.boundary,
                config.resize,
                tolerance,
                config.exec,
            )?),
        };
        Ok(Self {
            op,
            precond,
            b: image.data().clone(),
            output: config.output.resolve(image.pixel_type()),
            max_iterations: config.max_iterations,
            options,
            gcv: Vec::new(),
        })
    }

    /// GCV stopping values recorded per iteration (the first `beg_reg`
    /// slots are placeholders).
    pub fn gcv_curve(&self) -> &[F] {
        &self.gcv
    }

    fn forward(&mut self, v: &ArrayD<F>) -> ArrayD<F> {
        let y = self.op.apply(v, false);
        match self.precond.as_mut() {
            Some(p) => p.solve(&y, false),
            None => y,
        }
    }

    fn adjoint(&mut self, u: &ArrayD<F>) -> ArrayD<F> {
        match self.precond.as_mut() {
            Some(p) => {
                let t = p.solve(u, true);
                self.op.apply(&t, true)
            }
            None => self.op.apply(u, true),
        }
    }

    pub fn deblur(&mut self, threshold: Option<F>) -> DeconvResult<Deblurred<F>> {
        let beg_reg = self.options.beg_reg;
        let flat_tol = self.options.flat_tol;
        let reorth = self.options.reorth;
        let n_cols = F::usize_as(self.op.working_len());

        let mut u_basis: Vec<ArrayD<F>> = Vec::new();
        let mut v_basis: Vec<ArrayD<F>> = Vec::new();
        let mut bd = Bidiagonal::new();

        let beta = match self.precond.as_mut() {
            None => {
                let beta = norm2(&self.b);
                let mut u0 = self.b.clone();
                u0.mapv_inplace(|v| v / beta);
                u_basis.push(u0);
                beta
            }
            Some(p) => {
                let mut u0 = p.solve(&self.b, false);
                let beta = norm2(&u0);
                u0.mapv_inplace(|v| v / beta);
                u_basis.push(u0);
                beta
            }
        };
        if !beta.is_finite() || beta == F::zero() {
            return Err(DeconvError::BadConfig("observed image is all zero".into()));
        }

        self.gcv = vec![F::zero(); beg_reg];
        let mut omegas: Vec<F> = Vec::new();
        let mut warning = false;
        let mut iterations_save = 0usize;
        let mut x_out: Option<ArrayD<F>> = None;
        let mut x_save: Option<ArrayD<F>> = None;
        let mut x_last: Option<ArrayD<F>> = None;
        let mut iterations = 0usize;

        for i in 0..=self.max_iterations {
            self.lanczos_step(&mut u_basis, &mut v_basis, &mut bd, reorth);
            if i == 0 {
                continue;
            }
            debug!("HyBR iteration {}/{}", i, self.max_iterations);
            iterations = i;
            let k = bd.cols();
            let mut rhs = vec![F::zero(); k + 1];
            rhs[0] = beta;
            if i < beg_reg - 1 {
                continue;
            }
            let svd = svd_full(&bd.to_dense());
            let bhat = mat_t_vec(&svd.u, &rhs);
            let omega = match self.options.reg_method {
                RegMethod::AdaptWgcv => {
                    let est = find_omega(&bhat, &svd.s).min(F::one());
                    omegas.push(est);
                    let sum: F = omegas.iter().fold(F::zero(), |a, &b| a + b);
                    sum / F::usize_as(omegas.len())
                }
                RegMethod::Wgcv { omega } => omega,
                _ => F::one(),
            };
            let (f, alpha) = tikhonov_project(&svd, &bhat, self.options.reg_method, omega);
            let u_row0: Vec<F> = (0..=k).map(|j| svd.u[[0, j]]).collect();
            self.gcv
                .push(gcv_stop(alpha, &u_row0, &svd.s, beta, n_cols));

            if i > 1 {
                if (self.gcv[i] - self.gcv[i - 1]).abs() / self.gcv[beg_reg] < flat_tol {
                    x_out = Some(combine(&v_basis, &f));
                    break;
                } else if warning && self.gcv.len() > iterations_save + 3 {
                    let mut bump = false;
                    for j in iterations_save..self.gcv.len() - 1 {
                        if self.gcv[iterations_save] > self.gcv[j + 1] {
                            bump = true;
                        }
                    }
                    if !bump {
                        x_out = x_save.take();
                        break;
                    }
                    warning = false;
                    x_save = None;
                    iterations_save = self.max_iterations;
                } else if !warning && self.gcv[i - 1] < self.gcv[i] {
                    warning = true;
                    x_save = Some(combine(&v_basis, &f));
                    iterations_save = i;
                }
            }
            x_last = Some(combine(&v_basis, &f));
        }

        let mut x = match x_out.or(x_last) {
            Some(x) => x,
            // beg_reg beyond the iteration budget produced no solve.
            None => self.b.clone(),
        };
        apply_threshold(&mut x, threshold);
        Ok(Deblurred {
            data: x,
            pixel_type: self.output,
            alpha: None,
            iterations: Some(iterations),
        })
    }

    /// One Golub-Kahan step: extends `u_basis`, `v_basis` and the bidiagonal
    /// matrix by one column.
    fn lanczos_step(
        &mut self,
        u_basis: &mut Vec<ArrayD<F>>,
        v_basis: &mut Vec<ArrayD<F>>,
        bd: &mut Bidiagonal<F>,
        reorth: bool,
    ) {
        let k = u_basis.len();
        let mut v = self.adjoint(&u_basis[k - 1]);
        if k >= 2 {
            axpy(&mut v, &v_basis[k - 2], -bd.subdiag(k - 2));
            if reorth {
                for vj in v_basis.iter() {
                    let d = inner_product(vj, &v);
                    axpy(&mut v, vj, -d);
                }
            }
        }
        let alpha = norm2(&v);
        v.mapv_inplace(|x| x / alpha);
        let mut u = self.forward(&v);
        axpy(&mut u, &u_basis[k - 1], -alpha);
        if reorth {
            for uj in u_basis.iter() {
                let d = inner_product(uj, &u);
                axpy(&mut u, uj, -d);
            }
        }
        let beta = norm2(&u);
        u.mapv_inplace(|x| x / beta);
        u_basis.push(u);
        v_basis.push(v);
        bd.push(alpha, beta);
    }
}

fn combine<F: DeconvFloat>(v_basis: &[ArrayD<F>], f: &[F]) -> ArrayD<F> {
    let mut x = ArrayD::zeros(v_basis[0].raw_dim());
    for (vj, &fj) in v_basis.iter().zip(f.iter()) {
        axpy(&mut x, vj, fj);
    }
    x
}

/// Solves the projected Tikhonov problem from the SVD of the bidiagonal
/// matrix, returning the projected solution and the chosen parameter.
fn tikhonov_project<F: DeconvFloat>(
    svd: &Svd<F>,
    bhat: &[F],
    method: RegMethod<F>,
    omega: F,
) -> (Vec<F>, F) {
    let alpha = match method {
        RegMethod::Fixed { alpha } => alpha,
        _ => fmin(
            F::zero(),
            F::one(),
            |a| wgcv_curve(a, bhat, &svd.s, omega),
            F::FMIN_TOL,
        ),
    };
    let a2 = alpha * alpha;
    let coeff: Vec<F> = svd
        .s
        .iter()
        .enumerate()
        .map(|(i, &si)| bhat[i] * si / (si * si + a2))
        .collect();
    (mat_vec(&svd.v, &coeff), alpha)
}

/// Weighted GCV objective on the projected problem.
fn wgcv_curve<F: DeconvFloat>(alpha: F, bhat: &[F], s: &[F], omega: F) -> F {
    let m = bhat.len();
    let n = s.len();
    let a2 = alpha * alpha;
    let t0: F = bhat[n..]
        .iter()
        .fold(F::zero(), |acc, &b| acc + b * b);
    let mut num = F::zero();
    let mut denom = F::usize_as(m - n);
    for (i, &si) in s.iter().enumerate() {
        let s2 = si * si;
        let work = F::one() / (s2 + a2);
        let t1 = a2 * work;
        let t2 = t1 * bhat[i];
        num += t2 * t2;
        denom += (F::one() - omega) * s2 * work + t1;
    }
    F::usize_as(n) * (num + t0) / (denom * denom)
}

/// Optimal WGCV weight estimate from the current projected spectrum.
fn find_omega<F: DeconvFloat>(bhat: &[F], s: &[F]) -> F {
    let m = bhat.len();
    let n = s.len();
    let alpha = s[n - 1];
    let a2 = alpha * alpha;
    let t0: F = bhat[n..]
        .iter()
        .fold(F::zero(), |acc, &b| acc + b * b);
    let mut t1 = F::zero();
    let mut t3 = F::zero();
    let mut t4 = F::zero();
    let mut t5 = F::zero();
    let mut v2 = F::zero();
    for (i, &si) in s.iter().enumerate() {
        let s2 = si * si;
        let tt = F::one() / (s2 + a2);
        let tt3 = tt * tt * tt;
        t1 += s2 * tt;
        let sb = alpha * si * bhat[i];
        t3 += tt3 * sb * sb;
        let st = si * tt;
        t4 += st * st;
        let tb = tt * bhat[i] * a2;
        t5 += tb * tb;
        let sb2 = si * bhat[i];
        v2 += tt3 * sb2 * sb2;
    }
    (F::usize_as(m) * a2 * v2) / (t1 * t3 + t4 * (t5 + t0))
}

/// GCV value of the full problem at the projected solution, used by the
/// stopping rule. `n` is the column count of the blur matrix.
fn gcv_stop<F: DeconvFloat>(alpha: F, u_row0: &[F], s: &[F], beta: F, n: F) -> F {
    let k = s.len();
    let a2 = alpha * alpha;
    let beta2 = beta * beta;
    let mut num = F::zero();
    let mut trace = F::zero();
    for (i, &si) in s.iter().enumerate() {
        let s2 = si * si;
        let t1 = F::one() / (s2 + a2);
        let t2 = t1 * u_row0[i] * a2;
        num += t2 * t2;
        trace += t1 * s2;
    }
    num += u_row0[k] * u_row0[k];
    let num = beta2 * num / n;
    let den = (n - trace) / n;
    num / (den * den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding::{BoundaryMode, ResizeMode};
    use crate::ExecContext;
    use ndarray::{Array2, IxDyn};

    fn gaussian_psf(size: usize, sigma: f64) -> ArrayD<f64> {
        let c = (size / 2) as f64;
        let mut psf = ArrayD::from_shape_fn(IxDyn(&[size, size]), |ix| {
            let dr = ix[0] as f64 - c;
            let dc = ix[1] as f64 - c;
            (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp()
        });
        let total: f64 = psf.iter().sum();
        psf.mapv_inplace(|v| v / total);
        psf
    }

    fn blurred_scene(n: usize, psf: &ArrayD<f64>) -> (ArrayD<f64>, Blurred<f64>) {
        let truth = ArrayD::from_shape_fn(IxDyn(&[n, n]), |ix| {
            if ix[0] >= n / 4 && ix[0] < 3 * n / 4 && ix[1] >= n / 4 && ix[1] < 3 * n / 4 {
                1.0
            } else {
                0.1
            }
        });
        let bank = PsfBank::single(psf.clone());
        let mut op = BlurOperator::new(
            &bank,
            &[n, n],
            BoundaryMode::Reflexive,
            ResizeMode::None,
            ExecContext::default(),
        )
        .unwrap();
        let blurred = op.apply(&truth, false);
        let img = Blurred::from_slice(
            Array2::from_shape_fn((n, n), |(r, c)| blurred[[r, c]]),
            PixelType::Float,
        );
        (truth, img)
    }

    fn mse(a: &ArrayD<f64>, b: &ArrayD<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            / a.len() as f64
    }

    #[test]
    fn test_hybr_improves_over_blurred_input() {
        let psf = gaussian_psf(5, 1.0);
        let (truth, img) = blurred_scene(16, &psf);
        let config = IterativeConfig {
            max_iterations: 12,
            ..IterativeConfig::default()
        };
        let mut solver = HybrDeconvolver::new(
            &img,
            &PsfBank::single(psf),
            &config,
            HybrOptions::default(),
        )
        .unwrap();
        let out = solver.deblur(None).unwrap();
        assert!(mse(&truth, &out.data) < mse(&truth, img.data()));
        assert!(out.iterations.unwrap() >= 1);
        assert!(solver.gcv_curve().len() > 2);
    }

    #[test]
    fn test_hybr_fixed_alpha_runs() {
        let psf = gaussian_psf(5, 1.0);
        let (_, img) = blurred_scene(12, &psf);
        let config = IterativeConfig {
            max_iterations: 6,
            ..IterativeConfig::default()
        };
        let options = HybrOptions {
            reg_method: RegMethod::Fixed { alpha: 0.05 },
            ..HybrOptions::default()
        };
        let mut solver =
            HybrDeconvolver::new(&img, &PsfBank::single(psf), &config, options).unwrap();
        let out = solver.deblur(None).unwrap();
        assert_eq!(out.data.shape(), &[12, 12]);
    }

    #[test]
    fn test_hybr_rejects_zero_iterations() {
        let psf = gaussian_psf(3, 1.0);
        let (_, img) = blurred_scene(8, &psf);
        let config = IterativeConfig {
            max_iterations: 0,
            ..IterativeConfig::default()
        };
        let err = HybrDeconvolver::new(
            &img,
            &PsfBank::single(psf),
            &config,
            HybrOptions::<f64>::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DeconvError::BadConfig(_)));
    }

    #[test]
    fn test_wgcv_curve_positive() {
        let bhat = vec![1.0, 0.5, 0.25, 0.1];
        let s = vec![0.9, 0.4, 0.1];
        for &a in &[0.0, 0.01, 0.1, 1.0] {
            assert!(wgcv_curve(a, &bhat, &s, 0.8) > 0.0);
        }
    }

    #[test]
    fn test_find_omega_finite() {
        let bhat = vec![1.0, 0.5, 0.25, 0.1];
        let s = vec![0.9, 0.4, 0.1];
        let w: f64 = find_omega(&bhat, &s);
        assert!(w.is_finite() && w > 0.0);
    }
}
