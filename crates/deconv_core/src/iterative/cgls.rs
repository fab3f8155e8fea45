//! Conjugate gradient for least squares, with an optional circulant
//! preconditioner (split form: the normal-equations residual is
//! preconditioned on both sides).

use log::debug;
use ndarray::ArrayD;

use crate::error::DeconvResult;
use crate::float_trait::DeconvFloat;
use crate::image::{validate_shapes, Blurred, Deblurred, PixelType, PsfBank};
use crate::iterative::{apply_threshold, axpy, IterativeConfig, Preconditioning};
use crate::operator::BlurOperator;
use crate::preconditioner::FftPreconditioner;
use crate::utils::norm2;

pub struct CglsDeconvolver<F: DeconvFloat> {
    op: BlurOperator<F>,
    precond: Option<FftPreconditioner<F>>,
    b: ArrayD<F>,
    output: PixelType,
    max_iterations: usize,
    tolerance: Option<F>,
    rnorm: Vec<F>,
}

impl<F: DeconvFloat> CglsDeconvolver<F> {
    pub fn new(
        image: &Blurred<F>,
        bank: &PsfBank<F>,
        config: &IterativeConfig<F>,
    ) -> DeconvResult<Self> {
        validate_shapes(image.data(), &bank.tiles()[0])?;
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
            tolerance: config.tolerance,
            rnorm: Vec::new(),
        })
    }

    /// Residual norms `‖Aᵀ(b - Ax)‖ / ‖Aᵀb‖` recorded at each iteration,
    /// including the starting point.
    pub fn residual_norms(&self) -> &[F] {
        &self.rnorm
    }

    pub fn deblur(&mut self, threshold: Option<F>) -> DeconvResult<Deblurred<F>> {
        let (mut x, iterations) = if self.precond.is_some() {
            self.run_preconditioned()
        } else {
            self.run_plain()
        };
        apply_threshold(&mut x, threshold);
        Ok(Deblurred {
            data: x,
            pixel_type: self.output,
            alpha: None,
            iterations: Some(iterations),
        })
    }

    fn run_plain(&mut self) -> (ArrayD<F>, usize) {
        let mut x = self.b.clone();
        self.rnorm.clear();
        let nrm_trab = norm2(&self.op.apply(&self.b, true));
        let tol = self
            .tolerance
            .unwrap_or_else(|| F::sqrt_eps() * nrm_trab);

        // s = b - A x, r = Aᵀ s.
        let mut s = self.b.clone();
        s.zip_mut_with(&self.op.apply(&x, false), |si, &axi| *si -= axi);
        let mut r = self.op.apply(&s, true);
        let mut p = r.clone();
        let mut gamma = norm2(&r);
        self.rnorm.push(gamma);
        gamma = gamma * gamma;
        let mut oldgamma = F::zero();

        let mut k = 0;
        while k < self.max_iterations {
            if self.rnorm[k] <= tol {
                break;
            }
            debug!("CGLS iteration {}/{}", k + 1, self.max_iterations);
            if k >= 1 {
                let beta = gamma / oldgamma;
                p.mapv_inplace(|v| v * beta);
                p.zip_mut_with(&r, |pi, &ri| *pi += ri);
            }
            let q = self.op.apply(&p, false);
            let nq = norm2(&q);
            let alpha = gamma / (nq * nq);
            axpy(&mut x, &p, alpha);
            axpy(&mut s, &q, -alpha);
            r = self.op.apply(&s, true);
            oldgamma = gamma;
            let nr = norm2(&r);
            self.rnorm.push(nr);
            gamma = nr * nr;
            k += 1;
        }
        for v in self.rnorm.iter_mut() {
            *v = *v / nrm_trab;
        }
        (x, k)
    }

    fn run_preconditioned(&mut self) -> (ArrayD<F>, usize) {
        let mut x = self.b.clone();
        self.rnorm.clear();
        let nrm_trab = norm2(&self.op.apply(&self.b, true));
        let tol = self
            .tolerance
            .unwrap_or_else(|| F::sqrt_eps() * nrm_trab);

        let mut s = self.b.clone();
        s.zip_mut_with(&self.op.apply(&x, false), |si, &axi| *si -= axi);
        let mut tr = self.op.apply(&s, true);
        let mut r = self.solve_precond(&tr, true);
        let mut p = r.clone();
        let mut gamma = norm2(&r);
        gamma = gamma * gamma;
        self.rnorm.push(norm2(&tr));
        let mut oldgamma = F::zero();

        let mut k = 0;
        while k < self.max_iterations {
            if self.rnorm[k] <= tol {
                break;
            }
            debug!("CGLS iteration {}/{}", k + 1, self.max_iterations);
            if k >= 1 {
                let beta = gamma / oldgamma;
                p.mapv_inplace(|v| v * beta);
                p.zip_mut_with(&r, |pi, &ri| *pi += ri);
            }
            let pt = self.solve_precond(&p, false);
            let q = self.op.apply(&pt, false);
            let nq = norm2(&q);
            let alpha = gamma / (nq * nq);
            axpy(&mut x, &pt, alpha);
            axpy(&mut s, &q, -alpha);
            tr = self.op.apply(&s, true);
            r = self.solve_precond(&tr, true);
            oldgamma = gamma;
            let nr = norm2(&r);
            gamma = nr * nr;
            self.rnorm.push(norm2(&tr));
            k += 1;
        }
        for v in self.rnorm.iter_mut() {
            *v = *v / nrm_trab;
        }
        (x, k)
    }

    fn solve_precond(&mut self, v: &ArrayD<F>, transpose: bool) -> ArrayD<F> {
        match self.precond.as_mut() {
            Some(p) => p.solve(v, transpose),
            None => v.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::OutputType;
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

    fn box_scene(n: usize) -> ArrayD<f64> {
        ArrayD::from_shape_fn(IxDyn(&[n, n]), |ix| {
            if ix[0] >= n / 4 && ix[0] < 3 * n / 4 && ix[1] >= n / 4 && ix[1] < 3 * n / 4 {
                1.0
            } else {
                0.1
            }
        })
    }

    fn blurred_scene(n: usize, psf: &ArrayD<f64>) -> (ArrayD<f64>, Blurred<f64>) {
        let truth = box_scene(n);
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
    fn test_cgls_reduces_residual() {
        let psf = gaussian_psf(5, 1.0);
        let (truth, img) = blurred_scene(16, &psf);
        let config = IterativeConfig {
            max_iterations: 15,
            ..IterativeConfig::default()
        };
        let mut solver = CglsDeconvolver::new(&img, &PsfBank::single(psf), &config).unwrap();
        let out = solver.deblur(None).unwrap();
        let rn = solver.residual_norms();
        assert!(rn.len() >= 2);
        assert!(rn[rn.len() - 1] < rn[0], "{rn:?}");
        assert!(mse(&truth, &out.data) < mse(&truth, img.data()));
        assert!(out.iterations.unwrap() >= 1);
    }

    #[test]
    fn test_preconditioned_cgls_runs() {
        let psf = gaussian_psf(5, 1.0);
        let (truth, img) = blurred_scene(16, &psf);
        let config = IterativeConfig {
            max_iterations: 8,
            preconditioner: Preconditioning::Fft { tolerance: None },
            ..IterativeConfig::default()
        };
        let mut solver = CglsDeconvolver::new(&img, &PsfBank::single(psf), &config).unwrap();
        let out = solver.deblur(None).unwrap();
        assert_eq!(out.data.shape(), &[16, 16]);
        assert!(mse(&truth, &out.data) < mse(&truth, img.data()));
    }

    #[test]
    fn test_threshold_clamps_output() {
        let psf = gaussian_psf(5, 1.2);
        let (_, img) = blurred_scene(12, &psf);
        let config = IterativeConfig {
            max_iterations: 5,
            output: OutputType::Float,
            ..IterativeConfig::default()
        };
        let mut solver = CglsDeconvolver::new(&img, &PsfBank::single(psf), &config).unwrap();
        let out = solver.deblur(Some(0.2)).unwrap();
        for &v in out.data.iter() {
            assert!(v == 0.0 || v >= 0.2);
        }
    }
}
