//! Modified residual norm steepest descent, a nonnegatively constrained
//! method. The preconditioned variant minimizes `‖P⁻¹(Ax - b)‖` so the
//! iterates stay in the image space and the nonnegativity projection is
//! unchanged.

use log::debug;
use ndarray::ArrayD;

use crate::error::DeconvResult;
use crate::float_trait::DeconvFloat;
use crate::image::{validate_shapes, Blurred, Deblurred, PixelType, PsfBank};
use crate::iterative::{apply_threshold, axpy, IterativeConfig, Preconditioning};
use crate::operator::BlurOperator;
use crate::preconditioner::FftPreconditioner;
use crate::utils::{min_location, norm2};

pub struct MrnsdDeconvolver<F: DeconvFloat> {
    op: BlurOperator<F>,
    precond: Option<FftPreconditioner<F>>,
    b: ArrayD<F>,
    output: PixelType,
    max_iterations: usize,
    tolerance: Option<F>,
    rnorm: Vec<F>,
}

impl<F: DeconvFloat> MrnsdDeconvolver<F> {
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

    /// Weighted gradient norms `sqrt(Σ x·g²) / ‖Aᵀb‖` per iteration.
    pub fn residual_norms(&self) -> &[F] {
        &self.rnorm
    }

    /// `P⁻¹ A s`, or `A s` without a preconditioner.
    fn forward(&mut self, s: &ArrayD<F>) -> ArrayD<F> {
        let y = self.op.apply(s, false);
        match self.precond.as_mut() {
            Some(p) => p.solve(&y, false),
            None => y,
        }
    }

    /// `Aᵀ P⁻ᵀ v`, or `Aᵀ v` without a preconditioner.
    fn adjoint(&mut self, v: &ArrayD<F>) -> ArrayD<F> {
        match self.precond.as_mut() {
            Some(p) => {
                let t = p.solve(v, true);
                self.op.apply(&t, true)
            }
            None => self.op.apply(v, true),
        }
    }

    pub fn deblur(&mut self, threshold: Option<F>) -> DeconvResult<Deblurred<F>> {
        let mut x = self.b.clone();
        self.rnorm.clear();
        let sigsq = F::sqrt_eps();
        let (_, min_x) = min_location(&x);
        if min_x < F::zero() {
            // Shift into the positive orthant before the multiplicative
            // weighting makes sign patterns permanent.
            let shift = min_x + sigsq;
            x.mapv_inplace(|v| v - shift);
        }

        let trab = self.adjoint(&self.b.clone());
        let nrm_trab = norm2(&trab);
        let tol = self
            .tolerance
            .unwrap_or_else(|| F::sqrt_eps() * nrm_trab);

        // g = Aᵀ(Ax - b), weighted by the current iterate.
        let mut resid = self.forward(&x);
        resid.zip_mut_with(&self.b, |ri, &bi| *ri -= bi);
        let mut g = self.adjoint(&resid);
        let mut gamma = weighted_square_sum(&x, &g);
        self.rnorm.push(gamma.sqrt());

        let mut k = 0;
        while k < self.max_iterations {
            if self.rnorm[k] <= tol {
                break;
            }
            debug!("MRNSD iteration {}/{}", k + 1, self.max_iterations);
            // Steepest descent direction under the diag(x) metric.
            let mut s = x.clone();
            s.zip_mut_with(&g, |si, &gi| *si = -*si * gi);
            let v = self.forward(&s);
            let nv = norm2(&v);
            let theta = gamma / (nv * nv);
            // Largest step keeping x nonnegative.
            let mut alpha = theta;
            for (&si, &xi) in s.iter().zip(x.iter()) {
                if si < F::zero() {
                    let bound = -xi / si;
                    if bound < alpha {
                        alpha = bound;
                    }
                }
            }
            axpy(&mut x, &s, alpha);
            let w = self.adjoint(&v);
            axpy(&mut g, &w, alpha);
            gamma = weighted_square_sum(&x, &g);
            self.rnorm.push(gamma.sqrt());
            k += 1;
        }
        for v in self.rnorm.iter_mut() {
            *v = *v / nrm_trab;
        }

        apply_threshold(&mut x, threshold);
        Ok(Deblurred {
            data: x,
            pixel_type: self.output,
            alpha: None,
            iterations: Some(k),
        })
    }
}

/// `Σ x·g²`.
fn weighted_square_sum<F: DeconvFloat>(x: &ArrayD<F>, g: &ArrayD<F>) -> F {
    x.iter()
        .zip(g.iter())
        .fold(F::zero(), |acc, (&xi, &gi)| acc + xi * gi * gi)
}
