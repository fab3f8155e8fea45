//! Circulant (FFT) preconditioner for the iterative solvers.
//!
//! The preconditioner inverts the blur spectrum where its magnitude is at
//! least a truncation tolerance and acts as the identity below it, so the
//! well-conditioned part of the operator is neutralized without amplifying
//! noise-dominated components. For a spatially variant bank the tiles are
//! averaged into one approximating circulant.

use log::debug;
use ndarray::{ArrayD, Dimension, IxDyn, Zip};
use num_complex::Complex;

use crate::error::{DeconvError, DeconvResult};
use crate::float_trait::DeconvFloat;
use crate::gcv::tsvd_cutoff;
use crate::image::PsfBank;
use crate::padding::{circ_shift, pad, pad_offset, BoundaryMode, ResizeMode};
use crate::transforms::TransformPlans;
use crate::utils::{max_location, min_location};
use crate::ExecContext;

pub struct FftPreconditioner<F: DeconvFloat> {
    image_shape: Vec<usize>,
    work_shape: Vec<usize>,
    offset: Vec<usize>,
    boundary: BoundaryMode,
    exec: ExecContext,
    plans: TransformPlans<F>,
    /// Inverted spectrum; identity entries hold exactly 1.
    matdata: ArrayD<Complex<F>>,
    tol: F,
}

impl<F: DeconvFloat> FftPreconditioner<F> {
    /// Builds the preconditioner for `image` (the observed data, image
    /// extent). `tol` of `None` selects the truncation level automatically:
    /// zero when the spectrum is well conditioned (magnitude ratio below
    /// 100), otherwise a GCV ranking of the sorted magnitudes.
    pub fn new(
        bank: &PsfBank<F>,
        image: &ArrayD<F>,
        boundary: BoundaryMode,
        resize: ResizeMode,
        tol: Option<F>,
        exec: ExecContext,
    ) -> DeconvResult<Self> {
        let image_shape = image.shape().to_vec();
        let psf_shape = bank.tile_shape().to_vec();
        let minimal: Vec<usize> = image_shape
            .iter()
            .zip(psf_shape.iter())
            .map(|(&i, &p)| i + p)
            .collect();
        let work_shape: Vec<usize> = match resize {
            ResizeMode::None => minimal,
            ResizeMode::NextPowerOfTwo => {
                minimal.iter().map(|&n| n.next_power_of_two()).collect()
            }
        };
        let offset = pad_offset(&image_shape, &work_shape);

        // Average the bank into a single kernel; its spectrum approximates
        // every tile at once.
        let mut avg = bank.tiles()[0].clone();
        for tile in &bank.tiles()[1..] {
            avg += tile;
        }
        if bank.tiles().len() > 1 {
            let count = F::usize_as(bank.tiles().len());
            avg.mapv_inplace(|v| v / count);
        }
        if avg.sum() == F::zero() {
            return Err(DeconvError::BadPsfBank("averaged PSF sums to zero".into()));
        }
        let (center, _) = max_location(&avg);

        let mut plans = TransformPlans::new();
        let mut embedded = ArrayD::zeros(IxDyn(&work_shape));
        for (ix, &v) in avg.indexed_iter() {
            embedded[ix] = v;
        }
        let mut matdata = plans.fft_real(&circ_shift(&embedded, &center));
        let e = matdata.mapv(|c| c.norm());
        let (_, max_e) = max_location(&e);

        let tol = match tol {
            Some(t) => t,
            None => {
                let (_, min_e) = min_location(&e);
                if max_e / min_e < F::usize_as(100) {
                    F::zero()
                } else {
                    let b_pad = pad(image, &work_shape, boundary, &exec);
                    let scale = F::usize_as(b_pad.len()).sqrt();
                    let b_mag = plans.fft_real(&b_pad).mapv(|c| c.norm() / scale);
                    tsvd_cutoff(&e, &b_mag)
                }
            }
        };
        debug!("FFT preconditioner tolerance: {tol:?}");

        let max2 = max_e * max_e;
        let one = Complex::new(F::one(), F::zero());
        matdata.zip_mut_with(&e, |m, &mag| {
            *m = if mag >= tol {
                Complex::new(max2, F::zero()) / *m
            } else {
                one
            };
        });

        Ok(Self {
            image_shape,
            work_shape,
            offset,
            boundary,
            exec,
            plans,
            matdata,
            tol,
        })
    }

    pub fn tolerance(&self) -> F {
        self.tol
    }

    /// Applies `P⁻¹` (or `P⁻ᵀ` when `transpose`) to `x` of the image extent.
    pub fn solve(&mut self, x: &ArrayD<F>, transpose: bool) -> ArrayD<F> {
        let padded = pad(x, &self.work_shape, self.boundary, &self.exec);
        let mut x_hat = self.plans.fft_real(&padded);
        let par = x_hat.len() >= self.exec.parallel_threshold;
        let zip = Zip::from(&mut x_hat).and(&self.matdata);
        if transpose {
            let apply = |v: &mut Complex<F>, &m: &Complex<F>| *v = *v * m.conj();
            if par {
                zip.par_for_each(apply);
            } else {
                zip.for_each(apply);
            }
        } else {
            let apply = |v: &mut Complex<F>, &m: &Complex<F>| *v = *v * m;
            if par {
                zip.par_for_each(apply);
            } else {
                zip.for_each(apply);
            }
        }
        let y = self.plans.ifft_real(x_hat);
        ArrayD::from_shape_fn(IxDyn(&self.image_shape), |ix| {
            let mut src = ix.slice().to_vec();
            for (s, o) in src.iter_mut().zip(self.offset.iter()) {
                *s += o;
            }
            y[IxDyn(&src)]
        })
    }
}
