//! FFT application of the blur matrix for the iterative solvers.
//!
//! The operator works on an enlarged extent (image plus PSF per axis, so a
//! padded convolution never wraps logical data) and extracts the logical
//! window after each product. Spatially variant banks convolve with each
//! tile's spectrum and stitch the tile's block of the image into the output,
//! which treats the blur as piecewise invariant over the grid.

use ndarray::{ArrayD, Dimension, IxDyn, Zip};
use num_complex::Complex;

use crate::error::{DeconvError, DeconvResult};
use crate::float_trait::DeconvFloat;
use crate::image::PsfBank;
use crate::padding::{circ_shift, pad, pad_offset, BoundaryMode, ResizeMode};
use crate::transforms::TransformPlans;
use crate::utils::max_location;
use crate::ExecContext;

pub struct BlurOperator<F: DeconvFloat> {
    image_shape: Vec<usize>,
    work_shape: Vec<usize>,
    offset: Vec<usize>,
    boundary: BoundaryMode,
    exec: ExecContext,
    plans: TransformPlans<F>,
    /// One spectrum per PSF tile, row-major over the grid layout.
    spectra: Vec<ArrayD<Complex<F>>>,
    layout: Vec<usize>,
}

impl<F: DeconvFloat> BlurOperator<F> {
    pub fn new(
        bank: &PsfBank<F>,
        image_shape: &[usize],
        boundary: BoundaryMode,
        resize: ResizeMode,
        exec: ExecContext,
    ) -> DeconvResult<Self> {
        let rank = image_shape.len();
        let psf_shape = bank.tile_shape();
        if psf_shape.len() != rank {
            return Err(DeconvError::BadShape(format!(
                "PSF rank {} does not match image rank {}",
                psf_shape.len(),
                rank
            )));
        }
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
        let offset = pad_offset(image_shape, &work_shape);

        let mut plans = TransformPlans::new();
        let mut spectra = Vec::with_capacity(bank.tiles().len());
        for tile in bank.tiles() {
            let total = tile.sum();
            if total == F::zero() {
                return Err(DeconvError::BadPsfBank("PSF tile sums to zero".into()));
            }
            let (peak, _) = max_location(tile);
            let normalized = tile.mapv(|v| v / total);
            let padded = pad(&normalized, &work_shape, BoundaryMode::Zero, &exec);
            let tile_off = pad_offset(tile.shape(), &work_shape);
            let center: Vec<usize> = peak
                .iter()
                .zip(tile_off.iter())
                .map(|(&p, &o)| p + o)
                .collect();
            spectra.push(plans.fft_real(&circ_shift(&padded, &center)));
        }

        Ok(Self {
            image_shape: image_shape.to_vec(),
            work_shape,
            offset,
            boundary,
            exec,
            plans,
            spectra,
            layout: bank.layout().to_vec(),
        })
    }

    pub fn image_shape(&self) -> &[usize] {
        &self.image_shape
    }

    /// Number of columns of the underlying matrix (elements of the working
    /// extent), used by the HyBR stopping rule.
    pub fn working_len(&self) -> usize {
        self.work_shape.iter().product()
    }

    /// Computes `A x` (or `Aᵀ x` when `transpose`) for `x` of the image
    /// extent, returning an array of the same extent.
    pub fn apply(&mut self, x: &ArrayD<F>, transpose: bool) -> ArrayD<F> {
        let padded = pad(x, &self.work_shape, self.boundary, &self.exec);
        let x_hat = self.plans.fft_real(&padded);
        if self.spectra.len() == 1 {
            let y = self.convolve(&x_hat, 0, transpose);
            self.extract(&y)
        } else {
            let mut out = ArrayD::zeros(IxDyn(&self.image_shape));
            for t in 0..self.spectra.len() {
                let y = self.convolve(&x_hat, t, transpose);
                self.extract_block(&y, t, &mut out);
            }
            out
        }
    }

    fn convolve(
        &mut self,
        x_hat: &ArrayD<Complex<F>>,
        tile: usize,
        transpose: bool,
    ) -> ArrayD<F> {
        let mut product = x_hat.clone();
        let s = &self.spectra[tile];
        let par = product.len() >= self.exec.parallel_threshold;
        let zip = Zip::from(&mut product).and(s);
        if transpose {
            let apply = |x: &mut Complex<F>, &si: &Complex<F>| *x = *x * si.conj();
            if par {
                zip.par_for_each(apply);
            } else {
                zip.for_each(apply);
            }
        } else {
            let apply = |x: &mut Complex<F>, &si: &Complex<F>| *x = *x * si;
            if par {
                zip.par_for_each(apply);
            } else {
                zip.for_each(apply);
            }
        }
        self.plans.ifft_real(product)
    }

    /// Extracts the logical window at the pad offset.
    fn extract(&self, y: &ArrayD<F>) -> ArrayD<F> {
        ArrayD::from_shape_fn(IxDyn(&self.image_shape), |ix| {
            let mut src = ix.slice().to_vec();
            for (s, o) in src.iter_mut().zip(self.offset.iter()) {
                *s += o;
            }
            y[IxDyn(&src)]
        })
    }

    /// Copies tile `t`'s grid block of the extracted window into `out`.
    fn extract_block(&self, y: &ArrayD<F>, t: usize, out: &mut ArrayD<F>) {
        let rank = self.image_shape.len();
        // Row-major grid coordinates of tile t.
        let mut grid = vec![0usize; rank];
        let mut rem = t;
        for axis in (0..rank).rev() {
            grid[axis] = rem % self.layout[axis];
            rem /= self.layout[axis];
        }
        let mut lo = vec![0usize; rank];
        let mut hi = vec![0usize; rank];
        for axis in 0..rank {
            let base = self.image_shape[axis] / self.layout[axis];
            lo[axis] = grid[axis] * base;
            hi[axis] = if grid[axis] + 1 == self.layout[axis] {
                self.image_shape[axis]
            } else {
                lo[axis] + base
            };
        }
        let mut ix = lo.clone();
        loop {
            let mut src = ix.clone();
            for (s, o) in src.iter_mut().zip(self.offset.iter()) {
                *s += o;
            }
            out[IxDyn(&ix)] = y[IxDyn(&src)];
            // Odometer over the block.
            let mut axis = rank;
            while axis > 0 {
                axis -= 1;
                ix[axis] += 1;
                if ix[axis] < hi[axis] {
                    break;
                }
                ix[axis] = lo[axis];
                if axis == 0 {
                    return;
                }
            }
        }
    }
}
