//! Wiener-filtered Landweber iteration with low-pass resolution limits,
//! nonnegativity clamping, and a percent-change stopping rule.

use log::debug;
use ndarray::{ArrayD, Dimension, IxDyn, Zip};

use crate::error::{DeconvError, DeconvResult};
use crate::float_trait::DeconvFloat;
use crate::image::{validate_shapes, Blurred, Deblurred, PixelType};
use crate::iterative::IterativeConfig;
use crate::padding::{pad, pad_offset, circ_shift, unpad, BoundaryMode, ResizeMode};
use crate::transforms::TransformPlans;
use crate::utils::max_location;
use crate::ExecContext;

#[derive(Debug, Clone)]
pub struct WplOptions<F: DeconvFloat> {
    /// Wiener pre-filter strength; values at or below 1e-4 disable it.
    pub gamma: F,
    /// Low-pass resolution limit along the last axis, in units of the
    /// working extent. 1 passes everything.
    pub filter_x: F,
    pub filter_y: F,
    pub filter_z: F,
    /// Divide the observed image by the PSF sum before iterating.
    pub normalize: bool,
    /// Blend the padding region toward the reblurred image to suppress
    /// ringing at the original data's edges.
    pub anti_ring: bool,
    /// Stop when the per-iteration change, as a percent of total energy,
    /// improves by less than this.
    pub change_thresh_percent: F,
    /// Interpret the input as decibels and convert the result back.
    pub db: bool,
    /// Stop when the percent change starts growing again.
    pub detect_divergence: bool,
}

impl<F: DeconvFloat> Default for WplOptions<F> {
    fn default() -> Self {
        Self {
            gamma: F::zero(),
            filter_x: F::one(),
            filter_y: F::one(),
            filter_z: F::one(),
            normalize: false,
            anti_ring: true,
            change_thresh_percent: F::from_f64_c(0.01),
            db: false,
            detect_divergence: true,
        }
    }
}

pub struct WplDeconvolver<F: DeconvFloat> {
    b: ArrayD<F>,
    psf: ArrayD<F>,
    orig_shape: Vec<usize>,
    work_shape: Vec<usize>,
    offset: Vec<usize>,
    boundary: BoundaryMode,
    output: PixelType,
    max_iterations: usize,
    exec: ExecContext,
    options: WplOptions<F>,
    plans: TransformPlans<F>,
}

impl<F: DeconvFloat> WplDeconvolver<F> {
    /// Spatially invariant only; `config.preconditioner` is ignored, the
    /// algorithm has its own Wiener step.
    pub fn new(
        image: &Blurred<F>,
        psf: &ArrayD<F>,
        config: &IterativeConfig<F>,
        options: WplOptions<F>,
    ) -> DeconvResult<Self> {
        validate_shapes(image.data(), psf)?;
        let orig_shape = image.shape().to_vec();
        let work_shape: Vec<usize> = orig_shape
            .iter()
            .zip(psf.shape().iter())
            .map(|(&i, &p)| {
                let minimal = i + p;
                let n = match config.resize {
                    ResizeMode::None => minimal,
                    ResizeMode::NextPowerOfTwo => minimal.next_power_of_two(),
                };
                n.max(4)
            })
            .collect();
        let offset = pad_offset(&orig_shape, &work_shape);
        Ok(Self {
            b: image.data().clone(),
            psf: psf.clone(),
            orig_shape,
            work_shape,
            offset,
            boundary: config.boundary,
            output: config.output.resolve(image.pixel_type()),
            max_iterations: config.max_iterations,
            exec: config.exec,
            options,
            plans: TransformPlans::new(),
        })
    }

    pub fn deblur(&mut self, threshold: Option<F>) -> DeconvResult<Deblurred<F>> {
        let two = F::one() + F::one();
        let mut b_small = self.b.clone();
        let mut psf_small = self.psf.clone();
        if self.options.db {
            un_db(&mut b_small);
            un_db(&mut psf_small);
        }
        let sum = psf_small.sum();
        if sum == F::zero() {
            return Err(DeconvError::BadPsfBank("PSF sums to zero".into()));
        }
        let mut scale_psf = F::one();
        if sum != F::zero() && self.options.normalize {
            scale_psf = scale_psf / sum;
        }

        let mut b = pad(&b_small, &self.work_shape, self.boundary, &self.exec);
        let (psf_peak, _) = max_location(&psf_small);
        let mut psf_work = ArrayD::zeros(IxDyn(&self.work_shape));
        for (ix, &v) in psf_small.indexed_iter() {
            psf_work[ix] = v;
        }
        let mut h = self.plans.fft_real(&circ_shift(&psf_work, &psf_peak));

        if self.options.anti_ring {
            debug!("WPL: anti-ringing step");
            let mut bhat = self.plans.fft_real(&b);
            bhat.zip_mut_with(&h, |c, &hc| *c = *c * hc);
            let ax = self.plans.ifft_real(bhat);
            copy_data_average(&mut b, &ax, sum, &self.offset, &self.orig_shape);
        }

        if self.options.gamma > F::from_f64_c(1e-4) {
            debug!("WPL: Wiener pre-filter");
            let mut mag_max = F::zero();
            for c in h.iter() {
                let m = c.norm_sqr();
                if m > mag_max {
                    mag_max = m;
                }
            }
            let gamma_scaled = self.options.gamma * two * mag_max;
            let mut bhat = self.plans.fft_real(&b);
            bhat.zip_mut_with(&h, |c, &hc| {
                *c = *c * hc.conj() / (two * hc.norm_sqr() + gamma_scaled);
            });
            b = self.plans.ifft_real(bhat);
            h.mapv_inplace(|hc| hc * hc.conj() / (two * hc.norm_sqr() + gamma_scaled));
        }

        let kernel = self.plans.ifft_real(h.clone());
        let a_sum = kernel.iter().fold(F::zero(), |acc, &v| acc + v.abs());
        if scale_psf != F::one() {
            b.mapv_inplace(|v| v / scale_psf);
        }

        let weights = gaussian_weights(
            &self.work_shape,
            self.options.filter_x,
            self.options.filter_y,
            self.options.filter_z,
        );
        let mut x = b.clone();
        let mut old_percent = F::max_value();
        let mut iterations = 0usize;
        for iter in 0..self.max_iterations {
            iterations = iter + 1;
            let mut xhat = self.plans.fft_real(&x);
            xhat.zip_mut_with(&weights, |c, &w| *c = *c * w);
            let mut axhat = xhat.clone();
            axhat.zip_mut_with(&h, |c, &hc| *c = *c * hc);
            let ax = self.plans.ifft_real(axhat);
            x = self.plans.ifft_real(xhat);

            let mut mean_delta = F::zero();
            Zip::from(&mut x).and(&b).and(&ax).for_each(|xv, &bv, &axv| {
                let delta = bv - axv / a_sum;
                *xv += delta;
                if *xv < F::zero() {
                    *xv = F::zero();
                } else {
                    mean_delta += delta.abs();
                }
            });
            let sum_pixels = unpad(&x, &self.offset, &self.orig_shape, None).sum();
            let percent = F::usize_as(100) * mean_delta / sum_pixels;
            debug!(
                "WPL iteration {}/{}: change {percent:?}%",
                iter + 1,
                self.max_iterations
            );
            if old_percent - percent < self.options.change_thresh_percent {
                debug!("WPL: converged after {} iterations", iter + 1);
                break;
            }
            if old_percent < percent && self.options.detect_divergence {
                debug!("WPL: divergence detected after {} iterations", iter + 1);
                break;
            }
            old_percent = percent;
        }

        let mut xhat = self.plans.fft_real(&x);
        xhat.zip_mut_with(&weights, |c, &w| *c = *c * w / a_sum);
        x = self.plans.ifft_real(xhat);
        if self.options.db {
            to_db(&mut x, F::from_f64_c(-90.0));
        }
        Ok(Deblurred {
            data: unpad(&x, &self.offset, &self.orig_shape, threshold),
            pixel_type: self.output,
            alpha: None,
            iterations: Some(iterations),
        })
    }
}

/// Blends the padding region of `b` toward the reblurred image `ax / sum`,
/// ramping linearly from the original data's edge out to the border.
fn copy_data_average<F: DeconvFloat>(
    b: &mut ArrayD<F>,
    ax: &ArrayD<F>,
    sum: F,
    offset: &[usize],
    orig: &[usize],
) {
    for (ix, bv) in b.indexed_iter_mut() {
        let axv = ax[&ix];
        let mut a = F::zero();
        for (d, &i) in ix.slice().iter().enumerate() {
            let rel = i as isize - offset[d] as isize;
            let n = orig[d] as isize;
            let alpha = if rel < 0 {
                F::usize_as((-rel) as usize) / F::usize_as(offset[d])
            } else if rel > n - 1 {
                F::usize_as((rel - n) as usize) / F::usize_as(offset[d])
            } else {
                F::zero()
            };
            if alpha > a {
                a = alpha;
            }
        }
        *bv = (F::one() - a) * *bv + a * axv / sum;
    }
}

/// Separable low-pass weights over the working extent; the last axis is
/// shaped by `filter_x`, the one before it by `filter_y`, then `filter_z`.
fn gaussian_weights<F: DeconvFloat>(
    shape: &[usize],
    filter_x: F,
    filter_y: F,
    filter_z: F,
) -> ArrayD<F> {
    let rank = shape.len();
    let eps = F::from_f64_c(1e-6);
    let axes: Vec<Vec<F>> = shape
        .iter()
        .enumerate()
        .map(|(d, &n)| {
            let filter = match rank - 1 - d {
                0 => filter_x,
                1 => filter_y,
                _ => filter_z,
            };
            let scale = F::usize_as(n) / (filter + eps);
            (0..n)
                .map(|i| {
                    let shifted = if i > n / 2 { n - i } else { i };
                    let t = F::usize_as(shifted) / scale;
                    (-t * t).exp()
                })
                .collect()
        })
        .collect();
    ArrayD::from_shape_fn(IxDyn(shape), |ix| {
        ix.slice()
            .iter()
            .enumerate()
            .fold(F::one(), |acc, (d, &i)| acc * axes[d][i])
    })
}

fn un_db<F: DeconvFloat>(x: &mut ArrayD<F>) {
    let scale = F::usize_as(10) / F::usize_as(10).ln();
    x.mapv_inplace(|v| (v / scale).exp());
}

fn to_db<F: DeconvFloat>(x: &mut ArrayD<F>, min_db: F) {
    let scale = F::usize_as(10) / F::usize_as(10).ln();
    let min_val = (min_db / scale).exp();
    x.mapv_inplace(|v| if v > min_val { scale * v.ln() } else { min_db });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PsfBank;
    use crate::operator::BlurOperator;
    use ndarray::Array2;

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
    fn test_wpl_improves_over_blurred_input() {
        let psf = gaussian_psf(5, 1.0);
        let (truth, img) = blurred_scene(16, &psf);
        let config = IterativeConfig {
            max_iterations: 10,
            ..IterativeConfig::default()
        };
        let mut solver =
            WplDeconvolver::new(&img, &psf, &config, WplOptions::default()).unwrap();
        let out = solver.deblur(Some(0.0)).unwrap();
        assert_eq!(out.data.shape(), &[16, 16]);
        assert!(out.data.iter().all(|&v| v >= 0.0));
        assert!(mse(&truth, &out.data) < mse(&truth, img.data()));
        assert!(out.iterations.unwrap() >= 1);
        assert!(out.iterations.unwrap() <= 10);
    }

    #[test]
    fn test_wpl_wiener_prefilter_runs() {
        let psf = gaussian_psf(5, 1.0);
        let (_, img) = blurred_scene(12, &psf);
        let config = IterativeConfig {
            max_iterations: 5,
            ..IterativeConfig::default()
        };
        let options = WplOptions {
            gamma: 0.01,
            anti_ring: false,
            ..WplOptions::default()
        };
        let mut solver = WplDeconvolver::new(&img, &psf, &config, options).unwrap();
        let out = solver.deblur(None).unwrap();
        assert_eq!(out.data.shape(), &[12, 12]);
        assert!(out.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_wpl_rejects_zero_sum_psf() {
        let (_, img) = blurred_scene(8, &gaussian_psf(3, 1.0));
        let zero_psf = ArrayD::zeros(IxDyn(&[3, 3]));
        let mut solver = WplDeconvolver::new(
            &img,
            &zero_psf,
            &IterativeConfig::default(),
            WplOptions::default(),
        )
        .unwrap();
        let err = solver.deblur(None).unwrap_err();
        assert!(matches!(err, DeconvError::BadPsfBank(_)));
    }

    #[test]
    fn test_db_round_trip() {
        let mut x = ArrayD::from_shape_fn(IxDyn(&[4, 4]), |ix| 1.0 + ix[0] as f64);
        let orig = x.clone();
        to_db(&mut x, -90.0);
        un_db(&mut x);
        for (a, b) in x.iter().zip(orig.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_gaussian_weights_unity_at_origin() {
        let w = gaussian_weights::<f64>(&[8, 8], 1.0, 1.0, 1.0);
        assert!((w[[0, 0]] - 1.0).abs() < 1e-12);
        assert!(w.iter().all(|&v| v > 0.0 && v <= 1.0));
    }
}
