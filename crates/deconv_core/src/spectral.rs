//! Frequency-domain regularized deconvolution.
//!
//! One generic solver covers {Tikhonov, TSVD, generalized Tikhonov} in both
//! transform domains (FFT with periodic padding, DCT with reflexive padding)
//! for rank-2/3 images in either precision. The transform-domain spectra are
//! computed once per instance and cached in a [`SpectralState`], so `update`
//! re-filters at a new alpha without re-running any transform.

use log::debug;
use ndarray::{ArrayD, IxDyn, Zip};
use num_complex::Complex;

use crate::error::{DeconvError, DeconvResult};
use crate::float_trait::DeconvFloat;
use crate::gcv::{gcv_gtikhonov, gcv_tikhonov, tsvd_cutoff};
use crate::image::{validate_shapes, Blurred, Deblurred, OutputType, PixelType};
use crate::padding::{circ_shift, dct_shift, pad, pad_offset, unpad, BoundaryMode, ResizeMode};
use crate::transforms::TransformPlans;
use crate::utils::max_location;
use crate::ExecContext;

/// Which regularization filter to apply in the transform domain.
#[derive(Debug, Clone)]
pub enum SpectralAlgorithm<F: DeconvFloat> {
    /// `X = conj(S)*B / (|S|^2 + alpha^2)`.
    Tikhonov,
    /// Invert spectral components at or above a cutoff, zero the rest. The
    /// regularization parameter is the cutoff magnitude.
    Tsvd,
    /// `X = conj(Sa)*B / (|Sa|^2 + alpha^2*|Sd|^2)` with `Sd` the spectrum
    /// of a differentiation stencil (3 samples wide per axis).
    GeneralizedTikhonov { stencil: ArrayD<F> },
}

/// Transform pairing: FFT with periodic boundaries, or DCT with reflexive
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDomain {
    Fourier,
    Cosine,
}

/// Cached transform-domain data, built once on the first deblur call.
enum SpectralState<F: DeconvFloat> {
    FourierTik {
        /// `conj(S) * Bhat`.
        numer: ArrayD<Complex<F>>,
        s_mag2: ArrayD<F>,
        b_mag: ArrayD<F>,
    },
    FourierTsvd {
        s: ArrayD<Complex<F>>,
        b_hat: ArrayD<Complex<F>>,
    },
    FourierGtik {
        /// `conj(Sa) * Bhat`.
        numer: ArrayD<Complex<F>>,
        sa_mag2: ArrayD<F>,
        sd_mag2: ArrayD<F>,
        b_mag: ArrayD<F>,
    },
    CosineTik {
        /// `S * Bhat` (DCT spectra are real).
        numer: ArrayD<F>,
        s2: ArrayD<F>,
        b_mag: ArrayD<F>,
    },
    CosineTsvd {
        s: ArrayD<F>,
        b_hat: ArrayD<F>,
    },
    CosineGtik {
        numer: ArrayD<F>,
        sa2: ArrayD<F>,
        sd2: ArrayD<F>,
        b_mag: ArrayD<F>,
    },
}

/// Generic spectral deconvolver.
pub struct SpectralDeconvolver<F: DeconvFloat> {
    algorithm: SpectralAlgorithm<F>,
    domain: TransformDomain,
    output: PixelType,
    exec: ExecContext,
    plans: TransformPlans<F>,
    orig_shape: Vec<usize>,
    padded_shape: Vec<usize>,
    offset: Vec<usize>,
    /// Padded observed image (spatial domain).
    b: ArrayD<F>,
    /// Normalized, zero-padded PSF (spatial domain).
    psf: ArrayD<F>,
    /// PSF peak inside the padded array.
    psf_center: Vec<usize>,
    state: Option<SpectralState<F>>,
}

fn embed_top_left<F: DeconvFloat>(small: &ArrayD<F>, target: &[usize]) -> ArrayD<F> {
    let mut out = ArrayD::zeros(IxDyn(target));
    for (ix, &v) in small.indexed_iter() {
        out[ix] = v;
    }
    out
}

impl<F: DeconvFloat> SpectralDeconvolver<F> {
    pub fn new(
        image: &Blurred<F>,
        psf: &ArrayD<F>,
        algorithm: SpectralAlgorithm<F>,
        domain: TransformDomain,
        resize: ResizeMode,
        output: OutputType,
        exec: ExecContext,
    ) -> DeconvResult<Self> {
        validate_shapes(image.data(), psf)?;
        let rank = image.data().ndim();
        if let SpectralAlgorithm::GeneralizedTikhonov { stencil } = &algorithm {
            if stencil.ndim() != rank || stencil.shape().iter().any(|&n| n != 3) {
                return Err(DeconvError::BadStencil {
                    stencil: stencil.shape().to_vec(),
                    rank,
                });
            }
        }
        let psf_sum = psf.sum();
        if psf_sum == F::zero() {
            return Err(DeconvError::BadConfig("PSF sums to zero".into()));
        }

        let orig_shape = image.shape().to_vec();
        let padded_shape: Vec<usize> = match resize {
            ResizeMode::None => orig_shape.clone(),
            ResizeMode::NextPowerOfTwo => {
                orig_shape.iter().map(|&n| n.next_power_of_two()).collect()
            }
        };
        let offset = pad_offset(&orig_shape, &padded_shape);
        let boundary = match domain {
            TransformDomain::Fourier => BoundaryMode::Periodic,
            TransformDomain::Cosine => BoundaryMode::Reflexive,
        };
        let b = pad(image.data(), &padded_shape, boundary, &exec);

        let (peak, _) = max_location(psf);
        let normalized = psf.mapv(|v| v / psf_sum);
        let psf_padded = pad(&normalized, &padded_shape, BoundaryMode::Zero, &exec);
        let psf_off = pad_offset(psf.shape(), &padded_shape);
        let psf_center: Vec<usize> = peak
            .iter()
            .zip(psf_off.iter())
            .map(|(&p, &o)| p + o)
            .collect();

        Ok(Self {
            algorithm,
            domain,
            output: output.resolve(image.pixel_type()),
            exec,
            plans: TransformPlans::new(),
            orig_shape,
            padded_shape,
            offset,
            b,
            psf: psf_padded,
            psf_center,
            state: None,
        })
    }

    /// Deblur with the regularization parameter chosen by GCV.
    pub fn deblur(&mut self, threshold: Option<F>) -> DeconvResult<Deblurred<F>> {
        self.ensure_state();
        debug!("spectral deblur: computing regularization parameter");
        let alpha = self.auto_alpha()?;
        debug!("spectral deblur: alpha = {alpha:?}");
        let data = self.estimate(alpha, threshold)?;
        Ok(self.wrap(data, alpha))
    }

    /// Deblur with a caller-supplied parameter (for TSVD, the cutoff).
    pub fn deblur_with_alpha(
        &mut self,
        alpha: F,
        threshold: Option<F>,
    ) -> DeconvResult<Deblurred<F>> {
        self.ensure_state();
        let data = self.estimate(alpha, threshold)?;
        Ok(self.wrap(data, alpha))
    }

    /// Re-filter at a new parameter from the cached spectra, overwriting
    /// `image` in place. Requires a prior deblur call on this instance.
    pub fn update(
        &mut self,
        alpha: F,
        threshold: Option<F>,
        image: &mut Deblurred<F>,
    ) -> DeconvResult<()> {
        if self.state.is_none() {
            return Err(DeconvError::NotReady);
        }
        debug!("spectral update: alpha = {alpha:?}");
        image.data = self.estimate(alpha, threshold)?;
        image.pixel_type = self.output;
        image.alpha = alpha.to_f64();
        Ok(())
    }

    fn wrap(&self, data: ArrayD<F>, alpha: F) -> Deblurred<F> {
        Deblurred {
            data,
            pixel_type: self.output,
            alpha: alpha.to_f64(),
            iterations: None,
        }
    }

    /// Transform the padded image and operator once, caching the spectra.
    fn ensure_state(&mut self) {
        if self.state.is_some() {
            return;
        }
        let rank = self.b.ndim();
        let state = match self.domain {
            TransformDomain::Fourier => {
                let shifted = circ_shift(&self.psf, &self.psf_center);
                let s = self.plans.fft_real(&shifted);
                let b_hat = self.plans.fft_real(&self.b);
                match &self.algorithm {
                    SpectralAlgorithm::Tikhonov => {
                        let s_mag2 = s.mapv(|c| c.norm_sqr());
                        let b_mag = b_hat.mapv(|c| c.norm());
                        let mut numer = b_hat;
                        numer.zip_mut_with(&s, |n, &si| *n = si.conj() * *n);
                        SpectralState::FourierTik {
                            numer,
                            s_mag2,
                            b_mag,
                        }
                    }
                    SpectralAlgorithm::Tsvd => SpectralState::FourierTsvd { s, b_hat },
                    SpectralAlgorithm::GeneralizedTikhonov { stencil } => {
                        let pd = embed_top_left(stencil, &self.padded_shape);
                        let pd_shifted = circ_shift(&pd, &vec![1; rank]);
                        let sd = self.plans.fft_real(&pd_shifted);
                        let sa_mag2 = s.mapv(|c| c.norm_sqr());
                        let sd_mag2 = sd.mapv(|c| c.norm_sqr());
                        let b_mag = b_hat.mapv(|c| c.norm());
                        let mut numer = b_hat;
                        numer.zip_mut_with(&s, |n, &si| *n = si.conj() * *n);
                        SpectralState::FourierGtik {
                            numer,
                            sa_mag2,
                            sd_mag2,
                            b_mag,
                        }
                    }
                }
            }
            TransformDomain::Cosine => {
                // DCT spectrum of the operator: dct(dctShift(PSF)) ./ dct(e1),
                // with e1 the unit impulse at the origin.
                let mut e1 = ArrayD::zeros(IxDyn(&self.padded_shape));
                e1[IxDyn(&vec![0; rank])] = F::one();
                self.plans.dct2(&mut e1);
                let mut s = dct_shift(&self.psf, &self.psf_center);
                self.plans.dct2(&mut s);
                s.zip_mut_with(&e1, |a, &b| *a = *a / b);
                let mut b_hat = self.b.clone();
                self.plans.dct2(&mut b_hat);
                match &self.algorithm {
                    SpectralAlgorithm::Tikhonov => {
                        let s2 = s.mapv(|v| v * v);
                        let b_mag = b_hat.mapv(|v| v.abs());
                        let mut numer = b_hat;
                        numer.zip_mut_with(&s, |n, &si| *n *= si);
                        SpectralState::CosineTik { numer, s2, b_mag }
                    }
                    SpectralAlgorithm::Tsvd => SpectralState::CosineTsvd { s, b_hat },
                    SpectralAlgorithm::GeneralizedTikhonov { stencil } => {
                        let pd = embed_top_left(stencil, &self.padded_shape);
                        let mut sd = dct_shift(&pd, &vec![1; rank]);
                        self.plans.dct2(&mut sd);
                        sd.zip_mut_with(&e1, |a, &b| *a = *a / b);
                        let sa2 = s.mapv(|v| v * v);
                        let sd2 = sd.mapv(|v| v * v);
                        let b_mag = b_hat.mapv(|v| v.abs());
                        let mut numer = b_hat;
                        numer.zip_mut_with(&s, |n, &si| *n *= si);
                        SpectralState::CosineGtik {
                            numer,
                            sa2,
                            sd2,
                            b_mag,
                        }
                    }
                }
            }
        };
        self.state = Some(state);
    }

    /// GCV-selected parameter from the cached spectra.
    fn auto_alpha(&self) -> DeconvResult<F> {
        let state = self.state.as_ref().ok_or(DeconvError::NotReady)?;
        Ok(match state {
            SpectralState::FourierTik { s_mag2, b_mag, .. } => {
                gcv_tikhonov(&s_mag2.mapv(|v| v.sqrt()), b_mag)
            }
            SpectralState::FourierTsvd { s, b_hat } => {
                tsvd_cutoff(&s.mapv(|c| c.norm()), &b_hat.mapv(|c| c.norm()))
            }
            SpectralState::FourierGtik {
                sa_mag2,
                sd_mag2,
                b_mag,
                ..
            } => gcv_gtikhonov(
                &sa_mag2.mapv(|v| v.sqrt()),
                &sd_mag2.mapv(|v| v.sqrt()),
                b_mag,
            ),
            SpectralState::CosineTik { s2, b_mag, .. } => {
                gcv_tikhonov(&s2.mapv(|v| v.sqrt()), b_mag)
            }
            SpectralState::CosineTsvd { s, b_hat } => {
                tsvd_cutoff(&s.mapv(|v| v.abs()), &b_hat.mapv(|v| v.abs()))
            }
            SpectralState::CosineGtik {
                sa2, sd2, b_mag, ..
            } => gcv_gtikhonov(&sa2.mapv(|v| v.sqrt()), &sd2.mapv(|v| v.sqrt()), b_mag),
        })
    }

    /// Apply the filter at `alpha`, invert the transform, and extract the
    /// logical window. A zero denominator (alpha = 0 at a spectral null)
    /// yields zero, never NaN.
    fn estimate(&mut self, alpha: F, threshold: Option<F>) -> DeconvResult<ArrayD<F>> {
        let a2 = alpha * alpha;
        let par = self.b.len() >= self.exec.parallel_threshold;
        let zero_c = Complex::new(F::zero(), F::zero());
        let padded = match self.state.as_ref().ok_or(DeconvError::NotReady)? {
            SpectralState::FourierTik { numer, s_mag2, .. } => {
                let mut x_hat = numer.clone();
                let apply = move |x: &mut Complex<F>, &m: &F| {
                    let den = m + a2;
                    *x = if den == F::zero() { zero_c } else { *x / den };
                };
                let zip = Zip::from(&mut x_hat).and(s_mag2);
                if par {
                    zip.par_for_each(apply);
                } else {
                    zip.for_each(apply);
                }
                self.plans.ifft_real(x_hat)
            }
            SpectralState::FourierTsvd { s, b_hat } => {
                let mut x_hat = b_hat.clone();
                let apply = move |x: &mut Complex<F>, &si: &Complex<F>| {
                    *x = if si.norm() >= alpha && si.norm_sqr() > F::zero() {
                        *x / si
                    } else {
                        zero_c
                    };
                };
                let zip = Zip::from(&mut x_hat).and(s);
                if par {
                    zip.par_for_each(apply);
                } else {
                    zip.for_each(apply);
                }
                self.plans.ifft_real(x_hat)
            }
            SpectralState::FourierGtik {
                numer,
                sa_mag2,
                sd_mag2,
                ..
            } => {
                let mut x_hat = numer.clone();
                let apply = move |x: &mut Complex<F>, &sa: &F, &sd: &F| {
                    let den = sa + a2 * sd;
                    *x = if den == F::zero() { zero_c } else { *x / den };
                };
                let zip = Zip::from(&mut x_hat).and(sa_mag2).and(sd_mag2);
                if par {
                    zip.par_for_each(apply);
                } else {
                    zip.for_each(apply);
                }
                self.plans.ifft_real(x_hat)
            }
            SpectralState::CosineTik { numer, s2, .. } => {
                let mut x_hat = numer.clone();
                let apply = move |x: &mut F, &m: &F| {
                    let den = m + a2;
                    *x = if den == F::zero() { F::zero() } else { *x / den };
                };
                let zip = Zip::from(&mut x_hat).and(s2);
                if par {
                    zip.par_for_each(apply);
                } else {
                    zip.for_each(apply);
                }
                self.plans.dct3(&mut x_hat);
                x_hat
            }
            SpectralState::CosineTsvd { s, b_hat } => {
                let mut x_hat = b_hat.clone();
                let apply = move |x: &mut F, &si: &F| {
                    *x = if si.abs() >= alpha && si != F::zero() {
                        *x / si
                    } else {
                        F::zero()
                    };
                };
                let zip = Zip::from(&mut x_hat).and(s);
                if par {
                    zip.par_for_each(apply);
                } else {
                    zip.for_each(apply);
                }
                self.plans.dct3(&mut x_hat);
                x_hat
            }
            SpectralState::CosineGtik {
                numer, sa2, sd2, ..
            } => {
                let mut x_hat = numer.clone();
                let apply = move |x: &mut F, &sa: &F, &sd: &F| {
                    let den = sa + a2 * sd;
                    *x = if den == F::zero() { F::zero() } else { *x / den };
                };
                let zip = Zip::from(&mut x_hat).and(sa2).and(sd2);
                if par {
                    zip.par_for_each(apply);
                } else {
                    zip.for_each(apply);
                }
                self.plans.dct3(&mut x_hat);
                x_hat
            }
        };
        Ok(unpad(&padded, &self.offset, &self.orig_shape, threshold))
    }
}
