//! Rank-generic FFT and DCT transforms with cached plans.
//!
//! All transforms operate on dynamic-rank arrays axis by axis: each 1D lane
//! along an axis is copied into a contiguous buffer, transformed with a plan
//! from the cached planner, and written back. The planners (`rustfft`,
//! `rustdct`) memoize plans internally, so repeated transforms of the same
//! extents reuse their twiddle tables.

use ndarray::{ArrayD, Axis};
use rustdct::DctPlanner;
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::float_trait::DeconvFloat;

/// Owns the FFT and DCT planners plus lane scratch for one solver instance.
pub struct TransformPlans<F: DeconvFloat> {
    fft: FftPlanner<F>,
    dct: DctPlanner<F>,
}

impl<F: DeconvFloat> Default for TransformPlans<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: DeconvFloat> TransformPlans<F> {
    pub fn new() -> Self {
        Self {
            fft: FftPlanner::new(),
            dct: DctPlanner::new(),
        }
    }

    /// Forward complex DFT along every axis, in place. Unnormalized.
    pub fn fft_forward(&mut self, data: &mut ArrayD<Complex<F>>) {
        for ax in 0..data.ndim() {
            let n = data.len_of(Axis(ax));
            if n <= 1 {
                continue;
            }
            let plan = self.fft.plan_fft_forward(n);
            let mut buf = vec![Complex::new(F::zero(), F::zero()); n];
            for mut lane in data.lanes_mut(Axis(ax)) {
                for (b, v) in buf.iter_mut().zip(lane.iter()) {
                    *b = *v;
                }
                plan.process(&mut buf);
                for (v, b) in lane.iter_mut().zip(buf.iter()) {
                    *v = *b;
                }
            }
        }
    }

    /// Inverse complex DFT along every axis, in place. Scaled by `1/len` so
    /// that `fft_inverse(fft_forward(x)) == x`.
    pub fn fft_inverse(&mut self, data: &mut ArrayD<Complex<F>>) {
        for ax in 0..data.ndim() {
            let n = data.len_of(Axis(ax));
            if n <= 1 {
                continue;
            }
            let plan = self.fft.plan_fft_inverse(n);
            let mut buf = vec![Complex::new(F::zero(), F::zero()); n];
            for mut lane in data.lanes_mut(Axis(ax)) {
                for (b, v) in buf.iter_mut().zip(lane.iter()) {
                    *b = *v;
                }
                plan.process(&mut buf);
                for (v, b) in lane.iter_mut().zip(buf.iter()) {
                    *v = *b;
                }
            }
        }
        let scale = F::one() / F::usize_as(data.len());
        data.mapv_inplace(|c| c * scale);
    }

    /// Forward DFT of a real array.
    pub fn fft_real(&mut self, data: &ArrayD<F>) -> ArrayD<Complex<F>> {
        let mut out = data.mapv(|v| Complex::new(v, F::zero()));
        self.fft_forward(&mut out);
        out
    }

    /// Inverse DFT keeping the real part only.
    pub fn ifft_real(&mut self, mut data: ArrayD<Complex<F>>) -> ArrayD<F> {
        self.fft_inverse(&mut data);
        data.mapv(|c| c.re)
    }

    /// Orthonormal DCT-II along every axis, in place.
    ///
    /// Per axis of length `n`, coefficient 0 is scaled by `sqrt(1/n)` and the
    /// rest by `sqrt(2/n)`, so the transform matrix is orthogonal and
    /// [`Self::dct3`] is its exact inverse.
    pub fn dct2(&mut self, data: &mut ArrayD<F>) {
        let two = F::from_f64_c(2.0);
        for ax in 0..data.ndim() {
            let n = data.len_of(Axis(ax));
            if n == 0 {
                continue;
            }
            let plan = self.dct.plan_dct2(n);
            let s0 = (F::one() / F::usize_as(n)).sqrt();
            let sk = (two / F::usize_as(n)).sqrt();
            let mut buf = vec![F::zero(); n];
            for mut lane in data.lanes_mut(Axis(ax)) {
                for (b, v) in buf.iter_mut().zip(lane.iter()) {
                    *b = *v;
                }
                plan.process_dct2(&mut buf);
                lane[0] = buf[0] * s0;
                for k in 1..n {
                    lane[k] = buf[k] * sk;
                }
            }
        }
    }

    /// Orthonormal DCT-III along every axis, in place. Inverse of [`Self::dct2`].
    pub fn dct3(&mut self, data: &mut ArrayD<F>) {
        let two = F::from_f64_c(2.0);
        for ax in 0..data.ndim() {
            let n = data.len_of(Axis(ax));
            if n == 0 {
                continue;
            }
            let plan = self.dct.plan_dct3(n);
            // rustdct's DCT-III halves the first input sample, so the
            // orthonormal pre-scaling doubles it.
            let s0 = two / F::usize_as(n).sqrt();
            let sk = (two / F::usize_as(n)).sqrt();
            let mut buf = vec![F::zero(); n];
            for mut lane in data.lanes_mut(Axis(ax)) {
                buf[0] = lane[0] * s0;
                for k in 1..n {
                    buf[k] = lane[k] * sk;
                }
                plan.process_dct3(&mut buf);
                for (v, b) in lane.iter_mut().zip(buf.iter()) {
                    *v = *b;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::IxDyn;

    // Deterministic LCG so tests need no rand dependency.
    struct SimpleLcg {
        state: u64,
    }

    impl SimpleLcg {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_f64(&mut self) -> f64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((self.state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }
    }

    fn random_array(shape: &[usize], seed: u64) -> ArrayD<f64> {
        let mut rng = SimpleLcg::new(seed);
        ArrayD::from_shape_fn(IxDyn(shape), |_| rng.next_f64())
    }

    fn max_abs_diff(a: &ArrayD<f64>, b: &ArrayD<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_fft_roundtrip_2d() {
        let input = random_array(&[8, 12], 12345);
        let mut plans = TransformPlans::<f64>::new();
        let freq = plans.fft_real(&input);
        let output = plans.ifft_real(freq);
        assert_abs_diff_eq!(max_abs_diff(&input, &output), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fft_roundtrip_3d() {
        let input = random_array(&[4, 6, 5], 777);
        let mut plans = TransformPlans::<f64>::new();
        let freq = plans.fft_real(&input);
        let output = plans.ifft_real(freq);
        assert_abs_diff_eq!(max_abs_diff(&input, &output), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fft_roundtrip_f32() {
        let mut rng = SimpleLcg::new(42);
        let input = ArrayD::from_shape_fn(IxDyn(&[16, 16]), |_| rng.next_f64() as f32);
        let mut plans = TransformPlans::<f32>::new();
        let freq = plans.fft_real(&input);
        let output = plans.ifft_real(freq);
        let max_diff = input
            .iter()
            .zip(output.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0f32, f32::max);
        assert_abs_diff_eq!(max_diff, 0.0f32, epsilon = 1e-5);
    }

    #[test]
    fn test_fft_dc_component() {
        let input = ArrayD::from_elem(IxDyn(&[8, 8]), 1.0f64);
        let mut plans = TransformPlans::<f64>::new();
        let freq = plans.fft_real(&input);
        assert_abs_diff_eq!(freq[[0, 0]].re, 64.0, epsilon = 1e-10);
        let off_dc: f64 = freq.iter().skip(1).map(|c| c.norm()).sum();
        assert!(off_dc < 1e-9, "non-DC energy = {off_dc}");
    }

    #[test]
    fn test_dct_roundtrip_2d() {
        let input = random_array(&[7, 9], 999);
        let mut data = input.clone();
        let mut plans = TransformPlans::<f64>::new();
        plans.dct2(&mut data);
        plans.dct3(&mut data);
        assert_abs_diff_eq!(max_abs_diff(&input, &data), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dct_roundtrip_3d() {
        let input = random_array(&[5, 4, 6], 31337);
        let mut data = input.clone();
        let mut plans = TransformPlans::<f64>::new();
        plans.dct2(&mut data);
        plans.dct3(&mut data);
        assert_abs_diff_eq!(max_abs_diff(&input, &data), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dct2_is_orthonormal() {
        // An orthogonal transform preserves the l2 norm.
        let input = random_array(&[8, 8], 5150);
        let mut data = input.clone();
        let mut plans = TransformPlans::<f64>::new();
        plans.dct2(&mut data);
        let energy_in: f64 = input.iter().map(|x| x * x).sum();
        let energy_out: f64 = data.iter().map(|x| x * x).sum();
        assert_relative_eq!(energy_out, energy_in, max_relative = 1e-12);
    }

    #[test]
    fn test_dct2_constant_input() {
        // Constant input concentrates in the DC coefficient: sqrt(n) * c per axis.
        let input = ArrayD::from_elem(IxDyn(&[4, 9]), 2.0f64);
        let mut data = input.clone();
        let mut plans = TransformPlans::<f64>::new();
        plans.dct2(&mut data);
        let expected = 2.0 * (4.0f64).sqrt() * (9.0f64).sqrt();
        assert_abs_diff_eq!(data[[0, 0]], expected, epsilon = 1e-12);
        let off_dc: f64 = data.iter().skip(1).map(|x| x.abs()).sum();
        assert!(off_dc < 1e-10);
    }

    #[test]
    fn test_dct_roundtrip_length_one_axis() {
        let input = random_array(&[1, 6], 2024);
        let mut data = input.clone();
        let mut plans = TransformPlans::<f64>::new();
        plans.dct2(&mut data);
        plans.dct3(&mut data);
        assert_abs_diff_eq!(max_abs_diff(&input, &data), 0.0, epsilon = 1e-12);
    }
}
