//! Float trait abstraction for f32/f64 support.
//!
//! This module provides a unified trait for floating-point operations,
//! enabling the deconvolution library to work with both f32 and f64
//! precision from a single generic implementation.

use num_traits::{Float, FromPrimitive, NumAssign};
use rustdct::DctNum;
use rustfft::FftNum;
use std::fmt::Debug;
use std::iter::Sum;

/// Trait alias for floating point types supported by the solvers.
///
/// This trait combines all the bounds needed for deconvolution:
/// - Basic float operations (Float, NumAssign)
/// - FFT/DCT compatibility (FftNum from rustfft, DctNum from rustdct)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug printing
pub trait DeconvFloat:
    Float + FftNum + DctNum + FromPrimitive + NumAssign + Sum + Debug + Send + Sync + 'static
{
    /// Relative tolerance used by the 1-D GCV minimizer.
    const FMIN_TOL: Self;

    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Machine epsilon for this type.
    fn machine_eps() -> Self;

    /// Square root of machine epsilon.
    fn sqrt_eps() -> Self {
        Self::machine_eps().sqrt()
    }
}

impl DeconvFloat for f32 {
    const FMIN_TOL: Self = 1.0e-4;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }

    #[inline]
    fn machine_eps() -> Self {
        f32::EPSILON
    }
}

impl DeconvFloat for f64 {
    const FMIN_TOL: Self = 1.0e-4;

    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }

    #[inline]
    fn machine_eps() -> Self {
        f64::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_trait_impl() {
        let val: f32 = DeconvFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f32::consts::PI).abs() < 1e-5);

        let usize_val: f32 = DeconvFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f32);
    }

    #[test]
    fn test_f64_trait_impl() {
        let val: f64 = DeconvFloat::from_f64_c(std::f64::consts::PI);
        assert!((val - std::f64::consts::PI).abs() < 1e-14);

        let usize_val: f64 = DeconvFloat::usize_as(42);
        assert_eq!(usize_val, 42.0f64);
    }

    #[test]
    fn test_sqrt_eps() {
        assert!((f64::sqrt_eps() - f64::EPSILON.sqrt()).abs() < 1e-18);
        assert!((f32::sqrt_eps() - f32::EPSILON.sqrt()).abs() < 1e-9);
    }
}
