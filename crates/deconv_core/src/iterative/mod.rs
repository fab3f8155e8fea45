//! Iterative deblurring: CGLS, MRNSD, HyBR, and WPL.
//!
//! All four share the padded [`BlurOperator`](crate::operator::BlurOperator)
//! and the optional circulant preconditioner. Solvers run on image-extent
//! arrays; padding happens inside the operator.

use ndarray::ArrayD;

use crate::float_trait::DeconvFloat;
use crate::image::OutputType;
use crate::padding::{BoundaryMode, ResizeMode};
use crate::ExecContext;

pub mod cgls;
pub mod hybr;
pub mod mrnsd;
pub mod wpl;

pub use cgls::CglsDeconvolver;
pub use hybr::{HybrDeconvolver, HybrOptions, RegMethod};
pub use mrnsd::MrnsdDeconvolver;
pub use wpl::{WplDeconvolver, WplOptions};

/// Preconditioner selection for the Krylov solvers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Preconditioning<F: DeconvFloat> {
    None,
    /// Circulant preconditioner; `tolerance` of `None` is chosen
    /// automatically from the spectrum.
    Fft { tolerance: Option<F> },
}

/// Settings shared by every iterative solver.
#[derive(Debug, Clone)]
pub struct IterativeConfig<F: DeconvFloat> {
    pub boundary: BoundaryMode,
    pub resize: ResizeMode,
    pub output: OutputType,
    pub max_iterations: usize,
    /// Stopping tolerance on the recorded residual norm; `None` selects
    /// `sqrt(eps) * ‖Aᵀb‖`.
    pub tolerance: Option<F>,
    pub preconditioner: Preconditioning<F>,
    pub exec: ExecContext,
}

impl<F: DeconvFloat> Default for IterativeConfig<F> {
    fn default() -> Self {
        Self {
            boundary: BoundaryMode::Reflexive,
            resize: ResizeMode::None,
            output: OutputType::SameAsSource,
            max_iterations: 10,
            tolerance: None,
            preconditioner: Preconditioning::None,
            exec: ExecContext::default(),
        }
    }
}

/// `y += alpha * x`.
pub(crate) fn axpy<F: DeconvFloat>(y: &mut ArrayD<F>, x: &ArrayD<F>, alpha: F) {
    y.zip_mut_with(x, |yi, &xi| *yi += alpha * xi);
}

/// Zeroes entries below the threshold; `None` passes everything through.
pub(crate) fn apply_threshold<F: DeconvFloat>(x: &mut ArrayD<F>, threshold: Option<F>) {
    if let Some(t) = threshold {
        x.mapv_inplace(|v| if v < t { F::zero() } else { v });
    }
}
