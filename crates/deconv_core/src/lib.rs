//! Regularized deconvolution of 2D images and 3D volumes.
//!
//! Two solver families share the building blocks in this crate:
//!
//! * **Spectral** ([`SpectralDeconvolver`]): Tikhonov, TSVD, and generalized
//!   Tikhonov filtering in the FFT or DCT domain, with the regularization
//!   parameter chosen by generalized cross-validation when not supplied.
//! * **Iterative** ([`iterative`]): CGLS, MRNSD, HyBR, and WPL, operating on
//!   a padded blur operator and supporting spatially variant PSF banks and
//!   an FFT-based preconditioner.
//!
//! Both families are generic over [`DeconvFloat`] (`f32` or `f64`) and over
//! image rank via `ndarray`'s dynamic-dimension arrays.

pub mod error;
pub mod float_trait;
pub mod fmin;
pub mod gcv;
pub mod image;
pub mod iterative;
pub mod linalg;
pub mod operator;
pub mod padding;
pub mod preconditioner;
pub mod spectral;
pub mod transforms;
pub mod utils;

pub use error::{DeconvError, DeconvResult};
pub use float_trait::DeconvFloat;
pub use image::{Blurred, Deblurred, OutputData, OutputType, PixelType, PsfBank};
pub use iterative::{
    CglsDeconvolver, HybrDeconvolver, HybrOptions, IterativeConfig, MrnsdDeconvolver,
    Preconditioning, RegMethod, WplDeconvolver, WplOptions,
};
pub use operator::BlurOperator;
pub use padding::{BoundaryMode, ResizeMode};
pub use spectral::{SpectralAlgorithm, SpectralDeconvolver, TransformDomain};

/// Element count below which elementwise passes stay on the calling thread.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 65_536;

/// Per-instance execution settings.
///
/// Arrays with at least `parallel_threshold` elements are processed with
/// rayon; smaller ones run serially, where the fork overhead would dominate.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext {
    pub parallel_threshold: usize,
}

impl Default for ExecContext {
    /// A single-threaded rayon pool makes the fork pure overhead, so the
    /// default degenerates to serial there.
    fn default() -> Self {
        Self {
            parallel_threshold: if rayon::current_num_threads() > 1 {
                DEFAULT_PARALLEL_THRESHOLD
            } else {
                usize::MAX
            },
        }
    }
}

impl ExecContext {
    /// Force serial execution regardless of array size.
    pub fn serial() -> Self {
        Self {
            parallel_threshold: usize::MAX,
        }
    }
}
