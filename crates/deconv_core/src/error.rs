//! Error type shared by all solvers.

use thiserror::Error;

/// Errors reported during solver construction or execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeconvError {
    /// The PSF extent exceeds the image extent on at least one axis.
    #[error("PSF extent {psf:?} exceeds image extent {image:?}")]
    PsfTooLarge { psf: Vec<usize>, image: Vec<usize> },

    /// Image or PSF has an unsupported shape (rank not 2 or 3, empty axis,
    /// or mismatched ranks between image and PSF).
    #[error("unsupported array shape: {0}")]
    BadShape(String),

    /// The differentiation stencil for generalized Tikhonov does not match
    /// the image rank, or is not 3 samples wide on every axis.
    #[error("stencil shape {stencil:?} invalid for rank-{rank} image")]
    BadStencil { stencil: Vec<usize>, rank: usize },

    /// `update` was called before any `deblur` populated the cached spectra.
    #[error("update called before deblur: no cached spectra")]
    NotReady,

    /// A PSF bank used for spatially variant blur has inconsistent tiles.
    #[error("invalid PSF bank: {0}")]
    BadPsfBank(String),

    /// An iterative solver was configured with invalid parameters.
    #[error("invalid configuration: {0}")]
    BadConfig(String),
}

/// Convenience alias used throughout the crate.
pub type DeconvResult<T> = Result<T, DeconvError>;
