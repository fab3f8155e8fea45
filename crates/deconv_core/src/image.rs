//! In-memory image ingest and output formatting.
//!
//! The host hands over plain arrays plus a pixel-type tag; results go back
//! the same way. No file formats or display models live here.

use ndarray::{Array2, Array3, ArrayD, IxDyn};

use crate::error::{DeconvError, DeconvResult};
use crate::float_trait::DeconvFloat;

/// Sample type of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    /// 8-bit unsigned.
    Byte,
    /// 16-bit unsigned.
    Short,
    /// 32-bit float.
    Float,
}

/// Requested sample type of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Byte,
    Short,
    Float,
    SameAsSource,
}

impl OutputType {
    /// Resolve against the source pixel type.
    pub fn resolve(self, source: PixelType) -> PixelType {
        match self {
            OutputType::Byte => PixelType::Byte,
            OutputType::Short => PixelType::Short,
            OutputType::Float => PixelType::Float,
            OutputType::SameAsSource => source,
        }
    }
}

/// Checks common to every solver: rank 2 or 3, no empty axis, equal ranks,
/// and PSF no larger than the image on any axis.
pub fn validate_shapes<F: DeconvFloat>(image: &ArrayD<F>, psf: &ArrayD<F>) -> DeconvResult<()> {
    let rank = image.ndim();
    if rank != 2 && rank != 3 {
        return Err(DeconvError::BadShape(format!(
            "image rank {rank} (expected 2 or 3)"
        )));
    }
    if psf.ndim() != rank {
        return Err(DeconvError::BadShape(format!(
            "PSF rank {} does not match image rank {rank}",
            psf.ndim()
        )));
    }
    if image.shape().iter().any(|&n| n == 0) || psf.shape().iter().any(|&n| n == 0) {
        return Err(DeconvError::BadShape("empty axis".into()));
    }
    if psf
        .shape()
        .iter()
        .zip(image.shape().iter())
        .any(|(&p, &i)| p > i)
    {
        return Err(DeconvError::PsfTooLarge {
            psf: psf.shape().to_vec(),
            image: image.shape().to_vec(),
        });
    }
    Ok(())
}

/// The observed (blurred) image.
#[derive(Debug, Clone)]
pub struct Blurred<F: DeconvFloat> {
    data: ArrayD<F>,
    pixel_type: PixelType,
}

impl<F: DeconvFloat> Blurred<F> {
    /// Single 2D slice.
    pub fn from_slice(data: Array2<F>, pixel_type: PixelType) -> Self {
        Self {
            data: data.into_dyn(),
            pixel_type,
        }
    }

    /// 3D volume.
    pub fn from_volume(data: Array3<F>, pixel_type: PixelType) -> Self {
        Self {
            data: data.into_dyn(),
            pixel_type,
        }
    }

    /// Ordered sequence of equally shaped 2D slices, stacked along axis 0.
    pub fn from_stack(slices: &[Array2<F>], pixel_type: PixelType) -> DeconvResult<Self> {
        if slices.is_empty() {
            return Err(DeconvError::BadShape("empty stack".into()));
        }
        let (rows, cols) = slices[0].dim();
        if slices.iter().any(|s| s.dim() != (rows, cols)) {
            return Err(DeconvError::BadShape(
                "stack slices differ in shape".into(),
            ));
        }
        let mut data = ArrayD::zeros(IxDyn(&[slices.len(), rows, cols]));
        for (z, slice) in slices.iter().enumerate() {
            for ((r, c), &v) in slice.indexed_iter() {
                data[[z, r, c]] = v;
            }
        }
        Ok(Self { data, pixel_type })
    }

    pub fn data(&self) -> &ArrayD<F> {
        &self.data
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// A grid of PSF tiles for spatially variant blur. A single tile models
/// spatially invariant blur.
#[derive(Debug, Clone)]
pub struct PsfBank<F: DeconvFloat> {
    tiles: Vec<ArrayD<F>>,
    /// Grid extents, same rank as the tiles (e.g. `[2, 3]` = 2x3 blocks).
    layout: Vec<usize>,
}

impl<F: DeconvFloat> PsfBank<F> {
    /// Spatially invariant: one PSF for the whole image.
    pub fn single(psf: ArrayD<F>) -> Self {
        let rank = psf.ndim();
        Self {
            tiles: vec![psf],
            layout: vec![1; rank],
        }
    }

    /// Row-major grid of tiles. All tiles must share one shape, and the grid
    /// rank must match the tile rank.
    pub fn grid(tiles: Vec<ArrayD<F>>, layout: Vec<usize>) -> DeconvResult<Self> {
        let expected: usize = layout.iter().product();
        if tiles.is_empty() || tiles.len() != expected {
            return Err(DeconvError::BadPsfBank(format!(
                "{} tiles for layout {layout:?}",
                tiles.len()
            )));
        }
        let shape = tiles[0].shape().to_vec();
        if layout.len() != shape.len() {
            return Err(DeconvError::BadPsfBank(format!(
                "grid rank {} does not match tile rank {}",
                layout.len(),
                shape.len()
            )));
        }
        if tiles.iter().any(|t| t.shape() != shape.as_slice()) {
            return Err(DeconvError::BadPsfBank("tiles differ in shape".into()));
        }
        Ok(Self { tiles, layout })
    }

    pub fn tiles(&self) -> &[ArrayD<F>] {
        &self.tiles
    }

    pub fn layout(&self) -> &[usize] {
        &self.layout
    }

    pub fn tile_shape(&self) -> &[usize] {
        self.tiles[0].shape()
    }

    pub fn is_variant(&self) -> bool {
        self.tiles.len() > 1
    }
}

/// Quantized result samples.
#[derive(Debug, Clone)]
pub enum OutputData {
    Byte(ArrayD<u8>),
    Short(ArrayD<u16>),
    Float(ArrayD<f32>),
}

/// Result of a deblur or update call.
#[derive(Debug, Clone)]
pub struct Deblurred<F: DeconvFloat> {
    pub data: ArrayD<F>,
    pub pixel_type: PixelType,
    /// Regularization parameter actually used (spectral solvers).
    pub alpha: Option<f64>,
    /// Iterations actually run (iterative solvers).
    pub iterations: Option<usize>,
}

impl<F: DeconvFloat> Deblurred<F> {
    /// Quantize to the resolved pixel type: round and clamp for the integer
    /// types, plain cast for float.
    pub fn render(&self) -> OutputData {
        match self.pixel_type {
            PixelType::Byte => OutputData::Byte(self.data.mapv(|v| {
                let r = v.to_f64().unwrap_or(0.0).round();
                r.clamp(0.0, 255.0) as u8
            })),
            PixelType::Short => OutputData::Short(self.data.mapv(|v| {
                let r = v.to_f64().unwrap_or(0.0).round();
                r.clamp(0.0, 65535.0) as u16
            })),
            PixelType::Float => {
                OutputData::Float(self.data.mapv(|v| v.to_f64().unwrap_or(0.0) as f32))
            }
        }
    }
}
