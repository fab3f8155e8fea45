//! Boundary extension, PSF shifts, and result extraction.
//!
//! Padding places the original data in a window at offset
//! `(target - orig + 1) / 2` per axis and fills the rest according to the
//! boundary mode. `unpad` extracts the same window, so the two are exact
//! inverses for any mode.

use ndarray::{ArrayD, Dimension, IxDyn};

use crate::float_trait::DeconvFloat;
use crate::ExecContext;

/// How samples outside the image are modeled during padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryMode {
    /// Wrap around (circular convolution, FFT-natural).
    Periodic,
    /// Mirror at the edges (DCT-natural, avoids wrap artifacts).
    Reflexive,
    /// Fill with zeros.
    Zero,
}

/// Whether working extents are rounded up to FFT-friendly sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    None,
    NextPowerOfTwo,
}

/// Window offset of the original data inside the padded array.
pub fn pad_offset(orig: &[usize], target: &[usize]) -> Vec<usize> {
    orig.iter()
        .zip(target.iter())
        .map(|(&o, &t)| (t - o + 1) / 2)
        .collect()
}

#[inline]
fn periodic(i: isize, n: usize) -> usize {
    i.rem_euclid(n as isize) as usize
}

#[inline]
fn mirror(i: isize, n: usize) -> usize {
    let n = n as isize;
    let ip = i.rem_euclid(2 * n);
    if ip < n {
        ip as usize
    } else {
        (n - (ip % n) - 1) as usize
    }
}

/// Pad `x` to `target` with the given boundary mode.
///
/// `target` must be elementwise `>=` the shape of `x`; equal shapes return a
/// plain copy.
pub fn pad<F: DeconvFloat>(
    x: &ArrayD<F>,
    target: &[usize],
    mode: BoundaryMode,
    exec: &ExecContext,
) -> ArrayD<F> {
    let shape = x.shape().to_vec();
    debug_assert!(shape.iter().zip(target).all(|(&o, &t)| t >= o));
    if shape == target {
        return x.clone();
    }
    let off = pad_offset(&shape, target);
    let mut out = ArrayD::<F>::zeros(IxDyn(target));

    let fill = |ix: &[usize], v: &mut F| {
        let mut src = Vec::with_capacity(ix.len());
        for (ax, &i) in ix.iter().enumerate() {
            let rel = i as isize - off[ax] as isize;
            let n = shape[ax];
            let s = match mode {
                BoundaryMode::Periodic => periodic(rel, n),
                BoundaryMode::Reflexive => mirror(rel, n),
                BoundaryMode::Zero => {
                    if rel < 0 || rel >= n as isize {
                        return;
                    }
                    rel as usize
                }
            };
            src.push(s);
        }
        *v = x[IxDyn(&src)];
    };

    if x.len() >= exec.parallel_threshold {
        use ndarray::parallel::prelude::*;
        out.outer_iter_mut()
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut sub)| {
                for (ix, v) in sub.indexed_iter_mut() {
                    let mut full = Vec::with_capacity(ix.ndim() + 1);
                    full.push(i);
                    full.extend_from_slice(ix.slice());
                    fill(&full, v);
                }
            });
    } else {
        for (ix, v) in out.indexed_iter_mut() {
            fill(ix.slice(), v);
        }
    }
    out
}

/// Rotate `x` so the sample at `center` lands at the origin, with periodic
/// wrap: `out[i] = x[(i + center) mod n]` per axis.
pub fn circ_shift<F: DeconvFloat>(x: &ArrayD<F>, center: &[usize]) -> ArrayD<F> {
    let shape = x.shape().to_vec();
    ArrayD::from_shape_fn(IxDyn(&shape), |ix| {
        let src: Vec<usize> = ix
            .slice()
            .iter()
            .enumerate()
            .map(|(ax, &i)| (i + center[ax]) % shape[ax])
            .collect();
        x[IxDyn(&src)]
    })
}

/// Fold the kernel about `center` into the top-left corner, consistent with
/// reflexive (DCT) boundary conditions.
///
/// Crops the largest window centered at `center` that fits on every axis
/// (radius `k`), then sums the 2^rank copies shifted by `k` or `k+1` per
/// axis. The result is the first column of the reflexive-boundary blur
/// operator, embedded in an array of the original shape.
pub fn dct_shift<F: DeconvFloat>(x: &ArrayD<F>, center: &[usize]) -> ArrayD<F> {
    let shape = x.shape().to_vec();
    let rank = shape.len();
    let k = center
        .iter()
        .zip(shape.iter())
        .map(|(&c, &n)| c.min(n - 1 - c))
        .min()
        .unwrap_or(0);
    let m = 2 * k + 1;

    let window = ArrayD::from_shape_fn(IxDyn(&vec![m; rank]), |ix| {
        let src: Vec<usize> = ix
            .slice()
            .iter()
            .enumerate()
            .map(|(ax, &i)| center[ax] - k + i)
            .collect();
        x[IxDyn(&src)]
    });

    let mut acc = ArrayD::<F>::zeros(IxDyn(&vec![m; rank]));
    for combo in 0..(1usize << rank) {
        let shift: Vec<usize> = (0..rank).map(|ax| k + ((combo >> ax) & 1)).collect();
        for (ix, v) in acc.indexed_iter_mut() {
            let src: Vec<usize> = ix
                .slice()
                .iter()
                .enumerate()
                .map(|(ax, &i)| i + shift[ax])
                .collect();
            if src.iter().all(|&s| s < m) {
                *v += window[IxDyn(&src)];
            }
        }
    }

    let mut out = ArrayD::<F>::zeros(IxDyn(&shape));
    for (ix, &v) in acc.indexed_iter() {
        out[ix] = v;
    }
    out
}

/// Extract the window of extent `shape` at `offset`, optionally clamping
/// values below `threshold` to zero.
pub fn unpad<F: DeconvFloat>(
    x: &ArrayD<F>,
    offset: &[usize],
    shape: &[usize],
    threshold: Option<F>,
) -> ArrayD<F> {
    ArrayD::from_shape_fn(IxDyn(shape), |ix| {
        let src: Vec<usize> = ix
            .slice()
            .iter()
            .enumerate()
            .map(|(ax, &i)| i + offset[ax])
            .collect();
        let v = x[IxDyn(&src)];
        match threshold {
            Some(t) if v < t => F::zero(),
            _ => v,
        }
    })
}
