use crate::float_trait::DeconvFloat;
use ndarray::{ArrayD, Dimension};

/// Index and value of the largest sample. First occurrence wins on ties.
pub fn max_location<F: DeconvFloat>(data: &ArrayD<F>) -> (Vec<usize>, F) {
    let mut best = F::neg_infinity();
    let mut at = vec![0; data.ndim()];
    for (ix, &v) in data.indexed_iter() {
        if v > best {
            best = v;
            at = ix.slice().to_vec();
        }
    }
    (at, best)
}

/// Index and value of the smallest sample. First occurrence wins on ties.
pub fn min_location<F: DeconvFloat>(data: &ArrayD<F>) -> (Vec<usize>, F) {
    let mut best = F::infinity();
    let mut at = vec![0; data.ndim()];
    for (ix, &v) in data.indexed_iter() {
        if v < best {
            best = v;
            at = ix.slice().to_vec();
        }
    }
    (at, best)
}

/// Euclidean inner product of two same-shape arrays.
pub fn inner_product<F: DeconvFloat>(a: &ArrayD<F>, b: &ArrayD<F>) -> F {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// l2 norm.
pub fn norm2<F: DeconvFloat>(a: &ArrayD<F>) -> F {
    inner_product(a, a).sqrt()
}
