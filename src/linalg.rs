//! Dense linear algebra on top of `nalgebra`'s SVD.
//!
//! The pseudo-inverse is the only solver used by the GLM: a rank-deficient
//! design yields the minimum-norm solution instead of an error.  Singular
//! values below `max(M, N) · ε · σ_max` are treated as zero, the same cut-off
//! numpy uses for `matrix_rank`.
use nalgebra::{DMatrix, SVD};
use ndarray::{Array1, Array2};

pub fn to_nalgebra(a: &Array2<f64>) -> DMatrix<f64> {
    let (r, c) = a.dim();
    DMatrix::from_fn(r, c, |i, j| a[[i, j]])
}

pub fn from_nalgebra(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

fn cutoff(shape: (usize, usize), s_max: f64) -> f64 {
    shape.0.max(shape.1) as f64 * f64::EPSILON * s_max
}

/// Singular values in descending order.
pub fn singular_values(a: &Array2<f64>) -> Array1<f64> {
    if a.is_empty() {
        return Array1::zeros(0);
    }
    let svd = SVD::new(to_nalgebra(a), false, false);
    let mut s: Vec<f64> = svd.singular_values.iter().copied().collect();
    s.sort_by(|x, y| y.total_cmp(x));
    Array1::from(s)
}

/// Number of singular values above the cut-off.
pub fn matrix_rank(a: &Array2<f64>) -> usize {
    let s = singular_values(a);
    let s_max = s.first().copied().unwrap_or(0.0);
    let tol = cutoff(a.dim(), s_max);
    s.iter().filter(|&&v| v > tol).count()
}

/// Moore–Penrose pseudo-inverse, shape [N, M] for an [M, N] input.
pub fn pinv(a: &Array2<f64>) -> Array2<f64> {
    let (m, n) = a.dim();
    if a.is_empty() {
        return Array2::zeros((n, m));
    }
    let svd = SVD::new(to_nalgebra(a), true, true);
    let s_max = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    match svd.pseudo_inverse(cutoff((m, n), s_max)) {
        Ok(p) => from_nalgebra(&p),
        // Only reachable for a non-finite cut-off; NaN keeps downstream
        // estimates visibly invalid.
        Err(_) => Array2::from_elem((n, m), f64::NAN),
    }
}
