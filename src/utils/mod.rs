//! # Utilities
//!
//! Shared linear-algebra helpers for the sampler initialization path.

use faer::Mat;
use faer::prelude::Solve;

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Solve `a x = b` by full-pivot LU, retrying with escalating ridge jitter on
/// the diagonal whenever the plain solve produces non-finite values.
///
/// Returns `None` once every attempt has failed.
#[must_use]
pub fn solve_ridge_system(a: &Mat<f64>, b: &Mat<f64>) -> Option<Mat<f64>> {
    let mut jitter = 0.0_f64;
    for attempt in 0..6 {
        let system = if attempt == 0 {
            a.clone()
        } else {
            Mat::from_fn(a.nrows(), a.ncols(), |i, j| {
                if i == j { a[(i, j)] + jitter } else { a[(i, j)] }
            })
        };
        let solution = system.full_piv_lu().solve(b.clone());
        if matrix_is_finite(&solution) {
            return Some(solution);
        }
        jitter = if attempt == 0 { 1.0e-8 } else { jitter * 10.0 };
    }
    None
}
