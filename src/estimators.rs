//! # Causal Window Estimators
//!
//! $$
//! \hat\theta_t = f\big(R_{t-L}, \dots, R_{t-1}\big)
//! $$
//!
//! Rolling and exponentially-decayed statistics over a return panel, shifted
//! so the estimate attributed to time `t` uses only periods strictly before
//! `t`. The designated cash column is special-cased: its forecast is the
//! single previous realized value (the risk-free rate is known one step
//! ahead, not estimated), its forecast error is zero, and covariance is
//! computed on the non-cash columns only.

pub mod exponential;
pub mod rolling;

use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;

/// Re-insert a zero row/column for cash into a non-cash covariance matrix,
/// restoring the full asset dimension expected by a full-covariance model.
pub(crate) fn extend_matrix_with_cash(cov: &Array2<f64>, cash: usize) -> Array2<f64> {
  let n = cov.nrows() + 1;
  let mut full = Array2::zeros((n, n));

  for i in 0..cov.nrows() {
    let fi = if i < cash { i } else { i + 1 };
    for j in 0..cov.ncols() {
      let fj = if j < cash { j } else { j + 1 };
      full[[fi, fj]] = cov[[i, j]];
    }
  }

  full
}

/// Re-insert a zero entry for cash into a non-cash vector.
pub(crate) fn extend_vector_with_cash(values: ArrayView1<'_, f64>, cash: usize) -> Array1<f64> {
  let n = values.len() + 1;
  let mut full = Array1::zeros(n);

  for i in 0..values.len() {
    let fi = if i < cash { i } else { i + 1 };
    full[fi] = values[i];
  }

  full
}
