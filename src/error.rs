//! # Model Errors
//!
//! $$
//! \mathcal{E} = \{\text{missing},\ \text{history},\ \text{shape},\ \text{psd}\}
//! $$
//!
//! Typed failure taxonomy shared by parameters, window estimators and models.

use thiserror::Error;

use crate::Timestamp;
use crate::param::TensorShape;

/// Errors surfaced by parameter resolution, estimator fitting and model
/// compilation.
///
/// Construction of estimators and models is lazy about data problems; these
/// errors surface at the first `fit` or `compile` that touches the bad spot.
/// All of them are fatal to the current evaluation step, the caller decides
/// whether to abort or skip.
#[derive(Debug, Error)]
pub enum ModelError {
  /// A time-varying parameter was queried at a timestamp it has no entry for.
  #[error("no value available at {0}")]
  MissingValue(Timestamp),

  /// A windowed estimate was requested at a point with too little history.
  #[error("insufficient history at {at}: {context}")]
  InsufficientHistory {
    at: Timestamp,
    context: String,
  },

  /// A resolved tensor disagrees with the dimension of the holdings vector.
  #[error("shape mismatch: expected {expected}, found {found}")]
  ShapeMismatch {
    expected: TensorShape,
    found: TensorShape,
  },

  /// Full-covariance validation failed.
  #[error("matrix is not positive semi-definite (min eigenvalue {min_eigenvalue:e})")]
  NotPositiveSemiDefinite {
    min_eigenvalue: f64,
  },

  /// The requested variant exists in the API but has no implementation yet.
  /// Distinct from a configuration mistake.
  #[error("{0} is not implemented")]
  NotImplemented(&'static str),

  /// A return/volume panel failed construction-time validation.
  #[error("invalid panel: {0}")]
  InvalidPanel(String),

  /// A user-supplied parameter or model configuration is unusable.
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),
}
