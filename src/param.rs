//! # Time-Indexed Parameters
//!
//! $$
//! \theta : t \mapsto \theta_t \in \mathbb{R} \cup \mathbb{R}^n \cup \mathbb{R}^{n \times n}
//! $$
//!
//! A value that is either constant or varies by timestamp, queried causally.
//! Lookups never fill forward or backward; a timestamp the owning estimator
//! marked as lacking history fails with [`ModelError::InsufficientHistory`],
//! any other unknown timestamp fails with [`ModelError::MissingValue`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use ndarray::Array1;
use ndarray::Array2;

use crate::Timestamp;
use crate::error::ModelError;

/// A scalar, vector or matrix value.
#[derive(Clone, Debug)]
pub enum Tensor {
  Scalar(f64),
  Vector(Array1<f64>),
  Matrix(Array2<f64>),
}

impl Tensor {
  /// Shape tag of this tensor.
  pub fn shape(&self) -> TensorShape {
    match self {
      Tensor::Scalar(_) => TensorShape::Scalar,
      Tensor::Vector(x) => TensorShape::Vector(x.len()),
      Tensor::Matrix(m) => TensorShape::Matrix(m.nrows(), m.ncols()),
    }
  }

  /// True when every entry is finite.
  pub fn is_finite(&self) -> bool {
    match self {
      Tensor::Scalar(x) => x.is_finite(),
      Tensor::Vector(x) => x.iter().all(|v| v.is_finite()),
      Tensor::Matrix(m) => m.iter().all(|v| v.is_finite()),
    }
  }
}

/// Shape of a [`Tensor`], used for validation and error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorShape {
  Scalar,
  Vector(usize),
  Matrix(usize, usize),
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TensorShape::Scalar => write!(f, "scalar"),
      TensorShape::Vector(n) => write!(f, "vector({n})"),
      TensorShape::Matrix(r, c) => write!(f, "matrix({r}x{c})"),
    }
  }
}

/// A tensor-valued quantity indexed by time.
///
/// Constant parameters ignore the query timestamp. Time-varying parameters
/// keep an explicit set of timestamps known to lack sufficient history, so
/// that a causal estimator's warm-up region fails loudly instead of being
/// silently absent. Read-only after construction.
#[derive(Clone, Debug)]
pub enum TimeIndexedParameter {
  Constant(Tensor),
  Varying {
    values: BTreeMap<Timestamp, Tensor>,
    undefined: BTreeSet<Timestamp>,
    shape: Option<TensorShape>,
  },
}

impl TimeIndexedParameter {
  /// Constant parameter; rejects non-finite entries.
  pub fn constant(tensor: Tensor) -> Result<Self, ModelError> {
    if !tensor.is_finite() {
      return Err(ModelError::InvalidParameter(
        "constant parameter contains NaN or infinite entries".to_string(),
      ));
    }
    Ok(Self::Constant(tensor))
  }

  /// Constant scalar parameter.
  pub fn scalar(value: f64) -> Result<Self, ModelError> {
    Self::constant(Tensor::Scalar(value))
  }

  /// Constant vector parameter.
  pub fn vector(values: Array1<f64>) -> Result<Self, ModelError> {
    Self::constant(Tensor::Vector(values))
  }

  /// Constant matrix parameter.
  pub fn matrix(values: Array2<f64>) -> Result<Self, ModelError> {
    Self::constant(Tensor::Matrix(values))
  }

  /// The all-zero parameter, broadcastable to any vector dimension. This is
  /// the default benchmark-weights parameter.
  pub fn zero() -> Self {
    Self::Constant(Tensor::Scalar(0.0))
  }

  /// Time-varying parameter from defined points plus explicit marks for
  /// timestamps that lack sufficient history.
  ///
  /// Every defined tensor must share one shape; a timestamp cannot be both
  /// defined and marked undefined.
  pub fn varying(
    points: Vec<(Timestamp, Tensor)>,
    undefined: Vec<Timestamp>,
  ) -> Result<Self, ModelError> {
    let mut values = BTreeMap::new();
    let mut shape = None;

    for (t, tensor) in points {
      if !tensor.is_finite() {
        return Err(ModelError::InvalidParameter(format!(
          "parameter value at {t} contains NaN or infinite entries"
        )));
      }
      match shape {
        None => shape = Some(tensor.shape()),
        Some(expected) if expected != tensor.shape() => {
          return Err(ModelError::ShapeMismatch {
            expected,
            found: tensor.shape(),
          });
        }
        Some(_) => {}
      }
      if values.insert(t, tensor).is_some() {
        return Err(ModelError::InvalidParameter(format!(
          "duplicate parameter timestamp {t}"
        )));
      }
    }

    let undefined: BTreeSet<Timestamp> = undefined.into_iter().collect();
    if let Some(t) = undefined.iter().find(|t| values.contains_key(t)) {
      return Err(ModelError::InvalidParameter(format!(
        "timestamp {t} is both defined and marked undefined"
      )));
    }

    Ok(Self::Varying {
      values,
      undefined,
      shape,
    })
  }

  /// Shape shared by all defined values, if any value exists.
  pub fn shape(&self) -> Option<TensorShape> {
    match self {
      Self::Constant(tensor) => Some(tensor.shape()),
      Self::Varying { shape, .. } => *shape,
    }
  }

  /// Point-in-time lookup.
  pub fn value_at(&self, t: Timestamp) -> Result<&Tensor, ModelError> {
    match self {
      Self::Constant(tensor) => Ok(tensor),
      Self::Varying {
        values, undefined, ..
      } => {
        if let Some(tensor) = values.get(&t) {
          Ok(tensor)
        } else if undefined.contains(&t) {
          Err(ModelError::InsufficientHistory {
            at: t,
            context: "window not yet filled at this timestamp".to_string(),
          })
        } else {
          Err(ModelError::MissingValue(t))
        }
      }
    }
  }

  /// Resolve as a length-`n` vector; a constant scalar broadcasts.
  pub fn vector_at(&self, t: Timestamp, n: usize) -> Result<Array1<f64>, ModelError> {
    match self.value_at(t)? {
      Tensor::Scalar(v) => Ok(Array1::from_elem(n, *v)),
      Tensor::Vector(x) if x.len() == n => Ok(x.clone()),
      other => Err(ModelError::ShapeMismatch {
        expected: TensorShape::Vector(n),
        found: other.shape(),
      }),
    }
  }

  /// Resolve as an `n x n` matrix. Scalars do not broadcast to matrices.
  pub fn matrix_at(&self, t: Timestamp, n: usize) -> Result<Array2<f64>, ModelError> {
    match self.value_at(t)? {
      Tensor::Matrix(m) if m.nrows() == n && m.ncols() == n => Ok(m.clone()),
      other => Err(ModelError::ShapeMismatch {
        expected: TensorShape::Matrix(n, n),
        found: other.shape(),
      }),
    }
  }

  /// Resolve as a matrix with `rows` rows and any column count, e.g. factor
  /// exposures whose factor dimension is free.
  pub fn matrix_rows_at(&self, t: Timestamp, rows: usize) -> Result<Array2<f64>, ModelError> {
    match self.value_at(t)? {
      Tensor::Matrix(m) if m.nrows() == rows => Ok(m.clone()),
      other => Err(ModelError::ShapeMismatch {
        expected: TensorShape::Matrix(rows, 0),
        found: other.shape(),
      }),
    }
  }

  /// Resolve as a scalar.
  pub fn scalar_at(&self, t: Timestamp) -> Result<f64, ModelError> {
    match self.value_at(t)? {
      Tensor::Scalar(v) => Ok(*v),
      other => Err(ModelError::ShapeMismatch {
        expected: TensorShape::Scalar,
        found: other.shape(),
      }),
    }
  }

  /// All defined tensors, in no particular order. Used for one-shot
  /// validation passes such as the positive-semi-definite check.
  pub fn defined_values(&self) -> Vec<&Tensor> {
    match self {
      Self::Constant(tensor) => vec![tensor],
      Self::Varying { values, .. } => values.values().collect(),
    }
  }
}
