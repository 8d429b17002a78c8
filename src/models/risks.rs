//! # Covariance Risk Models
//!
//! $$
//! (w^+ - b)^\top \Sigma (w^+ - b), \qquad
//! \Sigma = F \Sigma_F F^\top + \mathrm{diag}(d)
//! $$
//!
//! Quadratic (and max-of-quadratic) risk terms on the deviation of
//! post-trade holdings from the benchmark: full covariance, diagonal
//! covariance, factor-structured covariance, robust variants penalizing
//! estimation error in the covariance itself, and the worst case over a set
//! of candidate models.

use std::sync::Arc;

use impl_new_derive::ImplNew;
use ndarray::Array2;

use crate::Timestamp;
use crate::error::ModelError;
use crate::estimators::exponential::ExponentialWindow;
use crate::estimators::rolling::RollingWindow;
use crate::expr::ProblemSymbols;
use crate::expr::Term;
use crate::models::Diagnostic;
use crate::models::FitModel;
use crate::models::ObjectiveModel;
use crate::models::check_coverage;
use crate::models::zero_benchmark;
use crate::expr::DecisionPoint;
use crate::panel::ReturnPanel;
use crate::param::Tensor;
use crate::param::TimeIndexedParameter;

/// Quadratic risk with a full covariance matrix, validated positive
/// semi-definite once at construction and never re-validated per compile.
#[derive(Clone, Debug)]
pub struct FullCovariance {
  sigma: TimeIndexedParameter,
  benchmark: Arc<TimeIndexedParameter>,
}

impl FullCovariance {
  pub fn new(sigma: TimeIndexedParameter) -> Result<Self, ModelError> {
    Self::with_benchmark(sigma, zero_benchmark())
  }

  pub fn with_benchmark(
    sigma: TimeIndexedParameter,
    benchmark: Arc<TimeIndexedParameter>,
  ) -> Result<Self, ModelError> {
    validate_psd(&sigma)?;
    Ok(Self { sigma, benchmark })
  }

  /// Sample and decayed covariances are positive semi-definite by
  /// construction, so estimator-backed fits skip the eigenvalue pass.
  fn from_estimator(sigma: TimeIndexedParameter, benchmark: Arc<TimeIndexedParameter>) -> Self {
    Self { sigma, benchmark }
  }
}

impl ObjectiveModel for FullCovariance {
  fn name(&self) -> &'static str {
    "FullCovariance"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    Ok(Term::Quadratic {
      transform: None,
      matrix: self.sigma.matrix_at(t, n)?,
      benchmark: self.benchmark.vector_at(t, n)?,
    })
  }
}

/// Rolling-window full-covariance builder. The cash column is dropped
/// before estimation; with `extend_cash` the estimated matrix is padded
/// back to full asset dimension with a zero cash row/column.
#[derive(ImplNew, Clone, Debug)]
pub struct RollingWindowFullCovariance {
  /// How many past returns are used at each point in time.
  pub lookback: usize,
  /// Pad the covariance back to full asset dimension.
  pub extend_cash: bool,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
  /// Benchmark weights shared across the risk models of the problem.
  pub benchmark: Option<Arc<TimeIndexedParameter>>,
}

impl FitModel for RollingWindowFullCovariance {
  type Fitted = FullCovariance;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<FullCovariance, ModelError> {
    let sigma = RollingWindow::new(self.lookback).covariance(returns, self.extend_cash)?;
    check_coverage(
      &sigma,
      returns,
      start,
      end,
      self.require_full_coverage,
      "rolling covariance",
    )?;
    let benchmark = self.benchmark.clone().unwrap_or_else(zero_benchmark);
    Ok(FullCovariance::from_estimator(sigma, benchmark))
  }
}

/// Exponential-window full-covariance builder.
#[derive(ImplNew, Clone, Debug)]
pub struct ExponentialWindowFullCovariance {
  /// Half-life of the exponential decay, in periods.
  pub half_life: f64,
  /// Pad the covariance back to full asset dimension.
  pub extend_cash: bool,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
  /// Benchmark weights shared across the risk models of the problem.
  pub benchmark: Option<Arc<TimeIndexedParameter>>,
}

impl FitModel for ExponentialWindowFullCovariance {
  type Fitted = FullCovariance;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<FullCovariance, ModelError> {
    let sigma = ExponentialWindow::new(self.half_life).covariance(returns, self.extend_cash)?;
    check_coverage(
      &sigma,
      returns,
      start,
      end,
      self.require_full_coverage,
      "exponential covariance",
    )?;
    let benchmark = self.benchmark.clone().unwrap_or_else(zero_benchmark);
    Ok(FullCovariance::from_estimator(sigma, benchmark))
  }
}

/// Diagonal-covariance risk: sum of squares of the deviation scaled by
/// per-asset standard deviations. Equivalent to a full covariance with a
/// diagonal matrix but never materializes the N x N tensor, which is the
/// performance-critical path for large universes.
#[derive(Clone, Debug)]
pub struct DiagonalCovariance {
  standard_deviations: TimeIndexedParameter,
  benchmark: Arc<TimeIndexedParameter>,
}

impl DiagonalCovariance {
  pub fn new(standard_deviations: TimeIndexedParameter) -> Result<Self, ModelError> {
    Self::with_benchmark(standard_deviations, zero_benchmark())
  }

  pub fn with_benchmark(
    standard_deviations: TimeIndexedParameter,
    benchmark: Arc<TimeIndexedParameter>,
  ) -> Result<Self, ModelError> {
    validate_nonnegative(&standard_deviations, "standard deviations")?;
    Ok(Self {
      standard_deviations,
      benchmark,
    })
  }
}

impl ObjectiveModel for DiagonalCovariance {
  fn name(&self) -> &'static str {
    "DiagonalCovariance"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    Ok(Term::ScaledSumSquares {
      scales: self.standard_deviations.vector_at(t, n)?,
      benchmark: self.benchmark.vector_at(t, n)?,
    })
  }
}

/// Rolling-window diagonal-covariance builder: per-asset rolling standard
/// deviations of the non-cash returns, zero risk for cash.
#[derive(ImplNew, Clone, Debug)]
pub struct RollingWindowDiagonalCovariance {
  /// How many past returns are used at each point in time.
  pub lookback: usize,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
  /// Benchmark weights shared across the risk models of the problem.
  pub benchmark: Option<Arc<TimeIndexedParameter>>,
}

impl FitModel for RollingWindowDiagonalCovariance {
  type Fitted = DiagonalCovariance;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<DiagonalCovariance, ModelError> {
    let std = RollingWindow::new(self.lookback).standard_deviations(returns)?;
    check_coverage(
      &std,
      returns,
      start,
      end,
      self.require_full_coverage,
      "rolling standard deviation",
    )?;
    let benchmark = self.benchmark.clone().unwrap_or_else(zero_benchmark);
    Ok(DiagonalCovariance {
      standard_deviations: std,
      benchmark,
    })
  }
}

/// Exponential-window diagonal-covariance builder.
#[derive(ImplNew, Clone, Debug)]
pub struct ExponentialWindowDiagonalCovariance {
  /// Half-life of the exponential decay, in periods.
  pub half_life: f64,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
  /// Benchmark weights shared across the risk models of the problem.
  pub benchmark: Option<Arc<TimeIndexedParameter>>,
}

impl FitModel for ExponentialWindowDiagonalCovariance {
  type Fitted = DiagonalCovariance;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<DiagonalCovariance, ModelError> {
    let std = ExponentialWindow::new(self.half_life).standard_deviations(returns)?;
    check_coverage(
      &std,
      returns,
      start,
      end,
      self.require_full_coverage,
      "exponential standard deviation",
    )?;
    let benchmark = self.benchmark.clone().unwrap_or_else(zero_benchmark);
    Ok(DiagonalCovariance {
      standard_deviations: std,
      benchmark,
    })
  }
}

/// Empirical covariance risk built directly from a window of raw past
/// returns: `|R w|^2 / L` with `R` the trailing window at compile time.
///
/// The historical slicing of this model's ancestor excluded the period
/// immediately before `t` as well (`[i - 1 - L, i - 1)`), an off-by-one kept
/// behind `legacy_shift` for numerical parity with old results. The default
/// uses the corrected causal window `[i - L, i)`.
#[derive(Clone, Debug)]
pub struct EmpiricalCovariance {
  returns: ReturnPanel,
  lookback: usize,
  legacy_shift: bool,
  benchmark: Arc<TimeIndexedParameter>,
}

impl EmpiricalCovariance {
  pub fn new(returns: ReturnPanel, lookback: usize) -> Result<Self, ModelError> {
    if lookback == 0 {
      return Err(ModelError::InvalidParameter(
        "empirical covariance needs a lookback of at least 1".to_string(),
      ));
    }
    Ok(Self {
      returns,
      lookback,
      legacy_shift: false,
      benchmark: zero_benchmark(),
    })
  }

  /// Reproduce the historical off-by-one window exactly.
  pub fn with_legacy_shift(mut self) -> Self {
    self.legacy_shift = true;
    self
  }

  pub fn with_benchmark(mut self, benchmark: Arc<TimeIndexedParameter>) -> Self {
    self.benchmark = benchmark;
    self
  }

  fn window_bounds(&self, idx: usize) -> (usize, usize) {
    if self.legacy_shift {
      let end = idx.saturating_sub(1);
      (end.saturating_sub(self.lookback), end)
    } else {
      (idx.saturating_sub(self.lookback), idx)
    }
  }
}

impl ObjectiveModel for EmpiricalCovariance {
  fn name(&self) -> &'static str {
    "EmpiricalCovariance"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let idx = self
      .returns
      .index_of(t)
      .ok_or(ModelError::MissingValue(t))?;
    let (start, end) = self.window_bounds(idx);
    if start >= end {
      return Err(ModelError::InsufficientHistory {
        at: t,
        context: "empirical covariance window is empty".to_string(),
      });
    }

    let window = self.returns.rows(start, end).to_owned();
    let rows = window.nrows();
    Ok(
      Term::Quadratic {
        transform: Some(window),
        matrix: Array2::eye(rows),
        benchmark: self.benchmark.vector_at(t, symbols.n_assets)?,
      }
      .scaled(1.0 / self.lookback as f64),
    )
  }
}

/// Factor-structured covariance risk: idiosyncratic sum of squares plus a
/// quadratic form of the factor-projected deviation. Numerically equivalent
/// to the full covariance `F S F^T + diag(d)` without materializing it.
#[derive(Clone, Debug)]
pub struct FactorModelCovariance {
  exposures: TimeIndexedParameter,
  factor_sigma: TimeIndexedParameter,
  idiosyncratic: TimeIndexedParameter,
  benchmark: Arc<TimeIndexedParameter>,
}

impl FactorModelCovariance {
  pub fn new(
    exposures: TimeIndexedParameter,
    factor_sigma: TimeIndexedParameter,
    idiosyncratic: TimeIndexedParameter,
  ) -> Result<Self, ModelError> {
    Self::with_benchmark(exposures, factor_sigma, idiosyncratic, zero_benchmark())
  }

  pub fn with_benchmark(
    exposures: TimeIndexedParameter,
    factor_sigma: TimeIndexedParameter,
    idiosyncratic: TimeIndexedParameter,
    benchmark: Arc<TimeIndexedParameter>,
  ) -> Result<Self, ModelError> {
    validate_psd(&factor_sigma)?;
    validate_nonnegative(&idiosyncratic, "idiosyncratic variances")?;
    Ok(Self {
      exposures,
      factor_sigma,
      idiosyncratic,
      benchmark,
    })
  }

  fn factor_parts(
    &self,
    t: Timestamp,
    n: usize,
  ) -> Result<(Array2<f64>, Array2<f64>), ModelError> {
    let exposures = self.exposures.matrix_rows_at(t, n)?;
    let k = exposures.ncols();
    let factor_sigma = self.factor_sigma.matrix_at(t, k)?;
    Ok((exposures, factor_sigma))
  }
}

impl ObjectiveModel for FactorModelCovariance {
  fn name(&self) -> &'static str {
    "FactorModelCovariance"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    let (exposures, factor_sigma) = self.factor_parts(t, n)?;
    let benchmark = self.benchmark.vector_at(t, n)?;
    let idiosyncratic = self.idiosyncratic.vector_at(t, n)?;

    let specific = Term::ScaledSumSquares {
      scales: idiosyncratic.mapv(f64::sqrt),
      benchmark: benchmark.clone(),
    };
    let systematic = Term::Quadratic {
      transform: Some(exposures.t().to_owned()),
      matrix: factor_sigma,
      benchmark,
    };
    Ok(specific + systematic)
  }
}

/// Full-covariance risk with a penalty for estimation error in the
/// covariance itself: `epsilon * (|dev| . diag(Sigma))^2` on top of the
/// quadratic form. Epsilon may be a scalar radius or per-asset.
#[derive(Clone, Debug)]
pub struct RobustCovariance {
  sigma: TimeIndexedParameter,
  epsilon: TimeIndexedParameter,
  benchmark: Arc<TimeIndexedParameter>,
}

impl RobustCovariance {
  pub fn new(
    sigma: TimeIndexedParameter,
    epsilon: TimeIndexedParameter,
  ) -> Result<Self, ModelError> {
    Self::with_benchmark(sigma, epsilon, zero_benchmark())
  }

  pub fn with_benchmark(
    sigma: TimeIndexedParameter,
    epsilon: TimeIndexedParameter,
    benchmark: Arc<TimeIndexedParameter>,
  ) -> Result<Self, ModelError> {
    validate_psd(&sigma)?;
    validate_nonnegative(&epsilon, "uncertainty radius")?;
    Ok(Self {
      sigma,
      epsilon,
      benchmark,
    })
  }
}

impl ObjectiveModel for RobustCovariance {
  fn name(&self) -> &'static str {
    "RobustCovariance"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    let sigma = self.sigma.matrix_at(t, n)?;
    let benchmark = self.benchmark.vector_at(t, n)?;
    let diag = sigma.diag().to_owned();

    let (weights, scale) = match self.epsilon.value_at(t)? {
      Tensor::Scalar(e) => (diag, *e),
      Tensor::Vector(_) => (&diag * &self.epsilon.vector_at(t, n)?, 1.0),
      other => {
        return Err(ModelError::ShapeMismatch {
          expected: crate::param::TensorShape::Vector(n),
          found: other.shape(),
        });
      }
    };

    let base = Term::Quadratic {
      transform: None,
      matrix: sigma,
      benchmark: benchmark.clone(),
    };
    let penalty = Term::SquaredAbsWeighted {
      transform: None,
      weights,
      benchmark,
      scale,
    };
    Ok(base + penalty)
  }
}

/// Factor-structured analogue of [`RobustCovariance`]: the uncertainty
/// penalty applies to the factor-projected deviation, weighted by the
/// square roots of the factor variances.
#[derive(Clone, Debug)]
pub struct RobustFactorCovariance {
  base: FactorModelCovariance,
  epsilon: TimeIndexedParameter,
}

impl RobustFactorCovariance {
  pub fn new(
    exposures: TimeIndexedParameter,
    factor_sigma: TimeIndexedParameter,
    idiosyncratic: TimeIndexedParameter,
    epsilon: TimeIndexedParameter,
  ) -> Result<Self, ModelError> {
    Self::with_benchmark(
      exposures,
      factor_sigma,
      idiosyncratic,
      epsilon,
      zero_benchmark(),
    )
  }

  pub fn with_benchmark(
    exposures: TimeIndexedParameter,
    factor_sigma: TimeIndexedParameter,
    idiosyncratic: TimeIndexedParameter,
    epsilon: TimeIndexedParameter,
    benchmark: Arc<TimeIndexedParameter>,
  ) -> Result<Self, ModelError> {
    validate_nonnegative(&epsilon, "uncertainty radius")?;
    let base = FactorModelCovariance::with_benchmark(
      exposures,
      factor_sigma,
      idiosyncratic,
      benchmark,
    )?;
    Ok(Self { base, epsilon })
  }
}

impl ObjectiveModel for RobustFactorCovariance {
  fn name(&self) -> &'static str {
    "RobustFactorCovariance"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    let (exposures, factor_sigma) = self.base.factor_parts(t, n)?;
    let factor_scales = factor_sigma.diag().mapv(f64::sqrt);
    let benchmark = self.base.benchmark.vector_at(t, n)?;

    let k = factor_scales.len();
    let (weights, scale) = match self.epsilon.value_at(t)? {
      Tensor::Scalar(e) => (factor_scales, *e),
      Tensor::Vector(_) => (&factor_scales * &self.epsilon.vector_at(t, k)?, 1.0),
      other => {
        return Err(ModelError::ShapeMismatch {
          expected: crate::param::TensorShape::Vector(k),
          found: other.shape(),
        });
      }
    };

    let penalty = Term::SquaredAbsWeighted {
      transform: Some(exposures.t().to_owned()),
      weights,
      benchmark,
      scale,
    };
    Ok(self.base.compile(t, symbols)? + penalty)
  }
}

/// Worst-case risk: the elementwise maximum over candidate risk models,
/// itself convex. The diagnostic reports every component's realized value,
/// in input order, so the log shows more than the binding model.
pub struct WorstCaseRisk {
  components: Vec<Box<dyn ObjectiveModel>>,
}

impl WorstCaseRisk {
  pub fn new(components: Vec<Box<dyn ObjectiveModel>>) -> Result<Self, ModelError> {
    if components.is_empty() {
      return Err(ModelError::InvalidParameter(
        "worst-case risk needs at least one component model".to_string(),
      ));
    }
    Ok(Self { components })
  }
}

impl ObjectiveModel for WorstCaseRisk {
  fn name(&self) -> &'static str {
    "WorstCaseRisk"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let mut terms = Vec::with_capacity(self.components.len());
    for component in &self.components {
      terms.push(component.compile(t, symbols)?);
    }
    Ok(Term::MaxElemwise(terms))
  }

  fn diagnostic(&self, t: Timestamp, point: &DecisionPoint) -> Result<Diagnostic, ModelError> {
    let symbols = ProblemSymbols {
      n_assets: point.w_plus.len(),
    };
    let mut values = Vec::with_capacity(self.components.len());
    for component in &self.components {
      let value = component.compile(t, &symbols)?.evaluate(point);
      values.push((component.name().to_string(), value));
    }
    Ok(Diagnostic::PerComponent(values))
  }
}

/// One-shot positive-semi-definite validation of a matrix-valued parameter.
fn validate_psd(param: &TimeIndexedParameter) -> Result<(), ModelError> {
  for tensor in param.defined_values() {
    let m = match tensor {
      Tensor::Matrix(m) => m,
      other => {
        return Err(ModelError::InvalidParameter(format!(
          "covariance parameter must be matrix-valued, found {}",
          other.shape()
        )));
      }
    };
    if m.nrows() != m.ncols() {
      return Err(ModelError::InvalidParameter(format!(
        "covariance matrix must be square, found {}x{}",
        m.nrows(),
        m.ncols()
      )));
    }
    let n = m.nrows();
    if n == 0 {
      continue;
    }

    let scale = m.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let asymmetry = (m - &m.t()).iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if asymmetry > 1e-10 * scale {
      return Err(ModelError::InvalidParameter(
        "covariance matrix is not symmetric".to_string(),
      ));
    }

    let dm = nalgebra::DMatrix::from_fn(n, n, |i, j| m[[i, j]]);
    let min_eigenvalue = dm.symmetric_eigenvalues().min();
    if min_eigenvalue < -1e-8 * scale {
      return Err(ModelError::NotPositiveSemiDefinite { min_eigenvalue });
    }
  }
  Ok(())
}

/// Reject parameters with negative entries (standard deviations, variances,
/// uncertainty radii).
fn validate_nonnegative(param: &TimeIndexedParameter, what: &str) -> Result<(), ModelError> {
  for tensor in param.defined_values() {
    let negative = match tensor {
      Tensor::Scalar(v) => *v < 0.0,
      Tensor::Vector(x) => x.iter().any(|v| *v < 0.0),
      Tensor::Matrix(m) => m.iter().any(|v| *v < 0.0),
    };
    if negative {
      return Err(ModelError::InvalidParameter(format!(
        "{what} must be non-negative"
      )));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use chrono::TimeZone;
  use chrono::Utc;
  use ndarray::Array1;
  use ndarray::array;

  use super::*;

  fn day(i: usize) -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64)
  }

  fn symbols(n: usize) -> ProblemSymbols {
    ProblemSymbols { n_assets: n }
  }

  fn point(w: Array1<f64>) -> DecisionPoint {
    DecisionPoint::from_holdings(w)
  }

  #[test]
  fn full_covariance_rejects_indefinite_matrices() {
    let sigma = TimeIndexedParameter::matrix(array![[1.0, 2.0], [2.0, 1.0]]).unwrap();
    let result = FullCovariance::new(sigma);
    assert!(matches!(
      result,
      Err(ModelError::NotPositiveSemiDefinite { .. })
    ));
  }

  #[test]
  fn full_covariance_rejects_asymmetric_matrices() {
    let sigma = TimeIndexedParameter::matrix(array![[1.0, 0.5], [0.0, 1.0]]).unwrap();
    assert!(matches!(
      FullCovariance::new(sigma),
      Err(ModelError::InvalidParameter(_))
    ));
  }

  #[test]
  fn diagonal_equals_full_with_squared_stds_on_the_diagonal() {
    let stds = array![0.1, 0.25, 0.0];
    let diagonal =
      DiagonalCovariance::new(TimeIndexedParameter::vector(stds.clone()).unwrap()).unwrap();

    let mut sigma = ndarray::Array2::zeros((3, 3));
    for i in 0..3 {
      sigma[[i, i]] = stds[i] * stds[i];
    }
    let full = FullCovariance::new(TimeIndexedParameter::matrix(sigma).unwrap()).unwrap();

    let p = point(array![0.4, -0.3, 0.9]);
    let a = diagonal.compile(day(0), &symbols(3)).unwrap().evaluate(&p);
    let b = full.compile(day(0), &symbols(3)).unwrap().evaluate(&p);
    assert_relative_eq!(a, b, epsilon = 1e-14);
  }

  #[test]
  fn factor_model_equals_expanded_full_covariance() {
    let exposures = array![[1.0, 0.2], [0.8, -0.4], [0.0, 1.0]];
    let factor_sigma = array![[0.04, 0.01], [0.01, 0.09]];
    let idiosyncratic = array![0.02, 0.01, 0.005];

    let factor = FactorModelCovariance::new(
      TimeIndexedParameter::matrix(exposures.clone()).unwrap(),
      TimeIndexedParameter::matrix(factor_sigma.clone()).unwrap(),
      TimeIndexedParameter::vector(idiosyncratic.clone()).unwrap(),
    )
    .unwrap();

    let mut sigma = exposures.dot(&factor_sigma).dot(&exposures.t());
    for i in 0..3 {
      sigma[[i, i]] += idiosyncratic[i];
    }
    let full = FullCovariance::new(TimeIndexedParameter::matrix(sigma).unwrap()).unwrap();

    let p = point(array![0.5, 0.2, -0.4]);
    let a = factor.compile(day(0), &symbols(3)).unwrap().evaluate(&p);
    let b = full.compile(day(0), &symbols(3)).unwrap().evaluate(&p);
    assert_relative_eq!(a, b, epsilon = 1e-13);
  }

  #[test]
  fn robust_covariance_adds_the_uncertainty_penalty() {
    let sigma = array![[0.04, 0.0], [0.0, 0.09]];
    let robust = RobustCovariance::new(
      TimeIndexedParameter::matrix(sigma.clone()).unwrap(),
      TimeIndexedParameter::scalar(2.0).unwrap(),
    )
    .unwrap();

    let p = point(array![0.5, -0.5]);
    let value = robust.compile(day(0), &symbols(2)).unwrap().evaluate(&p);

    let quad = 0.25 * 0.04 + 0.25 * 0.09;
    let abs_dot = 0.5 * 0.04 + 0.5 * 0.09;
    assert_relative_eq!(value, quad + 2.0 * abs_dot * abs_dot, epsilon = 1e-14);
  }

  #[test]
  fn robust_factor_reduces_to_factor_model_at_zero_epsilon() {
    let exposures = TimeIndexedParameter::matrix(array![[1.0, 0.0], [0.5, 0.5]]).unwrap();
    let factor_sigma = TimeIndexedParameter::matrix(array![[0.04, 0.0], [0.0, 0.01]]).unwrap();
    let idiosyncratic = TimeIndexedParameter::vector(array![0.01, 0.02]).unwrap();

    let factor = FactorModelCovariance::new(
      exposures.clone(),
      factor_sigma.clone(),
      idiosyncratic.clone(),
    )
    .unwrap();
    let robust = RobustFactorCovariance::new(
      exposures,
      factor_sigma,
      idiosyncratic,
      TimeIndexedParameter::scalar(0.0).unwrap(),
    )
    .unwrap();

    let p = point(array![0.7, 0.3]);
    let a = factor.compile(day(0), &symbols(2)).unwrap().evaluate(&p);
    let b = robust.compile(day(0), &symbols(2)).unwrap().evaluate(&p);
    assert_relative_eq!(a, b, epsilon = 1e-14);
  }

  #[test]
  fn worst_case_picks_the_binding_model_and_logs_every_component() {
    let a = DiagonalCovariance::new(
      TimeIndexedParameter::vector(array![0.1, 0.2]).unwrap(),
    )
    .unwrap();
    let b = DiagonalCovariance::new(
      TimeIndexedParameter::vector(array![0.3, 0.05]).unwrap(),
    )
    .unwrap();
    let worst = WorstCaseRisk::new(vec![Box::new(a), Box::new(b)]).unwrap();

    let p = point(array![0.5, -0.5]);
    let term = worst.compile(day(0), &symbols(2)).unwrap();
    assert!(term.is_convex());

    // components: 0.0125 and 0.023125, the second binds
    let value = term.evaluate(&p);
    assert_relative_eq!(value, 0.023125, epsilon = 1e-15);

    match worst.diagnostic(day(0), &p).unwrap() {
      Diagnostic::PerComponent(values) => {
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].0, "DiagonalCovariance");
        assert_relative_eq!(values[0].1, 0.0125, epsilon = 1e-15);
        assert_relative_eq!(values[1].1, 0.023125, epsilon = 1e-15);
      }
      other => panic!("expected per-component diagnostic, got {other:?}"),
    }
  }

  #[test]
  fn empirical_covariance_uses_the_corrected_window_by_default() {
    let data = ndarray::Array2::from_shape_fn((6, 2), |(i, j)| {
      0.01 * (i as f64 + 1.0) * if j == 0 { 1.0 } else { -0.5 }
    });
    let panel = ReturnPanel::with_cash_last(
      (0..6).map(day).collect(),
      vec!["AAA".to_string(), "CASH".to_string()],
      data.clone(),
    )
    .unwrap();

    let lookback = 2;
    let model = EmpiricalCovariance::new(panel.clone(), lookback).unwrap();
    let w = array![1.0, 0.5];
    let p = point(w.clone());

    // corrected window at index 4: rows 2 and 3
    let value = model.compile(day(4), &symbols(2)).unwrap().evaluate(&p);
    let expected: f64 = (2..4)
      .map(|i| (data[[i, 0]] * w[0] + data[[i, 1]] * w[1]).powi(2))
      .sum::<f64>()
      / lookback as f64;
    assert_relative_eq!(value, expected, epsilon = 1e-14);

    // legacy window at index 4: rows 1 and 2
    let legacy = EmpiricalCovariance::new(panel, lookback)
      .unwrap()
      .with_legacy_shift();
    let value = legacy.compile(day(4), &symbols(2)).unwrap().evaluate(&p);
    let expected: f64 = (1..3)
      .map(|i| (data[[i, 0]] * w[0] + data[[i, 1]] * w[1]).powi(2))
      .sum::<f64>()
      / lookback as f64;
    assert_relative_eq!(value, expected, epsilon = 1e-14);
  }

  #[test]
  fn empirical_covariance_fails_without_history() {
    let data = ndarray::Array2::from_elem((3, 2), 0.01);
    let panel = ReturnPanel::with_cash_last(
      (0..3).map(day).collect(),
      vec!["AAA".to_string(), "CASH".to_string()],
      data,
    )
    .unwrap();
    let model = EmpiricalCovariance::new(panel, 2).unwrap();

    assert!(matches!(
      model.compile(day(0), &symbols(2)),
      Err(ModelError::InsufficientHistory { .. })
    ));
    assert!(matches!(
      model.compile(day(4), &symbols(2)),
      Err(ModelError::MissingValue(_))
    ));
  }

  #[test]
  fn negative_standard_deviations_are_rejected() {
    let result =
      DiagonalCovariance::new(TimeIndexedParameter::vector(array![0.1, -0.2]).unwrap());
    assert!(matches!(result, Err(ModelError::InvalidParameter(_))));
  }

  #[test]
  fn worst_case_requires_at_least_one_component() {
    assert!(matches!(
      WorstCaseRisk::new(vec![]),
      Err(ModelError::InvalidParameter(_))
    ));
  }

  #[test]
  fn rolling_full_covariance_fit_compiles_at_full_dimension() {
    let data = ndarray::Array2::from_shape_fn((30, 3), |(i, j)| match j {
      0 => 0.01 * ((i % 7) as f64 - 3.0),
      1 => 0.002 * ((i % 5) as f64) - 0.004,
      _ => 0.0001,
    });
    let panel = ReturnPanel::with_cash_last(
      (0..30).map(day).collect(),
      vec!["AAA".to_string(), "BBB".to_string(), "CASH".to_string()],
      data,
    )
    .unwrap();

    let fitted = RollingWindowFullCovariance::new(10, true, false, None)
      .fit(&panel, None, day(0), day(29))
      .unwrap();
    let term = fitted.compile(day(15), &symbols(3)).unwrap();

    // cash carries no risk in the extended matrix
    let cash_only = point(array![0.0, 0.0, 1.0]);
    assert_relative_eq!(term.evaluate(&cash_only), 0.0, epsilon = 1e-15);

    let risky = point(array![1.0, 0.0, 0.0]);
    assert!(term.evaluate(&risky) > 0.0);
  }

  #[test]
  fn rolling_diagonal_fit_cross_checks_against_rolling_full_fit() {
    let data = ndarray::Array2::from_shape_fn((40, 3), |(i, j)| match j {
      0 => 0.01 * ((i % 11) as f64 - 5.0),
      1 => 0.003 * ((i % 6) as f64) - 0.0075,
      _ => 0.0002,
    });
    let panel = ReturnPanel::with_cash_last(
      (0..40).map(day).collect(),
      vec!["AAA".to_string(), "BBB".to_string(), "CASH".to_string()],
      data,
    )
    .unwrap();

    let diagonal = RollingWindowDiagonalCovariance::new(12, false, None)
      .fit(&panel, None, day(0), day(39))
      .unwrap();
    let full = RollingWindowFullCovariance::new(12, true, false, None)
      .fit(&panel, None, day(0), day(39))
      .unwrap();

    // evaluate on a single-asset deviation, where only the variance matters
    let p = point(array![1.0, 0.0, 0.0]);
    let t = day(20);
    let a = diagonal.compile(t, &symbols(3)).unwrap().evaluate(&p);
    let b = full.compile(t, &symbols(3)).unwrap().evaluate(&p);
    assert_relative_eq!(a, b, epsilon = 1e-13);
  }
}
