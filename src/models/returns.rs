//! # Return Forecast Models
//!
//! $$
//! \hat r^\top w^+ \;-\; \delta^\top |w^+|, \qquad
//! \delta^\top |w^+ - b|
//! $$
//!
//! Expected-return forecasts compiling to the affine return term of the
//! objective, and the forecast-error risk penalizing absolute deviation from
//! the benchmark by the standard error of the mean estimator.

use std::sync::Arc;

use impl_new_derive::ImplNew;
use ndarray::Array1;

use crate::Timestamp;
use crate::error::ModelError;
use crate::estimators::exponential::ExponentialWindow;
use crate::estimators::rolling::RollingWindow;
use crate::expr::ProblemSymbols;
use crate::expr::Term;
use crate::models::FitModel;
use crate::models::ObjectiveModel;
use crate::models::check_coverage;
use crate::models::zero_benchmark;
use crate::panel::ReturnPanel;
use crate::param::TimeIndexedParameter;

/// Expected-return forecast, user-supplied or estimator-derived.
///
/// Compiles to the inner product of post-trade holdings and the expected
/// returns resolved at the evaluation time. An optional per-asset confidence
/// haircut `delta` subtracts `delta . |w_plus|` from the maximized term, and
/// an optional `gamma_decay` dampens multi-period forecasts queried ahead of
/// the estimation time.
#[derive(Clone, Debug)]
pub struct ReturnsForecast {
  expected_returns: TimeIndexedParameter,
  delta: Option<TimeIndexedParameter>,
  gamma_decay: Option<f64>,
}

impl ReturnsForecast {
  pub fn new(expected_returns: TimeIndexedParameter) -> Self {
    Self {
      expected_returns,
      delta: None,
      gamma_decay: None,
    }
  }

  /// Add a per-asset confidence haircut on the forecast.
  pub fn with_delta(mut self, delta: TimeIndexedParameter) -> Self {
    self.delta = Some(delta);
    self
  }

  /// Add power-law decay for forecasts queried ahead of the estimation time.
  pub fn with_gamma_decay(mut self, gamma_decay: f64) -> Self {
    self.gamma_decay = Some(gamma_decay);
    self
  }

  /// Estimate made at `t` of the return term at a later target time `tau`,
  /// decayed by `days(tau - t)^(-gamma)` when a decay exponent is set.
  pub fn compile_ahead(
    &self,
    t: Timestamp,
    tau: Timestamp,
    symbols: &ProblemSymbols,
  ) -> Result<Term, ModelError> {
    let term = self.compile(t, symbols)?;
    match self.gamma_decay {
      Some(gamma) if tau > t => {
        let days = (tau - t).num_days();
        if days >= 1 {
          Ok(term.scaled((days as f64).powf(-gamma)))
        } else {
          Ok(term)
        }
      }
      _ => Ok(term),
    }
  }
}

impl ObjectiveModel for ReturnsForecast {
  fn name(&self) -> &'static str {
    "ReturnsForecast"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    let mu = self.expected_returns.vector_at(t, n)?;
    let term = Term::Affine {
      coeffs: mu,
      offset: 0.0,
    };

    match &self.delta {
      None => Ok(term),
      Some(delta) => {
        let haircut = Term::AbsWeighted {
          weights: delta.vector_at(t, n)?,
          benchmark: Array1::zeros(n),
        };
        Ok(term + haircut.scaled(-1.0))
      }
    }
  }
}

/// Rolling-window mean forecast builder.
#[derive(ImplNew, Clone, Debug)]
pub struct RollingWindowReturnsForecast {
  /// How many past returns are used at each point in time.
  pub lookback: usize,
  /// Use the previous realized value for the cash return instead of the
  /// window mean.
  pub use_last_for_cash: bool,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
}

impl FitModel for RollingWindowReturnsForecast {
  type Fitted = ReturnsForecast;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<ReturnsForecast, ModelError> {
    let forecasts = RollingWindow::new(self.lookback).mean(returns, self.use_last_for_cash)?;
    check_coverage(
      &forecasts,
      returns,
      start,
      end,
      self.require_full_coverage,
      "rolling mean",
    )?;
    Ok(ReturnsForecast::new(forecasts))
  }
}

/// Exponential-window mean forecast builder.
#[derive(ImplNew, Clone, Debug)]
pub struct ExponentialWindowReturnsForecast {
  /// Half-life of the exponential decay, in periods.
  pub half_life: f64,
  /// Use the previous realized value for the cash return instead of the
  /// decayed mean.
  pub use_last_for_cash: bool,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
}

impl FitModel for ExponentialWindowReturnsForecast {
  type Fitted = ReturnsForecast;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<ReturnsForecast, ModelError> {
    let forecasts =
      ExponentialWindow::new(self.half_life).mean(returns, self.use_last_for_cash)?;
    check_coverage(
      &forecasts,
      returns,
      start,
      end,
      self.require_full_coverage,
      "exponential mean",
    )?;
    Ok(ReturnsForecast::new(forecasts))
  }
}

/// Weighted combination of return forecasts, compiling to the weighted sum
/// of their terms. Combination weights are fixed at construction.
#[derive(Clone, Debug)]
pub struct MultipleReturnsForecasts {
  sources: Vec<ReturnsForecast>,
  weights: Vec<f64>,
}

impl MultipleReturnsForecasts {
  pub fn new(sources: Vec<ReturnsForecast>, weights: Vec<f64>) -> Result<Self, ModelError> {
    if sources.is_empty() {
      return Err(ModelError::InvalidParameter(
        "combination needs at least one forecast source".to_string(),
      ));
    }
    if sources.len() != weights.len() {
      return Err(ModelError::InvalidParameter(format!(
        "{} forecast sources against {} weights",
        sources.len(),
        weights.len()
      )));
    }
    Ok(Self { sources, weights })
  }
}

impl ObjectiveModel for MultipleReturnsForecasts {
  fn name(&self) -> &'static str {
    "MultipleReturnsForecasts"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let mut terms = Vec::with_capacity(self.sources.len());
    for (source, &weight) in self.sources.iter().zip(&self.weights) {
      terms.push(source.compile(t, symbols)?.scaled(weight));
    }
    Ok(Term::Sum(terms))
  }
}

/// Return-forecast-error risk: a convex piecewise-linear penalty on the
/// absolute deviation of post-trade holdings from the benchmark, weighted by
/// the per-asset forecast error. Scaled by an external multiplier at
/// composition time.
#[derive(Clone, Debug)]
pub struct ForecastErrorRisk {
  deltas: TimeIndexedParameter,
  benchmark: Arc<TimeIndexedParameter>,
}

impl ForecastErrorRisk {
  pub fn new(deltas: TimeIndexedParameter) -> Self {
    Self::with_benchmark(deltas, zero_benchmark())
  }

  pub fn with_benchmark(
    deltas: TimeIndexedParameter,
    benchmark: Arc<TimeIndexedParameter>,
  ) -> Self {
    Self { deltas, benchmark }
  }
}

impl ObjectiveModel for ForecastErrorRisk {
  fn name(&self) -> &'static str {
    "ForecastErrorRisk"
  }

  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError> {
    let n = symbols.n_assets;
    Ok(Term::AbsWeighted {
      weights: self.deltas.vector_at(t, n)?,
      benchmark: self.benchmark.vector_at(t, n)?,
    })
  }
}

/// Rolling-window forecast-error builder: standard error of the mean
/// estimator over the window, zero for cash.
#[derive(ImplNew, Clone, Debug)]
pub struct RollingWindowForecastErrorRisk {
  /// How many past returns are used at each point in time.
  pub lookback: usize,
  /// Force the cash forecast error to zero.
  pub zero_for_cash: bool,
  /// Fail `fit` unless every timestamp of the horizon has an estimate.
  pub require_full_coverage: bool,
  /// Benchmark weights shared with the other risk models of the problem;
  /// all-zero when absent.
  pub benchmark: Option<Arc<TimeIndexedParameter>>,
}

impl FitModel for RollingWindowForecastErrorRisk {
  type Fitted = ForecastErrorRisk;

  fn fit(
    &self,
    returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<ForecastErrorRisk, ModelError> {
    let deltas =
      RollingWindow::new(self.lookback).forecast_error(returns, self.zero_for_cash)?;
    check_coverage(
      &deltas,
      returns,
      start,
      end,
      self.require_full_coverage,
      "rolling forecast error",
    )?;
    let benchmark = self.benchmark.clone().unwrap_or_else(zero_benchmark);
    Ok(ForecastErrorRisk::with_benchmark(deltas, benchmark))
  }
}

/// Exponential-window forecast error. The decayed analogue of the standard
/// error of the mean still needs to be worked out, so fitting reports
/// [`ModelError::NotImplemented`] rather than guessing.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExponentialWindowForecastErrorRisk;

impl FitModel for ExponentialWindowForecastErrorRisk {
  type Fitted = ForecastErrorRisk;

  fn fit(
    &self,
    _returns: &ReturnPanel,
    _volumes: Option<&ReturnPanel>,
    _start: Timestamp,
    _end: Timestamp,
  ) -> Result<ForecastErrorRisk, ModelError> {
    Err(ModelError::NotImplemented(
      "exponential window forecast error",
    ))
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use chrono::TimeZone;
  use chrono::Utc;
  use ndarray::Array2;
  use ndarray::array;
  use tracing_test::traced_test;

  use super::*;
  use crate::expr::DecisionPoint;

  fn day(i: usize) -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64)
  }

  fn synthetic_panel(periods: usize) -> ReturnPanel {
    let data = Array2::from_shape_fn((periods, 3), |(i, j)| match j {
      0 => 0.01 * ((i % 7) as f64 - 3.0),
      1 => 0.002 * ((i % 5) as f64) - 0.004,
      _ => 0.0001 + 0.00001 * (i % 3) as f64,
    });
    let assets = vec!["AAA".to_string(), "BBB".to_string(), "CASH".to_string()];
    ReturnPanel::with_cash_last((0..periods).map(day).collect(), assets, data).unwrap()
  }

  fn symbols(n: usize) -> ProblemSymbols {
    ProblemSymbols { n_assets: n }
  }

  #[test]
  fn forecast_compiles_to_the_inner_product() {
    let model =
      ReturnsForecast::new(TimeIndexedParameter::vector(array![0.01, -0.02, 0.0]).unwrap());
    let term = model.compile(day(0), &symbols(3)).unwrap();
    let point = DecisionPoint::from_holdings(array![0.5, 0.3, 0.2]);
    assert_relative_eq!(term.evaluate(&point), 0.005 - 0.006, epsilon = 1e-15);
  }

  #[test]
  fn delta_haircut_subtracts_from_the_forecast() {
    let model =
      ReturnsForecast::new(TimeIndexedParameter::vector(array![0.01, 0.01]).unwrap())
        .with_delta(TimeIndexedParameter::scalar(0.002).unwrap());
    let term = model.compile(day(0), &symbols(2)).unwrap();
    let point = DecisionPoint::from_holdings(array![0.5, -0.5]);
    // 0.01 * 0.5 - 0.01 * 0.5 - 0.002 * (0.5 + 0.5)
    assert_relative_eq!(term.evaluate(&point), -0.002, epsilon = 1e-15);
  }

  #[test]
  fn gamma_decay_dampens_forecasts_queried_ahead() {
    let model =
      ReturnsForecast::new(TimeIndexedParameter::vector(array![0.04, 0.0]).unwrap())
        .with_gamma_decay(1.0);
    let point = DecisionPoint::from_holdings(array![1.0, 0.0]);

    let now = model.compile_ahead(day(0), day(0), &symbols(2)).unwrap();
    assert_relative_eq!(now.evaluate(&point), 0.04, epsilon = 1e-15);

    let ahead = model.compile_ahead(day(0), day(2), &symbols(2)).unwrap();
    assert_relative_eq!(ahead.evaluate(&point), 0.02, epsilon = 1e-15);
  }

  #[test]
  fn rolling_fit_matches_the_300_period_scenario() {
    let panel = synthetic_panel(300);
    let fitted = RollingWindowReturnsForecast::new(250, true, false)
      .fit(&panel, None, day(0), day(299))
      .unwrap();

    assert!(matches!(
      fitted.compile(day(249), &symbols(3)),
      Err(ModelError::InsufficientHistory { .. })
    ));

    let term = fitted.compile(day(250), &symbols(3)).unwrap();
    let cash_only = DecisionPoint::from_holdings(array![0.0, 0.0, 1.0]);
    assert_relative_eq!(
      term.evaluate(&cash_only),
      panel.data()[[249, 2]],
      epsilon = 1e-15
    );

    let first_asset = DecisionPoint::from_holdings(array![1.0, 0.0, 0.0]);
    let expected = (0..250).map(|i| panel.data()[[i, 0]]).sum::<f64>() / 250.0;
    assert_relative_eq!(term.evaluate(&first_asset), expected, epsilon = 1e-13);
  }

  #[test]
  fn rolling_fit_fails_hard_when_the_horizon_has_no_estimates() {
    let panel = synthetic_panel(100);
    let result =
      RollingWindowReturnsForecast::new(250, true, false).fit(&panel, None, day(0), day(99));
    assert!(matches!(result, Err(ModelError::InsufficientHistory { .. })));
  }

  #[traced_test]
  #[test]
  fn rolling_fit_warns_on_partial_coverage() {
    let panel = synthetic_panel(300);
    RollingWindowReturnsForecast::new(250, true, false)
      .fit(&panel, None, day(0), day(299))
      .unwrap();
    assert!(logs_contain("partial coverage"));
  }

  #[test]
  fn rolling_fit_with_full_coverage_requirement_rejects_the_warmup_gap() {
    let panel = synthetic_panel(300);
    let result =
      RollingWindowReturnsForecast::new(250, true, true).fit(&panel, None, day(0), day(299));
    assert!(matches!(result, Err(ModelError::InsufficientHistory { .. })));
  }

  #[test]
  fn exponential_fit_produces_estimates_from_the_second_period() {
    let panel = synthetic_panel(20);
    let fitted = ExponentialWindowReturnsForecast::new(5.0, true, false)
      .fit(&panel, None, day(0), day(19))
      .unwrap();

    assert!(fitted.compile(day(0), &symbols(3)).is_err());
    let term = fitted.compile(day(1), &symbols(3)).unwrap();
    let cash_only = DecisionPoint::from_holdings(array![0.0, 0.0, 1.0]);
    assert_relative_eq!(
      term.evaluate(&cash_only),
      panel.data()[[0, 2]],
      epsilon = 1e-15
    );
  }

  #[test]
  fn forecast_error_risk_penalizes_deviation_from_benchmark() {
    let benchmark =
      Arc::new(TimeIndexedParameter::vector(array![0.5, 0.5, 0.0]).unwrap());
    let model = ForecastErrorRisk::with_benchmark(
      TimeIndexedParameter::vector(array![0.01, 0.02, 0.0]).unwrap(),
      benchmark,
    );
    let term = model.compile(day(0), &symbols(3)).unwrap();
    assert!(term.is_convex());

    let point = DecisionPoint::from_holdings(array![1.0, 0.0, 0.0]);
    assert_relative_eq!(
      term.evaluate(&point),
      0.01 * 0.5 + 0.02 * 0.5,
      epsilon = 1e-15
    );
  }

  #[test]
  fn rolling_forecast_error_fit_is_std_over_sqrt_l() {
    let panel = synthetic_panel(20);
    let l = 10;
    let fitted = RollingWindowForecastErrorRisk::new(l, true, false, None)
      .fit(&panel, None, day(0), day(19))
      .unwrap();

    let term = fitted.compile(day(l), &symbols(3)).unwrap();
    let point = DecisionPoint::from_holdings(array![1.0, 0.0, 0.0]);

    let mean = (0..l).map(|i| panel.data()[[i, 0]]).sum::<f64>() / l as f64;
    let var = (0..l)
      .map(|i| (panel.data()[[i, 0]] - mean).powi(2))
      .sum::<f64>()
      / (l - 1) as f64;
    assert_relative_eq!(
      term.evaluate(&point),
      var.sqrt() / (l as f64).sqrt(),
      epsilon = 1e-14
    );
  }

  #[test]
  fn exponential_forecast_error_is_explicitly_not_implemented() {
    let panel = synthetic_panel(20);
    let result = ExponentialWindowForecastErrorRisk.fit(&panel, None, day(0), day(19));
    assert!(matches!(result, Err(ModelError::NotImplemented(_))));
  }

  #[test]
  fn combination_compiles_to_the_weighted_sum() {
    let a = ReturnsForecast::new(TimeIndexedParameter::vector(array![0.01, 0.0]).unwrap());
    let b = ReturnsForecast::new(TimeIndexedParameter::vector(array![0.03, 0.0]).unwrap());
    let combo = MultipleReturnsForecasts::new(vec![a, b], vec![0.5, 0.25]).unwrap();

    let term = combo.compile(day(0), &symbols(2)).unwrap();
    let point = DecisionPoint::from_holdings(array![1.0, 0.0]);
    assert_relative_eq!(
      term.evaluate(&point),
      0.5 * 0.01 + 0.25 * 0.03,
      epsilon = 1e-15
    );
  }

  #[test]
  fn combination_rejects_mismatched_weights() {
    let a = ReturnsForecast::new(TimeIndexedParameter::vector(array![0.01]).unwrap());
    let result = MultipleReturnsForecasts::new(vec![a], vec![0.5, 0.5]);
    assert!(matches!(result, Err(ModelError::InvalidParameter(_))));
  }
}
