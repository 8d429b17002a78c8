//! # Forecast and Risk Models
//!
//! $$
//! \text{model} : (t,\ w^+,\ z,\ v) \mapsto \text{Term}
//! $$
//!
//! Models are small structs of owned [`TimeIndexedParameter`]s plus a pure
//! `compile`. Estimator-backed variants are builders: `fit` consumes the
//! historical panel once before a backtest run and returns the immutable
//! populated model, so no model ever mutates shared state after
//! construction. Benchmark weights are shared read-only across the risk
//! models of one problem.

pub mod returns;
pub mod risks;

use std::sync::Arc;

use crate::Timestamp;
use crate::error::ModelError;
use crate::expr::DecisionPoint;
use crate::expr::ProblemSymbols;
use crate::expr::Term;
use crate::panel::ReturnPanel;
use crate::param::TimeIndexedParameter;

/// Post-solve diagnostic value of a model's term.
#[derive(Clone, Debug)]
pub enum Diagnostic {
  /// Realized numeric value of the compiled term.
  Value(f64),
  /// Per-component values, in input order. Reported by worst-case risk so
  /// the log shows every candidate model, not only the binding one.
  PerComponent(Vec<(String, f64)>),
}

/// The capability every forecast/risk model exposes to the optimization
/// layer: compile an algebraic contribution at the current time, and
/// optionally report its realized value after a solve.
pub trait ObjectiveModel {
  /// Model label used in diagnostics and logs.
  fn name(&self) -> &'static str;

  /// Resolve the model's parameters at `t` and return its objective
  /// contribution as a term in the symbolic decision variables.
  fn compile(&self, t: Timestamp, symbols: &ProblemSymbols) -> Result<Term, ModelError>;

  /// Realized value of the model's term at a solved decision point.
  fn diagnostic(&self, t: Timestamp, point: &DecisionPoint) -> Result<Diagnostic, ModelError> {
    let symbols = ProblemSymbols {
      n_assets: point.w_plus.len(),
    };
    Ok(Diagnostic::Value(self.compile(t, &symbols)?.evaluate(point)))
  }
}

/// Two-phase construction for estimator-backed models: hyperparameters at
/// construction, one `fit` against the historical panel before the run, an
/// immutable populated model afterwards.
pub trait FitModel {
  type Fitted: ObjectiveModel;

  /// Derive the model's time-indexed parameters from the panel. `volumes`
  /// is accepted for interface parity with volume-aware models and unused
  /// by the models in this crate.
  fn fit(
    &self,
    returns: &ReturnPanel,
    volumes: Option<&ReturnPanel>,
    start: Timestamp,
    end: Timestamp,
  ) -> Result<Self::Fitted, ModelError>;
}

/// The default all-zero benchmark-weights parameter.
pub fn zero_benchmark() -> Arc<TimeIndexedParameter> {
  Arc::new(TimeIndexedParameter::zero())
}

/// Verify that a freshly derived parameter has usable estimates over the
/// requested horizon.
///
/// Missing coverage is soft: valid points are kept and a warning is logged,
/// unless `require_full` upgrades any gap inside the horizon to a hard
/// [`ModelError::InsufficientHistory`]. A horizon with no valid point at all
/// is always a hard error.
pub(crate) fn check_coverage(
  param: &TimeIndexedParameter,
  panel: &ReturnPanel,
  start: Timestamp,
  end: Timestamp,
  require_full: bool,
  what: &str,
) -> Result<(), ModelError> {
  let horizon: Vec<Timestamp> = panel
    .timestamps()
    .iter()
    .copied()
    .filter(|t| *t >= start && *t <= end)
    .collect();

  let mut defined = 0usize;
  let mut first_gap = None;
  for &t in &horizon {
    match param.value_at(t) {
      Ok(_) => defined += 1,
      Err(_) => {
        if first_gap.is_none() {
          first_gap = Some(t);
        }
      }
    }
  }

  if defined == 0 {
    let at = first_gap.or_else(|| horizon.first().copied()).unwrap_or(start);
    return Err(ModelError::InsufficientHistory {
      at,
      context: format!("no valid {what} estimate over the requested horizon"),
    });
  }

  match first_gap {
    Some(at) if require_full => Err(ModelError::InsufficientHistory {
      at,
      context: format!("{what} estimate requires full horizon coverage"),
    }),
    Some(at) => {
      tracing::warn!(
        estimate = what,
        first_gap = %at,
        defined,
        horizon = horizon.len(),
        "partial coverage: estimates are undefined early in the horizon"
      );
      Ok(())
    }
    None => {
      tracing::debug!(estimate = what, defined, "estimator fit covers the full horizon");
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use chrono::Utc;
  use ndarray::Array2;

  use super::*;
  use crate::param::Tensor;

  fn day(i: usize) -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(i as i64)
  }

  fn panel(periods: usize) -> ReturnPanel {
    let data = Array2::from_elem((periods, 2), 0.01);
    let assets = vec!["AAA".to_string(), "CASH".to_string()];
    ReturnPanel::with_cash_last((0..periods).map(day).collect(), assets, data).unwrap()
  }

  fn param_defined_from(first: usize, periods: usize) -> TimeIndexedParameter {
    let points = (first..periods)
      .map(|i| (day(i), Tensor::Scalar(1.0)))
      .collect();
    let undefined = (0..first).map(day).collect();
    TimeIndexedParameter::varying(points, undefined).unwrap()
  }

  #[test]
  fn coverage_accepts_a_fully_covered_horizon() {
    let p = param_defined_from(0, 10);
    assert!(check_coverage(&p, &panel(10), day(0), day(9), true, "test").is_ok());
  }

  #[test]
  fn partial_coverage_is_soft_by_default() {
    let p = param_defined_from(5, 10);
    assert!(check_coverage(&p, &panel(10), day(0), day(9), false, "test").is_ok());
  }

  #[test]
  fn partial_coverage_is_hard_when_full_coverage_is_required() {
    let p = param_defined_from(5, 10);
    let result = check_coverage(&p, &panel(10), day(0), day(9), true, "test");
    assert!(matches!(result, Err(ModelError::InsufficientHistory { .. })));
  }

  #[test]
  fn empty_coverage_is_always_hard() {
    let p = param_defined_from(10, 10);
    let result = check_coverage(&p, &panel(10), day(0), day(9), false, "test");
    assert!(matches!(result, Err(ModelError::InsufficientHistory { .. })));
  }

  #[test]
  fn coverage_is_checked_only_inside_the_horizon() {
    let p = param_defined_from(5, 10);
    assert!(check_coverage(&p, &panel(10), day(5), day(9), true, "test").is_ok());
  }
}
