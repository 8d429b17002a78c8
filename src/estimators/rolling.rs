//! # Rolling Window Estimator
//!
//! $$
//! \hat\mu_t = \frac{1}{L}\sum_{k=1}^{L} R_{t-k}, \qquad
//! \hat\delta_t = \frac{\hat\sigma_t}{\sqrt{L}}
//! $$
//!
//! Fixed-length trailing-window statistics. The estimate attributed to row
//! `i` is computed over rows `[i - L, i)`, so row `i` itself never leaks in.
//! Rows with fewer than `L` preceding periods are marked undefined instead of
//! producing a partial-window estimate.

use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::s;

use crate::error::ModelError;
use crate::estimators::extend_matrix_with_cash;
use crate::estimators::extend_vector_with_cash;
use crate::panel::ReturnPanel;
use crate::param::Tensor;
use crate::param::TimeIndexedParameter;

/// Rolling-window statistics over a return panel.
#[derive(ImplNew, Clone, Debug)]
pub struct RollingWindow {
  /// Number of past periods in the window.
  pub lookback: usize,
}

impl RollingWindow {
  fn require_lookback(&self, min: usize, what: &str) -> Result<(), ModelError> {
    if self.lookback < min {
      return Err(ModelError::InvalidParameter(format!(
        "rolling {what} needs a lookback of at least {min}, got {}",
        self.lookback
      )));
    }
    Ok(())
  }

  /// Rolling mean of past returns, full asset dimension.
  ///
  /// With `use_last_for_cash` the cash column instead carries the single
  /// realized cash return of the immediately preceding period, regardless of
  /// the window length.
  pub fn mean(
    &self,
    panel: &ReturnPanel,
    use_last_for_cash: bool,
  ) -> Result<TimeIndexedParameter, ModelError> {
    self.require_lookback(1, "mean")?;

    let l = self.lookback;
    let cash = panel.cash_index();
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      if i < l {
        undefined.push(panel.timestamp(i));
        continue;
      }
      let window = panel.rows(i - l, i);
      let mut mean = window.sum_axis(Axis(0)) / l as f64;
      if use_last_for_cash {
        mean[cash] = panel.data()[[i - 1, cash]];
      }
      points.push((panel.timestamp(i), Tensor::Vector(mean)));
    }

    TimeIndexedParameter::varying(points, undefined)
  }

  /// Standard error of the rolling mean estimator: the sample standard
  /// deviation of the window divided by `sqrt(L)`. Full asset dimension;
  /// `zero_for_cash` forces the cash entry to zero.
  pub fn forecast_error(
    &self,
    panel: &ReturnPanel,
    zero_for_cash: bool,
  ) -> Result<TimeIndexedParameter, ModelError> {
    self.require_lookback(2, "forecast error")?;

    let l = self.lookback;
    let cash = panel.cash_index();
    let sqrt_l = (l as f64).sqrt();
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      if i < l {
        undefined.push(panel.timestamp(i));
        continue;
      }
      let window = panel.rows(i - l, i);
      let mut error = column_std(window) / sqrt_l;
      if zero_for_cash {
        error[cash] = 0.0;
      }
      points.push((panel.timestamp(i), Tensor::Vector(error)));
    }

    TimeIndexedParameter::varying(points, undefined)
  }

  /// Rolling per-asset standard deviations for a diagonal risk model.
  /// Computed on the non-cash columns; the cash entry is zero, so the cash
  /// asset carries no risk in the resulting diagonal model.
  pub fn standard_deviations(
    &self,
    panel: &ReturnPanel,
  ) -> Result<TimeIndexedParameter, ModelError> {
    self.require_lookback(2, "standard deviation")?;

    let l = self.lookback;
    let cash = panel.cash_index();
    let non_cash = panel.non_cash();
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      if i < l {
        undefined.push(panel.timestamp(i));
        continue;
      }
      let window = non_cash.slice(s![i - l..i, ..]);
      let std = column_std(window);
      points.push((
        panel.timestamp(i),
        Tensor::Vector(extend_vector_with_cash(std.view(), cash)),
      ));
    }

    TimeIndexedParameter::varying(points, undefined)
  }

  /// Rolling sample covariance of the non-cash returns. With `extend_cash`
  /// the matrix is padded back to full asset dimension with a zero cash
  /// row/column, as a full-covariance model expects.
  pub fn covariance(
    &self,
    panel: &ReturnPanel,
    extend_cash: bool,
  ) -> Result<TimeIndexedParameter, ModelError> {
    self.require_lookback(2, "covariance")?;

    let l = self.lookback;
    let cash = panel.cash_index();
    let non_cash = panel.non_cash();
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      if i < l {
        undefined.push(panel.timestamp(i));
        continue;
      }
      let window = non_cash.slice(s![i - l..i, ..]);
      let mean = window.sum_axis(Axis(0)) / l as f64;
      let centered = &window - &mean;
      let cov = centered.t().dot(&centered) / (l - 1) as f64;
      let tensor = if extend_cash {
        Tensor::Matrix(extend_matrix_with_cash(&cov, cash))
      } else {
        Tensor::Matrix(cov)
      };
      points.push((panel.timestamp(i), tensor));
    }

    TimeIndexedParameter::varying(points, undefined)
  }
}

/// Sample standard deviation (ddof = 1) of each column of a window.
fn column_std(window: ArrayView2<'_, f64>) -> Array1<f64> {
  let l = window.nrows();
  let mean = window.sum_axis(Axis(0)) / l as f64;
  let centered = &window - &mean;
  let var = centered.mapv(|x| x * x).sum_axis(Axis(0)) / (l - 1) as f64;
  var.mapv(f64::sqrt)
}
