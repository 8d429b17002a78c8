//! # Exponential Window Estimator
//!
//! $$
//! \hat\mu_t = \frac{\sum_{k\ge 1} \lambda^{k-1} R_{t-k}}{\sum_{k\ge 1} \lambda^{k-1}},
//! \qquad \lambda = 2^{-1/h}
//! $$
//!
//! Exponentially-decayed statistics over all periods strictly before the
//! estimate's timestamp. The decay weight of a period `k` periods back is
//! `0.5^(k/h)` for half-life `h`, so weights halve every `h` periods and the
//! normalized weights of an infinite history sum to one. Dispersion
//! statistics use bias-corrected weighted moments, defined once two
//! observations have been absorbed.

use impl_new_derive::ImplNew;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;

use crate::error::ModelError;
use crate::estimators::extend_matrix_with_cash;
use crate::estimators::extend_vector_with_cash;
use crate::panel::ReturnPanel;
use crate::param::Tensor;
use crate::param::TimeIndexedParameter;

/// Exponentially-decayed statistics over a return panel.
#[derive(ImplNew, Clone, Debug)]
pub struct ExponentialWindow {
  /// Number of periods over which the decay weight halves.
  pub half_life: f64,
}

impl ExponentialWindow {
  fn decay(&self) -> Result<f64, ModelError> {
    if !(self.half_life.is_finite() && self.half_life > 0.0) {
      return Err(ModelError::InvalidParameter(format!(
        "exponential half-life must be positive and finite, got {}",
        self.half_life
      )));
    }
    Ok(0.5_f64.powf(1.0 / self.half_life))
  }

  /// Exponentially-decayed mean of past returns, full asset dimension.
  ///
  /// With `use_last_for_cash` the cash column carries the single realized
  /// cash return of the immediately preceding period.
  pub fn mean(
    &self,
    panel: &ReturnPanel,
    use_last_for_cash: bool,
  ) -> Result<TimeIndexedParameter, ModelError> {
    let lambda = self.decay()?;
    let cash = panel.cash_index();
    let n = panel.n_assets();

    let mut weight_sum = 0.0;
    let mut weighted = Array1::<f64>::zeros(n);
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      if i == 0 {
        undefined.push(panel.timestamp(i));
      } else {
        let mut mean = &weighted / weight_sum;
        if use_last_for_cash {
          mean[cash] = panel.data()[[i - 1, cash]];
        }
        points.push((panel.timestamp(i), Tensor::Vector(mean)));
      }

      // absorb period i for the estimates attributed to later timestamps
      weighted = weighted * lambda + &panel.row(i);
      weight_sum = weight_sum * lambda + 1.0;
    }

    TimeIndexedParameter::varying(points, undefined)
  }

  /// Exponentially-decayed per-asset standard deviations for a diagonal risk
  /// model. Non-cash columns only; the cash entry is zero.
  pub fn standard_deviations(
    &self,
    panel: &ReturnPanel,
  ) -> Result<TimeIndexedParameter, ModelError> {
    let lambda = self.decay()?;
    let cash = panel.cash_index();
    let non_cash = panel.non_cash();
    let k = non_cash.ncols();

    let mut w = Accumulator::default();
    let mut weighted = Array1::<f64>::zeros(k);
    let mut weighted_sq = Array1::<f64>::zeros(k);
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      match w.correction() {
        Some(correction) => {
          let mean = &weighted / w.sum;
          let raw = &weighted_sq / w.sum - &mean * &mean;
          let std = raw.mapv(|v| (v * correction).max(0.0).sqrt());
          points.push((
            panel.timestamp(i),
            Tensor::Vector(extend_vector_with_cash(std.view(), cash)),
          ));
        }
        None => undefined.push(panel.timestamp(i)),
      }

      let row = non_cash.row(i);
      weighted = weighted * lambda + &row;
      weighted_sq = weighted_sq * lambda + &row.mapv(|v| v * v);
      w.absorb(lambda);
    }

    TimeIndexedParameter::varying(points, undefined)
  }

  /// Exponentially-decayed covariance of the non-cash returns, optionally
  /// padded back to full asset dimension with a zero cash row/column.
  pub fn covariance(
    &self,
    panel: &ReturnPanel,
    extend_cash: bool,
  ) -> Result<TimeIndexedParameter, ModelError> {
    let lambda = self.decay()?;
    let cash = panel.cash_index();
    let non_cash = panel.non_cash();
    let k = non_cash.ncols();

    let mut w = Accumulator::default();
    let mut weighted = Array1::<f64>::zeros(k);
    let mut weighted_outer = Array2::<f64>::zeros((k, k));
    let mut points = Vec::new();
    let mut undefined = Vec::new();

    for i in 0..panel.n_periods() {
      match w.correction() {
        Some(correction) => {
          let mean = &weighted / w.sum;
          let mean_col = mean.clone().insert_axis(Axis(1));
          let raw = &weighted_outer / w.sum - &mean_col.dot(&mean_col.t());
          let cov = raw.mapv(|v| v * correction);
          let tensor = if extend_cash {
            Tensor::Matrix(extend_matrix_with_cash(&cov, cash))
          } else {
            Tensor::Matrix(cov)
          };
          points.push((panel.timestamp(i), tensor));
        }
        None => undefined.push(panel.timestamp(i)),
      }

      let row = non_cash.row(i).to_owned();
      let row_col = row.clone().insert_axis(Axis(1));
      weighted_outer = weighted_outer * lambda + &row_col.dot(&row_col.t());
      weighted = weighted * lambda + &row;
      w.absorb(lambda);
    }

    TimeIndexedParameter::varying(points, undefined)
  }
}

/// Running sums of decayed weights and squared weights, with the
/// bias-correction factor for weighted dispersion statistics.
#[derive(Default)]
struct Accumulator {
  sum: f64,
  sum_sq: f64,
  count: usize,
}

impl Accumulator {
  fn absorb(&mut self, lambda: f64) {
    self.sum = self.sum * lambda + 1.0;
    self.sum_sq = self.sum_sq * lambda * lambda + 1.0;
    self.count += 1;
  }

  /// `W^2 / (W^2 - W_2)`, defined once two observations carry weight.
  fn correction(&self) -> Option<f64> {
    if self.count < 2 {
      return None;
    }
    let denom = self.sum * self.sum - self.sum_sq;
    if denom <= 0.0 {
      return None;
    }
    Some(self.sum * self.sum / denom)
  }
}
