//! # Return Panel
//!
//! $$
//! R \in \mathbb{R}^{T \times N}, \qquad R_{t,i} = \text{return of asset } i \text{ over period } t
//! $$
//!
//! Time-ordered per-asset realized returns with a designated cash column.
//! The same container carries traded-volume panels where a model needs them.

use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;

use crate::Timestamp;
use crate::error::ModelError;

/// A strictly time-ordered panel of per-asset values.
///
/// Invariants enforced at construction: one row per timestamp, strictly
/// increasing timestamps with no duplicates, one column per asset name, all
/// entries finite, and a valid cash column index. The cash column
/// participates in per-asset iteration but is special-cased by the window
/// estimators.
#[derive(Clone, Debug)]
pub struct ReturnPanel {
  timestamps: Vec<Timestamp>,
  assets: Vec<String>,
  cash: usize,
  data: Array2<f64>,
}

impl ReturnPanel {
  /// Build a panel, designating `cash` as the risk-free column index.
  pub fn new(
    timestamps: Vec<Timestamp>,
    assets: Vec<String>,
    data: Array2<f64>,
    cash: usize,
  ) -> Result<Self, ModelError> {
    if data.nrows() != timestamps.len() {
      return Err(ModelError::InvalidPanel(format!(
        "{} rows of data against {} timestamps",
        data.nrows(),
        timestamps.len()
      )));
    }
    if data.ncols() != assets.len() {
      return Err(ModelError::InvalidPanel(format!(
        "{} columns of data against {} asset names",
        data.ncols(),
        assets.len()
      )));
    }
    if cash >= assets.len() {
      return Err(ModelError::InvalidPanel(format!(
        "cash column {} out of bounds for {} assets",
        cash,
        assets.len()
      )));
    }
    for pair in timestamps.windows(2) {
      if pair[1] <= pair[0] {
        return Err(ModelError::InvalidPanel(format!(
          "timestamps not strictly increasing at {}",
          pair[1]
        )));
      }
    }
    if data.iter().any(|x| !x.is_finite()) {
      return Err(ModelError::InvalidPanel(
        "panel contains NaN or infinite entries".to_string(),
      ));
    }

    Ok(Self {
      timestamps,
      assets,
      cash,
      data,
    })
  }

  /// Build a panel whose last column is the cash/risk-free instrument.
  pub fn with_cash_last(
    timestamps: Vec<Timestamp>,
    assets: Vec<String>,
    data: Array2<f64>,
  ) -> Result<Self, ModelError> {
    if assets.is_empty() {
      return Err(ModelError::InvalidPanel("panel has no assets".to_string()));
    }
    let cash = assets.len() - 1;
    Self::new(timestamps, assets, data, cash)
  }

  /// Number of periods (rows).
  pub fn n_periods(&self) -> usize {
    self.timestamps.len()
  }

  /// Number of assets including cash (columns).
  pub fn n_assets(&self) -> usize {
    self.assets.len()
  }

  /// Column index of the cash/risk-free instrument.
  pub fn cash_index(&self) -> usize {
    self.cash
  }

  /// Ordered timestamps of the panel.
  pub fn timestamps(&self) -> &[Timestamp] {
    &self.timestamps
  }

  /// Timestamp of row `i`.
  pub fn timestamp(&self, i: usize) -> Timestamp {
    self.timestamps[i]
  }

  /// Asset names, column order.
  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Row index of an exact timestamp, if present.
  pub fn index_of(&self, t: Timestamp) -> Option<usize> {
    self.timestamps.binary_search(&t).ok()
  }

  /// Full data matrix, T x N.
  pub fn data(&self) -> &Array2<f64> {
    &self.data
  }

  /// Returns of period `i` across all assets.
  pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
    self.data.row(i)
  }

  /// View of rows `[start, end)`.
  pub fn rows(&self, start: usize, end: usize) -> ArrayView2<'_, f64> {
    self.data.slice(ndarray::s![start..end, ..])
  }

  /// Copy of the panel data with the cash column removed, preserving the
  /// relative order of the remaining columns.
  pub fn non_cash(&self) -> Array2<f64> {
    let cash = self.cash;
    let keep: Vec<usize> = (0..self.n_assets()).filter(|&j| j != cash).collect();
    self.data.select(Axis(1), &keep)
  }
}
