//! # Objective Terms
//!
//! $$
//! f(w^+) = \mu^\top w^+ \quad\big|\quad (w^+ - b)^\top \Sigma (w^+ - b)
//! \quad\big|\quad \max_k f_k(w^+)
//! $$
//!
//! The algebra handed to the optimization layer. A [`Term`] is symbolic in
//! the post-trade holdings vector: models compile to a `Term` once per
//! timestep and the optimizer (or a diagnostic) evaluates it at concrete
//! holdings. Terms are summable, scalable by non-negative multipliers and
//! closed under elementwise maximum, so hyperparameter composition never has
//! to re-derive model internals.

use std::ops::Add;
use std::ops::Mul;

use ndarray::Array1;
use ndarray::Array2;

/// Dimensions of the symbolic decision variables a model compiles against.
#[derive(Clone, Copy, Debug)]
pub struct ProblemSymbols {
  /// Number of assets including cash; the length of the post-trade holdings
  /// vector.
  pub n_assets: usize,
}

/// A concrete point of the decision variables, used for post-solve
/// diagnostics and numeric cross-checks.
#[derive(Clone, Debug)]
pub struct DecisionPoint {
  /// Post-trade holdings weights.
  pub w_plus: Array1<f64>,
  /// Trade vector.
  pub z: Array1<f64>,
  /// Portfolio value.
  pub value: f64,
}

impl DecisionPoint {
  /// Point with the given post-trade holdings, zero trades and unit value.
  pub fn from_holdings(w_plus: Array1<f64>) -> Self {
    let n = w_plus.len();
    Self {
      w_plus,
      z: Array1::zeros(n),
      value: 1.0,
    }
  }
}

/// An affine or convex expression in the post-trade holdings.
///
/// `benchmark` fields denote the reference weights subtracted from the
/// holdings before the term applies, so risk terms penalize deviation from
/// the benchmark rather than raw exposure.
#[derive(Clone, Debug)]
pub enum Term {
  /// `coeffs . w_plus + offset`
  Affine {
    coeffs: Array1<f64>,
    offset: f64,
  },
  /// `sum_i weights_i * |w_plus_i - benchmark_i|`
  AbsWeighted {
    weights: Array1<f64>,
    benchmark: Array1<f64>,
  },
  /// `sum_i (scales_i * (w_plus_i - benchmark_i))^2`
  ScaledSumSquares {
    scales: Array1<f64>,
    benchmark: Array1<f64>,
  },
  /// `f^T matrix f` with `f = transform . (w_plus - benchmark)`, or the
  /// plain deviation when `transform` is `None`. `matrix` must be positive
  /// semi-definite for the term to be convex; models validate it once at
  /// construction.
  Quadratic {
    transform: Option<Array2<f64>>,
    matrix: Array2<f64>,
    benchmark: Array1<f64>,
  },
  /// `scale * (sum_i weights_i * |f_i|)^2` with `f` as in [`Term::Quadratic`].
  /// The covariance-uncertainty penalty of the robust risk models.
  SquaredAbsWeighted {
    transform: Option<Array2<f64>>,
    weights: Array1<f64>,
    benchmark: Array1<f64>,
    scale: f64,
  },
  /// Sum of sub-terms.
  Sum(Vec<Term>),
  /// Scalar multiple of a sub-term. Convexity is preserved only for
  /// non-negative factors; return models use a negative factor for the
  /// concave forecast-confidence haircut of a maximized term.
  Scale(f64, Box<Term>),
  /// Elementwise maximum of sub-terms, convex when every sub-term is.
  MaxElemwise(Vec<Term>),
}

impl Term {
  /// Numeric value of the term at a concrete decision point.
  pub fn evaluate(&self, point: &DecisionPoint) -> f64 {
    let w = &point.w_plus;
    match self {
      Term::Affine { coeffs, offset } => coeffs.dot(w) + offset,
      Term::AbsWeighted { weights, benchmark } => {
        let dev = w - benchmark;
        dev.mapv(f64::abs).dot(weights)
      }
      Term::ScaledSumSquares { scales, benchmark } => {
        let scaled = (w - benchmark) * scales;
        scaled.dot(&scaled)
      }
      Term::Quadratic {
        transform,
        matrix,
        benchmark,
      } => {
        let dev = w - benchmark;
        let f = match transform {
          Some(m) => m.dot(&dev),
          None => dev,
        };
        f.dot(&matrix.dot(&f))
      }
      Term::SquaredAbsWeighted {
        transform,
        weights,
        benchmark,
        scale,
      } => {
        let dev = w - benchmark;
        let f = match transform {
          Some(m) => m.dot(&dev),
          None => dev,
        };
        let s = f.mapv(f64::abs).dot(weights);
        scale * s * s
      }
      Term::Sum(terms) => terms.iter().map(|t| t.evaluate(point)).sum(),
      Term::Scale(gamma, term) => gamma * term.evaluate(point),
      Term::MaxElemwise(terms) => terms
        .iter()
        .map(|t| t.evaluate(point))
        .fold(f64::NEG_INFINITY, f64::max),
    }
  }

  /// Scalar multiple, written out so call sites read like the math.
  pub fn scaled(self, gamma: f64) -> Term {
    Term::Scale(gamma, Box::new(self))
  }

  /// Structural convexity check. `Quadratic` is reported convex because its
  /// matrix is PSD-validated where the term is built.
  pub fn is_convex(&self) -> bool {
    match self {
      Term::Affine { .. } => true,
      Term::AbsWeighted { .. } | Term::ScaledSumSquares { .. } | Term::Quadratic { .. } => true,
      Term::SquaredAbsWeighted { scale, .. } => *scale >= 0.0,
      Term::Sum(terms) | Term::MaxElemwise(terms) => terms.iter().all(Term::is_convex),
      Term::Scale(gamma, term) => {
        matches!(**term, Term::Affine { .. }) || (*gamma >= 0.0 && term.is_convex())
      }
    }
  }
}

impl Add for Term {
  type Output = Term;

  fn add(self, rhs: Term) -> Term {
    match (self, rhs) {
      (Term::Sum(mut lhs), Term::Sum(rhs)) => {
        lhs.extend(rhs);
        Term::Sum(lhs)
      }
      (Term::Sum(mut lhs), rhs) => {
        lhs.push(rhs);
        Term::Sum(lhs)
      }
      (lhs, Term::Sum(mut rhs)) => {
        rhs.insert(0, lhs);
        Term::Sum(rhs)
      }
      (lhs, rhs) => Term::Sum(vec![lhs, rhs]),
    }
  }
}

impl Mul<f64> for Term {
  type Output = Term;

  fn mul(self, gamma: f64) -> Term {
    self.scaled(gamma)
  }
}
