//! # Portfolio Models
//!
//! $$
//! \max_t \; \hat{r}_t^\top w^+ \;-\; \gamma \,(w^+ - b)^\top \Sigma_t (w^+ - b)
//! $$
//!
//! Time-indexed return forecasts and covariance risk models for convex
//! portfolio optimization. Estimators derive rolling- and
//! exponential-window parameters from a panel of past returns with strictly
//! causal windows, models compile those parameters into convex objective
//! terms at each timestep, and a post-solve diagnostic reports realized
//! values.

pub mod error;
pub mod estimators;
pub mod expr;
pub mod models;
pub mod panel;
pub mod param;

/// Point in time of a panel row or parameter value.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

pub use error::ModelError;
pub use expr::DecisionPoint;
pub use expr::ProblemSymbols;
pub use expr::Term;
pub use models::FitModel;
pub use models::ObjectiveModel;
pub use panel::ReturnPanel;
pub use param::Tensor;
pub use param::TimeIndexedParameter;
