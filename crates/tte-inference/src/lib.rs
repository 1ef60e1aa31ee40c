//! # tte-inference
//!
//! Numerical inference used by background fits and plugin nuisance profiling:
//! - a bounded L-BFGS optimizer over an [`ObjectiveFunction`]
//! - inversion of a Hessian to a covariance matrix

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Covariance from a Hessian.
pub mod covariance;
/// Generic numerical optimizer (L-BFGS backend with box clamping).
pub mod optimizer;

pub use covariance::covariance_from_hessian;
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
