//! Poisson log-likelihood terms.

use crate::math::{ln_factorial, xlogy};
use tte_core::{Error, Result};

/// `ln P(n | mu)` for a Poisson count with expectation `mu >= 0`.
///
/// `mu = 0` with `n > 0` is impossible and yields `-inf`.
pub fn log_likelihood(n: f64, mu: f64) -> Result<f64> {
    if !mu.is_finite() || mu < 0.0 {
        return Err(Error::Computation(format!(
            "Poisson expectation must be finite and >= 0, got {mu}"
        )));
    }
    if n < 0.0 || !n.is_finite() {
        return Err(Error::Validation(format!("observed count must be finite and >= 0, got {n}")));
    }
    Ok(xlogy(n, mu) - mu - ln_factorial(n))
}
