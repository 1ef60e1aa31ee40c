//! Gaussian constraint on a measured background.

use statrs::distribution::{Continuous, Normal};
use tte_core::{Error, Result};

/// `ln N(estimate | value, sigma)`: log-density of a background estimate given the true value.
pub fn gaussian_constraint(estimate: f64, value: f64, sigma: f64) -> Result<f64> {
    let normal = Normal::new(value, sigma).map_err(|e| {
        Error::Computation(format!("background constraint N({value}, {sigma}): {e}"))
    })?;
    Ok(normal.ln_pdf(estimate))
}
