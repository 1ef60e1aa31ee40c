//! Poisson-observed counts over a Gaussian-uncertain background.
//!
//! For a channel with observed counts `n`, background estimate `b ± σ` and model
//! expectation `m`, the joint likelihood is
//!
//! `L(B) = Pois(n | m + B) · N(b | B, σ)`
//!
//! and the background nuisance `B` is profiled out analytically: `dL/dB = 0` is a
//! quadratic in `B` whose positive root is [`profile_background`]. With `σ = 0` the
//! background is taken as exact and the term reduces to a plain Poisson likelihood.
//!
//! The total expectation is floored at [`MIN_EXPECTATION`], so a channel with counts
//! but no predicted photons costs a large finite penalty instead of `-inf`.

use crate::constraint::gaussian_constraint;
use crate::poisson;
use tte_core::{Error, Result};

/// Smallest expectation `m + B` a channel is evaluated at.
pub const MIN_EXPECTATION: f64 = 1e-100;

/// One channel's profiled likelihood term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfiledTerm {
    /// `ln L` at the profiled background.
    pub log_likelihood: f64,
    /// Profiled background counts `B̂ >= 0`.
    pub background: f64,
}

/// Maximum-likelihood background `B̂` for fixed model counts `m`.
///
/// `B̂ = ½ (√((b+m)² − 2σ²(b+m−2n) + σ⁴) + b − m − σ²)`, clipped at zero.
pub fn profile_background(n: f64, b: f64, sigma: f64, m: f64) -> f64 {
    let mb = b + m;
    let s2 = sigma * sigma;
    let disc = mb * mb - 2.0 * s2 * (mb - 2.0 * n) + s2 * s2;
    let bhat = 0.5 * (disc.max(0.0).sqrt() + b - m - s2);
    bhat.max(0.0)
}

/// Profiled log-likelihood of one channel.
pub fn log_likelihood(n: f64, b: f64, sigma: f64, m: f64) -> Result<ProfiledTerm> {
    if !m.is_finite() || m < 0.0 {
        return Err(Error::Computation(format!(
            "model counts must be finite and >= 0, got {m}"
        )));
    }
    if !b.is_finite() || !sigma.is_finite() || sigma < 0.0 {
        return Err(Error::Computation(format!(
            "background must be finite with sigma >= 0, got {b} ± {sigma}"
        )));
    }

    if sigma == 0.0 {
        let background = b.max(0.0);
        let log_likelihood = poisson::log_likelihood(n, (m + background).max(MIN_EXPECTATION))?;
        return Ok(ProfiledTerm { log_likelihood, background });
    }

    let bhat = profile_background(n, b, sigma, m);
    let log_likelihood = poisson::log_likelihood(n, (m + bhat).max(MIN_EXPECTATION))?
        + gaussian_constraint(b, bhat, sigma)?;
    Ok(ProfiledTerm { log_likelihood, background: bhat })
}

/// Sum of profiled terms over channels. Slices must have equal length.
pub fn total_log_likelihood(
    observed: &[f64],
    background: &[f64],
    background_error: &[f64],
    model: &[f64],
) -> Result<f64> {
    let n = observed.len();
    if background.len() != n || background_error.len() != n || model.len() != n {
        return Err(Error::Validation(format!(
            "length mismatch: observed={n}, background={}, error={}, model={}",
            background.len(),
            background_error.len(),
            model.len()
        )));
    }
    let mut total = 0.0;
    for i in 0..n {
        total += log_likelihood(observed[i], background[i], background_error[i], model[i])?
            .log_likelihood;
    }
    Ok(total)
}
