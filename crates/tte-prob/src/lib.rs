//! Count statistics for photon spectra.
//!
//! This crate hosts the probability math used by binning and likelihood code:
//! - Poisson log-likelihood terms with a stable `ln(n!)`
//! - the Poisson-observed / Gaussian-background profile statistic
//! - detection significance of counts over a (possibly uncertain) background

pub mod constraint;
pub mod math;
pub mod pgstat;
pub mod poisson;
pub mod significance;
