//! # tte-like
//!
//! Likelihood plugin for time-tagged event data.
//!
//! [`TteLike`] turns the active-interval spectrum of a [`tte_events::TimeSeries`]
//! into a [`tte_core::Plugin`]: an external fitting engine hands it a
//! [`tte_core::SpectralModel`], the model is folded through the detector
//! [`ResponseMatrix`], and the plugin returns the profiled Poisson/Gaussian
//! log-likelihood of the selected channels.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod plugin;
pub mod response;

pub use plugin::{EFFECTIVE_AREA_BOUNDS, TteLike, effective_area_name};
pub use response::ResponseMatrix;
