//! # tte-events
//!
//! Time-tagged photon events from one detector, and everything derived from them:
//! - [`EventStore`]: sorted arrival times and channels with dead-time bookkeeping,
//! - [`binner`]: constant, significance and Bayesian Blocks binning,
//! - [`background`]: per-channel polynomial background fits with covariance,
//! - [`spectrum`]: count spectra and PHA files,
//! - [`TimeSeries`]: the stateful analysis tying them together.
//!
//! Events and spectra are stored as Parquet.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod binner;
pub mod channels;
pub mod event_parquet;
pub mod event_store;
pub mod lightcurve;
pub mod spectrum;
pub mod time_series;

pub use background::{BackgroundFitOptions, BackgroundModel, BackgroundPolynomial, PolynomialOrder};
pub use binner::{Bin, BinningMethod, TimeBins};
pub use channels::{ChannelSelection, EnergyBounds};
pub use event_parquet::{read_event_parquet, write_event_parquet};
pub use event_store::{DeadTime, Event, EventStore};
pub use lightcurve::LightCurve;
pub use spectrum::{PhaSpectrum, SpectrumBuilder};
pub use time_series::{BinningRequest, Derived, LightCurveOptions, TimeSeries};
