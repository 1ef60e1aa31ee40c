//! # tte-core
//!
//! Core types shared by the time-tagged event crates:
//! - the error taxonomy ([`Error`]) and [`Result`] alias,
//! - time intervals and interval sets with their text form,
//! - tags and nuisance parameters,
//! - the [`traits::Plugin`] likelihood contract and [`traits::SpectralModel`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod interval;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use interval::{TimeInterval, TimeIntervalSet};
pub use traits::{DataList, Plugin, SpectralModel, validate_plugin_name};
pub use types::{NuisanceParameter, NuisanceParameters, Tag};
