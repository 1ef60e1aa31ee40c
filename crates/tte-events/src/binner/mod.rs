//! Temporal binning of photon arrival times.
//!
//! Three methods, selected by [`BinningMethod`]:
//! - `constant`: fixed-width bins,
//! - `significance`: each bin grows until its excess over background reaches a target significance,
//! - `bayesblocks`: Bayesian Blocks optimal segmentation.
//!
//! The algorithms only produce bin edges. Filling counts and exposure is done by the
//! caller that owns the event store.

pub mod bayesian_blocks;
pub mod constant;
pub mod significance;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tte_core::{Error, Result, TimeInterval};

pub use bayesian_blocks::bayesian_blocks_edges;
pub use constant::constant_edges;
pub use significance::significance_edges;

/// Binning method with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", deny_unknown_fields)]
pub enum BinningMethod {
    /// Fixed-width bins of `dt` seconds.
    Constant {
        /// Bin width (s).
        dt: f64,
    },
    /// Bins that close once their significance reaches `sigma`.
    Significance {
        /// Target significance.
        sigma: f64,
    },
    /// Bayesian Blocks with false-alarm probability `p0`.
    #[serde(rename = "bayesblocks")]
    BayesianBlocks {
        /// False-alarm probability for a change point, in `(0, 1)`.
        p0: f64,
    },
}

impl BinningMethod {
    /// Build a method from its name and a parameter map.
    ///
    /// Unknown methods, missing parameters and parameters the method does not
    /// recognise are all [`Error::Configuration`].
    pub fn from_params(method: &str, params: &BTreeMap<String, f64>) -> Result<Self> {
        let expected = match method {
            "constant" => "dt",
            "significance" => "sigma",
            "bayesblocks" => "p0",
            other => {
                return Err(Error::Configuration(format!(
                    "unknown binning method '{other}' (expected constant, significance or bayesblocks)"
                )));
            }
        };
        if let Some(extra) = params.keys().find(|k| k.as_str() != expected) {
            return Err(Error::Configuration(format!(
                "parameter '{extra}' is not recognised by binning method '{method}'"
            )));
        }
        let value = params.get(expected).copied().ok_or_else(|| {
            Error::Configuration(format!("binning method '{method}' requires parameter '{expected}'"))
        })?;
        let built = match expected {
            "dt" => Self::Constant { dt: value },
            "sigma" => Self::Significance { sigma: value },
            _ => Self::BayesianBlocks { p0: value },
        };
        built.validate()?;
        Ok(built)
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Constant { dt } if !(dt.is_finite() && dt > 0.0) => {
                Err(Error::Configuration(format!("constant binning needs dt > 0, got {dt}")))
            }
            Self::Significance { sigma } if !(sigma.is_finite() && sigma > 0.0) => Err(
                Error::Configuration(format!("significance binning needs sigma > 0, got {sigma}")),
            ),
            Self::BayesianBlocks { p0 } if !(p0 > 0.0 && p0 < 1.0) => Err(Error::Configuration(
                format!("bayesblocks needs 0 < p0 < 1, got {p0}"),
            )),
            _ => Ok(()),
        }
    }

    /// Method name as accepted by [`Self::from_params`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::Significance { .. } => "significance",
            Self::BayesianBlocks { .. } => "bayesblocks",
        }
    }
}

impl fmt::Display for BinningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { dt } => write!(f, "constant(dt={dt})"),
            Self::Significance { sigma } => write!(f, "significance(sigma={sigma})"),
            Self::BayesianBlocks { p0 } => write!(f, "bayesblocks(p0={p0})"),
        }
    }
}

/// Expected background counts over a time range, summed over the selected channels.
pub trait BackgroundCounts {
    /// Expected counts in `[start, stop)` and their 1σ error.
    fn counts(&self, start: f64, stop: f64) -> (f64, f64);

    /// Cumulative expected counts from `origin` to `t`.
    fn cumulative(&self, origin: f64, t: f64) -> f64 {
        if t <= origin { 0.0 } else { self.counts(origin, t).0 }
    }
}

/// One time bin with its per-channel counts and live time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// Bin time range.
    pub interval: TimeInterval,
    /// Counts per detector channel.
    pub counts: Vec<u64>,
    /// Live time (s).
    pub exposure: f64,
}

impl Bin {
    /// Counts summed over the channels in `mask`.
    pub fn selected_counts(&self, mask: &[bool]) -> u64 {
        self.counts.iter().zip(mask).filter(|(_, m)| **m).map(|(c, _)| *c).sum()
    }
}

/// Ordered, non-overlapping bins produced by one binning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBins {
    method: BinningMethod,
    bins: Vec<Bin>,
}

impl TimeBins {
    /// Bins must be ordered by start with `stop(i) <= start(i+1)`.
    pub fn new(method: BinningMethod, bins: Vec<Bin>) -> Result<Self> {
        for pair in bins.windows(2) {
            if pair[0].interval.stop() > pair[1].interval.start() {
                return Err(Error::Validation(format!(
                    "bins {} and {} are out of order or overlap",
                    pair[0].interval, pair[1].interval
                )));
            }
        }
        Ok(Self { method, bins })
    }

    /// Method that produced the bins.
    pub fn method(&self) -> BinningMethod {
        self.method
    }

    /// All bins.
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether no bin was produced.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Bin start times.
    pub fn starts(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.interval.start()).collect()
    }

    /// Bin stop times.
    pub fn stops(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.interval.stop()).collect()
    }

    /// `"start-stop"` text of each bin.
    pub fn text_bins(&self) -> Vec<String> {
        self.bins.iter().map(|b| b.interval.to_string()).collect()
    }
}

/// Turn a sorted edge list into consecutive intervals, skipping zero-width pairs.
pub(crate) fn edges_to_intervals(edges: &[f64]) -> Result<Vec<TimeInterval>> {
    edges
        .windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| TimeInterval::new(w[0], w[1]))
        .collect()
}
