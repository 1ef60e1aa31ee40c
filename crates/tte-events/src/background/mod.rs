//! Per-channel polynomial background model.
//!
//! Each channel's count rate in the background intervals is fitted with a
//! polynomial in time, either by weighted least squares on finely binned counts or
//! by an unbinned Poisson-process likelihood. The fitted model then predicts
//! expected background counts, with errors, for any other time range.

pub mod binned;
pub mod polynomial;
pub mod unbinned;

use crate::binner::BackgroundCounts;
use crate::channels::ChannelSelection;
use crate::event_store::EventStore;
use binned::BinnedSamples;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tte_core::{Error, Result, TimeInterval, TimeIntervalSet};
use tte_inference::OptimizerConfig;

pub use polynomial::{BackgroundPolynomial, TimeScale};

/// Highest polynomial order the fitter accepts.
pub const MAX_ORDER: u8 = 4;

/// Likelihood-ratio improvement (2 Δ ln L) required to accept one more order.
const ORDER_SELECTION_THRESHOLD: f64 = 9.0;

/// Requested polynomial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "OrderRepr", into = "OrderRepr")]
pub enum PolynomialOrder {
    /// No background: every prediction is zero with zero variance.
    Disabled,
    /// A fixed order `0..=MAX_ORDER`.
    Fixed(u8),
    /// Pick the order from the data.
    #[default]
    Auto,
}

impl PolynomialOrder {
    /// `-1` disables the background; `0..=4` fixes the order.
    pub fn from_int(order: i64) -> Result<Self> {
        match order {
            -1 => Ok(Self::Disabled),
            0..=4 => Ok(Self::Fixed(order as u8)),
            other => Err(Error::Configuration(format!(
                "polynomial order must be -1..={MAX_ORDER} or 'auto', got {other}"
            ))),
        }
    }
}

impl FromStr for PolynomialOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Self::Auto);
        }
        let value = s
            .parse::<i64>()
            .map_err(|_| Error::Configuration(format!("cannot parse polynomial order '{s}'")))?;
        Self::from_int(value)
    }
}

impl fmt::Display for PolynomialOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("-1"),
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OrderRepr {
    Int(i64),
    Text(String),
}

impl TryFrom<OrderRepr> for PolynomialOrder {
    type Error = Error;

    fn try_from(repr: OrderRepr) -> Result<Self> {
        match repr {
            OrderRepr::Int(n) => Self::from_int(n),
            OrderRepr::Text(s) => s.parse(),
        }
    }
}

impl From<PolynomialOrder> for OrderRepr {
    fn from(order: PolynomialOrder) -> Self {
        match order {
            PolynomialOrder::Disabled => OrderRepr::Int(-1),
            PolynomialOrder::Fixed(n) => OrderRepr::Int(n as i64),
            PolynomialOrder::Auto => OrderRepr::Text("auto".into()),
        }
    }
}

/// Knobs of the background fit.
#[derive(Debug, Clone)]
pub struct BackgroundFitOptions {
    /// Fit the event times directly instead of binned counts.
    pub unbinned: bool,
    /// Width (s) of the sub-bins used by the binned fit and as the unbinned start.
    pub bin_width: f64,
    /// Optimizer settings of the unbinned fit.
    pub optimizer: OptimizerConfig,
}

impl Default for BackgroundFitOptions {
    fn default() -> Self {
        Self { unbinned: true, bin_width: 1.0, optimizer: OptimizerConfig::default() }
    }
}

/// Fitted background of every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundModel {
    requested: PolynomialOrder,
    order: i32,
    unbinned: bool,
    intervals: TimeIntervalSet,
    polynomials: Vec<BackgroundPolynomial>,
}

impl BackgroundModel {
    /// Zero background for `n_channels` channels.
    pub fn disabled(n_channels: usize) -> Self {
        Self {
            requested: PolynomialOrder::Disabled,
            order: -1,
            unbinned: false,
            intervals: TimeIntervalSet::default(),
            polynomials: vec![BackgroundPolynomial::zero(); n_channels],
        }
    }

    /// Fit every channel over `intervals`.
    ///
    /// With [`PolynomialOrder::Auto`] the order is chosen once on the channel-summed
    /// data and then applied to every channel. Channels are fitted in parallel.
    pub fn fit(
        store: &EventStore,
        intervals: &TimeIntervalSet,
        order: PolynomialOrder,
        options: &BackgroundFitOptions,
    ) -> Result<Self> {
        if order == PolynomialOrder::Disabled {
            return Ok(Self::disabled(store.n_channels()));
        }
        let data = FitData::collect(store, intervals, options)?;
        let resolved = data.resolve_order(order, options)?;
        log::info!(
            "fitting {} background with polynomial order {resolved} over {intervals}",
            if options.unbinned { "unbinned" } else { "binned" }
        );

        let polynomials = (0..store.n_channels())
            .into_par_iter()
            .map(|c| data.fit_channel(c, resolved, options))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            requested: order,
            order: resolved as i32,
            unbinned: options.unbinned,
            intervals: intervals.clone(),
            polynomials,
        })
    }

    /// Fit a single channel.
    pub fn fit_channel(
        store: &EventStore,
        channel: usize,
        intervals: &TimeIntervalSet,
        order: PolynomialOrder,
        options: &BackgroundFitOptions,
    ) -> Result<BackgroundPolynomial> {
        if channel >= store.n_channels() {
            return Err(Error::Validation(format!(
                "channel {channel} out of range ({} channels)",
                store.n_channels()
            )));
        }
        if order == PolynomialOrder::Disabled {
            return Ok(BackgroundPolynomial::zero());
        }
        let data = FitData::collect(store, intervals, options)?;
        let resolved = data.resolve_order(order, options)?;
        data.fit_channel(channel, resolved, options)
    }

    /// Order requested by the caller.
    pub fn requested_order(&self) -> PolynomialOrder {
        self.requested
    }

    /// Order actually fitted; −1 when disabled.
    pub fn order(&self) -> i32 {
        self.order
    }

    /// Whether the unbinned likelihood was used.
    pub fn is_unbinned(&self) -> bool {
        self.unbinned
    }

    /// Background intervals of the fit.
    pub fn intervals(&self) -> &TimeIntervalSet {
        &self.intervals
    }

    /// Per-channel polynomials.
    pub fn polynomials(&self) -> &[BackgroundPolynomial] {
        &self.polynomials
    }

    /// Expected counts and 1σ error in `interval` for `channel`, given the live time.
    pub fn expected_counts(&self, channel: usize, interval: &TimeInterval, exposure: f64) -> (f64, f64) {
        let Some(poly) = self.polynomials.get(channel) else {
            return (0.0, 0.0);
        };
        let fraction = exposure / interval.duration();
        let counts = poly.integral(interval.start(), interval.stop()) * fraction;
        let error = poly.integral_error(interval.start(), interval.stop()) * fraction;
        (counts, error)
    }

    /// Expected counts and errors of every channel in `interval`.
    pub fn channel_counts(&self, interval: &TimeInterval, exposure: f64) -> (Vec<f64>, Vec<f64>) {
        (0..self.polynomials.len()).map(|c| self.expected_counts(c, interval, exposure)).unzip()
    }

    /// View summed over the selected channels, for binning.
    pub fn selected<'a>(&'a self, selection: &'a ChannelSelection) -> SelectedBackground<'a> {
        SelectedBackground { model: self, selection }
    }
}

/// Background of a channel selection, with full live time.
#[derive(Debug, Clone, Copy)]
pub struct SelectedBackground<'a> {
    model: &'a BackgroundModel,
    selection: &'a ChannelSelection,
}

impl BackgroundCounts for SelectedBackground<'_> {
    fn counts(&self, start: f64, stop: f64) -> (f64, f64) {
        if stop <= start {
            return (0.0, 0.0);
        }
        let mut counts = 0.0;
        let mut variance = 0.0;
        for (c, poly) in self.model.polynomials.iter().enumerate() {
            if self.selection.contains(c) {
                counts += poly.integral(start, stop);
                variance += poly.integral_error(start, stop).powi(2);
            }
        }
        (counts, variance.sqrt())
    }
}

/// Everything the per-channel fits read, gathered once.
struct FitData {
    scale: TimeScale,
    samples: BinnedSamples,
    /// `(interval, live fraction)` of each background interval.
    live: Vec<(TimeInterval, f64)>,
    /// Background event times per channel.
    times: Vec<Vec<f64>>,
}

impl FitData {
    fn collect(
        store: &EventStore,
        intervals: &TimeIntervalSet,
        options: &BackgroundFitOptions,
    ) -> Result<Self> {
        if intervals.is_empty() {
            return Err(Error::Computation(
                "background fit requested with no background intervals set".into(),
            ));
        }
        let samples = BinnedSamples::collect(store, intervals, options.bin_width)?;
        let live = intervals.iter().map(|iv| (*iv, store.exposure(iv) / iv.duration())).collect();
        let mut times = vec![Vec::new(); store.n_channels()];
        if options.unbinned {
            for iv in intervals {
                let range = store.index_range(iv);
                for (&t, &c) in store.times()[range.clone()].iter().zip(&store.channels()[range]) {
                    times[c].push(t);
                }
            }
        }
        Ok(Self { scale: TimeScale::for_intervals(intervals), samples, live, times })
    }

    fn resolve_order(&self, order: PolynomialOrder, options: &BackgroundFitOptions) -> Result<usize> {
        match order {
            PolynomialOrder::Fixed(n) => Ok(n as usize),
            PolynomialOrder::Auto => self.select_order(options),
            PolynomialOrder::Disabled => {
                Err(Error::Validation("a disabled background has no order to fit".into()))
            }
        }
    }

    fn fit_channel(
        &self,
        channel: usize,
        order: usize,
        options: &BackgroundFitOptions,
    ) -> Result<BackgroundPolynomial> {
        let counts = self.samples.channel(channel);
        let start = binned::fit(&self.samples, &counts, order, self.scale)?;
        if !options.unbinned {
            return Ok(start);
        }
        let fit = unbinned::fit(
            &self.times[channel],
            &self.live,
            order,
            self.scale,
            start.coefficients(),
            &options.optimizer,
        )?;
        Ok(fit.polynomial)
    }

    /// Highest order whose likelihood gain over the previous order passes the threshold.
    fn select_order(&self, options: &BackgroundFitOptions) -> Result<usize> {
        let counts = self.samples.total();
        let all_times: Vec<f64> = if options.unbinned {
            let mut t: Vec<f64> = self.times.iter().flatten().copied().collect();
            t.sort_by(f64::total_cmp);
            t
        } else {
            Vec::new()
        };

        let mut log_likelihoods = Vec::with_capacity(MAX_ORDER as usize + 1);
        for order in 0..=MAX_ORDER as usize {
            let start = match binned::fit(&self.samples, &counts, order, self.scale) {
                Ok(p) => p,
                Err(Error::Computation(msg)) => {
                    log::debug!("stopping order selection at {order}: {msg}");
                    break;
                }
                Err(e) => return Err(e),
            };
            let ll = if options.unbinned {
                unbinned::fit(
                    &all_times,
                    &self.live,
                    order,
                    self.scale,
                    start.coefficients(),
                    &options.optimizer,
                )?
                .log_likelihood
            } else {
                binned::log_likelihood(&self.samples, &counts, &start)
            };
            log_likelihoods.push(ll);
        }
        if log_likelihoods.is_empty() {
            return Err(Error::Computation("no polynomial order could be fitted".into()));
        }

        let mut best = 0;
        for k in 1..log_likelihoods.len() {
            if 2.0 * (log_likelihoods[k] - log_likelihoods[k - 1]) >= ORDER_SELECTION_THRESHOLD {
                best = k;
            }
        }
        log::debug!("order selection log-likelihoods {log_likelihoods:?} -> order {best}");
        Ok(best)
    }
}
