//! Light-curve artifacts: binned rates of a channel selection with the background rate.

use crate::background::BackgroundModel;
use crate::channels::ChannelSelection;
use crate::event_store::EventStore;
use serde::{Deserialize, Serialize};
use tte_core::TimeInterval;

/// Rates of one channel selection on a set of time bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightCurve {
    /// Selected channels.
    pub channels: Vec<usize>,
    /// Bin starts (s).
    pub starts: Vec<f64>,
    /// Bin stops (s).
    pub stops: Vec<f64>,
    /// Counts per bin.
    pub counts: Vec<u64>,
    /// Live time per bin (s).
    pub exposure: Vec<f64>,
    /// Count rate per bin (counts / s).
    pub rates: Vec<f64>,
    /// Poisson rate error per bin.
    pub rate_errors: Vec<f64>,
    /// Background rate per bin (zero without a fitted background).
    pub background_rates: Vec<f64>,
    /// Background rate error per bin.
    pub background_rate_errors: Vec<f64>,
}

impl LightCurve {
    /// Compute rates on `bins` for the channels in `selection`.
    pub fn compute(
        store: &EventStore,
        bins: &[TimeInterval],
        selection: &ChannelSelection,
        background: Option<&BackgroundModel>,
    ) -> Self {
        let mut lc = Self {
            channels: selection.indices(),
            starts: Vec::with_capacity(bins.len()),
            stops: Vec::with_capacity(bins.len()),
            counts: Vec::with_capacity(bins.len()),
            exposure: Vec::with_capacity(bins.len()),
            rates: Vec::with_capacity(bins.len()),
            rate_errors: Vec::with_capacity(bins.len()),
            background_rates: Vec::with_capacity(bins.len()),
            background_rate_errors: Vec::with_capacity(bins.len()),
        };
        for bin in bins {
            let n = store.count_in(bin, selection);
            let live = store.exposure(bin);
            let (b, b_var) = match background {
                Some(model) => selection.indices().into_iter().fold((0.0, 0.0), |(b, v), c| {
                    let (counts, err) = model.expected_counts(c, bin, live);
                    (b + counts, v + err * err)
                }),
                None => (0.0, 0.0),
            };
            let per_second = |x: f64| if live > 0.0 { x / live } else { 0.0 };
            lc.starts.push(bin.start());
            lc.stops.push(bin.stop());
            lc.counts.push(n);
            lc.exposure.push(live);
            lc.rates.push(per_second(n as f64));
            lc.rate_errors.push(per_second((n as f64).sqrt()));
            lc.background_rates.push(per_second(b));
            lc.background_rate_errors.push(per_second(b_var.sqrt()));
        }
        lc
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Whether the curve has no bins.
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}
