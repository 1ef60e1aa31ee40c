//! Count spectra for time selections.

pub mod pha;

use crate::background::BackgroundModel;
use crate::binner::{Bin, TimeBins};
use crate::event_store::EventStore;
use tte_core::{Result, TimeInterval, TimeIntervalSet};

pub use pha::{PhaSpectrum, QUALITY_EXCLUDED, QUALITY_GOOD, read_pha_parquet, write_pha_series};

/// Builds [`PhaSpectrum`]s from an event store and a fitted background.
///
/// Counts cover every channel; the store's channel selection only sets the quality
/// flags.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumBuilder<'a> {
    detector: &'a str,
    store: &'a EventStore,
    background: &'a BackgroundModel,
}

impl<'a> SpectrumBuilder<'a> {
    /// New builder.
    pub fn new(detector: &'a str, store: &'a EventStore, background: &'a BackgroundModel) -> Self {
        Self { detector, store, background }
    }

    /// Spectrum of a single interval.
    pub fn interval(&self, interval: &TimeInterval) -> Result<PhaSpectrum> {
        let bin = Bin {
            interval: *interval,
            counts: self.store.channel_counts(interval),
            exposure: self.store.exposure(interval),
        };
        self.bin(&bin)
    }

    /// Spectrum summed over a set of intervals.
    pub fn intervals(&self, set: &TimeIntervalSet) -> Result<PhaSpectrum> {
        let n = self.store.n_channels();
        let mut counts = vec![0u64; n];
        let mut background = vec![0.0; n];
        let mut variance = vec![0.0; n];
        let mut exposure = 0.0;
        for iv in set {
            let live = self.store.exposure(iv);
            exposure += live;
            for (c, k) in self.store.channel_counts(iv).into_iter().enumerate() {
                counts[c] += k;
            }
            let (b, e) = self.background.channel_counts(iv, live);
            for c in 0..n {
                background[c] += b[c];
                variance[c] += e[c] * e[c];
            }
        }
        self.assemble(set.clone(), exposure, counts, background, variance.into_iter().map(f64::sqrt).collect())
    }

    /// One spectrum per bin, in bin order.
    pub fn bins(&self, bins: &TimeBins) -> Result<Vec<PhaSpectrum>> {
        bins.bins().iter().map(|b| self.bin(b)).collect()
    }

    fn bin(&self, bin: &Bin) -> Result<PhaSpectrum> {
        let (background, error) = self.background.channel_counts(&bin.interval, bin.exposure);
        self.assemble(
            TimeIntervalSet::from_intervals(vec![bin.interval])?,
            bin.exposure,
            bin.counts.clone(),
            background,
            error,
        )
    }

    fn assemble(
        &self,
        intervals: TimeIntervalSet,
        exposure: f64,
        counts: Vec<u64>,
        background: Vec<f64>,
        background_error: Vec<f64>,
    ) -> Result<PhaSpectrum> {
        let selection = self.store.channel_selection();
        let quality = (0..counts.len())
            .map(|c| if selection.contains(c) { QUALITY_GOOD } else { QUALITY_EXCLUDED })
            .collect();
        let spectrum = PhaSpectrum {
            detector: self.detector.to_string(),
            intervals,
            exposure,
            grouping: vec![1; counts.len()],
            counts,
            background,
            background_error,
            quality,
            background_order: self.background.order(),
            ebounds: self.store.energy_bounds().cloned(),
        };
        spectrum.validate()?;
        Ok(spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{BackgroundFitOptions, PolynomialOrder};
    use crate::event_store::DeadTime;
    use approx::assert_relative_eq;

    fn store() -> EventStore {
        // 10/s in channel 0, 5/s in channel 1 on [-50, 50].
        let mut times = Vec::new();
        let mut channels = Vec::new();
        for k in 0..1000 {
            times.push(-50.0 + (k as f64 + 0.5) * 0.1);
            channels.push(0);
        }
        for k in 0..500 {
            times.push(-50.0 + (k as f64 + 0.5) * 0.2);
            channels.push(1);
        }
        let mut s = EventStore::from_columns(
            times,
            channels,
            2,
            Some(TimeInterval::new(-50.0, 50.0).unwrap()),
        )
        .unwrap()
        .with_dead_time(DeadTime::none());
        s.set_background_intervals(TimeIntervalSet::from_spec("-50--10, 10-50").unwrap()).unwrap();
        s
    }

    fn background(s: &EventStore) -> BackgroundModel {
        let options = BackgroundFitOptions { unbinned: false, ..Default::default() };
        BackgroundModel::fit(s, s.background_intervals(), PolynomialOrder::Fixed(0), &options).unwrap()
    }

    #[test]
    fn test_interval_spectrum() {
        let s = store();
        let bkg = background(&s);
        let builder = SpectrumBuilder::new("n1", &s, &bkg);
        let spec = builder.interval(&TimeInterval::new(0.0, 4.0).unwrap()).unwrap();
        assert_eq!(spec.counts, vec![40, 20]);
        assert_relative_eq!(spec.exposure, 4.0);
        assert_relative_eq!(spec.background[0], 40.0, max_relative = 1e-6);
        assert_relative_eq!(spec.background[1], 20.0, max_relative = 1e-6);
        assert!(spec.background_error.iter().all(|&e| e > 0.0));
        assert_eq!(spec.background_order, 0);
    }

    #[test]
    fn test_multi_interval_sums() {
        let s = store();
        let bkg = background(&s);
        let builder = SpectrumBuilder::new("n1", &s, &bkg);
        let set = TimeIntervalSet::from_spec("-5-0, 2-4").unwrap();
        let spec = builder.intervals(&set).unwrap();
        assert_eq!(spec.counts, vec![70, 35]);
        assert_relative_eq!(spec.exposure, 7.0);
        assert_eq!(spec.intervals, set);
    }

    #[test]
    fn test_quality_follows_selection() {
        let mut s = store();
        s.select_channels("c1-c1").unwrap();
        let bkg = background(&s);
        let spec = SpectrumBuilder::new("n1", &s, &bkg)
            .interval(&TimeInterval::new(0.0, 1.0).unwrap())
            .unwrap();
        assert_eq!(spec.quality, vec![QUALITY_EXCLUDED, QUALITY_GOOD]);
        assert_eq!(spec.counts.len(), 2);
    }
}
