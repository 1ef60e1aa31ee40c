//! Stateful analysis of one detector's event list.
//!
//! [`TimeSeries`] owns the [`EventStore`] and the artifacts derived from it: the
//! background model and the time bins. Each derived artifact is a small
//! `Unset → Computed` state machine. Every mutator of an upstream input (active
//! intervals, background intervals or order, channel selection, binning request)
//! sends the dependent artifacts back to `Unset`; the next read recomputes them.

use crate::background::{BackgroundFitOptions, BackgroundModel, PolynomialOrder};
use crate::binner::{
    BackgroundCounts, Bin, BinningMethod, TimeBins, bayesian_blocks_edges, constant_edges,
    significance_edges,
};
use crate::lightcurve::LightCurve;
use crate::spectrum::{PhaSpectrum, SpectrumBuilder, write_pha_series};
use crate::{ChannelSelection, EventStore};
use std::path::{Path, PathBuf};
use tte_core::{Error, Result, TimeInterval, TimeIntervalSet};

/// A derived artifact.
#[derive(Debug, Clone, Default)]
pub enum Derived<T> {
    /// Not computed, or invalidated by an upstream change.
    #[default]
    Unset,
    /// Up to date with the current inputs.
    Computed(T),
}

impl<T> Derived<T> {
    /// Value, or [`Error::NotComputed`] naming `what`.
    pub fn get(&self, what: &str) -> Result<&T> {
        match self {
            Self::Computed(v) => Ok(v),
            Self::Unset => Err(Error::NotComputed(format!("{what} not computed"))),
        }
    }

    /// Whether the artifact is up to date.
    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }

    /// Drop the value.
    pub fn invalidate(&mut self) {
        *self = Self::Unset;
    }
}

/// Parameters of the last successful [`TimeSeries::create_time_bins`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinningRequest {
    /// Start of the binned range.
    pub start: f64,
    /// Stop of the binned range.
    pub stop: f64,
    /// Method and parameters.
    pub method: BinningMethod,
    /// Map Bayesian Blocks times through the background first.
    pub use_background: bool,
}

/// Light-curve request for [`TimeSeries::view_lightcurve`].
#[derive(Debug, Clone)]
pub struct LightCurveOptions {
    /// Start (s); defaults to the observation start.
    pub start: Option<f64>,
    /// Stop (s); defaults to the observation stop.
    pub stop: Option<f64>,
    /// Bin width (s) when not using the binner.
    pub dt: f64,
    /// Use the current time bins instead of a regular grid.
    pub use_binner: bool,
    /// Channel selection string; defaults to the active channel selection.
    pub channels: Option<String>,
}

impl Default for LightCurveOptions {
    fn default() -> Self {
        Self { start: None, stop: None, dt: 1.0, use_binner: false, channels: None }
    }
}

/// Event list plus selections, background model and time bins.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    detector: String,
    store: EventStore,
    order: PolynomialOrder,
    fit_options: BackgroundFitOptions,
    background: Derived<BackgroundModel>,
    binning: Option<BinningRequest>,
    bins: Derived<TimeBins>,
    revision: u64,
}

impl TimeSeries {
    /// Wrap a loaded store.
    pub fn new(detector: impl Into<String>, store: EventStore, order: PolynomialOrder) -> Self {
        Self {
            detector: detector.into(),
            store,
            order,
            fit_options: BackgroundFitOptions::default(),
            background: Derived::Unset,
            binning: None,
            bins: Derived::Unset,
            revision: 0,
        }
    }

    /// Replace the background fit options (marks the background stale).
    pub fn with_fit_options(mut self, options: BackgroundFitOptions) -> Self {
        self.fit_options = options;
        self.background.invalidate();
        self
    }

    /// Detector name.
    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// The event store.
    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Requested background order.
    pub fn background_order(&self) -> PolynomialOrder {
        self.order
    }

    /// Counter bumped by every mutation; lets holders of derived data detect staleness.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Set the active intervals from a `"start-stop, ..."` string.
    pub fn set_active_time_interval(&mut self, spec: &str) -> Result<()> {
        self.set_active_intervals(TimeIntervalSet::from_spec(spec)?)
    }

    /// Set the active intervals.
    pub fn set_active_intervals(&mut self, intervals: TimeIntervalSet) -> Result<()> {
        if intervals.is_empty() {
            return Err(Error::Configuration("active interval specification is empty".into()));
        }
        self.store.set_active_intervals(intervals)?;
        self.bins.invalidate();
        self.touch();
        Ok(())
    }

    /// Set the background intervals from a string and refit the background.
    pub fn set_background_interval(&mut self, spec: &str, unbinned: bool) -> Result<()> {
        self.set_background_intervals(TimeIntervalSet::from_spec(spec)?, unbinned)
    }

    /// Set the background intervals and refit the background.
    pub fn set_background_intervals(&mut self, intervals: TimeIntervalSet, unbinned: bool) -> Result<()> {
        self.store.set_background_intervals(intervals)?;
        self.fit_options.unbinned = unbinned;
        self.background_changed()
    }

    /// Change the background polynomial order and refit.
    pub fn set_background_order(&mut self, order: PolynomialOrder) -> Result<()> {
        self.order = order;
        self.background_changed()
    }

    /// Select the channels used for binning and likelihood (`"c10-c120"`, `"8-900"`, `"all"`).
    pub fn set_active_measurements(&mut self, spec: &str) -> Result<()> {
        self.store.select_channels(spec)?;
        self.bins.invalidate();
        self.touch();
        Ok(())
    }

    /// Fitted background, refitting first if stale.
    pub fn background(&mut self) -> Result<&BackgroundModel> {
        self.ensure_background()?;
        self.background.get("background model")
    }

    /// Fitted background if it is up to date.
    pub fn cached_background(&self) -> Option<&BackgroundModel> {
        self.background.get("background model").ok()
    }

    /// Bin `[start, stop]` with `method`.
    ///
    /// The range must lie inside the hull of the active intervals. Each active
    /// interval overlapping the range is binned on its own, so no bin covers a gap
    /// between active intervals. Bayesian Blocks work on background-flattened times
    /// whenever a background can be fitted. On error the previous bins and request
    /// are left untouched.
    pub fn create_time_bins(&mut self, start: f64, stop: f64, method: BinningMethod) -> Result<&TimeBins> {
        self.create_time_bins_with(BinningRequest { start, stop, method, use_background: true })
    }

    /// [`Self::create_time_bins`] with the full request.
    pub fn create_time_bins_with(&mut self, request: BinningRequest) -> Result<&TimeBins> {
        let bins = self.compute_bins(&request)?;
        log::info!(
            "{}: created {} bins in [{}, {}] with {}",
            self.detector,
            bins.len(),
            request.start,
            request.stop,
            request.method
        );
        self.binning = Some(request);
        self.bins = Derived::Computed(bins);
        self.touch();
        self.bins.get("time bins")
    }

    /// Current bins, recomputed from the last request if an input changed since.
    pub fn bins(&mut self) -> Result<&TimeBins> {
        if !self.bins.is_computed() {
            let request = self.binning.ok_or_else(|| {
                Error::NotComputed("time bins not created; call create_time_bins first".into())
            })?;
            let bins = self.compute_bins(&request)?;
            self.bins = Derived::Computed(bins);
        }
        self.bins.get("time bins")
    }

    /// `"start-stop"` text of every bin.
    pub fn text_bins(&mut self) -> Result<Vec<String>> {
        Ok(self.bins()?.text_bins())
    }

    /// Spectrum of the active intervals.
    pub fn active_spectrum(&mut self) -> Result<PhaSpectrum> {
        if self.store.active_intervals().is_empty() {
            return Err(Error::NotComputed("no active interval set".into()));
        }
        self.ensure_background()?;
        let background = self.background.get("background model")?;
        SpectrumBuilder::new(&self.detector, &self.store, background)
            .intervals(self.store.active_intervals())
    }

    /// One spectrum per time bin.
    pub fn get_ogip_from_binner(&mut self) -> Result<Vec<PhaSpectrum>> {
        self.bins()?;
        self.ensure_background()?;
        let bins = self.bins.get("time bins")?;
        let background = self.background.get("background model")?;
        SpectrumBuilder::new(&self.detector, &self.store, background).bins(bins)
    }

    /// Write one PHA file per time bin as `<basename>_<i>.pha.parquet`.
    pub fn write_pha_from_binner(&mut self, basename: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
        let spectra = self.get_ogip_from_binner()?;
        let paths = write_pha_series(&spectra, basename, overwrite)?;
        log::info!("{}: wrote {} PHA files under {}", self.detector, paths.len(), basename.display());
        Ok(paths)
    }

    /// Light curve of a channel selection, with the background rate when available.
    pub fn view_lightcurve(&mut self, options: &LightCurveOptions) -> Result<LightCurve> {
        let selection = match &options.channels {
            Some(spec) => ChannelSelection::parse(
                spec,
                self.store.n_channels(),
                self.store.energy_bounds(),
            )?,
            None => self.store.channel_selection().clone(),
        };

        let grid: Vec<TimeInterval> = if options.use_binner {
            self.bins()?.bins().iter().map(|b| b.interval).collect()
        } else {
            let span = self.store.span();
            let start = options.start.unwrap_or(span.start()).max(span.start());
            let stop = options.stop.unwrap_or(span.stop()).min(span.stop());
            constant_edges(start, stop, options.dt)?
        };

        if let Err(e) = self.ensure_background() {
            log::warn!("{}: light curve without background: {e}", self.detector);
        }
        Ok(LightCurve::compute(&self.store, &grid, &selection, self.cached_background()))
    }

    fn background_changed(&mut self) -> Result<()> {
        self.background.invalidate();
        self.bins.invalidate();
        self.touch();
        if self.store.background_intervals().is_empty() && self.order != PolynomialOrder::Disabled {
            return Ok(());
        }
        let result = self.ensure_background();
        if let Err(e) = &result {
            log::warn!("{}: background fit failed: {e}", self.detector);
        }
        result
    }

    fn ensure_background(&mut self) -> Result<()> {
        if self.background.is_computed() {
            return Ok(());
        }
        let model = BackgroundModel::fit(
            &self.store,
            self.store.background_intervals(),
            self.order,
            &self.fit_options,
        )?;
        self.background = Derived::Computed(model);
        Ok(())
    }

    fn compute_bins(&mut self, request: &BinningRequest) -> Result<TimeBins> {
        request.method.validate()?;
        let range = TimeInterval::new(request.start, request.stop).map_err(|e| match e {
            Error::Validation(msg) => Error::Configuration(msg),
            other => other,
        })?;
        let hull = self.store.active_intervals().span().ok_or_else(|| {
            Error::Configuration("set an active interval before creating time bins".into())
        })?;
        if !hull.covers(&range) {
            return Err(Error::Configuration(format!(
                "binning range {range} lies outside the active interval {hull}"
            )));
        }

        let pieces: Vec<TimeInterval> = self
            .store
            .active_intervals()
            .iter()
            .filter_map(|active| active.intersection(&range))
            .collect();
        if pieces.is_empty() {
            return Err(Error::Configuration(format!(
                "binning range {range} falls between active intervals"
            )));
        }

        let use_background = match request.method {
            BinningMethod::Constant { .. } => false,
            BinningMethod::Significance { .. } => {
                if let Err(e) = self.ensure_background() {
                    return Err(Error::Configuration(format!(
                        "significance binning requires a fitted background: {e}"
                    )));
                }
                true
            }
            BinningMethod::BayesianBlocks { .. } => {
                let has_background = self.order != PolynomialOrder::Disabled
                    && !self.store.background_intervals().is_empty();
                if request.use_background && has_background {
                    self.ensure_background()?;
                }
                request.use_background && has_background
            }
        };

        let selection = self.store.channel_selection().clone();
        let background = if use_background {
            Some(self.background.get("background model")?.selected(&selection))
        } else {
            None
        };

        // Bins never straddle a gap between active intervals.
        let mut edges = Vec::new();
        for piece in &pieces {
            let (lo, hi) = (piece.start(), piece.stop());
            match request.method {
                BinningMethod::Constant { dt } => edges.extend(constant_edges(lo, hi, dt)?),
                BinningMethod::Significance { sigma } => {
                    let times = self.store.times_in(piece, &selection);
                    let view = background.as_ref().ok_or_else(|| {
                        Error::NotComputed("background model".into())
                    })?;
                    edges.extend(significance_edges(&times, lo, hi, sigma, view)?);
                }
                BinningMethod::BayesianBlocks { p0 } => {
                    let times = self.store.times_in(piece, &selection);
                    let view = background.as_ref().map(|v| v as &dyn BackgroundCounts);
                    edges.extend(bayesian_blocks_edges(&times, lo, hi, p0, view)?);
                }
            }
        }

        let bins = edges
            .into_iter()
            .map(|interval| Bin {
                counts: self.store.channel_counts(&interval),
                exposure: self.store.exposure(&interval),
                interval,
            })
            .collect();
        TimeBins::new(request.method, bins)
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
