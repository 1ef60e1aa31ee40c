//! `TteLike`: the likelihood plugin for one detector's time-tagged events.

use crate::response::ResponseMatrix;
use std::path::Path;
use std::sync::Arc;
use tte_core::{
    Error, NuisanceParameter, NuisanceParameters, Plugin, Result, SpectralModel, Tag,
    TimeIntervalSet, validate_plugin_name,
};
use tte_events::{PolynomialOrder, TimeSeries, read_event_parquet};
use tte_inference::{LbfgsbOptimizer, ObjectiveFunction, OptimizerConfig};
use tte_prob::pgstat;

/// Bounds of the effective-area correction.
pub const EFFECTIVE_AREA_BOUNDS: (f64, f64) = (0.8, 1.2);

/// Active-interval spectrum restricted to the selected channels.
#[derive(Debug, Clone)]
struct ActiveData {
    revision: u64,
    channels: Vec<usize>,
    exposure: f64,
    observed: Vec<f64>,
    background: Vec<f64>,
    background_error: Vec<f64>,
}

/// Likelihood plugin over the active-interval spectrum of a [`TimeSeries`].
///
/// The statistic is Poisson for the observed counts with the background profiled
/// against its Gaussian fit uncertainty (see [`tte_prob::pgstat`]). The plugin
/// carries one nuisance parameter, `cons_<name>`, an effective-area scale on the
/// folded model counts.
pub struct TteLike {
    name: String,
    series: TimeSeries,
    response: ResponseMatrix,
    model: Option<Arc<dyn SpectralModel>>,
    nuisance: NuisanceParameters,
    tag: Tag,
    optimizer: OptimizerConfig,
    active: Option<ActiveData>,
}

impl std::fmt::Debug for TteLike {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TteLike")
            .field("name", &self.name)
            .field("detector", &self.series.detector())
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("nuisance", &self.nuisance)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl TteLike {
    /// Wrap an analysed time series and its response.
    pub fn new(name: impl Into<String>, series: TimeSeries, response: ResponseMatrix) -> Result<Self> {
        let name = name.into();
        validate_plugin_name(&name)?;
        if response.n_channels() != series.store().n_channels() {
            return Err(Error::Validation(format!(
                "response has {} channels, events have {}",
                response.n_channels(),
                series.store().n_channels()
            )));
        }
        let mut nuisance = NuisanceParameters::new();
        nuisance.insert(NuisanceParameter::new(
            effective_area_name(&name),
            1.0,
            EFFECTIVE_AREA_BOUNDS,
        )?)?;
        Ok(Self {
            name,
            series,
            response,
            model: None,
            nuisance,
            tag: Tag::None,
            optimizer: OptimizerConfig::default(),
            active: None,
        })
    }

    /// Load events and response from disk, set intervals and fit the background.
    ///
    /// Channel energy bounds come from the response when the event file has none.
    pub fn from_files(
        name: &str,
        events: &Path,
        response: &Path,
        background: &str,
        active: &str,
        order: PolynomialOrder,
    ) -> Result<Self> {
        validate_plugin_name(name)?;
        let response = ResponseMatrix::from_json(response)?;
        let mut store = read_event_parquet(events)?;
        if store.energy_bounds().is_none() {
            store = store.with_energy_bounds(response.ebounds().clone())?;
        }
        let mut series = TimeSeries::new(name, store, order);
        if !background.trim().is_empty() {
            series.set_background_interval(background, true)?;
        }
        series.set_active_time_interval(active)?;
        Self::new(name, series, response)
    }

    /// Replace the optimizer settings used by [`Plugin::inner_fit`].
    pub fn with_optimizer(mut self, config: OptimizerConfig) -> Self {
        self.optimizer = config;
        self
    }

    /// The underlying time series.
    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    /// Mutable access to the time series; changes are picked up on the next evaluation.
    pub fn series_mut(&mut self) -> &mut TimeSeries {
        &mut self.series
    }

    /// The detector response.
    pub fn response(&self) -> &ResponseMatrix {
        &self.response
    }

    /// Set the active intervals.
    pub fn set_active_time_interval(&mut self, spec: &str) -> Result<()> {
        self.series.set_active_time_interval(spec)
    }

    /// Set the background intervals and refit.
    pub fn set_background_interval(&mut self, spec: &str, unbinned: bool) -> Result<()> {
        self.series.set_background_interval(spec, unbinned)
    }

    /// Select the channels entering the likelihood.
    pub fn set_active_measurements(&mut self, spec: &str) -> Result<()> {
        self.series.set_active_measurements(spec)
    }

    /// Tag the plugin with a time range equal to the hull of its active intervals.
    pub fn tag_with_active_time(&mut self, variable: &str) -> Result<()> {
        let hull = self
            .series
            .store()
            .active_intervals()
            .span()
            .ok_or_else(|| Error::NotComputed("no active interval set".into()))?;
        self.tag = Tag::range(variable, hull.start(), hull.stop())?;
        Ok(())
    }

    /// Active intervals currently used by the likelihood.
    pub fn active_intervals(&self) -> &TimeIntervalSet {
        self.series.store().active_intervals()
    }

    /// Current effective-area correction.
    pub fn effective_area_correction(&self) -> f64 {
        self.nuisance.get(&effective_area_name(&self.name)).map_or(1.0, |p| p.value)
    }

    /// Let [`Plugin::inner_fit`] profile the effective-area correction.
    pub fn free_effective_area_correction(&mut self) -> Result<()> {
        self.set_effective_area_free(true)
    }

    /// Pin the effective-area correction at its current value.
    pub fn fix_effective_area_correction(&mut self) -> Result<()> {
        self.set_effective_area_free(false)
    }

    /// Model counts per selected channel over the active exposure (before the
    /// effective-area correction).
    pub fn expected_model_counts(&mut self) -> Result<Vec<f64>> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| Error::NotComputed(format!("no model set on plugin '{}'", self.name)))?;
        self.refresh_active()?;
        let active = self.active_data()?;
        let rates = self.response.fold(model.as_ref())?;
        active
            .channels
            .iter()
            .map(|&c| {
                let m = rates[c] * active.exposure;
                if m.is_finite() && m >= 0.0 {
                    Ok(m)
                } else {
                    Err(Error::Computation(format!(
                        "model '{}' predicts {m} counts in channel {c}",
                        model.name()
                    )))
                }
            })
            .collect()
    }

    fn set_effective_area_free(&mut self, free: bool) -> Result<()> {
        let key = effective_area_name(&self.name);
        let mut param = self
            .nuisance
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("nuisance parameter '{key}' missing")))?;
        param.free = free;
        let mut params = NuisanceParameters::new();
        params.insert(param)?;
        self.nuisance = params;
        Ok(())
    }

    fn refresh_active(&mut self) -> Result<()> {
        let revision = self.series.revision();
        if self.active.as_ref().is_some_and(|a| a.revision == revision) {
            return Ok(());
        }
        let spectrum = self.series.active_spectrum()?;
        let channels = self.series.store().channel_selection().indices();
        log::debug!(
            "{}: active spectrum refreshed ({} channels, exposure {:.3} s)",
            self.name,
            channels.len(),
            spectrum.exposure
        );
        self.active = Some(ActiveData {
            revision,
            observed: channels.iter().map(|&c| spectrum.counts[c] as f64).collect(),
            background: channels.iter().map(|&c| spectrum.background[c]).collect(),
            background_error: channels.iter().map(|&c| spectrum.background_error[c]).collect(),
            exposure: spectrum.exposure,
            channels,
        });
        Ok(())
    }

    fn active_data(&self) -> Result<&ActiveData> {
        self.active
            .as_ref()
            .ok_or_else(|| Error::NotComputed("active spectrum not computed".into()))
    }
}

/// Name of the effective-area nuisance parameter of plugin `name`.
pub fn effective_area_name(name: &str) -> String {
    format!("cons_{name}")
}

/// Negative log-likelihood as a function of the effective-area correction.
struct ScaledObjective<'a> {
    data: &'a ActiveData,
    model: &'a [f64],
}

impl ObjectiveFunction for ScaledObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let scale = params.first().copied().unwrap_or(1.0);
        let scaled: Vec<f64> = self.model.iter().map(|m| m * scale).collect();
        let ll = pgstat::total_log_likelihood(
            &self.data.observed,
            &self.data.background,
            &self.data.background_error,
            &scaled,
        )?;
        Ok(-ll)
    }
}

impl Plugin for TteLike {
    fn name(&self) -> &str {
        &self.name
    }

    fn nuisance_parameters(&self) -> &NuisanceParameters {
        &self.nuisance
    }

    fn update_nuisance_parameters(&mut self, params: NuisanceParameters) -> Result<()> {
        let key = effective_area_name(&self.name);
        if let Some(unknown) = params.iter().find(|p| p.name != key) {
            return Err(Error::Validation(format!(
                "plugin '{}' has no nuisance parameter '{}'",
                self.name, unknown.name
            )));
        }
        if params.get(&key).is_none() {
            return Err(Error::Validation(format!("nuisance parameter '{key}' missing")));
        }
        self.nuisance = params;
        Ok(())
    }

    fn set_model(&mut self, model: Arc<dyn SpectralModel>) -> Result<()> {
        log::debug!("{}: model set to '{}'", self.name, model.name());
        self.model = Some(model);
        Ok(())
    }

    fn log_likelihood(&mut self) -> Result<f64> {
        let model = self.expected_model_counts()?;
        let data = self.active_data()?;
        let objective = ScaledObjective { data, model: &model };
        Ok(-objective.eval(&[self.effective_area_correction()])?)
    }

    fn inner_fit(&mut self) -> Result<f64> {
        let key = effective_area_name(&self.name);
        let free = self.nuisance.get(&key).is_some_and(|p| p.free);
        if !free {
            return self.log_likelihood();
        }
        let model = self.expected_model_counts()?;
        let data = self.active_data()?;
        let objective = ScaledObjective { data, model: &model };
        let bounds = self.nuisance.get(&key).map_or(EFFECTIVE_AREA_BOUNDS, |p| p.bounds);
        let result = LbfgsbOptimizer::new(self.optimizer.clone()).minimize(
            &objective,
            &[self.effective_area_correction()],
            &[bounds],
        )?;
        let best = result.parameters[0];
        log::debug!("{}: inner fit {result}, {key} = {best:.4}", self.name);
        self.nuisance.set_value(&key, best)?;
        Ok(-result.fval)
    }

    fn tag(&self) -> &Tag {
        &self.tag
    }

    fn set_tag(&mut self, tag: Tag) {
        self.tag = tag;
    }

    fn n_data_points(&self) -> usize {
        self.series.store().channel_selection().count()
    }
}
