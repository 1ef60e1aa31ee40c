//! Analysis configuration file (YAML, or JSON by extension).
//!
//! ```yaml
//! detector: n3
//! events: n3_events.parquet
//! response: n3_rsp.json
//! background: "-50--10, 30-100"
//! active: "0-10"
//! poly_order: auto        # -1..4 or "auto"
//! unbinned: true
//! measurements: "8-900"
//! binning:
//!   start: 0
//!   stop: 10
//!   method: significance
//!   sigma: 10
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tte_events::{BinningMethod, PolynomialOrder, TimeSeries, read_event_parquet};
use tte_like::ResponseMatrix;

fn default_unbinned() -> bool {
    true
}

/// One detector's analysis setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Detector (and plugin) name.
    pub detector: String,
    /// Event Parquet file.
    pub events: PathBuf,
    /// Response JSON; required for likelihoods, optional otherwise.
    #[serde(default)]
    pub response: Option<PathBuf>,
    /// Background interval specification.
    #[serde(default)]
    pub background: Option<String>,
    /// Active interval specification.
    pub active: String,
    /// Background polynomial order.
    #[serde(default)]
    pub poly_order: PolynomialOrder,
    /// Unbinned background fit.
    #[serde(default = "default_unbinned")]
    pub unbinned: bool,
    /// Channel or energy selection.
    #[serde(default)]
    pub measurements: Option<String>,
    /// Time binning request.
    #[serde(default)]
    pub binning: Option<BinningConfig>,
}

/// `binning:` block; every key besides `start`, `stop` and `method` is a method parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct BinningConfig {
    /// Start of the binned range (s).
    pub start: f64,
    /// Stop of the binned range (s).
    pub stop: f64,
    /// `constant`, `significance` or `bayesblocks`.
    pub method: String,
    /// Method parameters (`dt`, `sigma`, `p0`).
    #[serde(flatten)]
    pub params: BTreeMap<String, f64>,
}

impl BinningConfig {
    /// Typed binning method.
    pub fn method(&self) -> Result<BinningMethod> {
        Ok(BinningMethod::from_params(&self.method, &self.params)?)
    }
}

impl AnalysisConfig {
    /// Read a config file and resolve its relative paths.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let is_json = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut config: Self = if is_json {
            serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?
        } else {
            serde_yaml_ng::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.events = resolve(base, &config.events);
        config.response = config.response.as_deref().map(|p| resolve(base, p));
        Ok(config)
    }

    /// Response matrix, or an error naming the missing key.
    pub fn response(&self) -> Result<ResponseMatrix> {
        let path = self
            .response
            .as_ref()
            .context("config has no `response` entry; it is required for likelihood evaluation")?;
        Ok(ResponseMatrix::from_json(path)?)
    }

    /// Load events and apply intervals, background fit and channel selection.
    pub fn time_series(&self) -> Result<TimeSeries> {
        tracing::info!(path = %self.events.display(), "loading events");
        let mut store = read_event_parquet(&self.events)?;
        if store.energy_bounds().is_none()
            && let Some(path) = &self.response
        {
            let response = ResponseMatrix::from_json(path)?;
            store = store.with_energy_bounds(response.ebounds().clone())?;
        }
        tracing::info!(events = store.n_events(), channels = store.n_channels(), "events loaded");

        let mut series = TimeSeries::new(&self.detector, store, self.poly_order);
        series.set_active_time_interval(&self.active)?;
        if let Some(measurements) = &self.measurements {
            series.set_active_measurements(measurements)?;
        }
        if let Some(background) = &self.background {
            series
                .set_background_interval(background, self.unbinned)
                .context("fitting the background")?;
            tracing::info!(order = series.background()?.order(), "background fitted");
        }
        Ok(series)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { base.join(path) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_with_flattened_params() {
        let yaml = r#"
detector: n3
events: ev.parquet
active: "0-10"
poly_order: auto
binning:
  start: 0
  stop: 10
  method: constant
  dt: 0.5
"#;
        let config: AnalysisConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.poly_order, PolynomialOrder::Auto);
        assert!(config.unbinned);
        let binning = config.binning.unwrap();
        assert_eq!(binning.method().unwrap(), BinningMethod::Constant { dt: 0.5 });
    }

    #[test]
    fn test_missing_param_and_unknown_key() {
        let yaml = "detector: n3\nevents: ev.parquet\nactive: \"0-10\"\nbinning: {start: 0, stop: 10, method: bayesblocks}\n";
        let config: AnalysisConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(config.binning.unwrap().method().is_err());

        let yaml = "detector: n3\nevents: ev.parquet\nactive: \"0-10\"\nactiv: \"1-2\"\n";
        assert!(serde_yaml_ng::from_str::<AnalysisConfig>(yaml).is_err());
    }

    #[test]
    fn test_relative_paths_resolved_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");
        std::fs::write(
            &path,
            r#"{"detector": "b0", "events": "ev.parquet", "response": "/abs/rsp.json", "active": "0-1", "poly_order": -1}"#,
        )
        .unwrap();
        let config = AnalysisConfig::read(&path).unwrap();
        assert_eq!(config.events, dir.path().join("ev.parquet"));
        assert_eq!(config.response, Some(PathBuf::from("/abs/rsp.json")));
        assert_eq!(config.poly_order, PolynomialOrder::Disabled);
    }
}
