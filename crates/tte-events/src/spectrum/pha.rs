//! OGIP-style count spectra and their Parquet form.
//!
//! # Schema: `tte_pha_v1`
//!
//! One row per channel:
//!
//! | Column             | Arrow Type | Description                                  |
//! |--------------------|------------|----------------------------------------------|
//! | `channel`          | `Int64`    | Channel index                                |
//! | `counts`           | `Int64`    | Observed counts                              |
//! | `background`       | `Float64`  | Expected background counts                   |
//! | `background_error` | `Float64`  | 1σ background error (0 → Poisson background) |
//! | `quality`          | `Int32`    | 0 = good, 5 = excluded by channel selection  |
//! | `grouping`         | `Int32`    | 1 = start of a channel group                 |
//!
//! Key-value metadata `tte.pha` holds the header (detector, times, exposure, ...).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, AsArray, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::channels::EnergyBounds;
use crate::event_parquet::{META_KEY_SCHEMA_VERSION, read_batches, write_batch};
use tte_core::{Error, Result, TimeIntervalSet};

/// Schema version of PHA files.
pub const PHA_SCHEMA_V1: &str = "tte_pha_v1";

/// Parquet metadata key of the PHA header (JSON).
pub const META_KEY_PHA: &str = "tte.pha";

/// File suffix of PHA files.
pub const PHA_SUFFIX: &str = "pha.parquet";

/// Quality flag of a usable channel.
pub const QUALITY_GOOD: i32 = 0;

/// Quality flag of a channel excluded from the analysis.
pub const QUALITY_EXCLUDED: i32 = 5;

/// Count spectrum of one time selection, with its background estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaSpectrum {
    /// Detector name.
    pub detector: String,
    /// Time intervals the counts were accumulated over.
    pub intervals: TimeIntervalSet,
    /// Live time (s).
    pub exposure: f64,
    /// Observed counts per channel.
    pub counts: Vec<u64>,
    /// Expected background counts per channel.
    pub background: Vec<f64>,
    /// 1σ background errors per channel.
    pub background_error: Vec<f64>,
    /// Per-channel quality flag.
    pub quality: Vec<i32>,
    /// Per-channel grouping flag.
    pub grouping: Vec<i32>,
    /// Order of the background polynomial (−1 when disabled).
    pub background_order: i32,
    /// Channel energy bounds, if known.
    pub ebounds: Option<EnergyBounds>,
}

#[derive(Serialize, Deserialize)]
struct PhaHeader {
    detector: String,
    intervals: TimeIntervalSet,
    exposure: f64,
    background_order: i32,
    #[serde(default)]
    ebounds: Option<EnergyBounds>,
}

impl PhaSpectrum {
    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.counts.len()
    }

    /// First interval start.
    pub fn tstart(&self) -> f64 {
        self.intervals.span().map(|s| s.start()).unwrap_or(f64::NAN)
    }

    /// Last interval stop.
    pub fn tstop(&self) -> f64 {
        self.intervals.span().map(|s| s.stop()).unwrap_or(f64::NAN)
    }

    /// Channels flagged good.
    pub fn channel_mask(&self) -> Vec<bool> {
        self.quality.iter().map(|&q| q == QUALITY_GOOD).collect()
    }

    /// Whether every background error is zero (Poisson background statistic).
    pub fn is_poisson_background(&self) -> bool {
        self.background_error.iter().all(|&e| e == 0.0)
    }

    /// Total observed counts in good channels.
    pub fn total_counts(&self) -> u64 {
        self.counts.iter().zip(&self.quality).filter(|(_, q)| **q == QUALITY_GOOD).map(|(c, _)| c).sum()
    }

    /// Check that every per-channel column has the same length.
    pub fn validate(&self) -> Result<()> {
        let n = self.counts.len();
        let lens =
            [self.background.len(), self.background_error.len(), self.quality.len(), self.grouping.len()];
        if lens.iter().any(|&l| l != n) {
            return Err(Error::Validation(format!(
                "spectrum columns differ in length: counts={n}, others={lens:?}"
            )));
        }
        if !(self.exposure.is_finite() && self.exposure >= 0.0) {
            return Err(Error::Validation(format!("invalid exposure {}", self.exposure)));
        }
        if let Some(eb) = &self.ebounds
            && eb.n_channels() != n
        {
            return Err(Error::Validation(format!(
                "energy bounds describe {} channels, spectrum has {n}",
                eb.n_channels()
            )));
        }
        Ok(())
    }

    /// Arrow form of the spectrum.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        self.validate()?;
        let header = PhaHeader {
            detector: self.detector.clone(),
            intervals: self.intervals.clone(),
            exposure: self.exposure,
            background_order: self.background_order,
            ebounds: self.ebounds.clone(),
        };
        let header = serde_json::to_string(&header)
            .map_err(|e| Error::Validation(format!("failed to serialize PHA header: {e}")))?;

        let schema = Arc::new(
            Schema::new(vec![
                Field::new("channel", DataType::Int64, false),
                Field::new("counts", DataType::Int64, false),
                Field::new("background", DataType::Float64, false),
                Field::new("background_error", DataType::Float64, false),
                Field::new("quality", DataType::Int32, false),
                Field::new("grouping", DataType::Int32, false),
            ])
            .with_metadata(HashMap::from([
                (META_KEY_SCHEMA_VERSION.to_string(), PHA_SCHEMA_V1.to_string()),
                (META_KEY_PHA.to_string(), header),
            ])),
        );

        let n = self.n_channels() as i64;
        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(Int64Array::from((0..n).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(self.counts.iter().map(|&c| c as i64).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(self.background.clone())),
            Arc::new(Float64Array::from(self.background_error.clone())),
            Arc::new(Int32Array::from(self.quality.clone())),
            Arc::new(Int32Array::from(self.grouping.clone())),
        ];
        RecordBatch::try_new(schema, arrays)
            .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))
    }

    /// Rebuild a spectrum from [`Self::to_record_batch`] output.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let schema = batch.schema();
        let meta = schema.metadata();
        if meta.get(META_KEY_SCHEMA_VERSION).map(String::as_str) != Some(PHA_SCHEMA_V1) {
            return Err(Error::Data(format!("not a {PHA_SCHEMA_V1} record batch")));
        }
        let header: PhaHeader = meta
            .get(META_KEY_PHA)
            .ok_or_else(|| Error::Data(format!("missing {META_KEY_PHA} metadata")))
            .and_then(|json| {
                serde_json::from_str(json)
                    .map_err(|e| Error::Data(format!("invalid {META_KEY_PHA} metadata: {e}")))
            })?;

        let column = |name: &str, ty: DataType| -> Result<Arc<dyn Array>> {
            let col = batch
                .column_by_name(name)
                .ok_or_else(|| Error::Data(format!("missing column '{name}'")))?;
            if col.data_type() != &ty || col.null_count() > 0 {
                return Err(Error::Data(format!("column '{name}' must be non-null {ty:?}")));
            }
            Ok(Arc::clone(col))
        };

        let counts = column("counts", DataType::Int64)?
            .as_primitive::<Int64Type>()
            .values()
            .iter()
            .map(|&c| u64::try_from(c).map_err(|_| Error::Data(format!("negative counts {c}"))))
            .collect::<Result<Vec<_>>>()?;
        let spectrum = Self {
            detector: header.detector,
            intervals: header.intervals,
            exposure: header.exposure,
            counts,
            background: column("background", DataType::Float64)?
                .as_primitive::<Float64Type>()
                .values()
                .to_vec(),
            background_error: column("background_error", DataType::Float64)?
                .as_primitive::<Float64Type>()
                .values()
                .to_vec(),
            quality: column("quality", DataType::Int32)?.as_primitive::<Int32Type>().values().to_vec(),
            grouping: column("grouping", DataType::Int32)?.as_primitive::<Int32Type>().values().to_vec(),
            background_order: header.background_order,
            ebounds: header.ebounds,
        };
        spectrum.validate()?;
        Ok(spectrum)
    }
}

/// Write one spectrum to a Parquet file.
pub fn write_pha_parquet(spectrum: &PhaSpectrum, path: &Path) -> Result<()> {
    let batch = spectrum.to_record_batch()?;
    let file = std::fs::File::create(path)?;
    write_batch(file, &batch)
}

/// Read one spectrum from a Parquet file.
pub fn read_pha_parquet(path: &Path) -> Result<PhaSpectrum> {
    let file = std::fs::File::open(path)?;
    PhaSpectrum::from_record_batch(&read_batches(file)?)
}

/// Path of the `index`-th spectrum written under `basename`.
pub fn pha_path(basename: &Path, index: usize) -> PathBuf {
    let mut name = basename.as_os_str().to_owned();
    name.push(format!("_{index}.{PHA_SUFFIX}"));
    PathBuf::from(name)
}

/// Write `spectra` as `<basename>_<i>.pha.parquet`.
///
/// Nothing is written if any target exists and `overwrite` is false.
pub fn write_pha_series(
    spectra: &[PhaSpectrum],
    basename: &Path,
    overwrite: bool,
) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = (0..spectra.len()).map(|i| pha_path(basename, i)).collect();
    if !overwrite && let Some(existing) = paths.iter().find(|p| p.exists()) {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} exists; enable overwrite to replace it", existing.display()),
        )));
    }
    for (spectrum, path) in spectra.iter().zip(&paths) {
        write_pha_parquet(spectrum, path)?;
        log::debug!("wrote {}", path.display());
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum() -> PhaSpectrum {
        PhaSpectrum {
            detector: "n3".into(),
            intervals: TimeIntervalSet::from_spec("0-1.5").unwrap(),
            exposure: 1.25,
            counts: vec![3, 0, 7],
            background: vec![1.25, 0.5, 2.0],
            background_error: vec![0.1, 0.05, 0.2],
            quality: vec![QUALITY_GOOD, QUALITY_EXCLUDED, QUALITY_GOOD],
            grouping: vec![1, 1, 1],
            background_order: 2,
            ebounds: Some(EnergyBounds::from_edges(&[8.0, 20.0, 40.0, 900.0]).unwrap()),
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pha.parquet");
        let s = spectrum();
        write_pha_parquet(&s, &path).unwrap();
        assert_eq!(read_pha_parquet(&path).unwrap(), s);
    }

    #[test]
    fn test_mask_and_totals() {
        let s = spectrum();
        assert_eq!(s.channel_mask(), vec![true, false, true]);
        assert_eq!(s.total_counts(), 10);
        assert!(!s.is_poisson_background());
        assert_eq!(s.tstart(), 0.0);
        assert_eq!(s.tstop(), 1.5);
    }

    #[test]
    fn test_series_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("grb");
        let spectra = vec![spectrum(), spectrum()];
        let paths = write_pha_series(&spectra, &base, false).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("grb_1.pha.parquet"));
        let err = write_pha_series(&spectra, &base, false).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists));
        write_pha_series(&spectra, &base, true).unwrap();
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut s = spectrum();
        s.quality.pop();
        assert!(s.to_record_batch().is_err());
    }
}
