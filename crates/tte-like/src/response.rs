//! Detector response: maps photon flux in true-energy bins to channel count rates.
//!
//! Stored as JSON:
//!
//! ```json
//! {
//!   "energy_edges": [10.0, 20.0, 40.0],
//!   "ebounds": { "emin": [8.0, 25.0], "emax": [25.0, 50.0] },
//!   "matrix": [[90.0, 5.0], [10.0, 95.0]]
//! }
//! ```
//!
//! `matrix[c][i]` is the effective area (cm²) with which photons in true-energy bin
//! `i` are recorded in channel `c`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tte_core::{Error, Result, SpectralModel};
use tte_events::EnergyBounds;

/// Response matrix with its true-energy grid and channel bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseFile", into = "ResponseFile")]
pub struct ResponseMatrix {
    energy_edges: Vec<f64>,
    ebounds: EnergyBounds,
    matrix: DMatrix<f64>,
}

/// On-disk layout: the matrix as rows of channels.
#[derive(Serialize, Deserialize)]
struct ResponseFile {
    energy_edges: Vec<f64>,
    ebounds: EnergyBounds,
    matrix: Vec<Vec<f64>>,
}

impl ResponseMatrix {
    /// Build and validate a response.
    ///
    /// `matrix` is `n_channels × n_energies` with `n_energies = energy_edges.len() - 1`.
    pub fn new(energy_edges: Vec<f64>, ebounds: EnergyBounds, matrix: DMatrix<f64>) -> Result<Self> {
        if energy_edges.len() < 2 {
            return Err(Error::Validation("response needs at least two true-energy edges".into()));
        }
        if energy_edges.iter().any(|e| !e.is_finite() || *e <= 0.0)
            || energy_edges.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(Error::Validation(
                "true-energy edges must be positive and strictly increasing".into(),
            ));
        }
        let (rows, cols) = matrix.shape();
        if rows != ebounds.n_channels() || cols != energy_edges.len() - 1 {
            return Err(Error::Validation(format!(
                "response matrix is {rows}×{cols}, expected {}×{}",
                ebounds.n_channels(),
                energy_edges.len() - 1
            )));
        }
        if matrix.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::Validation("response matrix entries must be finite and >= 0".into()));
        }
        Ok(Self { energy_edges, ebounds, matrix })
    }

    /// Perfect-resolution response: true-energy bins are the channels, each with `area`.
    pub fn diagonal(channel_edges: &[f64], area: f64) -> Result<Self> {
        let ebounds = EnergyBounds::from_edges(channel_edges)?;
        let n = ebounds.n_channels();
        Self::new(channel_edges.to_vec(), ebounds, DMatrix::from_diagonal_element(n, n, area))
    }

    /// Read a JSON response file.
    pub fn from_json(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Write as JSON.
    pub fn to_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Number of detector channels.
    pub fn n_channels(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of true-energy bins.
    pub fn n_energies(&self) -> usize {
        self.matrix.ncols()
    }

    /// True-energy edges (keV).
    pub fn energy_edges(&self) -> &[f64] {
        &self.energy_edges
    }

    /// Channel energy bounds.
    pub fn ebounds(&self) -> &EnergyBounds {
        &self.ebounds
    }

    /// The `n_channels × n_energies` matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Photon flux integrated over each true-energy bin (photons / cm² / s).
    ///
    /// Simpson's rule on the bin edges and midpoint.
    pub fn integrated_flux(&self, model: &dyn SpectralModel) -> Result<DVector<f64>> {
        let fluxes = self.energy_edges.windows(2).enumerate().map(|(i, w)| {
            let (lo, hi) = (w[0], w[1]);
            let mid = 0.5 * (lo + hi);
            let f = (hi - lo) / 6.0
                * (model.differential_flux(lo)
                    + 4.0 * model.differential_flux(mid)
                    + model.differential_flux(hi));
            if f.is_finite() && f >= 0.0 {
                Ok(f)
            } else {
                Err(Error::Computation(format!(
                    "model '{}' gives flux {f} in true-energy bin {i} ({lo}-{hi} keV)",
                    model.name()
                )))
            }
        });
        Ok(DVector::from_iterator(self.n_energies(), fluxes.collect::<Result<Vec<_>>>()?))
    }

    /// Expected count rate per channel (counts / s).
    pub fn fold(&self, model: &dyn SpectralModel) -> Result<Vec<f64>> {
        let rates = &self.matrix * self.integrated_flux(model)?;
        Ok(rates.iter().copied().collect())
    }
}

impl TryFrom<ResponseFile> for ResponseMatrix {
    type Error = Error;

    fn try_from(file: ResponseFile) -> Result<Self> {
        let rows = file.matrix.len();
        let cols = file.matrix.first().map_or(0, Vec::len);
        if file.matrix.iter().any(|row| row.len() != cols) {
            return Err(Error::Validation("response matrix rows have unequal lengths".into()));
        }
        let matrix = DMatrix::from_row_iterator(rows, cols, file.matrix.into_iter().flatten());
        Self::new(file.energy_edges, file.ebounds, matrix)
    }
}

impl From<ResponseMatrix> for ResponseFile {
    fn from(r: ResponseMatrix) -> Self {
        let matrix = r.matrix.row_iter().map(|row| row.iter().copied().collect()).collect();
        Self { energy_edges: r.energy_edges, ebounds: r.ebounds, matrix }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct PowerLaw {
        k: f64,
        index: f64,
    }

    impl SpectralModel for PowerLaw {
        fn differential_flux(&self, energy: f64) -> f64 {
            self.k * (energy / 100.0).powf(self.index)
        }
    }

    #[test]
    fn test_flat_spectrum_folds_exactly() {
        let response = ResponseMatrix::diagonal(&[10.0, 20.0, 50.0, 100.0], 2.0).unwrap();
        let rates = response.fold(&PowerLaw { k: 0.5, index: 0.0 }).unwrap();
        assert_relative_eq!(rates[0], 0.5 * 10.0 * 2.0, max_relative = 1e-12);
        assert_relative_eq!(rates[1], 0.5 * 30.0 * 2.0, max_relative = 1e-12);
        assert_relative_eq!(rates[2], 0.5 * 50.0 * 2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_simpson_integrates_power_law() {
        let response = ResponseMatrix::diagonal(&[100.0, 110.0], 1.0).unwrap();
        let flux = response.integrated_flux(&PowerLaw { k: 1.0, index: -2.0 }).unwrap();
        // ∫ (E/100)^-2 dE from 100 to 110 = 100² (1/100 − 1/110)
        assert_relative_eq!(flux[0], 1e4 * (0.01 - 1.0 / 110.0), max_relative = 1e-5);
    }

    #[test]
    fn test_off_diagonal_redistribution() {
        let ebounds = EnergyBounds::from_edges(&[10.0, 20.0, 30.0]).unwrap();
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.0, 0.5]);
        let response = ResponseMatrix::new(vec![10.0, 20.0, 30.0], ebounds, matrix).unwrap();
        let rates = response.fold(&PowerLaw { k: 1.0, index: 0.0 }).unwrap();
        assert_relative_eq!(rates[0], 15.0, max_relative = 1e-12);
        assert_relative_eq!(rates[1], 5.0, max_relative = 1e-12);
    }

    #[test]
    fn test_negative_model_is_computation_error() {
        let response = ResponseMatrix::diagonal(&[10.0, 20.0], 1.0).unwrap();
        let err = response.fold(&PowerLaw { k: -1.0, index: 0.0 }).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
        let err = response.fold(&PowerLaw { k: f64::NAN, index: 0.0 }).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_shape_and_values_validated() {
        let ebounds = EnergyBounds::from_edges(&[10.0, 20.0, 30.0]).unwrap();
        let wrong_shape = DMatrix::from_element(3, 2, 1.0);
        assert!(ResponseMatrix::new(vec![10.0, 20.0, 30.0], ebounds.clone(), wrong_shape).is_err());
        let negative = DMatrix::from_element(2, 2, -1.0);
        assert!(ResponseMatrix::new(vec![10.0, 20.0, 30.0], ebounds.clone(), negative).is_err());
        let unsorted = DMatrix::from_element(2, 2, 1.0);
        assert!(ResponseMatrix::new(vec![30.0, 20.0, 10.0], ebounds, unsorted).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let ebounds = EnergyBounds::from_edges(&[8.0, 25.0, 50.0]).unwrap();
        let matrix = DMatrix::from_row_slice(2, 2, &[90.0, 5.0, 10.0, 95.0]);
        let response = ResponseMatrix::new(vec![10.0, 20.0, 40.0], ebounds, matrix).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rsp.json");
        response.to_json(&path).unwrap();
        let back = ResponseMatrix::from_json(&path).unwrap();
        assert_eq!(back, response);
        assert_eq!(back.matrix()[(0, 1)], 5.0);
    }
}
