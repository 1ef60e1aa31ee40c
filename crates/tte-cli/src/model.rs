//! Built-in photon spectra for evaluating likelihoods from the command line.

use serde::Deserialize;
use tte_core::SpectralModel;

fn default_pivot() -> f64 {
    100.0
}

/// Spectral model read from JSON, e.g. `{"type": "powerlaw", "k": 0.01, "index": -1.5}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ModelSpec {
    /// `K (E / piv)^index`
    Powerlaw {
        /// Normalisation at the pivot (ph / cm² / s / keV).
        k: f64,
        /// Photon index.
        index: f64,
        /// Pivot energy (keV).
        #[serde(default = "default_pivot")]
        piv: f64,
    },
    /// `K (E / piv)^index exp(-E / xc)`
    CutoffPowerlaw {
        /// Normalisation at the pivot (ph / cm² / s / keV).
        k: f64,
        /// Photon index.
        index: f64,
        /// Cutoff energy (keV).
        xc: f64,
        /// Pivot energy (keV).
        #[serde(default = "default_pivot")]
        piv: f64,
    },
}

impl SpectralModel for ModelSpec {
    fn differential_flux(&self, energy: f64) -> f64 {
        match *self {
            Self::Powerlaw { k, index, piv } => k * (energy / piv).powf(index),
            Self::CutoffPowerlaw { k, index, xc, piv } => {
                k * (energy / piv).powf(index) * (-energy / xc).exp()
            }
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Powerlaw { .. } => "powerlaw",
            Self::CutoffPowerlaw { .. } => "cutoff_powerlaw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_evaluate() {
        let m: ModelSpec = serde_json::from_str(r#"{"type": "powerlaw", "k": 2.0, "index": -2}"#).unwrap();
        assert_eq!(m.differential_flux(200.0), 0.5);
        let c: ModelSpec =
            serde_json::from_str(r#"{"type": "cutoff_powerlaw", "k": 1.0, "index": 0, "xc": 100, "piv": 50}"#)
                .unwrap();
        assert!((c.differential_flux(100.0) - (-1f64).exp()).abs() < 1e-12);
        assert!(serde_json::from_str::<ModelSpec>(r#"{"type": "band", "k": 1.0}"#).is_err());
    }
}
