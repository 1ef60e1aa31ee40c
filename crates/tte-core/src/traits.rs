//! Core traits for tte
//!
//! The plugin contract is what external fit and sampling engines consume: they
//! only ever see [`Plugin`] trait objects and a shared [`SpectralModel`]. A plugin
//! owns all of its data-side state, so evaluating many plugins in parallel never
//! touches shared mutable state.

use crate::types::{NuisanceParameters, Tag};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Photon spectral model supplied by the caller.
pub trait SpectralModel: Send + Sync {
    /// Differential photon flux at `energy` (keV), in photons / cm² / s / keV.
    fn differential_flux(&self, energy: f64) -> f64;

    /// Model name, for diagnostics.
    fn name(&self) -> &str {
        "model"
    }
}

/// Likelihood plugin contract, implemented once per detector type.
pub trait Plugin: Send {
    /// Plugin (detector) name; a valid identifier, never `total`.
    fn name(&self) -> &str;

    /// Parameters local to this plugin.
    fn nuisance_parameters(&self) -> &NuisanceParameters;

    /// Replace the nuisance-parameter map wholesale.
    fn update_nuisance_parameters(&mut self, params: NuisanceParameters) -> Result<()>;

    /// Store the model used by later likelihood evaluations. Nothing is evaluated here.
    fn set_model(&mut self, model: Arc<dyn SpectralModel>) -> Result<()>;

    /// Log-likelihood for the current model and nuisance parameters.
    fn log_likelihood(&mut self) -> Result<f64>;

    /// Maximise the log-likelihood over this plugin's free nuisance parameters with the
    /// shared model held fixed; returns the resulting log-likelihood.
    fn inner_fit(&mut self) -> Result<f64>;

    /// Current tag.
    fn tag(&self) -> &Tag;

    /// Replace the tag.
    fn set_tag(&mut self, tag: Tag);

    /// Number of data points entering the likelihood (for information criteria).
    fn n_data_points(&self) -> usize {
        log::warn!(
            "plugin '{}' does not report its number of data points; AIC/BIC will be unreliable",
            self.name()
        );
        1
    }
}

/// Reject names that are not identifiers, and the reserved name `total`.
pub fn validate_plugin_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_ident = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid_ident {
        return Err(Error::Validation(format!(
            "plugin name '{name}' is not a valid identifier (letters, digits, '_'; no leading digit)"
        )));
    }
    if name.eq_ignore_ascii_case("total") {
        return Err(Error::Validation("'total' is reserved and cannot be used as a plugin name".into()));
    }
    Ok(())
}

/// A set of plugins with unique, validated names: what a joint fit iterates over.
pub struct DataList {
    plugins: Vec<Box<dyn Plugin>>,
}

impl DataList {
    /// Register plugins; every name is validated and must be unique.
    pub fn new(plugins: Vec<Box<dyn Plugin>>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for p in &plugins {
            validate_plugin_name(p.name())?;
            if !seen.insert(p.name().to_string()) {
                return Err(Error::Validation(format!("duplicate plugin name '{}'", p.name())));
            }
        }
        Ok(Self { plugins })
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Mutable access to one plugin by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Plugin + 'static)> {
        self.plugins.iter_mut().find(|p| p.name() == name).map(|p| p.as_mut())
    }

    /// Hand the same model to every plugin.
    pub fn set_model(&mut self, model: Arc<dyn SpectralModel>) -> Result<()> {
        for p in &mut self.plugins {
            p.set_model(Arc::clone(&model))?;
        }
        Ok(())
    }

    /// Sum of per-plugin log-likelihoods.
    pub fn log_likelihood(&mut self) -> Result<f64> {
        let mut total = 0.0;
        for p in &mut self.plugins {
            total += p.log_likelihood()?;
        }
        Ok(total)
    }

    /// Sum of per-plugin profiled log-likelihoods (each plugin runs its `inner_fit`).
    pub fn profile_log_likelihood(&mut self) -> Result<f64> {
        let mut total = 0.0;
        for p in &mut self.plugins {
            total += p.inner_fit()?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyPlugin {
        name: String,
        params: NuisanceParameters,
        tag: Tag,
        model: Option<Arc<dyn SpectralModel>>,
    }

    impl DummyPlugin {
        fn new(name: &str) -> Self {
            Self { name: name.into(), params: NuisanceParameters::new(), tag: Tag::None, model: None }
        }
    }

    impl Plugin for DummyPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn nuisance_parameters(&self) -> &NuisanceParameters {
            &self.params
        }

        fn update_nuisance_parameters(&mut self, params: NuisanceParameters) -> Result<()> {
            self.params = params;
            Ok(())
        }

        fn set_model(&mut self, model: Arc<dyn SpectralModel>) -> Result<()> {
            self.model = Some(model);
            Ok(())
        }

        fn log_likelihood(&mut self) -> Result<f64> {
            let m = self.model.as_ref().ok_or_else(|| Error::NotComputed("model".into()))?;
            Ok(-m.differential_flux(1.0))
        }

        fn inner_fit(&mut self) -> Result<f64> {
            self.log_likelihood()
        }

        fn tag(&self) -> &Tag {
            &self.tag
        }

        fn set_tag(&mut self, tag: Tag) {
            self.tag = tag;
        }
    }

    struct Flat;

    impl SpectralModel for Flat {
        fn differential_flux(&self, _energy: f64) -> f64 {
            2.0
        }
    }

    #[test]
    fn test_plugin_names() {
        assert!(validate_plugin_name("NAI3").is_ok());
        assert!(validate_plugin_name("_b0").is_ok());
        assert!(matches!(validate_plugin_name("total"), Err(Error::Validation(_))));
        assert!(matches!(validate_plugin_name("Total"), Err(Error::Validation(_))));
        assert!(matches!(validate_plugin_name("3nai"), Err(Error::Validation(_))));
        assert!(matches!(validate_plugin_name("na i"), Err(Error::Validation(_))));
        assert!(matches!(validate_plugin_name(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_data_list_sums_plugins() {
        let plugins: Vec<Box<dyn Plugin>> =
            vec![Box::new(DummyPlugin::new("a")), Box::new(DummyPlugin::new("b"))];
        let mut list = DataList::new(plugins).unwrap();
        assert_eq!(list.names(), vec!["a", "b"]);
        list.set_model(Arc::new(Flat)).unwrap();
        assert_eq!(list.log_likelihood().unwrap(), -4.0);
        assert_eq!(list.profile_log_likelihood().unwrap(), -4.0);
        assert!(list.get_mut("a").is_some());
    }

    #[test]
    fn test_data_list_rejects_duplicates_and_reserved() {
        let dup: Vec<Box<dyn Plugin>> =
            vec![Box::new(DummyPlugin::new("a")), Box::new(DummyPlugin::new("a"))];
        assert!(DataList::new(dup).is_err());
        let reserved: Vec<Box<dyn Plugin>> = vec![Box::new(DummyPlugin::new("total"))];
        assert!(DataList::new(reserved).is_err());
    }

    #[test]
    fn test_default_data_points() {
        let p = DummyPlugin::new("x");
        assert_eq!(p.n_data_points(), 1);
    }
}
