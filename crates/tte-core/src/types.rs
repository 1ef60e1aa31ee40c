//! Common data types shared by plugins: tags and nuisance parameters.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag binding a plugin to a value (or range) of an independent variable, e.g. time.
///
/// A fit engine uses the tag to evaluate (or average) a model that depends on the
/// independent variable at the plugin's own value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tag {
    /// Untagged.
    #[default]
    None,
    /// Evaluate the model at a single value.
    At {
        /// Independent variable name.
        variable: String,
        /// Value of the variable.
        value: f64,
    },
    /// Average the model over `[start, end]`.
    Range {
        /// Independent variable name.
        variable: String,
        /// Range start.
        start: f64,
        /// Range end.
        end: f64,
    },
}

impl Tag {
    /// Tag at a single value.
    pub fn at(variable: impl Into<String>, value: f64) -> Self {
        Tag::At { variable: variable.into(), value }
    }

    /// Tag over a range; `start` must not exceed `end`.
    pub fn range(variable: impl Into<String>, start: f64, end: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) || start > end {
            return Err(Error::Validation(format!(
                "tag range requires finite start <= end, got ({start}, {end})"
            )));
        }
        Ok(Tag::Range { variable: variable.into(), start, end })
    }

    /// Name of the tagged variable, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Tag::None => None,
            Tag::At { variable, .. } | Tag::Range { variable, .. } => Some(variable),
        }
    }
}

/// A bounded parameter local to one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuisanceParameter {
    /// Parameter name (key in [`NuisanceParameters`]).
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Bounds `(low, high)`.
    pub bounds: (f64, f64),
    /// Whether `inner_fit` may move this parameter.
    #[serde(default)]
    pub free: bool,
}

impl NuisanceParameter {
    /// A fixed parameter.
    pub fn new(name: impl Into<String>, value: f64, bounds: (f64, f64)) -> Result<Self> {
        let p = Self { name: name.into(), value, bounds, free: false };
        p.validate()?;
        Ok(p)
    }

    /// Same parameter, free to vary in `inner_fit`.
    pub fn freed(mut self) -> Self {
        self.free = true;
        self
    }

    /// Check bounds ordering and that the value lies inside them.
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.bounds;
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(Error::Validation(format!(
                "parameter '{}' has invalid bounds {:?}",
                self.name, self.bounds
            )));
        }
        if !self.value.is_finite() || self.value < lo || self.value > hi {
            return Err(Error::Validation(format!(
                "parameter '{}' value {} outside bounds {:?}",
                self.name, self.value, self.bounds
            )));
        }
        Ok(())
    }
}

/// Ordered map `name -> NuisanceParameter`, validated on construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NuisanceParameters {
    params: BTreeMap<String, NuisanceParameter>,
}

impl NuisanceParameters {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter under its own name; rejects duplicates.
    pub fn insert(&mut self, param: NuisanceParameter) -> Result<()> {
        param.validate()?;
        if self.params.contains_key(&param.name) {
            return Err(Error::Validation(format!("duplicate nuisance parameter '{}'", param.name)));
        }
        self.params.insert(param.name.clone(), param);
        Ok(())
    }

    /// Look up a parameter.
    pub fn get(&self, name: &str) -> Option<&NuisanceParameter> {
        self.params.get(name)
    }

    /// Set the value of an existing parameter (must stay inside its bounds).
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        let p = self
            .params
            .get_mut(name)
            .ok_or_else(|| Error::Validation(format!("unknown nuisance parameter '{name}'")))?;
        let (lo, hi) = p.bounds;
        if !value.is_finite() || value < lo || value > hi {
            return Err(Error::Validation(format!(
                "value {value} outside bounds {:?} for '{name}'",
                p.bounds
            )));
        }
        p.value = value;
        Ok(())
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = &NuisanceParameter> {
        self.params.values()
    }

    /// Names of parameters flagged free, in name order.
    pub fn free_names(&self) -> Vec<String> {
        self.params.values().filter(|p| p.free).map(|p| p.name.clone()).collect()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl TryFrom<BTreeMap<String, NuisanceParameter>> for NuisanceParameters {
    type Error = Error;

    fn try_from(map: BTreeMap<String, NuisanceParameter>) -> Result<Self> {
        for (key, p) in &map {
            if key != &p.name {
                return Err(Error::Validation(format!(
                    "nuisance parameter key '{key}' does not match parameter name '{}'",
                    p.name
                )));
            }
            p.validate()?;
        }
        Ok(Self { params: map })
    }
}

impl TryFrom<serde_json::Value> for NuisanceParameters {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Validation(
                "nuisance parameters must be a mapping of name -> parameter".into(),
            ));
        }
        let map: BTreeMap<String, NuisanceParameter> = serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("invalid nuisance parameter map: {e}")))?;
        Self::try_from(map)
    }
}

impl<'de> Deserialize<'de> for NuisanceParameters {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        let map = BTreeMap::<String, NuisanceParameter>::deserialize(de)?;
        Self::try_from(map).map_err(serde::de::Error::custom)
    }
}
