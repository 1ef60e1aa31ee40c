//! Energy channels: channel energy bounds and active-channel selections.

use serde::{Deserialize, Serialize};
use tte_core::{Error, Result};

/// Energy bounds `[emin, emax)` (keV) of each detector channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyBounds {
    emin: Vec<f64>,
    emax: Vec<f64>,
}

impl EnergyBounds {
    /// Channel bounds; both vectors have one entry per channel and `emin < emax`.
    pub fn new(emin: Vec<f64>, emax: Vec<f64>) -> Result<Self> {
        if emin.len() != emax.len() || emin.is_empty() {
            return Err(Error::Validation(format!(
                "energy bounds need equal, non-zero lengths (emin={}, emax={})",
                emin.len(),
                emax.len()
            )));
        }
        for (c, (&lo, &hi)) in emin.iter().zip(&emax).enumerate() {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(Error::Validation(format!(
                    "channel {c} has invalid energy bounds ({lo}, {hi})"
                )));
            }
        }
        Ok(Self { emin, emax })
    }

    /// Contiguous channels from consecutive edges (`edges.len() == n_channels + 1`).
    pub fn from_edges(edges: &[f64]) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Validation("need at least two channel edges".into()));
        }
        Self::new(edges[..edges.len() - 1].to_vec(), edges[1..].to_vec())
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.emin.len()
    }

    /// Lower bounds.
    pub fn emin(&self) -> &[f64] {
        &self.emin
    }

    /// Upper bounds.
    pub fn emax(&self) -> &[f64] {
        &self.emax
    }

    /// Channels whose energy range intersects `[lo, hi]`.
    pub fn channels_overlapping(&self, lo: f64, hi: f64) -> impl Iterator<Item = usize> + '_ {
        (0..self.emin.len()).filter(move |&c| self.emin[c] < hi && self.emax[c] > lo)
    }
}

/// The set of channels that enter likelihood evaluation and binning.
///
/// Channels outside the selection stay in the event store untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSelection {
    mask: Vec<bool>,
}

impl ChannelSelection {
    /// Every channel selected.
    pub fn all(n_channels: usize) -> Self {
        Self { mask: vec![true; n_channels] }
    }

    /// Select the given channel indices.
    pub fn from_channels(
        n_channels: usize,
        channels: impl IntoIterator<Item = usize>,
    ) -> Result<Self> {
        let mut mask = vec![false; n_channels];
        for c in channels {
            if c >= n_channels {
                return Err(Error::Validation(format!(
                    "channel {c} out of range (detector has {n_channels} channels)"
                )));
            }
            mask[c] = true;
        }
        Ok(Self { mask })
    }

    /// Parse a human-readable selection.
    ///
    /// Comma-separated items, each one of:
    /// - `all`
    /// - `cN-cM`: channel indices `N..=M`
    /// - `lo-hi`: channels whose energy range intersects `[lo, hi]` keV (needs `ebounds`)
    pub fn parse(spec: &str, n_channels: usize, ebounds: Option<&EnergyBounds>) -> Result<Self> {
        let mut mask = vec![false; n_channels];
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if item.eq_ignore_ascii_case("all") {
                mask.iter_mut().for_each(|m| *m = true);
                continue;
            }
            let (lhs, rhs) = item.split_once('-').ok_or_else(|| {
                Error::Configuration(format!("cannot parse channel selection '{item}'"))
            })?;
            let (lhs, rhs) = (lhs.trim(), rhs.trim());

            if let (Some(a), Some(b)) = (strip_channel_prefix(lhs), strip_channel_prefix(rhs)) {
                let lo = parse_index(a, item)?;
                let hi = parse_index(b, item)?;
                if lo > hi || hi >= n_channels {
                    return Err(Error::Configuration(format!(
                        "channel range '{item}' invalid for {n_channels} channels"
                    )));
                }
                mask[lo..=hi].iter_mut().for_each(|m| *m = true);
                continue;
            }

            let ebounds = ebounds.ok_or_else(|| {
                Error::Configuration(format!(
                    "energy selection '{item}' requires channel energy bounds"
                ))
            })?;
            if ebounds.n_channels() != n_channels {
                return Err(Error::Validation(format!(
                    "energy bounds describe {} channels, detector has {n_channels}",
                    ebounds.n_channels()
                )));
            }
            let lo = parse_energy(lhs, item)?;
            let hi = parse_energy(rhs, item)?;
            if lo >= hi {
                return Err(Error::Configuration(format!("energy range '{item}' is empty")));
            }
            for c in ebounds.channels_overlapping(lo, hi) {
                mask[c] = true;
            }
        }

        if !mask.iter().any(|&m| m) {
            return Err(Error::Configuration(format!("selection '{spec}' selects no channel")));
        }
        Ok(Self { mask })
    }

    /// Whether channel `c` is selected.
    #[inline]
    pub fn contains(&self, c: usize) -> bool {
        self.mask.get(c).copied().unwrap_or(false)
    }

    /// Selected channel indices in ascending order.
    pub fn indices(&self) -> Vec<usize> {
        self.mask.iter().enumerate().filter(|(_, m)| **m).map(|(c, _)| c).collect()
    }

    /// Number of selected channels.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    /// Number of channels the selection refers to.
    pub fn n_channels(&self) -> usize {
        self.mask.len()
    }

    /// Per-channel mask.
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }
}

fn strip_channel_prefix(s: &str) -> Option<&str> {
    s.strip_prefix('c').or_else(|| s.strip_prefix('C'))
}

fn parse_index(s: &str, item: &str) -> Result<usize> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| Error::Configuration(format!("bad channel index '{s}' in '{item}'")))
}

fn parse_energy(s: &str, item: &str) -> Result<f64> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(Error::Configuration(format!("bad energy '{s}' in '{item}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ebounds() -> EnergyBounds {
        // 0: 5-10, 1: 10-20, 2: 20-40, 3: 40-80, 4: 80-160
        EnergyBounds::from_edges(&[5.0, 10.0, 20.0, 40.0, 80.0, 160.0]).unwrap()
    }

    #[test]
    fn test_energy_selection_overlap() {
        let sel = ChannelSelection::parse("8-30", 5, Some(&ebounds())).unwrap();
        assert_eq!(sel.indices(), vec![0, 1, 2]);
    }

    #[test]
    fn test_channel_range_selection() {
        let sel = ChannelSelection::parse("c1-c3", 5, None).unwrap();
        assert_eq!(sel.indices(), vec![1, 2, 3]);
        let sel = ChannelSelection::parse("c0-c0, 100-200", 5, Some(&ebounds())).unwrap();
        assert_eq!(sel.indices(), vec![0, 4]);
    }

    #[test]
    fn test_all_and_errors() {
        assert_eq!(ChannelSelection::parse("all", 5, None).unwrap().count(), 5);
        assert!(matches!(ChannelSelection::parse("8-30", 5, None), Err(Error::Configuration(_))));
        assert!(matches!(ChannelSelection::parse("c3-c9", 5, None), Err(Error::Configuration(_))));
        assert!(matches!(
            ChannelSelection::parse("1000-2000", 5, Some(&ebounds())),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(ChannelSelection::parse("junk", 5, None), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_from_channels_range_checked() {
        assert!(ChannelSelection::from_channels(3, [0, 2]).is_ok());
        assert!(ChannelSelection::from_channels(3, [3]).is_err());
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(EnergyBounds::new(vec![1.0], vec![1.0]).is_err());
        assert!(EnergyBounds::new(vec![1.0, 2.0], vec![2.0]).is_err());
    }
}
