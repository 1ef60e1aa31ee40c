//! Fixed-width bins.

use tte_core::{Error, Result, TimeInterval};

/// Upper bound on the number of bins a single request may produce.
pub const MAX_CONSTANT_BINS: usize = 10_000_000;

/// Consecutive bins of width `dt` starting at `start`.
///
/// Only whole bins are produced; a trailing remainder shorter than `dt` is dropped.
/// Floating-point drift never pushes the last stop past `stop`.
pub fn constant_edges(start: f64, stop: f64, dt: f64) -> Result<Vec<TimeInterval>> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(Error::Configuration(format!("constant binning needs dt > 0, got {dt}")));
    }
    if !(start.is_finite() && stop.is_finite() && start < stop) {
        return Err(Error::Configuration(format!("invalid binning range [{start}, {stop}]")));
    }

    let n_float = ((stop - start) / dt + 1e-9).floor();
    if n_float > MAX_CONSTANT_BINS as f64 {
        return Err(Error::Configuration(format!(
            "dt = {dt} over [{start}, {stop}] asks for {n_float:e} bins (limit {MAX_CONSTANT_BINS})"
        )));
    }
    let n = n_float as usize;
    let mut bins = Vec::with_capacity(n);
    for i in 0..n {
        let lo = start + i as f64 * dt;
        let hi = if i + 1 == n { (start + n as f64 * dt).min(stop) } else { start + (i + 1) as f64 * dt };
        bins.push(TimeInterval::new(lo, hi)?);
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_ten_one_second_bins() {
        let bins = constant_edges(0.0, 10.0, 1.0).unwrap();
        assert_eq!(bins.len(), 10);
        assert_relative_eq!(bins[0].start(), 0.0);
        assert_relative_eq!(bins[9].stop(), 10.0);
    }

    #[test]
    fn test_partial_bin_dropped() {
        let bins = constant_edges(0.0, 10.5, 2.0).unwrap();
        assert_eq!(bins.len(), 5);
        assert_relative_eq!(bins[4].stop(), 10.0);
    }

    #[test]
    fn test_width_larger_than_range_gives_no_bins() {
        assert!(constant_edges(0.0, 1.0, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_drift_does_not_overshoot() {
        let bins = constant_edges(0.0, 1.0, 0.1).unwrap();
        assert_eq!(bins.len(), 10);
        assert!(bins[9].stop() <= 1.0);
    }

    #[test]
    fn test_tiny_dt_rejected() {
        let err = constant_edges(0.0, 10.0, 1e-300).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err:?}");
        assert_eq!(constant_edges(0.0, 1.0, 1e-6).unwrap().len(), 1_000_000);
    }

    proptest! {
        #[test]
        fn prop_bins_contiguous_and_bounded(
            start in -100.0f64..100.0,
            len in 0.5f64..500.0,
            dt in 0.05f64..10.0,
        ) {
            let stop = start + len;
            let bins = constant_edges(start, stop, dt).unwrap();
            let n = bins.len() as f64;
            prop_assert!(n * dt <= len + 1e-8 * dt);
            prop_assert!((n + 1.0) * dt > len);
            for b in &bins {
                prop_assert!((b.stop() - b.start() - dt).abs() < 1e-8 * dt);
            }
            for pair in bins.windows(2) {
                prop_assert_eq!(pair[0].stop(), pair[1].start());
            }
            if let Some(last) = bins.last() {
                prop_assert!(last.stop() <= stop);
                prop_assert!(bins[0].start() == start);
            }
        }
    }
}
