//! Significance-driven bins.

use super::BackgroundCounts;
use tte_core::{Error, Result, TimeInterval};
use tte_prob::significance::significance;

/// Grow bins event by event until each reaches `sigma` over the background.
///
/// `times` must be sorted and restricted to `[start, stop)`. A bin closes at the
/// event whose inclusion brings it to the target; its stop is placed halfway to the
/// next event (or at `stop` after the last event) so the closing event stays inside
/// the half-open bin, and the next bin starts there. Events left over after the last
/// closed bin never reach the target and are not binned.
pub fn significance_edges(
    times: &[f64],
    start: f64,
    stop: f64,
    sigma: f64,
    background: &dyn BackgroundCounts,
) -> Result<Vec<TimeInterval>> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(Error::Configuration(format!("significance binning needs sigma > 0, got {sigma}")));
    }
    if !(start.is_finite() && stop.is_finite() && start < stop) {
        return Err(Error::Configuration(format!("invalid binning range [{start}, {stop}]")));
    }

    let mut bins = Vec::new();
    let mut bin_start = start;
    let mut n_in_bin = 0u64;

    for (i, &t) in times.iter().enumerate() {
        if t < bin_start || t >= stop {
            continue;
        }
        n_in_bin += 1;
        let (b, b_err) = background.counts(bin_start, t);
        if significance(n_in_bin as f64, b, b_err) < sigma {
            continue;
        }
        let next = times.get(i + 1).copied().filter(|&u| u < stop);
        let bin_stop = match next {
            Some(u) if u > t => 0.5 * (t + u),
            // Tied arrival times stay together in the next bin's first event.
            Some(_) => continue,
            None => stop,
        };
        if bin_stop > bin_start {
            bins.push(TimeInterval::new(bin_start, bin_stop)?);
        }
        bin_start = bin_stop;
        n_in_bin = 0;
    }

    if n_in_bin > 0 {
        log::debug!("{n_in_bin} trailing events did not reach {sigma} sigma and were not binned");
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatBackground {
        rate: f64,
    }

    impl BackgroundCounts for FlatBackground {
        fn counts(&self, start: f64, stop: f64) -> (f64, f64) {
            (self.rate * (stop - start), 0.0)
        }
    }

    fn grid(start: f64, stop: f64, n: usize) -> Vec<f64> {
        let step = (stop - start) / n as f64;
        (0..n).map(|i| start + (i as f64 + 0.5) * step).collect()
    }

    #[test]
    fn test_no_background_closes_at_sigma_squared_counts() {
        // b = 0 → significance = sqrt(n); sigma = 3 → 9 events per bin.
        let times = grid(0.0, 10.0, 40);
        let bins = significance_edges(&times, 0.0, 10.0, 3.0, &FlatBackground { rate: 0.0 }).unwrap();
        assert_eq!(bins.len(), 4);
        for bin in &bins {
            let n = times.iter().filter(|&&t| bin.contains(t)).count();
            assert_eq!(n, 9);
        }
        // Contiguous from the start.
        assert_eq!(bins[0].start(), 0.0);
        for pair in bins.windows(2) {
            assert_eq!(pair[0].stop(), pair[1].start());
        }
    }

    #[test]
    fn test_bright_pulse_gets_narrow_bins() {
        let mut times = grid(0.0, 100.0, 100); // ~1 count/s background
        times.extend(grid(50.0, 51.0, 200)); // pulse
        times.sort_by(f64::total_cmp);
        let bkg = FlatBackground { rate: 1.0 };
        let bins = significance_edges(&times, 0.0, 100.0, 5.0, &bkg).unwrap();
        assert!(!bins.is_empty());
        let in_pulse = bins.iter().filter(|b| b.start() >= 49.0 && b.stop() <= 52.0).count();
        assert!(in_pulse >= 2, "pulse should be split into several bins: {bins:?}");
        for bin in &bins {
            assert!(bin.stop() <= 100.0);
        }
    }

    #[test]
    fn test_sub_threshold_data_gives_no_bins() {
        let times = grid(0.0, 10.0, 10);
        let bkg = FlatBackground { rate: 1.0 };
        assert!(significance_edges(&times, 0.0, 10.0, 5.0, &bkg).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_sigma() {
        let bkg = FlatBackground { rate: 1.0 };
        assert!(matches!(
            significance_edges(&[], 0.0, 1.0, 0.0, &bkg),
            Err(Error::Configuration(_))
        ));
    }
}
