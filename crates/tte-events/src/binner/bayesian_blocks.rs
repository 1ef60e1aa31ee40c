//! Bayesian Blocks segmentation for event data (Scargle et al. 2013).
//!
//! Each unique arrival time owns a Voronoi cell; the optimal partition of the cells
//! into constant-rate blocks is found by dynamic programming over the Cash fitness
//! `N_k (ln N_k − ln T_k)` with the empirical change-point prior
//! `4 − ln(73.53 p0 N^−0.478)`. The cost is quadratic in the number of unique times.
//!
//! With a background model the times are first mapped through the cumulative
//! background counts, which flattens a varying background so that only source
//! variability produces change points.

use super::BackgroundCounts;
use tte_core::{Error, Result, TimeInterval};

/// Bayesian Blocks edges for sorted `times` in `[start, stop)`.
///
/// The first block starts at `start` and the last ends at `stop`. With no events a
/// single block spanning the range is returned.
pub fn bayesian_blocks_edges(
    times: &[f64],
    start: f64,
    stop: f64,
    p0: f64,
    background: Option<&dyn BackgroundCounts>,
) -> Result<Vec<TimeInterval>> {
    if !(p0 > 0.0 && p0 < 1.0) {
        return Err(Error::Configuration(format!("bayesblocks needs 0 < p0 < 1, got {p0}")));
    }
    if !(start.is_finite() && stop.is_finite() && start < stop) {
        return Err(Error::Configuration(format!("invalid binning range [{start}, {stop}]")));
    }

    let (unique, multiplicity) =
        unique_with_counts(times.iter().copied().filter(|&t| t >= start && t < stop));
    if unique.is_empty() {
        return Ok(vec![TimeInterval::new(start, stop)?]);
    }

    // Cell edges in real time: [start, midpoints, stop].
    let mut edges = Vec::with_capacity(unique.len() + 1);
    edges.push(start);
    edges.extend(unique.windows(2).map(|w| 0.5 * (w[0] + w[1])));
    edges.push(stop);

    let fit_edges = match background {
        Some(bkg) => match transformed_edges(&edges, bkg) {
            Some(t) => t,
            None => {
                log::warn!("background rate not positive over the range; blocks use plain time");
                edges.clone()
            }
        },
        None => edges.clone(),
    };

    let change_points = optimal_partition(&fit_edges, &multiplicity, p0);

    let mut block_edges: Vec<f64> = change_points.iter().map(|&i| edges[i]).collect();
    block_edges.push(stop);
    if let Some(first) = block_edges.first_mut() {
        *first = start;
    }
    super::edges_to_intervals(&block_edges)
}

fn unique_with_counts(times: impl Iterator<Item = f64>) -> (Vec<f64>, Vec<f64>) {
    let mut unique: Vec<f64> = Vec::new();
    let mut counts: Vec<f64> = Vec::new();
    for t in times {
        match unique.last() {
            Some(&last) if last == t => {
                if let Some(c) = counts.last_mut() {
                    *c += 1.0;
                }
            }
            _ => {
                unique.push(t);
                counts.push(1.0);
            }
        }
    }
    (unique, counts)
}

/// Map cell edges through the cumulative background; `None` unless strictly increasing.
fn transformed_edges(edges: &[f64], background: &dyn BackgroundCounts) -> Option<Vec<f64>> {
    let origin = edges[0];
    let mapped: Vec<f64> = edges.iter().map(|&t| background.cumulative(origin, t)).collect();
    let increasing = mapped.windows(2).all(|w| w[1] > w[0]) && mapped.iter().all(|v| v.is_finite());
    increasing.then_some(mapped)
}

/// Indices into `edges` where blocks start (always begins with 0).
fn optimal_partition(edges: &[f64], multiplicity: &[f64], p0: f64) -> Vec<usize> {
    let n = multiplicity.len();
    let stop = edges[n];
    let block_length: Vec<f64> = edges.iter().map(|&e| stop - e).collect();

    let mut cumulative = Vec::with_capacity(n + 1);
    cumulative.push(0.0);
    for &m in multiplicity {
        let last = cumulative[cumulative.len() - 1];
        cumulative.push(last + m);
    }

    let prior = 4.0 - (73.53 * p0 * (n as f64).powf(-0.478)).ln();

    let mut best = vec![0.0_f64; n];
    let mut last = vec![0_usize; n];

    for r in 0..n {
        let mut best_value = f64::NEG_INFINITY;
        let mut best_k = 0;
        for k in 0..=r {
            let width = block_length[k] - block_length[r + 1];
            if width <= 0.0 {
                continue;
            }
            let count = cumulative[r + 1] - cumulative[k];
            let fitness = count * (count.ln() - width.ln());
            let value = fitness - prior + if k > 0 { best[k - 1] } else { 0.0 };
            if value > best_value {
                best_value = value;
                best_k = k;
            }
        }
        best[r] = best_value;
        last[r] = best_k;
    }

    let mut change_points = Vec::new();
    let mut idx = n;
    while idx > 0 {
        let k = last[idx - 1];
        change_points.push(k);
        idx = k;
    }
    change_points.reverse();
    change_points
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Uniform};

    fn uniform_events(rng: &mut StdRng, lo: f64, hi: f64, n: usize) -> Vec<f64> {
        let dist = Uniform::new(lo, hi).unwrap();
        (0..n).map(|_| dist.sample(rng)).collect()
    }

    #[test]
    fn test_constant_rate_is_one_block() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut times = uniform_events(&mut rng, 0.0, 100.0, 500);
        times.sort_by(f64::total_cmp);
        let blocks = bayesian_blocks_edges(&times, 0.0, 100.0, 0.001, None).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start(), 0.0);
        assert_eq!(blocks[0].stop(), 100.0);
    }

    #[test]
    fn test_step_in_rate_is_found() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut times = uniform_events(&mut rng, 0.0, 100.0, 200);
        times.extend(uniform_events(&mut rng, 40.0, 60.0, 800));
        times.sort_by(f64::total_cmp);
        let blocks = bayesian_blocks_edges(&times, 0.0, 100.0, 0.01, None).unwrap();
        assert!(blocks.len() >= 3, "{blocks:?}");
        assert_eq!(blocks.first().map(|b| b.start()), Some(0.0));
        assert_eq!(blocks.last().map(|b| b.stop()), Some(100.0));
        // Some edge lands close to each step.
        let near = |x: f64| blocks.iter().any(|b| (b.start() - x).abs() < 2.0);
        assert!(near(40.0) && near(60.0), "{blocks:?}");
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].stop(), pair[1].start());
        }
    }

    struct Ramp;

    impl BackgroundCounts for Ramp {
        // rate(t) = 1 + t / 10
        fn counts(&self, a: f64, b: f64) -> (f64, f64) {
            ((b - a) + (b * b - a * a) / 20.0, 0.0)
        }
    }

    #[test]
    fn test_background_transform_flattens_ramp() {
        // Events drawn from rate 5 (1 + t/10) on [0, 100]: inverse-CDF sampling.
        let mut rng = StdRng::seed_from_u64(3);
        let unit = Uniform::new(0.0f64, 1.0).unwrap();
        let total = 100.0 + 100.0 * 100.0 / 20.0;
        let mut times: Vec<f64> = (0..3000)
            .map(|_| {
                let u = unit.sample(&mut rng) * total;
                // Solve t + t²/20 = u.
                10.0 * (-1.0 + (1.0 + u / 5.0).sqrt())
            })
            .collect();
        times.sort_by(f64::total_cmp);
        let plain = bayesian_blocks_edges(&times, 0.0, 100.0, 0.001, None).unwrap();
        let flat = bayesian_blocks_edges(&times, 0.0, 100.0, 0.001, Some(&Ramp)).unwrap();
        assert!(plain.len() > 1);
        assert_eq!(flat.len(), 1, "{flat:?}");
    }

    #[test]
    fn test_no_events_single_block() {
        let blocks = bayesian_blocks_edges(&[], -1.0, 1.0, 0.05, None).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_duplicate_times_are_merged() {
        let times = vec![1.0, 1.0, 1.0, 2.0, 3.0];
        let blocks = bayesian_blocks_edges(&times, 0.0, 4.0, 0.05, None).unwrap();
        assert_eq!(blocks.first().map(|b| b.start()), Some(0.0));
        assert_eq!(blocks.last().map(|b| b.stop()), Some(4.0));
    }
}
