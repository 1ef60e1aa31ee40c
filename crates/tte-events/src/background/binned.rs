//! Weighted least-squares background fit on finely binned counts.

use super::polynomial::{BackgroundPolynomial, TimeScale, dot, integral_basis};
use crate::event_store::EventStore;
use nalgebra::{DMatrix, DVector};
use tte_core::{Error, Result, TimeInterval, TimeIntervalSet};
use tte_prob::poisson;

/// Background intervals cut into short sub-bins, with counts for every channel.
#[derive(Debug, Clone)]
pub struct BinnedSamples {
    bins: Vec<TimeInterval>,
    live_fraction: Vec<f64>,
    /// `counts[bin][channel]`
    counts: Vec<Vec<u64>>,
}

impl BinnedSamples {
    /// Split every interval into bins of `bin_width` (the last one per interval may be
    /// shorter) and count events per channel.
    pub fn collect(store: &EventStore, intervals: &TimeIntervalSet, bin_width: f64) -> Result<Self> {
        if !(bin_width.is_finite() && bin_width > 0.0) {
            return Err(Error::Configuration(format!(
                "background bin width must be > 0, got {bin_width}"
            )));
        }
        let mut bins = Vec::new();
        for iv in intervals {
            let mut lo = iv.start();
            while lo < iv.stop() {
                let hi = (lo + bin_width).min(iv.stop());
                if hi - lo > 1e-9 * bin_width {
                    bins.push(TimeInterval::new(lo, hi)?);
                }
                lo = hi;
            }
        }
        let live_fraction =
            bins.iter().map(|b| store.exposure(b) / b.duration()).collect::<Vec<_>>();
        let counts = bins.iter().map(|b| store.channel_counts(b)).collect();
        Ok(Self { bins, live_fraction, counts })
    }

    /// Number of sub-bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether there are no sub-bins.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Counts of one channel per sub-bin.
    pub fn channel(&self, channel: usize) -> Vec<f64> {
        self.counts.iter().map(|row| row.get(channel).copied().unwrap_or(0) as f64).collect()
    }

    /// Counts summed over all channels per sub-bin.
    pub fn total(&self) -> Vec<f64> {
        self.counts.iter().map(|row| row.iter().sum::<u64>() as f64).collect()
    }

    fn design_row(&self, i: usize, scale: TimeScale, n_coef: usize) -> Vec<f64> {
        let b = &self.bins[i];
        let mut row = integral_basis(scale, n_coef, b.start(), b.stop());
        row.iter_mut().for_each(|x| *x *= self.live_fraction[i]);
        row
    }
}

/// Fit a rate polynomial of `order` to one series of sub-bin `counts`.
///
/// Two passes: weights from the observed counts, then from the first-pass
/// prediction. Variances are floored at one count. The returned covariance is the
/// inverse of the weighted normal matrix.
pub fn fit(
    samples: &BinnedSamples,
    counts: &[f64],
    order: usize,
    scale: TimeScale,
) -> Result<BackgroundPolynomial> {
    let n_coef = order + 1;
    if counts.len() != samples.len() {
        return Err(Error::Validation(format!(
            "{} counts for {} background bins",
            counts.len(),
            samples.len()
        )));
    }
    if samples.len() < n_coef {
        return Err(Error::Computation(format!(
            "{} background bins cannot constrain a polynomial of order {order}",
            samples.len()
        )));
    }
    if counts.iter().all(|&c| c == 0.0) {
        log::debug!("no background counts; using a zero-rate polynomial of order {order}");
        return BackgroundPolynomial::new(vec![0.0; n_coef], vec![0.0; n_coef * n_coef], scale);
    }

    let rows: Vec<Vec<f64>> = (0..samples.len()).map(|i| samples.design_row(i, scale, n_coef)).collect();

    let first_var: Vec<f64> = counts.iter().map(|&c| c.max(1.0)).collect();
    let (coef, _) = solve_weighted(&rows, counts, &first_var)?;
    let second_var: Vec<f64> = rows.iter().map(|r| dot(coef.as_slice(), r).max(1.0)).collect();
    let (coef, cov) = solve_weighted(&rows, counts, &second_var)?;

    BackgroundPolynomial::new(coef.as_slice().to_vec(), row_major(&cov), scale)
}

/// Poisson log-likelihood of the sub-bin counts under `poly`.
pub fn log_likelihood(samples: &BinnedSamples, counts: &[f64], poly: &BackgroundPolynomial) -> f64 {
    let n_coef = poly.coefficients().len();
    (0..samples.len())
        .map(|i| {
            let mu = dot(poly.coefficients(), &samples.design_row(i, poly.scale(), n_coef));
            poisson::log_likelihood(counts[i], mu.max(1e-12)).unwrap_or(f64::NEG_INFINITY)
        })
        .sum()
}

fn solve_weighted(
    rows: &[Vec<f64>],
    y: &[f64],
    variance: &[f64],
) -> Result<(DVector<f64>, DMatrix<f64>)> {
    let n = rows[0].len();
    let mut normal = DMatrix::<f64>::zeros(n, n);
    let mut rhs = DVector::<f64>::zeros(n);
    for ((row, &yi), &vi) in rows.iter().zip(y).zip(variance) {
        let w = 1.0 / vi;
        for a in 0..n {
            rhs[a] += w * row[a] * yi;
            for b in 0..n {
                normal[(a, b)] += w * row[a] * row[b];
            }
        }
    }
    let chol = nalgebra::linalg::Cholesky::new(normal).ok_or_else(|| {
        Error::Computation("background normal equations are singular".into())
    })?;
    let coef = chol.solve(&rhs);
    let cov = chol.inverse();
    Ok((coef, cov))
}

fn row_major(m: &DMatrix<f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            out.push(m[(i, j)]);
        }
    }
    out
}
