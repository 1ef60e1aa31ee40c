//! Unbinned Poisson-process background fit.
//!
//! For event times `t_i` in the background intervals `I_j` with live fractions
//! `f_j`, the negative log-likelihood of an inhomogeneous Poisson process is
//!
//! `NLL(c) = −Σ_i ln λ(t_i) + Σ_j f_j ∫_{I_j} λ(t) dt`
//!
//! which is convex in the coefficients wherever `λ > 0`. The rate is floored at a
//! tiny positive value so the objective stays finite when a trial polynomial dips
//! below zero at some event.

use super::polynomial::{BackgroundPolynomial, TimeScale, dot, integral_basis, powers};
use nalgebra::DMatrix;
use tte_core::{Error, Result, TimeInterval};
use tte_inference::{LbfgsbOptimizer, ObjectiveFunction, OptimizerConfig, covariance_from_hessian};

/// Negative log-likelihood of one channel's background events.
pub struct UnbinnedObjective {
    /// `u^k` at every event, flattened `[event][k]`.
    event_basis: Vec<f64>,
    /// `Σ_j f_j ∫_{I_j} u^k dt`.
    exposure_basis: Vec<f64>,
    n_coef: usize,
    floor: f64,
}

impl UnbinnedObjective {
    /// Build from event times and `(interval, live fraction)` pairs.
    pub fn new(
        times: &[f64],
        intervals: &[(TimeInterval, f64)],
        order: usize,
        scale: TimeScale,
    ) -> Self {
        let n_coef = order + 1;
        let mut event_basis = Vec::with_capacity(times.len() * n_coef);
        for &t in times {
            event_basis.extend(powers(scale.to_unit(t), n_coef));
        }
        let mut exposure_basis = vec![0.0; n_coef];
        let mut live = 0.0;
        for (iv, fraction) in intervals {
            let g = integral_basis(scale, n_coef, iv.start(), iv.stop());
            for k in 0..n_coef {
                exposure_basis[k] += fraction * g[k];
            }
            live += fraction * iv.duration();
        }
        let mean_rate = if live > 0.0 { times.len() as f64 / live } else { 1.0 };
        Self { event_basis, exposure_basis, n_coef, floor: 1e-9 * mean_rate.max(1e-9) }
    }

    fn events(&self) -> impl Iterator<Item = &[f64]> {
        self.event_basis.chunks_exact(self.n_coef)
    }

    /// Observed information `Σ_i φ φᵀ / λ²` at `coef`.
    pub fn hessian(&self, coef: &[f64]) -> DMatrix<f64> {
        let n = self.n_coef;
        let mut h = DMatrix::zeros(n, n);
        for phi in self.events() {
            let lambda = dot(coef, phi).max(self.floor);
            let w = 1.0 / (lambda * lambda);
            for a in 0..n {
                for b in 0..n {
                    h[(a, b)] += w * phi[a] * phi[b];
                }
            }
        }
        h
    }
}

impl ObjectiveFunction for UnbinnedObjective {
    fn eval(&self, coef: &[f64]) -> Result<f64> {
        let log_rates: f64 = self.events().map(|phi| dot(coef, phi).max(self.floor).ln()).sum();
        Ok(dot(coef, &self.exposure_basis) - log_rates)
    }

    fn gradient(&self, coef: &[f64]) -> Result<Vec<f64>> {
        let mut grad = self.exposure_basis.clone();
        for phi in self.events() {
            let lambda = dot(coef, phi);
            if lambda > self.floor {
                for k in 0..self.n_coef {
                    grad[k] -= phi[k] / lambda;
                }
            }
        }
        Ok(grad)
    }
}

/// Result of an unbinned fit.
#[derive(Debug, Clone)]
pub struct UnbinnedFit {
    /// Fitted polynomial with covariance from the observed information.
    pub polynomial: BackgroundPolynomial,
    /// Maximised log-likelihood (`−NLL`).
    pub log_likelihood: f64,
}

/// Maximise the Poisson-process likelihood starting from `initial` coefficients.
pub fn fit(
    times: &[f64],
    intervals: &[(TimeInterval, f64)],
    order: usize,
    scale: TimeScale,
    initial: &[f64],
    config: &OptimizerConfig,
) -> Result<UnbinnedFit> {
    let n_coef = order + 1;
    if initial.len() != n_coef {
        return Err(Error::Validation(format!(
            "{} initial coefficients for order {order}",
            initial.len()
        )));
    }
    if times.is_empty() {
        log::debug!("no background events; using a zero-rate polynomial of order {order}");
        let polynomial =
            BackgroundPolynomial::new(vec![0.0; n_coef], vec![0.0; n_coef * n_coef], scale)?;
        return Ok(UnbinnedFit { polynomial, log_likelihood: 0.0 });
    }
    if times.len() < n_coef {
        return Err(Error::Computation(format!(
            "{} background events cannot constrain a polynomial of order {order}",
            times.len()
        )));
    }

    let objective = UnbinnedObjective::new(times, intervals, order, scale);
    let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); n_coef];
    let result = LbfgsbOptimizer::new(config.clone()).minimize(&objective, initial, &bounds)?;
    if !result.converged {
        log::warn!("unbinned background fit did not converge: {}", result.message);
    }

    let cov = covariance_from_hessian(&objective.hessian(&result.parameters))?;
    let mut covariance = Vec::with_capacity(n_coef * n_coef);
    for i in 0..n_coef {
        for j in 0..n_coef {
            covariance.push(cov[(i, j)]);
        }
    }
    let polynomial = BackgroundPolynomial::new(result.parameters, covariance, scale)?;
    Ok(UnbinnedFit { polynomial, log_likelihood: -result.fval })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quantile_times(n: usize, lo: f64, hi: f64) -> Vec<f64> {
        (0..n).map(|k| lo + (k as f64 + 0.5) / n as f64 * (hi - lo)).collect()
    }

    #[test]
    fn test_constant_rate_mle_is_n_over_t() {
        let iv = TimeInterval::new(0.0, 100.0).unwrap();
        let times = quantile_times(1000, 0.0, 100.0);
        let scale = TimeScale { origin: 50.0, scale: 50.0 };
        let fit = fit(&times, &[(iv, 1.0)], 0, scale, &[5.0], &OptimizerConfig::default()).unwrap();
        assert_relative_eq!(fit.polynomial.coefficients()[0], 10.0, epsilon = 1e-3);
        // Var(λ) = λ² / N = 0.1 → σ ≈ 0.316.
        assert_relative_eq!(fit.polynomial.coefficient_errors()[0], 0.316, epsilon = 0.01);
    }

    #[test]
    fn test_live_fraction_scales_rate() {
        let iv = TimeInterval::new(0.0, 100.0).unwrap();
        let times = quantile_times(1000, 0.0, 100.0);
        let scale = TimeScale { origin: 50.0, scale: 50.0 };
        let fit = fit(&times, &[(iv, 0.5)], 0, scale, &[5.0], &OptimizerConfig::default()).unwrap();
        assert_relative_eq!(fit.polynomial.coefficients()[0], 20.0, epsilon = 1e-2);
    }

    #[test]
    fn test_slope_recovered() {
        // rate(t) = 10 + 0.1 t on [0, 200] placed at its quantiles.
        let times: Vec<f64> = (0..4000)
            .map(|k| (-10.0 + (100.0 + 0.2 * (k as f64 + 0.5)).sqrt()) / 0.1)
            .collect();
        let iv = TimeInterval::new(0.0, 200.0).unwrap();
        let scale = TimeScale { origin: 100.0, scale: 100.0 };
        let fit =
            fit(&times, &[(iv, 1.0)], 1, scale, &[15.0, 0.0], &OptimizerConfig::default()).unwrap();
        assert_relative_eq!(fit.polynomial.coefficients()[0], 20.0, epsilon = 0.1);
        assert_relative_eq!(fit.polynomial.coefficients()[1], 10.0, epsilon = 0.2);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let iv = TimeInterval::new(-5.0, 5.0).unwrap();
        let times = quantile_times(50, -5.0, 5.0);
        let obj = UnbinnedObjective::new(&times, &[(iv, 1.0)], 2, TimeScale { origin: 0.0, scale: 5.0 });
        let c = [5.0, 0.3, -0.2];
        let analytic = obj.gradient(&c).unwrap();
        for k in 0..3 {
            let h = 1e-6;
            let mut up = c;
            let mut dn = c;
            up[k] += h;
            dn[k] -= h;
            let numeric = (obj.eval(&up).unwrap() - obj.eval(&dn).unwrap()) / (2.0 * h);
            assert_relative_eq!(analytic[k], numeric, epsilon = 1e-4, max_relative = 1e-5);
        }
    }
}
