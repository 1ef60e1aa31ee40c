//! Bounded minimisation
//!
//! Thin wrapper around the argmin L-BFGS solver. Box constraints are enforced by
//! clamping every evaluation point and projecting the gradient at active bounds.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tte_core::{Error, Result};

/// Configuration for the L-BFGS optimizer
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for gradient norm
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 500, tol: 1e-6, m: 10 }
    }
}

/// Result of a minimisation
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters (clamped into bounds)
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective evaluations
    pub n_fev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.converged
        )
    }
}

/// Objective to minimise
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`; central differences unless overridden.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut probe = params.to_vec();
        for i in 0..params.len() {
            let eps = 1e-7 * params[i].abs().max(1.0);
            probe[i] = params[i] + eps;
            let f_plus = self.eval(&probe)?;
            probe[i] = params[i] - eps;
            let f_minus = self.eval(&probe)?;
            probe[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }
        Ok(grad)
    }
}

struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    n_fev: Arc<AtomicUsize>,
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.n_fev.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Zero components that push further out of an active bound.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if (x <= lo + EPS && g[i] > 0.0) || (x >= hi - EPS && g[i] < 0.0) {
                g[i] = 0.0;
            }
        }
        Ok(g)
    }
}

/// L-BFGS optimizer with box constraints
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Create an optimizer with the given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimise `objective` from `init_params` inside `bounds`.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }
        if init_params.is_empty() {
            let fval = objective.eval(&[])?;
            return Ok(OptimizationResult {
                parameters: Vec::new(),
                fval,
                n_iter: 0,
                n_fev: 1,
                converged: true,
                message: "no free parameters".into(),
            });
        }

        let init = clamp_params(init_params, bounds);
        let n_fev = Arc::new(AtomicUsize::new(0));
        let problem = ArgminProblem { objective, bounds, n_fev: Arc::clone(&n_fev) };

        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .and_then(|s| s.with_tolerance_cost(tol_cost))
            .map_err(|e| Error::Validation(format!("invalid optimizer configuration: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("optimization failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("optimizer returned no parameters".into()))?;
        let parameters = clamp_params(best, bounds);
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        if !converged {
            log::debug!("optimizer stopped without convergence: {termination}");
        }

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: n_fev.load(Ordering::Relaxed),
            converged,
            message: termination.to_string(),
        })
    }
}
