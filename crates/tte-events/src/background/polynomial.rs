//! Polynomial count-rate model of one channel.
//!
//! Time enters through the rescaled variable `u = (t − origin) / scale`, which keeps
//! the normal equations well conditioned for trigger-relative times of hundreds of
//! seconds. Coefficients and their covariance live in `u` space:
//! `rate(t) = Σ_k c_k u^k` (counts / s).

use serde::{Deserialize, Serialize};
use tte_core::{Error, Result, TimeIntervalSet};

/// Affine map from time to the polynomial's variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeScale {
    /// Time mapped to `u = 0`.
    pub origin: f64,
    /// Seconds per unit of `u`.
    pub scale: f64,
}

impl Default for TimeScale {
    fn default() -> Self {
        Self { origin: 0.0, scale: 1.0 }
    }
}

impl TimeScale {
    /// Centre on the hull of `intervals`, with the half-width as unit.
    pub fn for_intervals(intervals: &TimeIntervalSet) -> Self {
        match intervals.span() {
            Some(span) => Self { origin: span.mid(), scale: (0.5 * span.duration()).max(1e-9) },
            None => Self::default(),
        }
    }

    /// Time to `u`.
    #[inline]
    pub fn to_unit(&self, t: f64) -> f64 {
        (t - self.origin) / self.scale
    }
}

/// Rate polynomial with coefficient covariance.
///
/// Order −1 (no coefficients) is the zero model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundPolynomial {
    coefficients: Vec<f64>,
    /// Row-major `n × n`.
    covariance: Vec<f64>,
    scale: TimeScale,
}

impl BackgroundPolynomial {
    /// The zero model.
    pub fn zero() -> Self {
        Self { coefficients: Vec::new(), covariance: Vec::new(), scale: TimeScale::default() }
    }

    /// Coefficients `c_0..c_n` in `u` space and their row-major covariance.
    pub fn new(coefficients: Vec<f64>, covariance: Vec<f64>, scale: TimeScale) -> Result<Self> {
        let n = coefficients.len();
        if covariance.len() != n * n {
            return Err(Error::Validation(format!(
                "covariance has {} entries, expected {}",
                covariance.len(),
                n * n
            )));
        }
        if coefficients.iter().chain(&covariance).any(|v| !v.is_finite()) {
            return Err(Error::Computation("background polynomial has non-finite entries".into()));
        }
        Ok(Self { coefficients, covariance, scale })
    }

    /// Polynomial order; −1 for the zero model.
    pub fn order(&self) -> i32 {
        self.coefficients.len() as i32 - 1
    }

    /// Coefficients in `u` space.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Row-major coefficient covariance.
    pub fn covariance(&self) -> &[f64] {
        &self.covariance
    }

    /// Time scaling of the coefficients.
    pub fn scale(&self) -> TimeScale {
        self.scale
    }

    /// 1σ error of each coefficient.
    pub fn coefficient_errors(&self) -> Vec<f64> {
        let n = self.coefficients.len();
        (0..n).map(|k| self.covariance[k * n + k].max(0.0).sqrt()).collect()
    }

    /// `u^k` at time `t`.
    pub(crate) fn rate_basis(&self, t: f64) -> Vec<f64> {
        powers(self.scale.to_unit(t), self.coefficients.len())
    }

    /// `∫_a^b u^k dt` for each `k`.
    pub(crate) fn integral_basis(&self, a: f64, b: f64) -> Vec<f64> {
        integral_basis(self.scale, self.coefficients.len(), a, b)
    }

    /// Rate (counts / s) at `t`.
    pub fn rate(&self, t: f64) -> f64 {
        dot(&self.coefficients, &self.rate_basis(t))
    }

    /// 1σ error of the rate at `t`.
    pub fn rate_error(&self, t: f64) -> f64 {
        self.quadratic_form(&self.rate_basis(t)).sqrt()
    }

    /// Expected counts over `[a, b]` with full live time.
    pub fn integral(&self, a: f64, b: f64) -> f64 {
        dot(&self.coefficients, &self.integral_basis(a, b))
    }

    /// 1σ error of [`Self::integral`].
    pub fn integral_error(&self, a: f64, b: f64) -> f64 {
        self.quadratic_form(&self.integral_basis(a, b)).sqrt()
    }

    fn quadratic_form(&self, g: &[f64]) -> f64 {
        let n = g.len();
        let mut total = 0.0;
        for i in 0..n {
            for j in 0..n {
                total += g[i] * self.covariance[i * n + j] * g[j];
            }
        }
        total.max(0.0)
    }
}

pub(crate) fn powers(u: f64, n: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(n);
    let mut p = 1.0;
    for _ in 0..n {
        out.push(p);
        p *= u;
    }
    out
}

pub(crate) fn integral_basis(scale: TimeScale, n: usize, a: f64, b: f64) -> Vec<f64> {
    let (ua, ub) = (scale.to_unit(a), scale.to_unit(b));
    let mut pa = ua;
    let mut pb = ub;
    let mut out = Vec::with_capacity(n);
    for k in 0..n {
        out.push((pb - pa) / (k as f64 + 1.0) * scale.scale);
        pa *= ua;
        pb *= ub;
    }
    out
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
