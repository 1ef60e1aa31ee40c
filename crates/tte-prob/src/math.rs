//! Small numerically-stable helpers used across count statistics.

use statrs::function::gamma::ln_gamma;

/// `ln(n!)` for a non-negative count.
#[inline]
pub fn ln_factorial(n: f64) -> f64 {
    if n <= 1.0 { 0.0 } else { ln_gamma(n + 1.0) }
}

/// `x * ln(y)` with the convention `0 * ln(0) = 0`.
#[inline]
pub fn xlogy(x: f64, y: f64) -> f64 {
    if x == 0.0 { 0.0 } else { x * y.ln() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ln_factorial_small_values() {
        assert_eq!(ln_factorial(0.0), 0.0);
        assert_eq!(ln_factorial(1.0), 0.0);
        assert_relative_eq!(ln_factorial(5.0), 120f64.ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_xlogy_zero_convention() {
        assert_eq!(xlogy(0.0, 0.0), 0.0);
        assert_relative_eq!(xlogy(2.0, std::f64::consts::E), 2.0, epsilon = 1e-12);
        assert_eq!(xlogy(1.0, 0.0), f64::NEG_INFINITY);
    }
}
