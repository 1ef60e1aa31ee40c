//! Detection significance of observed counts over a background estimate.

use crate::math::xlogy;
use crate::pgstat::profile_background;

/// Signed likelihood-ratio significance of `n` counts over background `b ± sigma`.
///
/// - `sigma > 0`: Poisson-observed / Gaussian-background form, with the background
///   profiled under the null hypothesis (no source).
/// - `sigma == 0`: Poisson with a perfectly known background,
///   `S = √(2 (n ln(n/b) − (n − b)))`.
/// - `b <= 0`: no background to compare against; returns `√n`.
///
/// The sign is negative when `n < b`.
pub fn significance(n: f64, b: f64, sigma: f64) -> f64 {
    if b <= 0.0 {
        return n.max(0.0).sqrt();
    }
    let sign = if n >= b { 1.0 } else { -1.0 };

    let twice_llr = if sigma <= 0.0 {
        2.0 * (xlogy(n, n / b) - (n - b))
    } else {
        let b0 = profile_background(n, b, sigma, 0.0).max(f64::MIN_POSITIVE);
        let z = (b0 - b) / sigma;
        2.0 * (xlogy(n, n / b0) + 0.5 * z * z + b0 - n)
    };

    sign * twice_llr.max(0.0).sqrt()
}
