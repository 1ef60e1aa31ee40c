//! Covariance of fitted parameters from the Hessian of the negative log-likelihood.

use nalgebra::DMatrix;
use tte_core::{Error, Result};

/// Invert a negative-log-likelihood Hessian into a covariance matrix.
///
/// Tries Cholesky first, adding geometrically growing diagonal damping when the
/// Hessian is slightly indefinite, then falls back to LU. Fails when the
/// result has non-positive or non-finite variances.
pub fn covariance_from_hessian(hessian: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = hessian.nrows();
    if n != hessian.ncols() {
        return Err(Error::Validation(format!(
            "Hessian must be square, got {}x{}",
            n,
            hessian.ncols()
        )));
    }
    if n == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }

    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1e-300);
    let mut damped = hessian.clone();
    let mut damping = 0.0_f64;

    for attempt in 0..8 {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(damped.clone()) {
            if attempt > 0 {
                log::warn!("covariance needed diagonal damping {damping:.3e} to invert Hessian");
            }
            return checked(chol.solve(&identity));
        }
        let next = if damping == 0.0 { diag_scale * 1e-10 } else { damping * 10.0 };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }

    let cov = hessian
        .clone()
        .lu()
        .try_inverse()
        .ok_or_else(|| Error::Computation("Hessian is singular; covariance unavailable".into()))?;
    checked(cov)
}

fn checked(cov: DMatrix<f64>) -> Result<DMatrix<f64>> {
    for i in 0..cov.nrows() {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return Err(Error::Computation(format!("invalid variance {v} on covariance diagonal")));
        }
    }
    Ok(cov)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_covariance_recovers_sigmas() {
        // NLL of two independent Gaussians with sigmas 2 and 0.5.
        let h = DMatrix::from_row_slice(2, 2, &[0.25, 0.0, 0.0, 4.0]);
        let cov = covariance_from_hessian(&h).unwrap();
        assert_relative_eq!(cov[(0, 0)].sqrt(), 2.0, epsilon = 1e-3);
        assert_relative_eq!(cov[(1, 1)].sqrt(), 0.5, epsilon = 1e-3);
        assert!(cov[(0, 1)].abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_square() {
        let h = DMatrix::<f64>::zeros(2, 3);
        assert!(matches!(covariance_from_hessian(&h), Err(Error::Validation(_))));
    }

    #[test]
    fn test_negative_definite_rejected() {
        let h = DMatrix::from_row_slice(1, 1, &[-4.0]);
        assert!(covariance_from_hessian(&h).is_err());
    }
}
