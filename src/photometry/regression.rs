//! Weighted and robust linear regression used by the zero-point fit.
use medians::Medianf64;
use nalgebra::{DMatrix, DVector};

use crate::lsq::weighted_least_squares;

/// Huber tuning constant, 95% efficiency for Gaussian residuals.
pub const HUBER_T: f64 = 1.345;

/// Scale factor turning a MAD into a Gaussian sigma.
const MAD_TO_SIGMA: f64 = 1.4826;

const IRLS_MAX_ITER: usize = 50;
const IRLS_TOL: f64 = 1e-10;

/// Fit `rhs ≈ design · c` with per-row weights.
///
/// With `robust` set, the fit is an iteratively re-weighted least squares with Huber
/// weights on the standardized residuals, the scale being re-estimated from their
/// MAD at every pass. Otherwise a single weighted least squares is returned.
///
/// Return
/// ------
/// * The coefficients, or `None` for a degenerate system.
pub(crate) fn fit_linear(
    design: &DMatrix<f64>,
    rhs: &DVector<f64>,
    weights: &DVector<f64>,
    robust: bool,
) -> Option<DVector<f64>> {
    let mut params = weighted_least_squares(design, rhs, weights)?;
    if !robust {
        return Some(params);
    }

    let sqrt_w = weights.map(f64::sqrt);
    for _ in 0..IRLS_MAX_ITER {
        let standardized = (rhs - design * &params).component_mul(&sqrt_w);
        let abs: Vec<f64> = standardized.iter().map(|r| r.abs()).collect();
        let scale = MAD_TO_SIGMA * abs.as_slice().medf_unchecked();
        if !(scale.is_finite() && scale > 0.0) {
            // exact fit of (almost) every point, nothing to down-weight
            break;
        }

        let huber = standardized.map(|r| {
            let a = r.abs() / scale;
            if a <= HUBER_T {
                1.0
            } else {
                HUBER_T / a
            }
        });
        let next = weighted_least_squares(design, rhs, &weights.component_mul(&huber))?;

        let change = (&next - &params).amax();
        params = next;
        if change < IRLS_TOL {
            break;
        }
    }
    Some(params)
}
