//! TPV polynomial distortion.
//!
//! TPV applies a polynomial in the intermediate world coordinates `(x, y) = CD · (p - crpix)`
//! before the TAN de-projection, with one coefficient set per axis:
//!
//! ```text
//! ξ' = Σ PV1_k · T_k(x, y)
//! η' = Σ PV2_k · T_k(y, x)
//! ```
//!
//! The 40 terms `T_k` of the convention run up to order 7 and include the odd powers
//! of the radius `r = √(x² + y²)` (terms 3, 11, 23 and 39). `PV1_1` and `PV2_1`
//! default to 1, all other coefficients to 0.
use crate::pipeline_errors::PipelineError;

/// Number of coefficients per axis.
pub const TPV_TERMS: usize = 40;

/// Polynomial order reached by each TPV term.
const TERM_ORDER: [usize; TPV_TERMS] = [
    0, 1, 1, 1, // 1 x y r
    2, 2, 2, //
    3, 3, 3, 3, 3, //
    4, 4, 4, 4, 4, //
    5, 5, 5, 5, 5, 5, 5, //
    6, 6, 6, 6, 6, 6, 6, //
    7, 7, 7, 7, 7, 7, 7, 7, 7,
];

/// Evaluate all TPV terms at `(x, y)`.
fn terms(x: f64, y: f64) -> [f64; TPV_TERMS] {
    let r = x.hypot(y);
    let mut t = [0.0; TPV_TERMS];
    t[0] = 1.0;
    t[1] = x;
    t[2] = y;
    t[3] = r;

    // pure polynomial blocks of order 2..=7, x powers descending
    let mut k = 4;
    for order in 2..=7 {
        for j in 0..=order {
            t[k] = x.powi((order - j) as i32) * y.powi(j as i32);
            k += 1;
        }
        if order % 2 == 1 {
            t[k] = r.powi(order as i32);
            k += 1;
        }
    }
    t
}

/// TPV coefficient sets of both axes.
#[derive(Debug, Clone, PartialEq)]
pub struct TpvDistortion {
    pv1: [f64; TPV_TERMS],
    pv2: [f64; TPV_TERMS],
}

impl Default for TpvDistortion {
    fn default() -> Self {
        Self::identity()
    }
}

impl TpvDistortion {
    pub fn identity() -> Self {
        let mut pv1 = [0.0; TPV_TERMS];
        let mut pv2 = [0.0; TPV_TERMS];
        pv1[1] = 1.0;
        pv2[1] = 1.0;
        TpvDistortion { pv1, pv2 }
    }

    /// Set coefficient `PV{axis}_{term}`.
    ///
    /// Arguments
    /// ---------
    /// * `axis`: 1 for ξ, 2 for η
    /// * `term`: index in `0..40`
    pub fn set(&mut self, axis: usize, term: usize, value: f64) -> Result<(), PipelineError> {
        if term >= TPV_TERMS {
            return Err(PipelineError::InvalidHeaderCard(format!(
                "PV{axis}_{term}: term index out of range"
            )));
        }
        match axis {
            1 => self.pv1[term] = value,
            2 => self.pv2[term] = value,
            _ => {
                return Err(PipelineError::InvalidHeaderCard(format!(
                    "PV{axis}_{term}: axis must be 1 or 2"
                )))
            }
        }
        Ok(())
    }

    pub fn coefficient(&self, axis: usize, term: usize) -> Option<f64> {
        match axis {
            1 => self.pv1.get(term).copied(),
            2 => self.pv2.get(term).copied(),
            _ => None,
        }
    }

    /// Highest polynomial order carrying a coefficient other than the identity.
    pub fn order(&self) -> usize {
        let identity = Self::identity();
        (0..TPV_TERMS)
            .filter(|&k| self.pv1[k] != identity.pv1[k] || self.pv2[k] != identity.pv2[k])
            .map(|k| TERM_ORDER[k])
            .max()
            .unwrap_or(0)
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Distort intermediate world coordinates (degrees).
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let tx = terms(x, y);
        let ty = terms(y, x);
        let xi = self.pv1.iter().zip(&tx).map(|(c, t)| c * t).sum();
        let eta = self.pv2.iter().zip(&ty).map(|(c, t)| c * t).sum();
        (xi, eta)
    }

    /// Invert [`TpvDistortion::apply`] with Newton iterations.
    ///
    /// The Jacobian is evaluated by central differences; the identity start is adequate
    /// for the small distortions TPV describes.
    pub fn invert(&self, xi: f64, eta: f64) -> Option<(f64, f64)> {
        const STEP: f64 = 1e-7;
        const MAX_ITER: usize = 30;
        const TOL: f64 = 1e-14;

        let (mut x, mut y) = (xi, eta);
        for _ in 0..MAX_ITER {
            let (fx, fy) = self.apply(x, y);
            let (rx, ry) = (fx - xi, fy - eta);
            if rx.hypot(ry) < TOL {
                return Some((x, y));
            }

            let (ax, ay) = self.apply(x + STEP, y);
            let (bx, by) = self.apply(x - STEP, y);
            let (cx, cy) = self.apply(x, y + STEP);
            let (dx, dy) = self.apply(x, y - STEP);
            let j11 = (ax - bx) / (2.0 * STEP);
            let j21 = (ay - by) / (2.0 * STEP);
            let j12 = (cx - dx) / (2.0 * STEP);
            let j22 = (cy - dy) / (2.0 * STEP);

            let det = j11 * j22 - j12 * j21;
            if det.abs() < 1e-300 || !det.is_finite() {
                return None;
            }
            x -= (j22 * rx - j12 * ry) / det;
            y -= (-j21 * rx + j11 * ry) / det;
        }

        let (fx, fy) = self.apply(x, y);
        ((fx - xi).hypot(fy - eta) < 1e-10).then_some((x, y))
    }
}

#[cfg(test)]
mod tpv_test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_term_layout() {
        let t = terms(2.0, 3.0);
        assert_relative_eq!(t[3], 13f64.sqrt(), epsilon = 1e-15);
        assert_eq!(t[4], 4.0);
        assert_eq!(t[5], 6.0);
        assert_eq!(t[6], 9.0);
        assert_eq!(t[10], 27.0);
        assert_relative_eq!(t[11], 13f64.powf(1.5), epsilon = 1e-12);
        assert_eq!(t[12], 16.0);
        assert_eq!(t[22], 243.0);
        assert_relative_eq!(t[23], 13f64.powf(2.5), epsilon = 1e-9);
        assert_eq!(t[24], 64.0);
        assert_eq!(t[38], 3f64.powi(7));
        assert_relative_eq!(t[39], 13f64.powf(3.5), epsilon = 1e-6);
    }

    #[test]
    fn test_identity() {
        let tpv = TpvDistortion::identity();
        assert_eq!(tpv.apply(0.1, -0.2), (0.1, -0.2));
        assert_eq!(tpv.order(), 0);
        assert!(tpv.is_identity());
    }

    #[test]
    fn test_axis_swap() {
        let mut tpv = TpvDistortion::identity();
        // PV1_4 scales x² on ξ, PV2_4 scales y² on η
        tpv.set(1, 4, 0.5).unwrap();
        tpv.set(2, 4, 0.25).unwrap();
        let (xi, eta) = tpv.apply(0.2, 0.4);
        assert_relative_eq!(xi, 0.2 + 0.5 * 0.04, epsilon = 1e-15);
        assert_relative_eq!(eta, 0.4 + 0.25 * 0.16, epsilon = 1e-15);
        assert_eq!(tpv.order(), 2);
    }

    #[test]
    fn test_invert() {
        let mut tpv = TpvDistortion::identity();
        tpv.set(1, 0, 1e-5).unwrap();
        tpv.set(1, 5, 2e-3).unwrap();
        tpv.set(2, 7, -1e-3).unwrap();
        tpv.set(2, 3, 1e-4).unwrap();

        let (xi, eta) = tpv.apply(0.12, -0.08);
        let (x, y) = tpv.invert(xi, eta).unwrap();
        assert_relative_eq!(x, 0.12, epsilon = 1e-10);
        assert_relative_eq!(y, -0.08, epsilon = 1e-10);
    }

    #[test]
    fn test_set_out_of_range() {
        let mut tpv = TpvDistortion::identity();
        assert!(tpv.set(3, 1, 1.0).is_err());
        assert!(tpv.set(1, 40, 1.0).is_err());
    }
}
