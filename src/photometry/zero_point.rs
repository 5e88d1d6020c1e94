use crate::{
    constants::{Magnitude, Pixel},
    lsq::{monomials, polynomial_terms},
};

/// Fitted photometric zero point, callable on pixel positions.
///
/// The spatial part is a polynomial of total degree `order` in normalized pixel
/// coordinates `((x - x0) / scale, (y - y0) / scale)`. The color term, when fitted,
/// is kept aside: [`ZeroPointModel::evaluate`] returns the spatial zero point alone,
/// [`ZeroPointModel::evaluate_with_color`] adds the color contribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ZeroPointModel {
    order: usize,
    coeffs: Vec<f64>,
    color_term: Option<f64>,
    center: (Pixel, Pixel),
    scale: Pixel,
}

impl ZeroPointModel {
    pub(crate) fn new(
        order: usize,
        coeffs: Vec<f64>,
        color_term: Option<f64>,
        center: (Pixel, Pixel),
        scale: Pixel,
    ) -> Self {
        ZeroPointModel {
            order,
            coeffs,
            color_term,
            center,
            scale,
        }
    }

    /// Normalization mapping the pixel positions into `[-1, 1]`.
    pub(crate) fn normalization(x: &[Pixel], y: &[Pixel]) -> ((Pixel, Pixel), Pixel) {
        let range = |v: &[Pixel]| {
            v.iter()
                .filter(|p| p.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| {
                    (lo.min(p), hi.max(p))
                })
        };
        let (x_lo, x_hi) = range(x);
        let (y_lo, y_hi) = range(y);
        if !(x_lo.is_finite() && y_lo.is_finite()) {
            return ((0.0, 0.0), 1.0);
        }

        let center = (0.5 * (x_lo + x_hi), 0.5 * (y_lo + y_hi));
        let scale = (0.5 * (x_hi - x_lo)).max(0.5 * (y_hi - y_lo)).max(1.0);
        (center, scale)
    }

    /// Monomials of the spatial polynomial at `(x, y)`.
    pub(crate) fn spatial_terms(
        order: usize,
        center: (Pixel, Pixel),
        scale: Pixel,
        x: Pixel,
        y: Pixel,
    ) -> Vec<f64> {
        let terms = polynomial_terms(order);
        monomials(&terms, (x - center.0) / scale, (y - center.1) / scale).collect()
    }

    /// Spatial order of the polynomial, 0 for a constant zero point.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn color_term(&self) -> Option<f64> {
        self.color_term
    }

    /// Zero point at pixel `(x, y)`.
    pub fn evaluate(&self, x: Pixel, y: Pixel) -> Magnitude {
        Self::spatial_terms(self.order, self.center, self.scale, x, y)
            .iter()
            .zip(&self.coeffs)
            .map(|(m, c)| m * c)
            .sum()
    }

    /// Zero point at pixel `(x, y)` for a source of the given catalog color.
    pub fn evaluate_with_color(&self, x: Pixel, y: Pixel, color: Magnitude) -> Magnitude {
        self.evaluate(x, y) + self.color_term.map_or(0.0, |c| c * color)
    }
}
