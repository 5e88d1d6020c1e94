//! Small dense least-squares helpers shared by the WCS and photometric fits.
use nalgebra::{DMatrix, DVector};

/// Ratio below which a singular value is treated as zero.
const RCOND: f64 = 1e-12;

/// Exponents `(p, q)` of the monomials `x^p y^q` with `p + q <= order`.
///
/// Monomials are sorted by total degree, then by descending power of `x`, so that the
/// constant term comes first and the linear terms `x`, `y` follow.
pub(crate) fn polynomial_terms(order: usize) -> Vec<(usize, usize)> {
    (0..=order)
        .flat_map(|degree| (0..=degree).rev().map(move |p| (p, degree - p)))
        .collect()
}

/// Evaluate the monomials of [`polynomial_terms`] at `(x, y)`.
pub(crate) fn monomials(terms: &[(usize, usize)], x: f64, y: f64) -> impl Iterator<Item = f64> + '_ {
    terms
        .iter()
        .map(move |&(p, q)| x.powi(p as i32) * y.powi(q as i32))
}

/// Solve `min Σ w_i (A_i · c - b_i)²` through the SVD of the weighted design matrix.
///
/// Return
/// ------
/// * The coefficients, or `None` when the system is underdetermined, rank deficient
///   or not finite.
pub(crate) fn weighted_least_squares(
    design: &DMatrix<f64>,
    rhs: &DVector<f64>,
    weights: &DVector<f64>,
) -> Option<DVector<f64>> {
    let (n_rows, n_cols) = design.shape();
    if n_rows < n_cols || n_cols == 0 || rhs.len() != n_rows || weights.len() != n_rows {
        return None;
    }

    let mut a = design.clone();
    let mut b = rhs.clone();
    for (i, &w) in weights.iter().enumerate() {
        if !(w.is_finite() && w >= 0.0) {
            return None;
        }
        let sw = w.sqrt();
        a.row_mut(i).scale_mut(sw);
        b[i] *= sw;
    }

    let svd = a.svd(true, true);
    let s_max = svd.singular_values.max();
    let s_min = svd.singular_values.min();
    if !s_max.is_finite() || s_max <= 0.0 || s_min <= RCOND * s_max {
        return None;
    }

    let solution = svd.solve(&b, RCOND * s_max).ok()?;
    solution.iter().all(|c| c.is_finite()).then_some(solution)
}

#[cfg(test)]
mod lsq_test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_polynomial_terms() {
        assert_eq!(polynomial_terms(0), vec![(0, 0)]);
        assert_eq!(
            polynomial_terms(2),
            vec![(0, 0), (1, 0), (0, 1), (2, 0), (1, 1), (0, 2)]
        );
        assert_eq!(polynomial_terms(3).len(), 10);
    }

    #[test]
    fn test_weighted_line() {
        // y = 2 + 3x, one outlier with a vanishing weight
        let x = [0.0, 1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 5.0, 8.0, 11.0, 100.0];
        let design = DMatrix::from_fn(5, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
        let rhs = DVector::from_column_slice(&y);
        let weights = DVector::from_column_slice(&[1.0, 1.0, 1.0, 1.0, 0.0]);

        let c = weighted_least_squares(&design, &rhs, &weights).unwrap();
        assert_relative_eq!(c[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(c[1], 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_singular() {
        let design = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let rhs = DVector::from_column_slice(&[1.0, 2.0, 3.0]);
        let weights = DVector::from_element(3, 1.0);
        assert!(weighted_least_squares(&design, &rhs, &weights).is_none());

        let design = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let rhs = DVector::from_column_slice(&[1.0]);
        let weights = DVector::from_element(1, 1.0);
        assert!(weighted_least_squares(&design, &rhs, &weights).is_none());
    }
}
