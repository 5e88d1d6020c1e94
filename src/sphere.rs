//! Spherical geometry helpers.
//!
//! Positions are exchanged in **degrees** at the public boundary of every function in
//! this module; radians only appear internally. The gnomonic (TAN) projection follows
//! Calabretta & Greisen (2002), FITS WCS Paper II, §5.1.1, with intermediate
//! coordinates (ξ, η) expressed in degrees as in FITS `CDi_j` conventions.

use nalgebra::Vector3;

use crate::constants::{Degree, RADEG};

/// Unit vector pointing at `(ra, dec)`.
#[inline]
pub fn radec_to_unit(ra: Degree, dec: Degree) -> Vector3<f64> {
    let (sin_ra, cos_ra) = (ra * RADEG).sin_cos();
    let (sin_dec, cos_dec) = (dec * RADEG).sin_cos();
    Vector3::new(cos_dec * cos_ra, cos_dec * sin_ra, sin_dec)
}

/// Sky position of a (possibly non-unit) direction vector, ra wrapped to `[0, 360)`.
#[inline]
pub fn unit_to_radec(v: &Vector3<f64>) -> (Degree, Degree) {
    let norm = v.norm();
    let dec = (v.z / norm).clamp(-1.0, 1.0).asin() / RADEG;
    let ra = wrap_ra(v.y.atan2(v.x) / RADEG);
    (ra, dec)
}

/// Wrap a right ascension to `[0, 360)`.
#[inline]
pub fn wrap_ra(ra: Degree) -> Degree {
    let wrapped = ra.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Great-circle separation between two positions.
///
/// Uses the Vincenty formula, accurate at every separation including antipodes
/// and arcsecond scales.
pub fn angular_separation(ra1: Degree, dec1: Degree, ra2: Degree, dec2: Degree) -> Degree {
    let dra = (ra2 - ra1) * RADEG;
    let (sin_d1, cos_d1) = (dec1 * RADEG).sin_cos();
    let (sin_d2, cos_d2) = (dec2 * RADEG).sin_cos();
    let (sin_dra, cos_dra) = dra.sin_cos();

    let num1 = cos_d2 * sin_dra;
    let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_dra;
    let denom = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_dra;

    num1.hypot(num2).atan2(denom) / RADEG
}

/// Squared chord length between two unit vectors separated by `angle`.
#[inline]
pub fn chord_sq(angle: Degree) -> f64 {
    let half = 0.5 * angle * RADEG;
    let chord = 2.0 * half.sin();
    chord * chord
}

/// Forward gnomonic projection of `(ra, dec)` onto the plane tangent at `crval`.
///
/// Returns `(ξ, η)` in degrees, or `None` when the point lies on or behind the
/// tangent plane.
pub fn tan_project(ra: Degree, dec: Degree, crval: (Degree, Degree)) -> Option<(f64, f64)> {
    let da = (ra - crval.0) * RADEG;
    let (sin_dec, cos_dec) = (dec * RADEG).sin_cos();
    let (sin_dec0, cos_dec0) = (crval.1 * RADEG).sin_cos();
    let (sin_da, cos_da) = da.sin_cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }

    let xi = cos_dec * sin_da / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    Some((xi / RADEG, eta / RADEG))
}

/// Inverse gnomonic projection of tangent-plane coordinates `(ξ, η)` (degrees).
pub fn tan_deproject(xi: f64, eta: f64, crval: (Degree, Degree)) -> (Degree, Degree) {
    let xi = xi * RADEG;
    let eta = eta * RADEG;
    let (sin_dec0, cos_dec0) = (crval.1 * RADEG).sin_cos();

    let denom = cos_dec0 - eta * sin_dec0;
    let ra = crval.0 + xi.atan2(denom) / RADEG;
    let dec = (sin_dec0 + eta * cos_dec0).atan2(xi.hypot(denom)) / RADEG;
    (wrap_ra(ra), dec)
}

/// Smallest cone containing a set of positions, used to scope region queries.
///
/// The center is the normalized mean of the unit vectors; the radius is the largest
/// separation from that center. Non-finite positions are ignored.
///
/// Return
/// ------
/// * `((ra, dec), radius)` in degrees, or `None` when no finite position is given
///   or the positions average out to the null vector.
pub fn bounding_cone(ra: &[Degree], dec: &[Degree]) -> Option<((Degree, Degree), Degree)> {
    let finite = || {
        ra.iter()
            .zip(dec)
            .filter(|(r, d)| r.is_finite() && d.is_finite())
    };

    let sum = finite().fold(Vector3::zeros(), |acc, (&r, &d)| acc + radec_to_unit(r, d));
    if sum.norm() < 1e-12 {
        return None;
    }

    let center = unit_to_radec(&sum);
    let radius = finite()
        .map(|(&r, &d)| angular_separation(center.0, center.1, r, d))
        .fold(0.0, f64::max);
    Some((center, radius))
}

#[cfg(test)]
mod sphere_test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::constants::ARCSEC;

    #[test]
    fn test_angular_separation() {
        assert_relative_eq!(angular_separation(10.0, 20.0, 10.0, 21.0), 1.0, epsilon = 1e-12);
        assert_relative_eq!(angular_separation(0.0, 0.0, 180.0, 0.0), 180.0, epsilon = 1e-12);
        // across the ra = 0 seam
        assert_relative_eq!(
            angular_separation(359.9999, 0.0, 0.0001, 0.0),
            0.0002,
            epsilon = 1e-12
        );
        // meridians converge at the pole
        assert_relative_eq!(angular_separation(0.0, 90.0, 123.0, 90.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(
            angular_separation(10.0, 20.0, 10.0, 20.0 + ARCSEC),
            ARCSEC,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_unit_vector_roundtrip() {
        for &(ra, dec) in &[(0.0, 0.0), (359.5, -45.0), (123.4, 89.0), (270.0, -12.5)] {
            let (r, d) = unit_to_radec(&radec_to_unit(ra, dec));
            assert_relative_eq!(r, ra, epsilon = 1e-10);
            assert_relative_eq!(d, dec, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_chord_matches_unit_vector_distance() {
        let a = radec_to_unit(10.0, 20.0);
        let b = radec_to_unit(10.5, 20.3);
        let sep = angular_separation(10.0, 20.0, 10.5, 20.3);
        assert_relative_eq!((a - b).norm_squared(), chord_sq(sep), epsilon = 1e-14);
    }

    #[test]
    fn test_tan_projection_roundtrip() {
        let crval = (359.8, 30.0);
        for &(ra, dec) in &[(359.5, 30.2), (0.3, 29.5), (359.8, 30.0)] {
            let (xi, eta) = tan_project(ra, dec, crval).unwrap();
            let (r, d) = tan_deproject(xi, eta, crval);
            assert_relative_eq!(angular_separation(r, d, ra, dec), 0.0, epsilon = 1e-10);
        }
        assert!(tan_project(179.8, -30.0, crval).is_none());
    }

    #[test]
    fn test_bounding_cone() {
        let ra = [359.9, 0.1, f64::NAN];
        let dec = [0.0, 0.0, 0.0];
        let ((cra, cdec), radius) = bounding_cone(&ra, &dec).unwrap();
        assert!(cra < 1e-9 || cra > 360.0 - 1e-9);
        assert_relative_eq!(cdec, 0.0, epsilon = 1e-12);
        assert_relative_eq!(radius, 0.1, epsilon = 1e-9);
        assert!(bounding_cone(&[], &[]).is_none());
    }
}
