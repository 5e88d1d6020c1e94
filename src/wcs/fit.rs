//! Least-squares fitting of a TAN solution from matched pixel/sky pairs.
use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use tracing::debug;

use crate::{
    constants::{Degree, Pixel},
    lsq::{monomials, polynomial_terms, weighted_least_squares},
    pipeline_errors::PipelineError,
    sphere::{bounding_cone, tan_deproject, tan_project},
    wcs::{PixelDistortion, WcsSolution},
};

/// Maximum number of tangent point re-centering passes.
const MAX_RECENTER: usize = 10;

/// Constant term (degrees) below which the tangent point is considered centered.
const RECENTER_TOL: Degree = 1e-12;

/// Fit a WCS solution from matched pairs.
pub trait WcsFitter {
    /// Fit a solution mapping `(x, y)` to `(ra, dec)`.
    ///
    /// Arguments
    /// ---------
    /// * `x`, `y`: pixel positions of the matched objects
    /// * `ra`, `dec`: sky positions of their catalog counterparts, degrees
    /// * `order`: polynomial order of the solution, 0 for linear
    /// * `initial`: optional solution providing the reference pixel and tangent point
    ///
    /// Return
    /// ------
    /// * `Ok(None)` for too few pairs or a degenerate system,
    ///   [`PipelineError::MismatchedLength`] for inconsistent inputs.
    fn fit_wcs(
        &self,
        x: &[Pixel],
        y: &[Pixel],
        ra: &[Degree],
        dec: &[Degree],
        order: usize,
        initial: Option<&WcsSolution>,
    ) -> Result<Option<WcsSolution>, PipelineError>;
}

/// [`WcsFitter`] solving ξ and η as polynomials of the pixel offsets.
///
/// Both tangent-plane coordinates are fitted as full polynomials of total degree
/// `max(order, 1)` in `(x - crpix, y - crpix)`. The linear part becomes the CD matrix,
/// the higher terms the pixel distortion. The tangent point is moved onto the fitted
/// constant term and the fit repeated until that term vanishes, so that `crval` stays
/// the sky position of `crpix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearWcsFitter;

impl LinearWcsFitter {
    pub fn new() -> Self {
        LinearWcsFitter
    }
}

/// Coefficients of one tangent-plane fit.
struct PlaneFit {
    xi: DVector<f64>,
    eta: DVector<f64>,
}

fn fit_plane(
    u: &[f64],
    v: &[f64],
    ra: &[Degree],
    dec: &[Degree],
    crval: (Degree, Degree),
    terms: &[(usize, usize)],
    norm: f64,
) -> Option<PlaneFit> {
    let n = u.len();
    let mut xi = DVector::zeros(n);
    let mut eta = DVector::zeros(n);
    for i in 0..n {
        let (a, b) = tan_project(ra[i], dec[i], crval)?;
        xi[i] = a;
        eta[i] = b;
    }

    let mut design = DMatrix::zeros(n, terms.len());
    for i in 0..n {
        for (j, m) in monomials(terms, u[i] / norm, v[i] / norm).enumerate() {
            design[(i, j)] = m;
        }
    }
    let weights = DVector::from_element(n, 1.0);

    let mut cx = weighted_least_squares(&design, &xi, &weights)?;
    let mut cy = weighted_least_squares(&design, &eta, &weights)?;
    for (j, &(p, q)) in terms.iter().enumerate() {
        let scale = norm.powi((p + q) as i32);
        cx[j] /= scale;
        cy[j] /= scale;
    }
    Some(PlaneFit { xi: cx, eta: cy })
}

impl WcsFitter for LinearWcsFitter {
    fn fit_wcs(
        &self,
        x: &[Pixel],
        y: &[Pixel],
        ra: &[Degree],
        dec: &[Degree],
        order: usize,
        initial: Option<&WcsSolution>,
    ) -> Result<Option<WcsSolution>, PipelineError> {
        let n = x.len();
        for (name, len) in [("fit y", y.len()), ("fit ra", ra.len()), ("fit dec", dec.len())] {
            if len != n {
                return Err(PipelineError::mismatched(name, n, len));
            }
        }

        let degree = order.max(1);
        let terms = polynomial_terms(degree);
        if n < terms.len().max(3) {
            debug!(n_pairs = n, n_terms = terms.len(), "too few pairs for WCS fit");
            return Ok(None);
        }

        let crpix = match initial {
            Some(wcs) => wcs.crpix(),
            None => (statistical::mean(x), statistical::mean(y)),
        };
        let mut crval = match initial {
            Some(wcs) => wcs.crval(),
            None => match bounding_cone(ra, dec) {
                Some((center, _)) => center,
                None => return Ok(None),
            },
        };

        let u: Vec<f64> = x.iter().map(|&x| x - crpix.0).collect();
        let v: Vec<f64> = y.iter().map(|&y| y - crpix.1).collect();
        let norm = u
            .iter()
            .chain(&v)
            .fold(0.0_f64, |acc, d| acc.max(d.abs()))
            .max(1.0);

        let mut plane = None;
        for pass in 0..MAX_RECENTER {
            let Some(fit) = fit_plane(&u, &v, ra, dec, crval, &terms, norm) else {
                debug!(pass, "degenerate WCS fit");
                return Ok(None);
            };
            let offset = fit.xi[0].hypot(fit.eta[0]);
            if offset < RECENTER_TOL || pass + 1 == MAX_RECENTER {
                plane = Some(fit);
                break;
            }
            crval = tan_deproject(fit.xi[0], fit.eta[0], crval);
        }
        let Some(plane) = plane else {
            return Ok(None);
        };

        let cd = Matrix2::new(plane.xi[1], plane.xi[2], plane.eta[1], plane.eta[2]);
        let Ok(mut wcs) = WcsSolution::new(crval, crpix, cd) else {
            debug!("singular CD matrix from WCS fit");
            return Ok(None);
        };

        if order >= 2 {
            let cd_inv = wcs.cd_inv;
            let (a, b): (Vec<f64>, Vec<f64>) = (3..terms.len())
                .map(|j| {
                    let d = cd_inv * Vector2::new(plane.xi[j], plane.eta[j]);
                    (d.x, d.y)
                })
                .unzip();
            wcs = wcs.with_distortion(PixelDistortion::new(order, a, b)?);
        }

        Ok(Some(wcs))
    }
}
