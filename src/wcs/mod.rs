//! # World Coordinate System solutions
//!
//! [`WcsSolution`] maps 0-based pixel positions to sky positions through a gnomonic
//! (TAN) projection:
//!
//! ```text
//! (x, y) ─▶ (u, v) = (x, y) - crpix
//!        ─▶ (u', v') = (u + A(u, v), v + B(u, v))      optional pixel distortion
//!        ─▶ (ξ, η)  = CD · (u', v')                    degrees
//!        ─▶ (ξ', η') = TPV(ξ, η)                       optional TPV distortion
//!        ─▶ (ra, dec) = TAN⁻¹(ξ', η'; crval)
//! ```
//!
//! The pixel distortion `A`, `B` holds the polynomial terms of total degree
//! `2..=order` produced by [`LinearWcsFitter`]; the TPV distortion comes from the
//! external solver headers. A solution is immutable: every refinement step builds a new
//! one.
//!
//! ## Submodules
//!
//! - [`tpv`]: TPV polynomial distortion.
//! - [`fit`]: the [`WcsFitter`] trait and its least-squares implementation.
//! - [`scamp`]: the [`ExternalSolver`] trait and the SCAMP bridge.
pub mod fit;
pub mod scamp;
pub mod tpv;

use std::fmt;

use nalgebra::{Matrix2, Vector2};

use crate::{
    constants::{Degree, Pixel},
    lsq::{monomials, polynomial_terms},
    pipeline_errors::PipelineError,
    sphere::{tan_deproject, tan_project},
};

pub use fit::{LinearWcsFitter, WcsFitter};
pub use scamp::{ExternalSolver, LdacExporter, ScampSolver, SolverInputs};
pub use tpv::TpvDistortion;

/// Polynomial distortion applied to pixel offsets before the CD matrix.
///
/// `a[k]` and `b[k]` multiply the monomial `u^p v^q` of the k-th term of total degree
/// `2..=order`, in the order of [`PixelDistortion::terms`].
#[derive(Debug, Clone, PartialEq)]
pub struct PixelDistortion {
    order: usize,
    a: Vec<f64>,
    b: Vec<f64>,
}

impl PixelDistortion {
    /// Build a distortion of `order` from its coefficients.
    pub fn new(order: usize, a: Vec<f64>, b: Vec<f64>) -> Result<Self, PipelineError> {
        let n = Self::terms(order).len();
        if order < 2 {
            return Err(PipelineError::InvalidParameter(format!(
                "pixel distortion order must be >= 2, got {order}"
            )));
        }
        if a.len() != n {
            return Err(PipelineError::mismatched("distortion A", n, a.len()));
        }
        if b.len() != n {
            return Err(PipelineError::mismatched("distortion B", n, b.len()));
        }
        Ok(PixelDistortion { order, a, b })
    }

    /// Exponents `(p, q)` of the distortion terms of `order`.
    pub fn terms(order: usize) -> Vec<(usize, usize)> {
        polynomial_terms(order)
            .into_iter()
            .filter(|(p, q)| p + q >= 2)
            .collect()
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Distortion offsets `(A(u, v), B(u, v))`.
    pub fn offsets(&self, u: f64, v: f64) -> (f64, f64) {
        let terms = Self::terms(self.order);
        monomials(&terms, u, v)
            .zip(self.a.iter().zip(&self.b))
            .fold((0.0, 0.0), |(da, db), (m, (a, b))| (da + a * m, db + b * m))
    }
}

/// TAN world coordinate system with optional distortion.
///
/// # Fields
///
/// * `crval` - Tangent point `(ra, dec)` in degrees
/// * `crpix` - Reference pixel, 0-based
/// * `cd` - Linear transform from pixel offsets to intermediate coordinates, degrees/pixel
/// * `distortion` - Optional pixel-space polynomial distortion
/// * `tpv` - Optional TPV distortion of the intermediate coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct WcsSolution {
    crval: (Degree, Degree),
    crpix: (Pixel, Pixel),
    cd: Matrix2<f64>,
    cd_inv: Matrix2<f64>,
    distortion: Option<PixelDistortion>,
    tpv: Option<TpvDistortion>,
}

impl WcsSolution {
    /// Build a linear TAN solution.
    ///
    /// Return
    /// ------
    /// * [`PipelineError::InvalidParameter`] when the CD matrix is singular or not finite.
    pub fn new(
        crval: (Degree, Degree),
        crpix: (Pixel, Pixel),
        cd: Matrix2<f64>,
    ) -> Result<Self, PipelineError> {
        let cd_inv = cd
            .try_inverse()
            .filter(|m| m.iter().all(|c| c.is_finite()))
            .ok_or_else(|| PipelineError::InvalidParameter("singular CD matrix".into()))?;

        Ok(WcsSolution {
            crval,
            crpix,
            cd,
            cd_inv,
            distortion: None,
            tpv: None,
        })
    }

    /// Build a linear solution from a pixel scale and a position angle.
    ///
    /// Arguments
    /// ---------
    /// * `scale`: degrees per pixel
    /// * `rotation`: rotation of the pixel grid, degrees counter-clockwise
    /// * `flip`: mirror the x axis (the usual orientation with East to the left)
    pub fn from_scale_rotation(
        crval: (Degree, Degree),
        crpix: (Pixel, Pixel),
        scale: Degree,
        rotation: Degree,
        flip: bool,
    ) -> Result<Self, PipelineError> {
        let (s, c) = rotation.to_radians().sin_cos();
        let parity = if flip { -1.0 } else { 1.0 };
        let cd = Matrix2::new(parity * scale * c, -scale * s, parity * scale * s, scale * c);
        Self::new(crval, crpix, cd)
    }

    pub fn with_distortion(mut self, distortion: PixelDistortion) -> Self {
        self.distortion = Some(distortion);
        self
    }

    pub fn with_tpv(mut self, tpv: TpvDistortion) -> Self {
        self.tpv = (!tpv.is_identity()).then_some(tpv);
        self
    }

    pub fn crval(&self) -> (Degree, Degree) {
        self.crval
    }

    pub fn crpix(&self) -> (Pixel, Pixel) {
        self.crpix
    }

    pub fn cd(&self) -> &Matrix2<f64> {
        &self.cd
    }

    pub fn distortion(&self) -> Option<&PixelDistortion> {
        self.distortion.as_ref()
    }

    pub fn tpv(&self) -> Option<&TpvDistortion> {
        self.tpv.as_ref()
    }

    /// Polynomial order of the solution, 0 for a purely linear one.
    pub fn order(&self) -> usize {
        let pixel = self.distortion.as_ref().map_or(0, PixelDistortion::order);
        let tpv = self.tpv.as_ref().map_or(0, TpvDistortion::order);
        pixel.max(tpv)
    }

    /// Mean pixel scale in degrees per pixel.
    pub fn pixel_scale(&self) -> Degree {
        self.cd.determinant().abs().sqrt()
    }

    /// Intermediate coordinates `(ξ, η)` in degrees before the TPV step.
    fn pixel_to_intermediate(&self, x: Pixel, y: Pixel) -> Vector2<f64> {
        let u = x - self.crpix.0;
        let v = y - self.crpix.1;
        let (du, dv) = self
            .distortion
            .as_ref()
            .map_or((0.0, 0.0), |d| d.offsets(u, v));
        self.cd * Vector2::new(u + du, v + dv)
    }

    /// Sky position of a pixel.
    pub fn pixel_to_world(&self, x: Pixel, y: Pixel) -> (Degree, Degree) {
        let p = self.pixel_to_intermediate(x, y);
        let (xi, eta) = match &self.tpv {
            Some(tpv) => tpv.apply(p.x, p.y),
            None => (p.x, p.y),
        };
        tan_deproject(xi, eta, self.crval)
    }

    /// Pixel position of a sky position.
    ///
    /// The TPV and pixel distortions are inverted with Newton iterations started from
    /// the linear solution.
    ///
    /// Return
    /// ------
    /// * `None` when the position lies behind the tangent plane or the inversion does
    ///   not converge.
    pub fn world_to_pixel(&self, ra: Degree, dec: Degree) -> Option<(Pixel, Pixel)> {
        const MAX_ITER: usize = 50;
        const TOL: Pixel = 1e-10;
        const STEP: Pixel = 1e-3;

        let (xi, eta) = tan_project(ra, dec, self.crval)?;
        let (xi, eta) = match &self.tpv {
            Some(tpv) => tpv.invert(xi, eta)?,
            None => (xi, eta),
        };

        let target = Vector2::new(xi, eta);
        let linear = self.cd_inv * target;
        let mut p = Vector2::new(linear.x + self.crpix.0, linear.y + self.crpix.1);
        if self.distortion.is_none() {
            return Some((p.x, p.y));
        }

        for _ in 0..MAX_ITER {
            let residual = self.pixel_to_intermediate(p.x, p.y) - target;
            let fx = (self.pixel_to_intermediate(p.x + STEP, p.y)
                - self.pixel_to_intermediate(p.x - STEP, p.y))
                / (2.0 * STEP);
            let fy = (self.pixel_to_intermediate(p.x, p.y + STEP)
                - self.pixel_to_intermediate(p.x, p.y - STEP))
                / (2.0 * STEP);
            let jacobian = Matrix2::from_columns(&[fx, fy]);
            let step = jacobian.try_inverse()? * residual;
            p -= step;
            if step.norm() < TOL {
                return Some((p.x, p.y));
            }
        }

        let residual = self.cd_inv * (self.pixel_to_intermediate(p.x, p.y) - target);
        (residual.norm() < 1e-6).then_some((p.x, p.y))
    }
}

impl fmt::Display for WcsSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TAN WCS crval=({:.6}, {:.6}) crpix=({:.2}, {:.2}) scale={:.4}\"/pix order={}",
            self.crval.0,
            self.crval.1,
            self.crpix.0,
            self.crpix.1,
            self.pixel_scale() * 3600.0,
            self.order()
        )?;
        if f.alternate() {
            writeln!(f)?;
            writeln!(f, "  CD1_1 = {:+.10e}  CD1_2 = {:+.10e}", self.cd[(0, 0)], self.cd[(0, 1)])?;
            write!(f, "  CD2_1 = {:+.10e}  CD2_2 = {:+.10e}", self.cd[(1, 0)], self.cd[(1, 1)])?;
        }
        Ok(())
    }
}
