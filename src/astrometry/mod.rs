//! # Astrometric refinement
//!
//! Iteratively improves the WCS solution of an image by matching its detections with a
//! reference catalog and refitting the solution from the matched pairs.
//!
//! ## Overview
//!
//! The refiner keeps a **working copy** of the object sky positions, initialised from
//! the guess WCS when one is given and from the objects' own positions otherwise.
//! Each of the `n_iterations` passes then:
//!
//! 1. matches the working positions with the catalog, either through the photometric
//!    match (pairs consistent with a common zero point) or by position alone,
//! 2. stops with "no solution" when fewer than `min_matches` pairs are found,
//! 3. fits a new [`WcsSolution`] of the requested order with a [`WcsFitter`],
//! 4. recomputes the working positions from the pixels through the new solution when
//!    `update` is set.
//!
//! The number of passes is fixed, there is no convergence test. The solution of the
//! last pass is returned with per-pass diagnostics.
//!
//! With [`RefinementMethod::External`] the loop is bypassed entirely and the whole
//! field is handed to an [`ExternalSolver`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use skypipe::astrometry::{refine_astrometry, AstrometryParams, RefinementMethod};
//! use skypipe::matching::KdTreeMatcher;
//! use skypipe::wcs::LinearWcsFitter;
//! # use skypipe::tables::{CatalogTable, ObjectTable};
//! # let objects: ObjectTable = unimplemented!();
//! # let catalog: CatalogTable = unimplemented!();
//!
//! let params = AstrometryParams::builder()
//!     .sr(5.0 / 3600.0)
//!     .order(2)
//!     .build()
//!     .unwrap();
//!
//! let fitter = LinearWcsFitter::new();
//! let solution = refine_astrometry(
//!     &KdTreeMatcher,
//!     &objects,
//!     &catalog,
//!     None,
//!     &params,
//!     &RefinementMethod::Iterative(&fitter),
//! )
//! .unwrap();
//! ```
pub mod refine;

use std::cmp::Ordering::Greater;
use std::fmt;

use crate::{
    constants::{ArcSec, Degree, DEFAULT_ASTROMETRY_RADIUS},
    pipeline_errors::PipelineError,
    tables::CatalogColumns,
    wcs::{ExternalSolver, WcsFitter, WcsSolution},
};

pub use refine::{refine_astrometry, refine_astrometry_in_place};

/// Strategy used to produce the refined solution.
#[derive(Clone, Copy)]
pub enum RefinementMethod<'a> {
    /// Match, fit and reproject in a loop with the given fitter.
    Iterative(&'a dyn WcsFitter),
    /// Delegate the whole field to an external solver.
    External(&'a dyn ExternalSolver),
}

impl RefinementMethod<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            RefinementMethod::Iterative(_) => "iterative",
            RefinementMethod::External(_) => "external",
        }
    }
}

impl fmt::Debug for RefinementMethod<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefinementMethod::{}", self.name())
    }
}

/// Diagnostics of one refinement pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    pub matches: usize,
    pub rms: ArcSec,
}

/// Refined solution with the diagnostics of every pass.
///
/// `iterations` is empty for solutions produced by an external solver.
#[derive(Debug, Clone, PartialEq)]
pub struct AstrometricSolution {
    pub wcs: WcsSolution,
    pub iterations: Vec<IterationReport>,
}

/// Configuration of the astrometric refinement.
///
/// # Fields
///
/// * `sr` - Matching radius, degrees (default 10″)
/// * `order` - Polynomial order of the fitted solution (default 0, linear)
/// * `n_iterations` - Number of match/fit passes (default 3)
/// * `use_photometry` - Match through the photometric fit rather than by position
/// * `min_matches` - Minimum number of pairs per pass (default 5)
/// * `update` - Reproject working positions after each pass, and the caller's table
///   in [`refine_astrometry_in_place`]
/// * `columns` - Catalog column labels (`V` magnitude by default)
#[derive(Debug, Clone, PartialEq)]
pub struct AstrometryParams {
    pub sr: Degree,
    pub order: usize,
    pub n_iterations: usize,
    pub use_photometry: bool,
    pub min_matches: usize,
    pub update: bool,
    pub columns: CatalogColumns,
}

impl Default for AstrometryParams {
    fn default() -> Self {
        AstrometryParams {
            sr: DEFAULT_ASTROMETRY_RADIUS,
            order: 0,
            n_iterations: 3,
            use_photometry: true,
            min_matches: 5,
            update: true,
            columns: CatalogColumns::astrometry(),
        }
    }
}

impl AstrometryParams {
    pub fn builder() -> AstrometryParamsBuilder {
        AstrometryParamsBuilder::default()
    }
}

impl fmt::Display for AstrometryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 36;
            writeln!(f, "Astrometric refinement parameters")?;
            writeln!(f, "---------------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            line!("sr             = {:.2}\"", self.sr * 3600.0, "Matching radius")?;
            line!("order          = {}", self.order, "Polynomial order of the solution")?;
            line!("n_iterations   = {}", self.n_iterations, "Match/fit passes")?;
            line!("use_photometry = {}", self.use_photometry, "Photometric matching")?;
            line!("min_matches    = {}", self.min_matches, "Minimum pairs per pass")?;
            line!("update         = {}", self.update, "Reproject after each pass")?;
            line!("ra/dec columns = {}", format!("{}/{}", self.columns.ra, self.columns.dec), "Catalog position")?;
            line!("mag column     = {}", self.columns.mag, "Catalog magnitude")?;
            Ok(())
        } else {
            write!(
                f,
                "AstrometryParams(sr={:.2}\", order={}, n_iterations={}, use_photometry={}, min_matches={}, update={})",
                self.sr * 3600.0,
                self.order,
                self.n_iterations,
                self.use_photometry,
                self.min_matches,
                self.update
            )
        }
    }
}

/// Validating builder of [`AstrometryParams`].
#[derive(Debug, Clone, Default)]
pub struct AstrometryParamsBuilder {
    params: AstrometryParams,
}

impl AstrometryParamsBuilder {
    pub fn sr(mut self, v: Degree) -> Self {
        self.params.sr = v;
        self
    }

    pub fn order(mut self, v: usize) -> Self {
        self.params.order = v;
        self
    }

    pub fn n_iterations(mut self, v: usize) -> Self {
        self.params.n_iterations = v;
        self
    }

    pub fn use_photometry(mut self, v: bool) -> Self {
        self.params.use_photometry = v;
        self
    }

    pub fn min_matches(mut self, v: usize) -> Self {
        self.params.min_matches = v;
        self
    }

    pub fn update(mut self, v: bool) -> Self {
        self.params.update = v;
        self
    }

    pub fn columns(mut self, v: CatalogColumns) -> Self {
        self.params.columns = v;
        self
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `sr > 0`, finite.
    /// * `n_iterations >= 1`.
    /// * `min_matches >= 1`.
    pub fn build(self) -> Result<AstrometryParams, PipelineError> {
        let p = &self.params;
        if p.sr.partial_cmp(&0.0) != Some(Greater) || !p.sr.is_finite() {
            return Err(PipelineError::InvalidParameter(
                "sr must be finite and > 0".into(),
            ));
        }
        if p.n_iterations == 0 {
            return Err(PipelineError::InvalidParameter(
                "n_iterations must be >= 1".into(),
            ));
        }
        if p.min_matches == 0 {
            return Err(PipelineError::InvalidParameter(
                "min_matches must be >= 1".into(),
            ));
        }
        Ok(self.params)
    }
}

#[cfg(test)]
mod astrometry_params_test {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = AstrometryParams::default();
        assert_eq!(p.n_iterations, 3);
        assert_eq!(p.min_matches, 5);
        assert_eq!(p.columns.mag, "V");
        assert!(p.use_photometry && p.update);
    }

    #[test]
    fn test_builder_validation() {
        assert!(AstrometryParams::builder().sr(0.0).build().is_err());
        assert!(AstrometryParams::builder().sr(f64::INFINITY).build().is_err());
        assert!(AstrometryParams::builder().n_iterations(0).build().is_err());
        assert!(AstrometryParams::builder().min_matches(0).build().is_err());
        let p = AstrometryParams::builder().order(2).build().unwrap();
        assert_eq!(p.order, 2);
    }

    #[test]
    fn test_display() {
        let p = AstrometryParams::default();
        let text = format!("{p:#}");
        assert!(text.contains("n_iterations   = 3"));
        assert!(text.contains("RAJ2000/DEJ2000"));
        assert!(format!("{p}").starts_with("AstrometryParams(sr=10.00\""));
    }
}
