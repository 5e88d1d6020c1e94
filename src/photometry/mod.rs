//! # Photometric match-and-fit
//!
//! Cross-matches detected objects with a reference catalog and fits the photometric
//! zero point relating instrumental and catalog magnitudes:
//!
//! ```text
//! zero = cat_mag - obj_mag = ZP(x, y) [+ color_term · color]
//! ```
//!
//! `ZP` is a 2-D polynomial of total degree `spatial_order` in normalized pixel
//! coordinates (a constant for order 0). The fit is a Huber IRLS regression (or a
//! plain weighted least squares) with iterative sigma clipping of the outliers.
//!
//! ## Overview
//!
//! 1. Positional match through a [`SpatialMatcher`].
//! 2. Selection of the usable pairs (`idx0`): finite measurements, accepted object
//!    flags, clean catalog rows, bounded errors.
//! 3. Fit of the zero-point model on the good pairs, weights `1 / zero_err²`.
//! 4. Rejection of pairs whose normalized residual exceeds `threshold`, then refit,
//!    until the good set is stable or `max_iterations` is reached.
//!
//! The result is a [`PhotometricMatch`], or `None` when too few good pairs remain.
//! Nothing here writes to the object table: calibrated magnitudes are stored through
//! [`ObjectTable::apply_calibration`](crate::tables::ObjectTable::apply_calibration).
//!
//! ## Submodules
//!
//! - [`calibration`]: table-level entry points ([`calibrate_photometry`]).
//! - [`zero_point`]: the fitted [`ZeroPointModel`].
pub mod calibration;
mod regression;
pub mod zero_point;

use std::cmp::Ordering::{Equal, Greater};
use std::fmt;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info};

use crate::{
    constants::{Degree, Magnitude, Pixel, DEFAULT_PHOTOMETRY_RADIUS},
    matching::SpatialMatcher,
    pipeline_errors::PipelineError,
};

pub use calibration::{calibrate_photometry, calibrate_photometry_in_place, CalibrationParams};
pub use zero_point::ZeroPointModel;

/// Floor on the per-pair zero-point error, in magnitudes.
const MIN_ZERO_ERR: Magnitude = 1e-4;

/// Columns entering the photometric match.
///
/// The object slices must share one length, the catalog slices another. Optional
/// columns are `None` when not available.
#[derive(Debug, Clone, Copy)]
pub struct PhotometricInputs<'a> {
    pub obj_ra: &'a [Degree],
    pub obj_dec: &'a [Degree],
    pub obj_mag: &'a [Magnitude],
    pub obj_magerr: &'a [Magnitude],
    pub obj_flags: &'a [u32],
    pub obj_x: Option<&'a [Pixel]>,
    pub obj_y: Option<&'a [Pixel]>,
    pub cat_ra: &'a [Degree],
    pub cat_dec: &'a [Degree],
    pub cat_mag: &'a [Magnitude],
    pub cat_magerr: Option<&'a [Magnitude]>,
    pub cat_color: Option<&'a [Magnitude]>,
    pub cat_flags: Option<&'a [f64]>,
}

impl<'a> PhotometricInputs<'a> {
    /// Inputs with the required columns only.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        obj_ra: &'a [Degree],
        obj_dec: &'a [Degree],
        obj_mag: &'a [Magnitude],
        obj_magerr: &'a [Magnitude],
        obj_flags: &'a [u32],
        cat_ra: &'a [Degree],
        cat_dec: &'a [Degree],
        cat_mag: &'a [Magnitude],
    ) -> Self {
        PhotometricInputs {
            obj_ra,
            obj_dec,
            obj_mag,
            obj_magerr,
            obj_flags,
            obj_x: None,
            obj_y: None,
            cat_ra,
            cat_dec,
            cat_mag,
            cat_magerr: None,
            cat_color: None,
            cat_flags: None,
        }
    }

    pub fn with_obj_xy(mut self, x: &'a [Pixel], y: &'a [Pixel]) -> Self {
        self.obj_x = Some(x);
        self.obj_y = Some(y);
        self
    }

    pub fn with_cat_magerr(mut self, magerr: &'a [Magnitude]) -> Self {
        self.cat_magerr = Some(magerr);
        self
    }

    pub fn with_cat_color(mut self, color: &'a [Magnitude]) -> Self {
        self.cat_color = Some(color);
        self
    }

    pub fn with_cat_flags(mut self, flags: &'a [f64]) -> Self {
        self.cat_flags = Some(flags);
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let n_obj = self.obj_ra.len();
        let mut checks = vec![
            ("obj_dec", n_obj, self.obj_dec.len()),
            ("obj_mag", n_obj, self.obj_mag.len()),
            ("obj_magerr", n_obj, self.obj_magerr.len()),
            ("obj_flags", n_obj, self.obj_flags.len()),
        ];
        if let Some(x) = self.obj_x {
            checks.push(("obj_x", n_obj, x.len()));
        }
        if let Some(y) = self.obj_y {
            checks.push(("obj_y", n_obj, y.len()));
        }

        let n_cat = self.cat_ra.len();
        checks.push(("cat_dec", n_cat, self.cat_dec.len()));
        checks.push(("cat_mag", n_cat, self.cat_mag.len()));
        for (name, column) in [
            ("cat_magerr", self.cat_magerr),
            ("cat_color", self.cat_color),
            ("cat_flags", self.cat_flags),
        ] {
            if let Some(column) = column {
                checks.push((name, n_cat, column.len()));
            }
        }

        match checks.into_iter().find(|(_, expected, found)| expected != found) {
            Some((name, expected, found)) => Err(PipelineError::mismatched(name, expected, found)),
            None => Ok(()),
        }
    }
}

/// Configuration of the photometric match-and-fit.
///
/// # Fields
///
/// * `sr` - Matching radius, degrees (default 3″)
/// * `spatial_order` - Degree of the zero-point polynomial, 0 for a constant
/// * `threshold` - Rejection threshold in sigma, `None` disables clipping (default 5)
/// * `max_iterations` - Maximum number of fit/reject passes (default 10)
/// * `min_matches` - Minimum number of good pairs for a valid fit (default 3)
/// * `accept_flags` - Object flag bits tolerated in the fit (default none)
/// * `max_magerr` - Optional upper bound on object and catalog magnitude errors
/// * `robust` - Huber IRLS instead of plain weighted least squares (default true)
#[derive(Debug, Clone, PartialEq)]
pub struct PhotometryParams {
    pub sr: Degree,
    pub spatial_order: usize,
    pub threshold: Option<f64>,
    pub max_iterations: usize,
    pub min_matches: usize,
    pub accept_flags: u32,
    pub max_magerr: Option<Magnitude>,
    pub robust: bool,
}

impl Default for PhotometryParams {
    fn default() -> Self {
        PhotometryParams {
            sr: DEFAULT_PHOTOMETRY_RADIUS,
            spatial_order: 0,
            threshold: Some(5.0),
            max_iterations: 10,
            min_matches: 3,
            accept_flags: 0,
            max_magerr: None,
            robust: true,
        }
    }
}

impl PhotometryParams {
    pub fn builder() -> PhotometryParamsBuilder {
        PhotometryParamsBuilder::new()
    }
}

impl fmt::Display for PhotometryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let threshold = self
            .threshold
            .map_or("none".to_string(), |t| format!("{t:.1} sigma"));
        if f.alternate() {
            writeln!(f, "Photometric match parameters")?;
            writeln!(f, "----------------------------")?;
            writeln!(f, "  sr             = {:.2} arcsec", self.sr * 3600.0)?;
            writeln!(f, "  spatial_order  = {}", self.spatial_order)?;
            writeln!(f, "  threshold      = {threshold}")?;
            writeln!(f, "  max_iterations = {}", self.max_iterations)?;
            writeln!(f, "  min_matches    = {}", self.min_matches)?;
            writeln!(f, "  accept_flags   = {:#x}", self.accept_flags)?;
            writeln!(f, "  max_magerr     = {:?}", self.max_magerr)?;
            write!(f, "  robust         = {}", self.robust)
        } else {
            write!(
                f,
                "sr={:.2}\" order={} threshold={} min_matches={} robust={}",
                self.sr * 3600.0,
                self.spatial_order,
                threshold,
                self.min_matches,
                self.robust
            )
        }
    }
}

/// Validating builder of [`PhotometryParams`].
#[derive(Debug, Clone, Default)]
pub struct PhotometryParamsBuilder {
    params: PhotometryParams,
}

impl PhotometryParamsBuilder {
    pub fn new() -> Self {
        PhotometryParamsBuilder::default()
    }

    pub fn sr(mut self, v: Degree) -> Self {
        self.params.sr = v;
        self
    }

    pub fn spatial_order(mut self, v: usize) -> Self {
        self.params.spatial_order = v;
        self
    }

    pub fn threshold(mut self, v: Option<f64>) -> Self {
        self.params.threshold = v;
        self
    }

    pub fn max_iterations(mut self, v: usize) -> Self {
        self.params.max_iterations = v;
        self
    }

    pub fn min_matches(mut self, v: usize) -> Self {
        self.params.min_matches = v;
        self
    }

    pub fn accept_flags(mut self, v: u32) -> Self {
        self.params.accept_flags = v;
        self
    }

    pub fn max_magerr(mut self, v: Option<Magnitude>) -> Self {
        self.params.max_magerr = v;
        self
    }

    pub fn robust(mut self, v: bool) -> Self {
        self.params.robust = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `sr >= 0`, finite.
    /// * `threshold > 0` when set.
    /// * `max_iterations >= 1`, `min_matches >= 1`.
    /// * `max_magerr > 0` when set.
    pub fn build(self) -> Result<PhotometryParams, PipelineError> {
        let p = &self.params;
        if !Self::ge0(p.sr) || !p.sr.is_finite() {
            return Err(PipelineError::InvalidParameter(
                "sr must be finite and non-negative".into(),
            ));
        }
        if p.threshold.is_some_and(|t| !Self::gt0(t)) {
            return Err(PipelineError::InvalidParameter(
                "threshold must be > 0".into(),
            ));
        }
        if p.max_iterations == 0 {
            return Err(PipelineError::InvalidParameter(
                "max_iterations must be >= 1".into(),
            ));
        }
        if p.min_matches == 0 {
            return Err(PipelineError::InvalidParameter(
                "min_matches must be >= 1".into(),
            ));
        }
        if p.max_magerr.is_some_and(|m| !Self::gt0(m)) {
            return Err(PipelineError::InvalidParameter(
                "max_magerr must be > 0".into(),
            ));
        }
        Ok(self.params)
    }
}

/// Outcome of the photometric match-and-fit.
///
/// Every per-pair vector has one entry per matched pair, in matcher order, whether
/// the pair entered the fit or not.
///
/// # Fields
///
/// * `oidx`, `cidx` - Object and catalog row of each pair
/// * `dist` - Pair separation, degrees
/// * `idx` - Pairs kept by the final fit
/// * `idx0` - Pairs usable before any rejection
/// * `omag`, `omag_err`, `cmag`, `cmag_err` - Magnitudes of both sides
/// * `color` - Catalog color, 0 when no color column is given
/// * `zero`, `zero_err` - Per-pair zero point `cmag - omag` and its error
/// * `zero_model` - Model prediction for every pair, color term included
/// * `color_term` - Fitted color coefficient, if a color column was given
/// * `zero_point` - The fitted spatial zero point
/// * `params` - Raw model coefficients, spatial terms first
/// * `rms` - Standard deviation of the residuals of the good pairs
#[derive(Debug, Clone, PartialEq)]
pub struct PhotometricMatch {
    pub oidx: Vec<usize>,
    pub cidx: Vec<usize>,
    pub dist: Vec<Degree>,
    pub idx: Vec<bool>,
    pub idx0: Vec<bool>,
    pub omag: Vec<Magnitude>,
    pub omag_err: Vec<Magnitude>,
    pub cmag: Vec<Magnitude>,
    pub cmag_err: Vec<Magnitude>,
    pub color: Vec<Magnitude>,
    pub zero: Vec<Magnitude>,
    pub zero_err: Vec<Magnitude>,
    pub zero_model: Vec<Magnitude>,
    pub color_term: Option<f64>,
    pub zero_point: ZeroPointModel,
    pub params: Vec<f64>,
    pub rms: Magnitude,
}

impl PhotometricMatch {
    /// Number of pairs kept by the final fit.
    pub fn n_good(&self) -> usize {
        self.idx.iter().filter(|&&g| g).count()
    }

    /// Indices (into the pair vectors) of the pairs kept by the final fit.
    pub fn good_pairs(&self) -> Vec<usize> {
        self.idx
            .iter()
            .enumerate()
            .filter_map(|(k, &g)| g.then_some(k))
            .collect()
    }
}

/// Per-pair quantities gathered before fitting.
struct PairData {
    x: Vec<Pixel>,
    y: Vec<Pixel>,
    omag: Vec<Magnitude>,
    omag_err: Vec<Magnitude>,
    cmag: Vec<Magnitude>,
    cmag_err: Vec<Magnitude>,
    color: Vec<Magnitude>,
    zero: Vec<Magnitude>,
    zero_err: Vec<Magnitude>,
    usable: Vec<bool>,
}

fn gather_pairs(
    inputs: &PhotometricInputs<'_>,
    params: &PhotometryParams,
    oidx: &[usize],
    cidx: &[usize],
) -> PairData {
    let pick = |column: &[f64], idx: &[usize]| idx.iter().map(|&i| column[i]).collect::<Vec<_>>();
    let pick_or = |column: Option<&[f64]>, idx: &[usize], fallback: f64| match column {
        Some(c) => pick(c, idx),
        None => vec![fallback; idx.len()],
    };

    let x = pick_or(inputs.obj_x, oidx, 0.0);
    let y = pick_or(inputs.obj_y, oidx, 0.0);
    let omag = pick(inputs.obj_mag, oidx);
    let omag_err = pick(inputs.obj_magerr, oidx);
    let cmag = pick(inputs.cat_mag, cidx);
    let cmag_err = pick_or(inputs.cat_magerr, cidx, 0.0);
    let color = pick_or(inputs.cat_color, cidx, 0.0);
    let cflags = pick_or(inputs.cat_flags, cidx, 0.0);

    let zero: Vec<f64> = cmag.iter().zip(&omag).map(|(c, o)| c - o).collect();
    let zero_err: Vec<f64> = omag_err
        .iter()
        .zip(&cmag_err)
        .map(|(o, c)| o.hypot(*c))
        .collect();

    let usable = (0..oidx.len())
        .map(|k| {
            let flags = inputs.obj_flags[oidx[k]];
            let finite = [omag[k], omag_err[k], cmag[k], cmag_err[k], color[k], x[k], y[k]]
                .iter()
                .all(|v| v.is_finite());
            let errors_ok = params
                .max_magerr
                .map_or(true, |max| omag_err[k] <= max && cmag_err[k] <= max);
            finite && errors_ok && flags & !params.accept_flags == 0 && cflags[k] == 0.0
        })
        .collect();

    PairData {
        x,
        y,
        omag,
        omag_err,
        cmag,
        cmag_err,
        color,
        zero,
        zero_err,
        usable,
    }
}

/// Design matrix row of one pair: spatial monomials, then the color if fitted.
fn design_row(
    data: &PairData,
    k: usize,
    order: usize,
    center: (Pixel, Pixel),
    scale: Pixel,
    use_color: bool,
) -> Vec<f64> {
    let mut row = ZeroPointModel::spatial_terms(order, center, scale, data.x[k], data.y[k]);
    if use_color {
        row.push(data.color[k]);
    }
    row
}

/// Match objects with catalog stars and fit the photometric zero point.
///
/// Arguments
/// ---------
/// * `matcher`: the spatial matching primitive
/// * `inputs`: object and catalog columns
/// * `params`: match and fit configuration
///
/// Return
/// ------
/// * `Ok(Some(match))` on success,
/// * `Ok(None)` when fewer than `max(min_matches, n_params)` good pairs remain or the
///   fit is degenerate,
/// * an error for inconsistent column lengths, or when `spatial_order > 0` without
///   object pixel positions.
pub fn photometric_match(
    matcher: &dyn SpatialMatcher,
    inputs: &PhotometricInputs<'_>,
    params: &PhotometryParams,
) -> Result<Option<PhotometricMatch>, PipelineError> {
    inputs.validate()?;
    if params.spatial_order > 0 && (inputs.obj_x.is_none() || inputs.obj_y.is_none()) {
        return Err(PipelineError::InvalidParameter(
            "spatial zero point requires object pixel positions".into(),
        ));
    }

    let pairs = matcher.match_positions(
        inputs.obj_ra,
        inputs.obj_dec,
        inputs.cat_ra,
        inputs.cat_dec,
        params.sr,
    )?;
    let data = gather_pairs(inputs, params, &pairs.idx_a, &pairs.idx_b);

    let use_color = inputs.cat_color.is_some();
    let order = params.spatial_order;
    let n_params = ZeroPointModel::spatial_terms(order, (0.0, 0.0), 1.0, 0.0, 0.0).len()
        + usize::from(use_color);
    let needed = params.min_matches.max(n_params);

    let n_usable = data.usable.iter().filter(|&&u| u).count();
    debug!(
        n_pairs = pairs.len(),
        n_usable,
        sr_arcsec = params.sr * 3600.0,
        "photometric match"
    );

    let usable: Vec<usize> = (0..pairs.len()).filter(|&k| data.usable[k]).collect();
    let usable_x: Vec<Pixel> = usable.iter().map(|&k| data.x[k]).collect();
    let usable_y: Vec<Pixel> = usable.iter().map(|&k| data.y[k]).collect();
    let (center, scale) = ZeroPointModel::normalization(&usable_x, &usable_y);

    let rows: Vec<Vec<f64>> = (0..pairs.len())
        .map(|k| design_row(&data, k, order, center, scale, use_color))
        .collect();
    let predict = |coeffs: &DVector<f64>, k: usize| -> f64 {
        rows[k].iter().zip(coeffs.iter()).map(|(a, c)| a * c).sum()
    };

    let mut good = data.usable.clone();
    let mut iteration = 0;
    let coeffs = loop {
        let selected: Vec<usize> = (0..pairs.len()).filter(|&k| good[k]).collect();
        if selected.len() < needed {
            info!(
                n_good = selected.len(),
                needed, "too few good photometric matches"
            );
            return Ok(None);
        }

        let design = DMatrix::from_fn(selected.len(), n_params, |i, j| rows[selected[i]][j]);
        let rhs = DVector::from_iterator(selected.len(), selected.iter().map(|&k| data.zero[k]));
        let weights = DVector::from_iterator(
            selected.len(),
            selected
                .iter()
                .map(|&k| data.zero_err[k].max(MIN_ZERO_ERR).powi(-2)),
        );
        let Some(coeffs) = regression::fit_linear(&design, &rhs, &weights, params.robust) else {
            info!(n_good = selected.len(), "degenerate photometric fit");
            return Ok(None);
        };
        iteration += 1;

        let Some(threshold) = params.threshold else {
            break coeffs;
        };
        let next: Vec<bool> = (0..pairs.len())
            .map(|k| {
                data.usable[k]
                    && (data.zero[k] - predict(&coeffs, k)).abs() / data.zero_err[k].max(MIN_ZERO_ERR)
                        <= threshold
            })
            .collect();

        debug!(
            iteration,
            n_good = selected.len(),
            n_next = next.iter().filter(|&&g| g).count(),
            "photometric fit pass"
        );
        if next == good || iteration >= params.max_iterations {
            break coeffs;
        }
        good = next;
    };

    let zero_model: Vec<f64> = (0..pairs.len()).map(|k| predict(&coeffs, k)).collect();
    let residuals: Vec<f64> = (0..pairs.len())
        .filter(|&k| good[k])
        .map(|k| data.zero[k] - zero_model[k])
        .collect();
    let rms = if residuals.len() > 1 {
        statistical::standard_deviation(&residuals, None)
    } else {
        0.0
    };

    let n_spatial = n_params - usize::from(use_color);
    let color_term = use_color.then(|| coeffs[n_spatial]);
    let zero_point = ZeroPointModel::new(
        order,
        coeffs.iter().take(n_spatial).copied().collect(),
        color_term,
        center,
        scale,
    );

    let result = PhotometricMatch {
        oidx: pairs.idx_a,
        cidx: pairs.idx_b,
        dist: pairs.dist,
        idx: good,
        idx0: data.usable,
        omag: data.omag,
        omag_err: data.omag_err,
        cmag: data.cmag,
        cmag_err: data.cmag_err,
        color: data.color,
        zero: data.zero,
        zero_err: data.zero_err,
        zero_model,
        color_term,
        zero_point,
        params: coeffs.iter().copied().collect(),
        rms,
    };
    info!(
        n_good = result.n_good(),
        n_usable,
        iterations = iteration,
        rms = result.rms,
        "photometric zero point fitted"
    );
    Ok(Some(result))
}
