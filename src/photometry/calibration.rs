//! Table-level photometric calibration.
use std::cmp::Ordering::{Equal, Greater};
use std::fmt;

use tracing::info;

use crate::{
    constants::Degree,
    matching::SpatialMatcher,
    photometry::{photometric_match, PhotometricInputs, PhotometricMatch, PhotometryParams},
    pipeline_errors::PipelineError,
    tables::{CatalogColumns, CatalogTable, ObjectTable},
};

/// Configuration of [`calibrate_photometry`].
///
/// # Fields
///
/// * `sr` - Matching radius, degrees. Derived from the objects when `None`
/// * `pixscale` - Pixel scale in degrees per pixel, used to derive the radius
/// * `order` - Spatial order of the zero point
/// * `threshold` - Rejection threshold in sigma, `None` disables clipping
/// * `columns` - Catalog column labels (`R` magnitude by default)
/// * `update` - Store `mag_calib` in the table (in-place entry point only)
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationParams {
    pub sr: Option<Degree>,
    pub pixscale: Option<Degree>,
    pub order: usize,
    pub threshold: Option<f64>,
    pub columns: CatalogColumns,
    pub update: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        CalibrationParams {
            sr: None,
            pixscale: None,
            order: 0,
            threshold: Some(5.0),
            columns: CatalogColumns::calibration(),
            update: true,
        }
    }
}

impl CalibrationParams {
    pub fn builder() -> CalibrationParamsBuilder {
        CalibrationParamsBuilder::default()
    }
}

impl fmt::Display for CalibrationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sr = self
            .sr
            .map_or("auto".to_string(), |sr| format!("{:.2} arcsec", sr * 3600.0));
        let threshold = self
            .threshold
            .map_or("none".to_string(), |t| format!("{t:.1} sigma"));
        let color = match (&self.columns.mag1, &self.columns.mag2) {
            (Some(m1), Some(m2)) => format!("{m1} - {m2}"),
            _ => "none".to_string(),
        };
        if f.alternate() {
            writeln!(f, "Photometric calibration parameters")?;
            writeln!(f, "----------------------------------")?;
            writeln!(f, "  sr        = {sr}")?;
            writeln!(f, "  pixscale  = {:?}", self.pixscale)?;
            writeln!(f, "  order     = {}", self.order)?;
            writeln!(f, "  threshold = {threshold}")?;
            writeln!(f, "  mag       = {}", self.columns.mag)?;
            writeln!(f, "  color     = {color}")?;
            write!(f, "  update    = {}", self.update)
        } else {
            write!(
                f,
                "sr={sr} order={} threshold={threshold} mag={} color={color}",
                self.order, self.columns.mag
            )
        }
    }
}

/// Validating builder of [`CalibrationParams`].
#[derive(Debug, Clone, Default)]
pub struct CalibrationParamsBuilder {
    params: CalibrationParams,
}

impl CalibrationParamsBuilder {
    pub fn sr(mut self, v: Degree) -> Self {
        self.params.sr = Some(v);
        self
    }

    pub fn pixscale(mut self, v: Degree) -> Self {
        self.params.pixscale = Some(v);
        self
    }

    pub fn order(mut self, v: usize) -> Self {
        self.params.order = v;
        self
    }

    pub fn threshold(mut self, v: Option<f64>) -> Self {
        self.params.threshold = v;
        self
    }

    pub fn columns(mut self, v: CatalogColumns) -> Self {
        self.params.columns = v;
        self
    }

    pub fn update(mut self, v: bool) -> Self {
        self.params.update = v;
        self
    }

    pub fn build(self) -> Result<CalibrationParams, PipelineError> {
        let positive = |x: f64| x.partial_cmp(&0.0) == Some(Greater) && x.is_finite();
        let non_negative =
            |x: f64| matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal)) && x.is_finite();

        let p = &self.params;
        if p.sr.is_some_and(|sr| !non_negative(sr)) {
            return Err(PipelineError::InvalidParameter(
                "sr must be finite and non-negative".into(),
            ));
        }
        if p.pixscale.is_some_and(|s| !positive(s)) {
            return Err(PipelineError::InvalidParameter(
                "pixscale must be > 0".into(),
            ));
        }
        if p.threshold.is_some_and(|t| !positive(t)) {
            return Err(PipelineError::InvalidParameter(
                "threshold must be > 0".into(),
            ));
        }
        if p.columns.mag1.is_some() != p.columns.mag2.is_some() {
            return Err(PipelineError::InvalidParameter(
                "color needs both mag1 and mag2 columns".into(),
            ));
        }
        Ok(self.params)
    }
}

/// Photometric calibration of an object table against a reference catalog.
///
/// Resolves the catalog columns, derives the matching radius (half the median FWHM
/// when `pixscale` is set, else 1″), builds the color `mag1 - mag2` when both
/// columns are configured, and runs [`photometric_match`].
///
/// Return
/// ------
/// * The match result, `Ok(None)` when the calibration fails,
///   or a structural error for missing/non-numeric catalog columns.
pub fn calibrate_photometry(
    matcher: &dyn SpatialMatcher,
    obj: &ObjectTable,
    cat: &CatalogTable,
    params: &CalibrationParams,
) -> Result<Option<PhotometricMatch>, PipelineError> {
    let columns = &params.columns;
    let sr = params.sr.unwrap_or_else(|| obj.matching_radius(params.pixscale));

    info!(
        n_objects = obj.len(),
        n_catalog = cat.len(),
        "performing photometric calibration"
    );
    info!(
        sr_arcsec = sr * 3600.0,
        mag = %columns.mag,
        order = params.order,
        "calibration setup"
    );

    let cat_ra = cat.float_column(&columns.ra)?;
    let cat_dec = cat.float_column(&columns.dec)?;
    let cat_mag = cat.float_column(&columns.mag)?;
    let cat_magerr = match &columns.mag_err {
        Some(name) => Some(cat.float_column(name)?),
        None => None,
    };
    let cat_flags = match &columns.flags {
        Some(name) => Some(cat.float_column(name)?),
        None => None,
    };
    let cat_color: Option<Vec<f64>> = match (&columns.mag1, &columns.mag2) {
        (Some(m1), Some(m2)) => {
            info!("using ({m1} - {m2}) color for color term");
            let m1 = cat.float_column(m1)?;
            let m2 = cat.float_column(m2)?;
            Some(m1.iter().zip(m2).map(|(a, b)| a - b).collect())
        }
        _ => None,
    };

    let (ra, dec, x, y) = (obj.ra(), obj.dec(), obj.x(), obj.y());
    let (mag, magerr, flags) = (obj.mag(), obj.magerr(), obj.flags());
    let mut inputs = PhotometricInputs::new(&ra, &dec, &mag, &magerr, &flags, cat_ra, cat_dec, cat_mag)
        .with_obj_xy(&x, &y);
    inputs.cat_magerr = cat_magerr;
    inputs.cat_flags = cat_flags;
    inputs.cat_color = cat_color.as_deref();

    let match_params = PhotometryParams::builder()
        .sr(sr)
        .spatial_order(params.order)
        .threshold(params.threshold)
        .build()?;

    let result = photometric_match(matcher, &inputs, &match_params)?;
    match &result {
        Some(m) => {
            info!(n_good = m.n_good(), rms = m.rms, "photometric calibration finished successfully");
            if let Some(color_term) = m.color_term {
                info!("color term is {color_term:.2}");
            }
        }
        None => info!("photometric calibration failed"),
    }
    Ok(result)
}

/// [`calibrate_photometry`], then store `mag_calib = mag + ZP(x, y)` in `obj` when
/// `params.update` is set.
///
/// This is an **in-place** update of the table.
pub fn calibrate_photometry_in_place(
    matcher: &dyn SpatialMatcher,
    obj: &mut ObjectTable,
    cat: &CatalogTable,
    params: &CalibrationParams,
) -> Result<Option<PhotometricMatch>, PipelineError> {
    let result = calibrate_photometry(matcher, obj, cat, params)?;
    if let (Some(m), true) = (&result, params.update) {
        let mag_calib: Vec<f64> = obj
            .iter()
            .map(|o| o.mag + m.zero_point.evaluate(o.x, o.y))
            .collect();
        obj.apply_calibration(&mag_calib)?;
    }
    Ok(result)
}

#[cfg(test)]
mod calibration_test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        constants::ARCSEC,
        matching::KdTreeMatcher,
        tables::ObjectRecord,
    };

    fn fixture() -> (ObjectTable, CatalogTable) {
        let mut objects = Vec::new();
        let (mut ra, mut dec, mut r, mut b, mut v) = (vec![], vec![], vec![], vec![], vec![]);
        for i in 0..20 {
            let o_ra = 30.0 + 0.01 * i as f64;
            let o_dec = -5.0;
            let mag = -9.0 + 0.2 * i as f64;
            let color = 0.5 + 0.05 * (i % 5) as f64;
            objects.push(
                ObjectRecord::new(o_ra, o_dec, 10.0 * i as f64, 5.0, mag, 0.02).with_fwhm(3.0),
            );
            ra.push(o_ra + 0.2 * ARCSEC);
            dec.push(o_dec);
            r.push(mag + 24.0 + 0.05 * color);
            b.push(color + 1.0);
            v.push(1.0);
        }
        let cat = CatalogTable::new()
            .with_float_column("RAJ2000", ra)
            .unwrap()
            .with_float_column("DEJ2000", dec)
            .unwrap()
            .with_float_column("R", r)
            .unwrap()
            .with_float_column("B", b)
            .unwrap()
            .with_float_column("V", v)
            .unwrap();
        (ObjectTable::from(objects), cat)
    }

    #[test]
    fn test_calibrate_in_place() {
        let (mut obj, cat) = fixture();
        let params = CalibrationParams::builder()
            .pixscale(ARCSEC)
            .columns(CatalogColumns::calibration().color("B", "V"))
            .build()
            .unwrap();

        let m = calibrate_photometry_in_place(&KdTreeMatcher, &mut obj, &cat, &params)
            .unwrap()
            .unwrap();
        assert_eq!(m.n_good(), 20);
        assert_relative_eq!(m.color_term.unwrap(), 0.05, epsilon = 1e-8);

        let first = obj.get(0).unwrap();
        assert_relative_eq!(first.mag_calib.unwrap(), -9.0 + 24.0, epsilon = 1e-8);
    }

    #[test]
    fn test_no_update_and_missing_column() {
        let (mut obj, cat) = fixture();
        let params = CalibrationParams::builder().update(false).build().unwrap();
        assert!(calibrate_photometry_in_place(&KdTreeMatcher, &mut obj, &cat, &params)
            .unwrap()
            .is_some());
        assert_eq!(obj.get(0).unwrap().mag_calib, None);

        let params = CalibrationParams::builder()
            .columns(CatalogColumns::calibration().magnitude("Imag", None))
            .build()
            .unwrap();
        assert_eq!(
            calibrate_photometry(&KdTreeMatcher, &obj, &cat, &params).unwrap_err(),
            PipelineError::MissingColumn("Imag".into())
        );
    }

    #[test]
    fn test_builder_validation() {
        assert!(CalibrationParams::builder().sr(-1.0).build().is_err());
        assert!(CalibrationParams::builder().pixscale(0.0).build().is_err());
        let mut columns = CatalogColumns::calibration();
        columns.mag1 = Some("B".into());
        assert!(CalibrationParams::builder().columns(columns).build().is_err());
    }

    #[test]
    fn test_display() {
        let params = CalibrationParams::builder()
            .sr(2.0 * ARCSEC)
            .columns(CatalogColumns::calibration().color("B", "V"))
            .build()
            .unwrap();
        assert_eq!(
            params.to_string(),
            "sr=2.00 arcsec order=0 threshold=5.0 sigma mag=R color=B - V"
        );
        assert!(format!("{:#}", CalibrationParams::default()).contains("sr        = auto"));
    }
}
