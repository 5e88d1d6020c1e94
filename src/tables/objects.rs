use hifitime::Epoch;
use itertools::izip;
use medians::Medianf64;

use crate::{
    constants::{Degree, Magnitude, ObjectId, Pixel, DEFAULT_MATCH_RADIUS},
    pipeline_errors::PipelineError,
    wcs::WcsSolution,
};

/// One detected source.
///
/// Required measurements are plain fields; everything a detection pipeline may or may
/// not provide is an explicit [`Option`].
///
/// # Fields
///
/// * `ra`, `dec` - Sky position in degrees
/// * `ra_err`, `dec_err` - Optional per-axis positional uncertainty in degrees
/// * `x`, `y` - Pixel position (0-based)
/// * `mag`, `magerr` - Instrumental magnitude and its error
/// * `flags` - Quality bitmask, `0` for a clean detection
/// * `fwhm` - Optional PSF width in pixels
/// * `time` - Optional observation epoch
/// * `mag_calib` - Optional calibrated magnitude
/// * `id` - Optional stable identifier
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub ra: Degree,
    pub dec: Degree,
    pub ra_err: Option<Degree>,
    pub dec_err: Option<Degree>,
    pub x: Pixel,
    pub y: Pixel,
    pub mag: Magnitude,
    pub magerr: Magnitude,
    pub flags: u32,
    pub fwhm: Option<Pixel>,
    pub time: Option<Epoch>,
    pub mag_calib: Option<Magnitude>,
    pub id: Option<ObjectId>,
}

impl ObjectRecord {
    /// Create a record carrying only the required measurements.
    pub fn new(ra: Degree, dec: Degree, x: Pixel, y: Pixel, mag: Magnitude, magerr: Magnitude) -> Self {
        ObjectRecord {
            ra,
            dec,
            ra_err: None,
            dec_err: None,
            x,
            y,
            mag,
            magerr,
            flags: 0,
            fwhm: None,
            time: None,
            mag_calib: None,
            id: None,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_fwhm(mut self, fwhm: Pixel) -> Self {
        self.fwhm = Some(fwhm);
        self
    }

    pub fn with_time(mut self, time: Epoch) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Parallel column vectors describing a set of detections.
///
/// This is the shape detection tools usually produce. Optional columns may be left
/// empty; when given they must have the same length as the required ones.
#[derive(Debug, Clone, Default)]
pub struct ObjectColumns {
    pub ra: Vec<Degree>,
    pub dec: Vec<Degree>,
    pub x: Vec<Pixel>,
    pub y: Vec<Pixel>,
    pub mag: Vec<Magnitude>,
    pub magerr: Vec<Magnitude>,
    pub flags: Vec<u32>,
    pub fwhm: Option<Vec<Pixel>>,
    pub time: Option<Vec<Epoch>>,
    pub id: Option<Vec<ObjectId>>,
}

/// Ordered table of detected objects.
///
/// Row order is preserved by every filtering operation. The table is never mutated by
/// the pipeline except through [`ObjectTable::apply_wcs`] and
/// [`ObjectTable::apply_calibration`], which are the only in-place operations of the
/// crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectTable {
    records: Vec<ObjectRecord>,
}

impl From<Vec<ObjectRecord>> for ObjectTable {
    fn from(records: Vec<ObjectRecord>) -> Self {
        ObjectTable { records }
    }
}

impl FromIterator<ObjectRecord> for ObjectTable {
    fn from_iter<I: IntoIterator<Item = ObjectRecord>>(iter: I) -> Self {
        ObjectTable {
            records: iter.into_iter().collect(),
        }
    }
}

impl ObjectTable {
    pub fn new(records: Vec<ObjectRecord>) -> Self {
        ObjectTable { records }
    }

    /// Build a table from parallel columns.
    ///
    /// Return
    /// ------
    /// * The table, or [`PipelineError::MismatchedLength`] naming the first column whose
    ///   length differs from `ra`.
    pub fn from_columns(columns: ObjectColumns) -> Result<Self, PipelineError> {
        let n = columns.ra.len();
        let check = |name: &str, len: usize| {
            if len != n {
                Err(PipelineError::mismatched(name, n, len))
            } else {
                Ok(())
            }
        };
        check("dec", columns.dec.len())?;
        check("x", columns.x.len())?;
        check("y", columns.y.len())?;
        check("mag", columns.mag.len())?;
        check("magerr", columns.magerr.len())?;
        check("flags", columns.flags.len())?;
        if let Some(fwhm) = &columns.fwhm {
            check("fwhm", fwhm.len())?;
        }
        if let Some(time) = &columns.time {
            check("time", time.len())?;
        }
        if let Some(id) = &columns.id {
            check("id", id.len())?;
        }

        let records = izip!(
            columns.ra,
            columns.dec,
            columns.x,
            columns.y,
            columns.mag,
            columns.magerr,
            columns.flags
        )
        .enumerate()
        .map(|(i, (ra, dec, x, y, mag, magerr, flags))| ObjectRecord {
            ra,
            dec,
            ra_err: None,
            dec_err: None,
            x,
            y,
            mag,
            magerr,
            flags,
            fwhm: columns.fwhm.as_ref().map(|v| v[i]),
            time: columns.time.as_ref().map(|v| v[i]),
            mag_calib: None,
            id: columns.id.as_ref().map(|v| v[i]),
        })
        .collect();

        Ok(ObjectTable { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ObjectRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ObjectRecord> {
        self.records.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ObjectRecord> {
        self.records.get(index)
    }

    pub fn ra(&self) -> Vec<Degree> {
        self.records.iter().map(|o| o.ra).collect()
    }

    pub fn dec(&self) -> Vec<Degree> {
        self.records.iter().map(|o| o.dec).collect()
    }

    pub fn x(&self) -> Vec<Pixel> {
        self.records.iter().map(|o| o.x).collect()
    }

    pub fn y(&self) -> Vec<Pixel> {
        self.records.iter().map(|o| o.y).collect()
    }

    pub fn mag(&self) -> Vec<Magnitude> {
        self.records.iter().map(|o| o.mag).collect()
    }

    pub fn magerr(&self) -> Vec<Magnitude> {
        self.records.iter().map(|o| o.magerr).collect()
    }

    pub fn flags(&self) -> Vec<u32> {
        self.records.iter().map(|o| o.flags).collect()
    }

    /// Identifiers of every row, `None` if at least one row has none.
    pub fn ids(&self) -> Option<Vec<ObjectId>> {
        self.records.iter().map(|o| o.id).collect()
    }

    /// Rows selected by a boolean mask, as a new table.
    pub fn subset(&self, mask: &[bool]) -> Result<ObjectTable, PipelineError> {
        if mask.len() != self.len() {
            return Err(PipelineError::mismatched("subset mask", self.len(), mask.len()));
        }
        Ok(self
            .records
            .iter()
            .zip(mask)
            .filter(|(_, &keep)| keep)
            .map(|(o, _)| o.clone())
            .collect())
    }

    /// Rows at the given indices, in the given order.
    pub fn select(&self, indices: &[usize]) -> ObjectTable {
        indices.iter().map(|&i| self.records[i].clone()).collect()
    }

    /// Copy of the table where every row carries an identifier.
    ///
    /// When at least one row lacks an identifier, all rows are renumbered `0..n` in
    /// table order; otherwise the existing identifiers are kept. The caller's table is
    /// never modified.
    pub fn with_ids(&self) -> ObjectTable {
        let mut copy = self.clone();
        if self.ids().is_none() {
            for (i, record) in copy.records.iter_mut().enumerate() {
                record.id = Some(i as ObjectId);
            }
        }
        copy
    }

    /// Median PSF width over the rows that carry one.
    pub fn median_fwhm(&self) -> Option<Pixel> {
        let fwhm: Vec<f64> = self
            .records
            .iter()
            .filter_map(|o| o.fwhm)
            .filter(|f| f.is_finite())
            .collect();
        if fwhm.is_empty() {
            return None;
        }
        Some(fwhm.as_slice().medf_unchecked())
    }

    /// Default matching radius for this set of detections.
    ///
    /// Half of the median PSF width when the pixel scale (degrees per pixel) is known
    /// and the rows carry a width, one arcsecond otherwise.
    pub fn matching_radius(&self, pixscale: Option<Degree>) -> Degree {
        match (pixscale, self.median_fwhm()) {
            (Some(scale), Some(fwhm)) => 0.5 * fwhm * scale,
            _ => DEFAULT_MATCH_RADIUS,
        }
    }

    /// Mean observation epoch over the rows that carry one.
    pub fn mean_epoch(&self) -> Option<Epoch> {
        let mjd: Vec<f64> = self
            .records
            .iter()
            .filter_map(|o| o.time)
            .map(|t| t.to_mjd_utc_days())
            .collect();
        if mjd.is_empty() {
            return None;
        }
        Some(Epoch::from_mjd_utc(statistical::mean(&mjd)))
    }

    /// Recompute every sky position from its pixel position through `wcs`.
    ///
    /// This is an **in-place** update of the table.
    pub fn apply_wcs(&mut self, wcs: &WcsSolution) {
        for record in self.records.iter_mut() {
            let (ra, dec) = wcs.pixel_to_world(record.x, record.y);
            record.ra = ra;
            record.dec = dec;
        }
    }

    /// Store calibrated magnitudes, one per row.
    ///
    /// This is an **in-place** update of the table.
    pub fn apply_calibration(&mut self, mag_calib: &[Magnitude]) -> Result<(), PipelineError> {
        if mag_calib.len() != self.len() {
            return Err(PipelineError::mismatched(
                "calibrated magnitudes",
                self.len(),
                mag_calib.len(),
            ));
        }
        for (record, &m) in self.records.iter_mut().zip(mag_calib) {
            record.mag_calib = Some(m);
        }
        Ok(())
    }
}

#[cfg(test)]
mod objects_test {
    use super::*;

    fn sample() -> ObjectTable {
        ObjectTable::from(vec![
            ObjectRecord::new(10.0, 20.0, 1.0, 2.0, -8.0, 0.01).with_fwhm(3.0),
            ObjectRecord::new(10.1, 20.1, 3.0, 4.0, -9.0, 0.02)
                .with_flags(4)
                .with_fwhm(5.0),
            ObjectRecord::new(10.2, 20.2, 5.0, 6.0, -10.0, 0.03).with_fwhm(4.0),
        ])
    }

    #[test]
    fn test_from_columns_length_mismatch() {
        let columns = ObjectColumns {
            ra: vec![1.0, 2.0],
            dec: vec![1.0, 2.0],
            x: vec![0.0, 1.0],
            y: vec![0.0],
            mag: vec![10.0, 11.0],
            magerr: vec![0.1, 0.1],
            flags: vec![0, 0],
            ..Default::default()
        };
        assert_eq!(
            ObjectTable::from_columns(columns).unwrap_err(),
            PipelineError::mismatched("y", 2, 1)
        );
    }

    #[test]
    fn test_from_columns() {
        let columns = ObjectColumns {
            ra: vec![1.0, 2.0],
            dec: vec![3.0, 4.0],
            x: vec![5.0, 6.0],
            y: vec![7.0, 8.0],
            mag: vec![10.0, 11.0],
            magerr: vec![0.1, 0.2],
            flags: vec![0, 2],
            id: Some(vec![42, 43]),
            ..Default::default()
        };
        let table = ObjectTable::from_columns(columns).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.dec(), vec![3.0, 4.0]);
        assert_eq!(table.flags(), vec![0, 2]);
        assert_eq!(table.ids(), Some(vec![42, 43]));
        assert_eq!(table.get(1).unwrap().fwhm, None);
    }

    #[test]
    fn test_subset_preserves_order() {
        let table = sample();
        let sub = table.subset(&[true, false, true]).unwrap();
        assert_eq!(sub.ra(), vec![10.0, 10.2]);
        assert!(table.subset(&[true]).is_err());
    }

    #[test]
    fn test_with_ids_does_not_touch_caller() {
        let table = sample();
        let with_ids = table.with_ids();
        assert_eq!(table.ids(), None);
        assert_eq!(with_ids.ids(), Some(vec![0, 1, 2]));

        let labelled = ObjectTable::from(vec![ObjectRecord::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0).with_id(7)]);
        assert_eq!(labelled.with_ids().ids(), Some(vec![7]));
    }

    #[test]
    fn test_median_fwhm() {
        assert_eq!(sample().median_fwhm(), Some(4.0));
        assert_eq!(ObjectTable::default().median_fwhm(), None);
    }

    #[test]
    fn test_matching_radius() {
        let table = sample();
        assert_eq!(table.matching_radius(Some(0.001)), 0.002);
        assert_eq!(table.matching_radius(None), DEFAULT_MATCH_RADIUS);
        let no_fwhm = ObjectTable::from(vec![ObjectRecord::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)]);
        assert_eq!(no_fwhm.matching_radius(Some(0.001)), DEFAULT_MATCH_RADIUS);
    }

    #[test]
    fn test_apply_calibration() {
        let mut table = sample();
        table.apply_calibration(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(table.get(2).unwrap().mag_calib, Some(3.0));
        assert!(table.apply_calibration(&[1.0]).is_err());
    }
}
