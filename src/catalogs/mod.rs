//! # Catalog queries
//!
//! Cross-identification of detected objects with remote reference services:
//!
//! - static catalogs hosted by VizieR, queried through the TAPVizieR ADQL endpoint
//!   ([`vizier`]) and described by a [`CatalogRegistry`],
//! - known solar-system bodies at a given epoch, from the IMCCE SkyBot cone search
//!   ([`skybot`]),
//! - extragalactic objects from the NED TAP service ([`ned`]).
//!
//! Every query covers the sky region of the objects, then matches the returned rows
//! locally with a [`SpatialMatcher`](crate::matching::SpatialMatcher).
//!
//! ## Failure model
//!
//! A query never fails the pipeline. Network errors, timeouts, HTTP status errors,
//! malformed payloads, empty regions and empty matches are all logged and reported as
//! `None` by the [`CatalogQuery`] methods.
//!
//! ## Submodules
//!
//! - [`registry`]: known catalogs and their VizieR tables
//! - [`service`]: [`CdsCatalogService`], the HTTP implementation of [`CatalogQuery`]
pub mod ned;
pub mod registry;
pub mod service;
pub mod skybot;
pub mod vizier;

use hifitime::Epoch;
use tracing::debug;

use crate::{
    constants::{Degree, ObjectId},
    matching::SpatialMatcher,
    pipeline_errors::PipelineError,
    sphere::bounding_cone,
    tables::{CatalogTable, ObjectTable},
};

pub use registry::{CatalogDescriptor, CatalogRegistry};
pub use service::CdsCatalogService;

/// Objects identified in a reference service.
///
/// `object_ids[i]` is the identifier of the object matched with `rows` row `i`.
/// Objects without an identifier are reported by their row index.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossMatch {
    pub object_ids: Vec<ObjectId>,
    pub rows: CatalogTable,
}

impl CrossMatch {
    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }
}

/// Cross-identification of objects with reference services.
///
/// Implementations must not fail: any problem is logged and reported as `None`.
pub trait CatalogQuery {
    /// Match the objects with a static catalog, by registry key or VizieR identifier.
    fn xmatch_objects(&self, objects: &ObjectTable, catalog: &str, sr: Degree)
        -> Option<CrossMatch>;

    /// Match the objects with the solar-system bodies visible at `time`.
    fn xmatch_moving_objects(
        &self,
        objects: &ObjectTable,
        time: Epoch,
        sr: Degree,
    ) -> Option<CrossMatch>;

    /// Match the objects with known extragalactic objects.
    fn xmatch_extragalactic(&self, objects: &ObjectTable, sr: Degree) -> Option<CrossMatch>;
}

impl<T: CatalogQuery + ?Sized> CatalogQuery for &T {
    fn xmatch_objects(
        &self,
        objects: &ObjectTable,
        catalog: &str,
        sr: Degree,
    ) -> Option<CrossMatch> {
        (**self).xmatch_objects(objects, catalog, sr)
    }

    fn xmatch_moving_objects(
        &self,
        objects: &ObjectTable,
        time: Epoch,
        sr: Degree,
    ) -> Option<CrossMatch> {
        (**self).xmatch_moving_objects(objects, time, sr)
    }

    fn xmatch_extragalactic(&self, objects: &ObjectTable, sr: Degree) -> Option<CrossMatch> {
        (**self).xmatch_extragalactic(objects, sr)
    }
}

/// Number of object cones grouped in one query when a region answer is truncated.
pub const CONES_PER_QUERY: usize = 20;

/// Whether an answer of `n_rows` rows hit the `MAXREC` limit and may miss rows.
pub fn is_truncated(n_rows: usize, max_rows: usize) -> bool {
    n_rows >= max_rows
}

/// Query string parameters of a TAP synchronous ADQL request returning CSV.
pub(crate) fn tap_parameters<'a>(query: &'a str, max_rows: &'a str) -> [(&'static str, &'a str); 5] {
    [
        ("REQUEST", "doQuery"),
        ("LANG", "ADQL"),
        ("FORMAT", "csv"),
        ("MAXREC", max_rows),
        ("QUERY", query),
    ]
}

/// Cone `(center, radius)` covering every object, widened by `sr`.
pub(crate) fn search_cone(objects: &ObjectTable, sr: Degree) -> Option<((Degree, Degree), Degree)> {
    let (center, radius) = bounding_cone(&objects.ra(), &objects.dec())?;
    Some((center, radius + sr))
}

/// Match the objects with the rows of a service response.
///
/// Return
/// ------
/// * `Ok(None)` when nothing matches, an error for missing position columns.
pub(crate) fn crossmatch(
    matcher: &dyn SpatialMatcher,
    objects: &ObjectTable,
    rows: &CatalogTable,
    ra_column: &str,
    dec_column: &str,
    sr: Degree,
) -> Result<Option<CrossMatch>, PipelineError> {
    let cat_ra = rows.float_column(ra_column)?;
    let cat_dec = rows.float_column(dec_column)?;
    let pairs = matcher.match_positions(&objects.ra(), &objects.dec(), cat_ra, cat_dec, sr)?;
    debug!(
        n_objects = objects.len(),
        n_rows = rows.len(),
        n_matches = pairs.len(),
        "local cross-match of service rows"
    );
    if pairs.is_empty() {
        return Ok(None);
    }

    let object_ids = pairs
        .idx_a
        .iter()
        .map(|&i| objects.records()[i].id.unwrap_or(i as ObjectId))
        .collect();
    Ok(Some(CrossMatch {
        object_ids,
        rows: rows.select(&pairs.idx_b),
    }))
}

#[cfg(test)]
mod catalogs_test {
    use super::*;
    use crate::{
        constants::ARCSEC,
        matching::KdTreeMatcher,
        tables::{catalog::Column, ObjectRecord},
    };

    fn objects() -> ObjectTable {
        ObjectTable::from(vec![
            ObjectRecord::new(10.0, 20.0, 0.0, 0.0, 15.0, 0.01).with_id(7),
            ObjectRecord::new(10.01, 20.0, 10.0, 0.0, 15.0, 0.01),
            ObjectRecord::new(10.02, 20.0, 20.0, 0.0, 15.0, 0.01).with_id(9),
        ])
    }

    #[test]
    fn test_crossmatch_ids_and_rows() {
        let rows = CatalogTable::new()
            .with_float_column("ra", vec![10.02, 10.01, 50.0])
            .unwrap()
            .with_float_column("dec", vec![20.0, 20.0 + 0.5 * ARCSEC, 0.0])
            .unwrap()
            .with_text_column("name", vec!["a".into(), "b".into(), "c".into()])
            .unwrap();

        let m = crossmatch(&KdTreeMatcher, &objects(), &rows, "ra", "dec", ARCSEC)
            .unwrap()
            .unwrap();
        assert_eq!(m.object_ids, vec![1, 9]);
        assert_eq!(m.len(), 2);
        assert_eq!(
            m.rows.column("name").unwrap(),
            &Column::Text(vec!["b".into(), "a".into()])
        );
    }

    #[test]
    fn test_crossmatch_empty_and_missing() {
        let rows = CatalogTable::new()
            .with_float_column("ra", vec![50.0])
            .unwrap()
            .with_float_column("dec", vec![0.0])
            .unwrap();
        assert_eq!(
            crossmatch(&KdTreeMatcher, &objects(), &rows, "ra", "dec", ARCSEC).unwrap(),
            None
        );
        assert_eq!(
            crossmatch(&KdTreeMatcher, &objects(), &rows, "RAJ2000", "dec", ARCSEC).unwrap_err(),
            PipelineError::MissingColumn("RAJ2000".into())
        );
    }

    #[test]
    fn test_search_cone() {
        let ((ra, dec), radius) = search_cone(&objects(), ARCSEC).unwrap();
        assert!((ra - 10.01).abs() < 1e-6);
        assert!((dec - 20.0).abs() < 1e-4);
        assert!(radius > 0.01 * 20f64.to_radians().cos() / 2.0);
        assert!(search_cone(&ObjectTable::default(), ARCSEC).is_none());
    }
}
