#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use approx::assert_relative_eq;
use hifitime::Epoch;
use skypipe::{
    catalogs::{CatalogQuery, CrossMatch},
    constants::{Degree, ObjectId, ARCSEC},
    matching::{KdTreeMatcher, MatchPairs, SpatialMatcher},
    pipeline_errors::PipelineError,
    tables::{CatalogTable, ObjectRecord, ObjectTable},
    wcs::WcsSolution,
};

/// Detections and their reference catalog on a regular pixel grid.
pub struct SyntheticField {
    pub objects: ObjectTable,
    pub catalog: CatalogTable,
}

/// Linear solution of 1″ pixels rotated by 12°, reference pixel at the grid centroid.
pub fn truth_wcs() -> WcsSolution {
    WcsSolution::from_scale_rotation((210.0, -15.0), (250.0, 250.0), ARCSEC, 12.0, true).unwrap()
}

/// `n_side²` stars spaced by `spacing` pixels and centred on pixel (250, 250).
///
/// The catalog holds the true positions (`RAJ2000`, `DEJ2000`) and magnitudes
/// `mag + 25` in both `V` and `R`. The objects carry the positions given by `guess`.
pub fn synthetic_field(truth: &WcsSolution, guess: &WcsSolution, n_side: usize, spacing: f64) -> SyntheticField {
    let offset = 250.0 - 0.5 * spacing * (n_side - 1) as f64;
    let mut records = vec![];
    let (mut ra, mut dec, mut mag) = (vec![], vec![], vec![]);
    for i in 0..n_side * n_side {
        let x = offset + spacing * (i % n_side) as f64;
        let y = offset + spacing * (i / n_side) as f64;
        let (t_ra, t_dec) = truth.pixel_to_world(x, y);
        let (g_ra, g_dec) = guess.pixel_to_world(x, y);
        let m = -10.0 + 0.03 * i as f64;
        records.push(ObjectRecord::new(g_ra, g_dec, x, y, m, 0.01).with_fwhm(2.5));
        ra.push(t_ra);
        dec.push(t_dec);
        mag.push(m + 25.0);
    }

    let catalog = CatalogTable::new()
        .with_float_column("RAJ2000", ra)
        .unwrap()
        .with_float_column("DEJ2000", dec)
        .unwrap()
        .with_float_column("V", mag.clone())
        .unwrap()
        .with_float_column("R", mag)
        .unwrap();
    SyntheticField {
        objects: ObjectTable::from(records),
        catalog,
    }
}

/// Assert that two solutions agree on a few sample pixels, in degrees.
pub fn assert_wcs_close(actual: &WcsSolution, expected: &WcsSolution, epsilon: f64) {
    for (x, y) in [(0.0, 0.0), (250.0, 250.0), (500.0, 80.0), (120.0, 480.0)] {
        let (ra_a, dec_a) = actual.pixel_to_world(x, y);
        let (ra_e, dec_e) = expected.pixel_to_world(x, y);
        assert_relative_eq!(ra_a, ra_e, epsilon = epsilon);
        assert_relative_eq!(dec_a, dec_e, epsilon = epsilon);
    }
}

/// [`KdTreeMatcher`] counting its calls.
#[derive(Default)]
pub struct CountingMatcher {
    pub calls: Cell<usize>,
}

impl SpatialMatcher for CountingMatcher {
    fn match_positions(
        &self,
        ra_a: &[Degree],
        dec_a: &[Degree],
        ra_b: &[Degree],
        dec_b: &[Degree],
        radius: Degree,
    ) -> Result<MatchPairs, PipelineError> {
        self.calls.set(self.calls.get() + 1);
        KdTreeMatcher.match_positions(ra_a, dec_a, ra_b, dec_b, radius)
    }
}

/// Catalog services identifying fixed object ids, recording the size of every query.
#[derive(Default)]
pub struct StubQuery {
    pub static_ids: Vec<ObjectId>,
    pub moving_ids: Vec<ObjectId>,
    pub extragalactic_ids: Vec<ObjectId>,
    pub queries: RefCell<Vec<(String, usize)>>,
}

impl StubQuery {
    fn answer(&self, label: &str, objects: &ObjectTable, known: &[ObjectId]) -> Option<CrossMatch> {
        self.queries
            .borrow_mut()
            .push((label.to_string(), objects.len()));
        let object_ids: Vec<ObjectId> = objects
            .iter()
            .filter_map(|o| o.id)
            .filter(|id| known.contains(id))
            .collect();
        (!object_ids.is_empty()).then(|| CrossMatch {
            object_ids,
            rows: CatalogTable::new(),
        })
    }
}

impl CatalogQuery for StubQuery {
    fn xmatch_objects(&self, objects: &ObjectTable, catalog: &str, _sr: Degree) -> Option<CrossMatch> {
        self.answer(catalog, objects, &self.static_ids)
    }

    fn xmatch_moving_objects(
        &self,
        objects: &ObjectTable,
        _time: Epoch,
        _sr: Degree,
    ) -> Option<CrossMatch> {
        self.answer("skybot", objects, &self.moving_ids)
    }

    fn xmatch_extragalactic(&self, objects: &ObjectTable, _sr: Degree) -> Option<CrossMatch> {
        self.answer("ned", objects, &self.extragalactic_ids)
    }
}
