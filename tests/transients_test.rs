mod common;

use common::{synthetic_field, truth_wcs, CountingMatcher, StubQuery, SyntheticField};
use hifitime::Epoch;
use skypipe::{
    constants::ARCSEC,
    env_state::PipelineEnv,
    pipeline::Pipeline,
    tables::{CatalogTable, ObjectRecord, ObjectTable},
    transients::{FilterStage, StageCount, TransientFilterParams, TransientSelection},
};

/// 4×4 field with object 5 flagged, the local catalog holding objects 0 to 2.
fn field_with_local_catalog() -> (SyntheticField, ObjectTable) {
    let field = synthetic_field(&truth_wcs(), &truth_wcs(), 4, 80.0);
    let objects: ObjectTable = field
        .objects
        .iter()
        .enumerate()
        .map(|(i, o)| if i == 5 { o.clone().with_flags(4) } else { o.clone() })
        .collect();
    let local = SyntheticField {
        objects: field.objects,
        catalog: field.catalog.select(&[0, 1, 2]),
    };
    (local, objects)
}

fn params() -> TransientFilterParams {
    TransientFilterParams::builder()
        .sr(ARCSEC)
        .time(Epoch::from_gregorian_utc_at_midnight(2024, 3, 1))
        .external_catalogs(&["ps1", "gsc"])
        .query_extragalactic(true)
        .build()
        .unwrap()
}

#[test]
fn test_stages_narrow_monotonically() {
    let (local, objects) = field_with_local_catalog();
    let query = StubQuery {
        static_ids: vec![6, 7],
        moving_ids: vec![8],
        extragalactic_ids: vec![9],
        ..Default::default()
    };
    let pipeline = Pipeline::with_components(PipelineEnv::new(), CountingMatcher::default(), query);

    let (selection, stages) = pipeline
        .filter_transient_candidates_staged(&objects, Some(&local.catalog), &params())
        .unwrap();

    let expected = [
        (FilterStage::Input, 16),
        (FilterStage::Flagged, 15),
        (FilterStage::LocalCatalog, 12),
        (FilterStage::External("ps1".into()), 10),
        (FilterStage::External("gsc".into()), 10),
        (FilterStage::MovingObjects, 9),
        (FilterStage::Extragalactic, 8),
    ]
    .map(|(stage, remaining)| StageCount { stage, remaining });
    assert_eq!(stages, expected);
    assert!(stages.windows(2).all(|w| w[1].remaining <= w[0].remaining));

    assert_eq!(
        *pipeline.catalogs().queries.borrow(),
        vec![
            ("ps1".to_string(), 12),
            ("gsc".to_string(), 10),
            ("skybot".to_string(), 10),
            ("ned".to_string(), 9),
        ]
    );
    assert_eq!(pipeline.matcher().calls.get(), 1);

    let survivors = [3, 4, 10, 11, 12, 13, 14, 15];
    assert_eq!(
        selection,
        TransientSelection::Candidates(objects.select(&survivors))
    );
}

#[test]
fn test_everything_known_locally() {
    let field = synthetic_field(&truth_wcs(), &truth_wcs(), 3, 80.0);
    let pipeline = Pipeline::with_components(
        PipelineEnv::new(),
        CountingMatcher::default(),
        StubQuery::default(),
    );

    let (selection, stages) = pipeline
        .filter_transient_candidates_staged(&field.objects, Some(&field.catalog), &params())
        .unwrap();

    assert_eq!(selection.count(), 0);
    assert_eq!(selection, TransientSelection::Candidates(ObjectTable::default()));
    assert_eq!(stages.last().map(|s| s.remaining), Some(0));
    assert!(pipeline.catalogs().queries.borrow().is_empty());
}

#[test]
fn test_unanswered_queries_remove_nothing() {
    let (_, objects) = field_with_local_catalog();
    let pipeline = Pipeline::with_components(
        PipelineEnv::new(),
        CountingMatcher::default(),
        StubQuery::default(),
    );
    let params = TransientFilterParams::builder()
        .time(Epoch::from_gregorian_utc_at_midnight(2024, 3, 1))
        .query_extragalactic(true)
        .remove_flagged(false)
        .return_candidates(false)
        .build()
        .unwrap();

    let selection = pipeline
        .filter_transient_candidates(&objects, None, &params)
        .unwrap();

    assert_eq!(selection, TransientSelection::Mask(vec![true; 16]));
    let queries = pipeline.catalogs().queries.borrow();
    assert_eq!(queries.len(), 5);
    assert!(queries.iter().all(|(_, n)| *n == 16));
    assert_eq!(pipeline.matcher().calls.get(), 0);
}

#[test]
fn test_mask_matches_candidates() {
    let (local, objects) = field_with_local_catalog();
    let query = StubQuery {
        static_ids: vec![11],
        ..Default::default()
    };
    let pipeline = Pipeline::with_components(PipelineEnv::new(), CountingMatcher::default(), query);

    let mask_params = TransientFilterParams {
        return_candidates: false,
        ..params()
    };
    let TransientSelection::Mask(mask) = pipeline
        .filter_transient_candidates(&objects, Some(&local.catalog), &mask_params)
        .unwrap()
    else {
        panic!("expected a mask");
    };
    let candidates = pipeline
        .filter_transient_candidates(&objects, Some(&local.catalog), &params())
        .unwrap();

    assert_eq!(mask.iter().filter(|&&k| k).count(), 11);
    assert_eq!(
        candidates,
        TransientSelection::Candidates(objects.subset(&mask).unwrap())
    );
}

#[test]
fn test_flagged_and_catalogued_objects_leave_no_candidate() {
    let objects = ObjectTable::from(vec![
        ObjectRecord::new(10.0, 20.0, 100.0, 100.0, 15.0, 0.01),
        ObjectRecord::new(10.001, 20.001, 110.0, 110.0, 15.0, 0.01).with_flags(1),
    ]);
    let catalog = CatalogTable::new()
        .with_float_column("RAJ2000", vec![10.0])
        .unwrap()
        .with_float_column("DEJ2000", vec![20.0])
        .unwrap();
    let pipeline = Pipeline::with_components(
        PipelineEnv::new(),
        CountingMatcher::default(),
        StubQuery::default(),
    );
    let params = TransientFilterParams::builder()
        .sr(1.0 / 3600.0)
        .external_catalogs::<&str>(&[])
        .query_moving_objects(false)
        .build()
        .unwrap();

    let selection = pipeline
        .filter_transient_candidates(&objects, Some(&catalog), &params)
        .unwrap();

    assert_eq!(selection.count(), 0);
    assert_eq!(selection, TransientSelection::Candidates(ObjectTable::default()));
    assert!(pipeline.catalogs().queries.borrow().is_empty());
}
