mod common;

use approx::assert_relative_eq;
use common::{synthetic_field, truth_wcs, SyntheticField};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use skypipe::{
    matching::KdTreeMatcher,
    photometry::{calibrate_photometry, calibrate_photometry_in_place, CalibrationParams},
    tables::{CatalogTable, ObjectTable},
};

/// Field with Gaussian noise of `sigma` magnitudes added to the instrumental magnitudes.
fn noisy_field(sigma: f64, seed: u64) -> SyntheticField {
    let field = synthetic_field(&truth_wcs(), &truth_wcs(), 12, 35.0);
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sigma).unwrap();
    let objects: ObjectTable = field
        .objects
        .iter()
        .map(|o| {
            let mut o = o.clone();
            o.mag += noise.sample(&mut rng);
            o
        })
        .collect();
    SyntheticField {
        objects,
        catalog: field.catalog,
    }
}

/// Catalog of `field` with `R` replaced by `mag + zero(x, y)`.
fn catalog_with_zero(field: &SyntheticField, zero: impl Fn(f64, f64) -> f64) -> CatalogTable {
    let r = field.objects.iter().map(|o| o.mag + zero(o.x, o.y)).collect();
    CatalogTable::new()
        .with_float_column("RAJ2000", field.catalog.float_column("RAJ2000").unwrap().to_vec())
        .unwrap()
        .with_float_column("DEJ2000", field.catalog.float_column("DEJ2000").unwrap().to_vec())
        .unwrap()
        .with_float_column("R", r)
        .unwrap()
}

#[test]
fn test_recovers_zero_point_with_noise() {
    let field = noisy_field(0.01, 42);
    let result = calibrate_photometry(
        &KdTreeMatcher,
        &field.objects,
        &field.catalog,
        &CalibrationParams::default(),
    )
    .unwrap()
    .unwrap();

    assert_eq!(result.oidx.len(), 144);
    assert!(result.n_good() >= 140);
    assert_relative_eq!(result.zero_point.evaluate(250.0, 250.0), 25.0, epsilon = 5e-3);
    assert!(result.rms < 0.02);
    assert!(result.color_term.is_none());
}

#[test]
fn test_outliers_are_clipped() {
    let field = noisy_field(0.01, 7);
    let mut objects: Vec<_> = field.objects.iter().cloned().collect();
    for k in [3, 50, 97] {
        objects[k].mag -= 1.5;
    }
    let objects = ObjectTable::from(objects);

    let result = calibrate_photometry(
        &KdTreeMatcher,
        &objects,
        &field.catalog,
        &CalibrationParams::default(),
    )
    .unwrap()
    .unwrap();

    for k in [3, 50, 97] {
        let pair = result.oidx.iter().position(|&o| o == k).unwrap();
        assert!(result.idx0[pair]);
        assert!(!result.idx[pair]);
    }
    assert_relative_eq!(result.zero_point.evaluate(0.0, 0.0), 25.0, epsilon = 5e-3);
}

#[test]
fn test_spatial_zero_point() {
    let field = synthetic_field(&truth_wcs(), &truth_wcs(), 10, 40.0);
    let zero = |x: f64, y: f64| 24.0 + 2e-3 * (x - 250.0) - 1e-3 * (y - 250.0);
    let catalog = catalog_with_zero(&field, zero);

    let constant = calibrate_photometry(
        &KdTreeMatcher,
        &field.objects,
        &catalog,
        &CalibrationParams::builder().threshold(None).build().unwrap(),
    )
    .unwrap()
    .unwrap();
    assert!(constant.rms > 0.1);

    let params = CalibrationParams::builder().order(1).build().unwrap();
    let spatial = calibrate_photometry(&KdTreeMatcher, &field.objects, &catalog, &params)
        .unwrap()
        .unwrap();
    assert_eq!(spatial.zero_point.order(), 1);
    assert!(spatial.rms < 1e-6);
    for (x, y) in [(70.0, 70.0), (250.0, 250.0), (430.0, 100.0)] {
        assert_relative_eq!(spatial.zero_point.evaluate(x, y), zero(x, y), epsilon = 1e-6);
    }
}

#[test]
fn test_below_min_matches() {
    let field = synthetic_field(&truth_wcs(), &truth_wcs(), 2, 60.0);
    let objects = field.objects.select(&[0, 3]);
    let result = calibrate_photometry(
        &KdTreeMatcher,
        &objects,
        &field.catalog,
        &CalibrationParams::default(),
    )
    .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_in_place_stores_calibrated_magnitudes() {
    let field = noisy_field(0.005, 3);
    let mut objects = field.objects.clone();
    let result = calibrate_photometry_in_place(
        &KdTreeMatcher,
        &mut objects,
        &field.catalog,
        &CalibrationParams::default(),
    )
    .unwrap()
    .unwrap();

    let zp = result.zero_point.evaluate(0.0, 0.0);
    for o in objects.iter() {
        assert_relative_eq!(o.mag_calib.unwrap(), o.mag + zp, epsilon = 1e-12);
    }

    let mut untouched = field.objects.clone();
    let params = CalibrationParams::builder().update(false).build().unwrap();
    calibrate_photometry_in_place(&KdTreeMatcher, &mut untouched, &field.catalog, &params)
        .unwrap()
        .unwrap();
    assert!(untouched.iter().all(|o| o.mag_calib.is_none()));
}
