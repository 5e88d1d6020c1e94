use std::borrow::Cow;

use tracing::{debug, info, warn};

use crate::{
    astrometry::{AstrometricSolution, AstrometryParams, IterationReport, RefinementMethod},
    constants::{ArcSec, Degree, Pixel},
    matching::SpatialMatcher,
    photometry::{photometric_match, PhotometricInputs, PhotometryParams},
    pipeline_errors::PipelineError,
    tables::{CatalogTable, ObjectTable},
    wcs::{SolverInputs, WcsFitter, WcsSolution},
};

/// Matched pairs feeding one fit: pixel positions and catalog sky positions.
struct FitPairs {
    x: Vec<Pixel>,
    y: Vec<Pixel>,
    ra: Vec<Degree>,
    dec: Vec<Degree>,
    rms: ArcSec,
}

impl FitPairs {
    fn gather(
        x: &[Pixel],
        y: &[Pixel],
        cat_ra: &[Degree],
        cat_dec: &[Degree],
        pairs: impl Iterator<Item = (usize, usize, Degree)>,
    ) -> Self {
        let mut fit = FitPairs {
            x: vec![],
            y: vec![],
            ra: vec![],
            dec: vec![],
            rms: 0.0,
        };
        let mut sq = 0.0;
        for (o, c, dist) in pairs {
            fit.x.push(x[o]);
            fit.y.push(y[o]);
            fit.ra.push(cat_ra[c]);
            fit.dec.push(cat_dec[c]);
            sq += (dist * 3600.0).powi(2);
        }
        if !fit.x.is_empty() {
            fit.rms = (sq / fit.x.len() as f64).sqrt();
        }
        fit
    }

    fn len(&self) -> usize {
        self.x.len()
    }
}

/// Refine the astrometric solution of an image against a reference catalog.
///
/// The working sky positions start from `wcs` applied to the object pixels when a
/// guess is given, from the objects' own `ra`/`dec` otherwise. The object table itself
/// is never modified here, see [`refine_astrometry_in_place`].
///
/// Arguments
/// ---------
/// * `matcher`: spatial matching primitive
/// * `obj`: detected objects, pixel and sky positions
/// * `cat`: reference catalog, columns named by `params.columns`
/// * `wcs`: optional initial guess
/// * `params`: refinement configuration
/// * `method`: iterative loop or external solver
///
/// Return
/// ------
/// * `Ok(Some(solution))` with the solution of the last pass,
/// * `Ok(None)` when a pass finds fewer than `min_matches` pairs, the fit is
///   degenerate, or the external solver fails,
/// * an error for missing or non-numeric catalog columns.
pub fn refine_astrometry(
    matcher: &dyn SpatialMatcher,
    obj: &ObjectTable,
    cat: &CatalogTable,
    wcs: Option<&WcsSolution>,
    params: &AstrometryParams,
    method: &RefinementMethod<'_>,
) -> Result<Option<AstrometricSolution>, PipelineError> {
    info!(
        method = method.name(),
        sr_arcsec = params.sr * 3600.0,
        order = params.order,
        matching = if params.use_photometry {
            "photometric"
        } else {
            "simple positional"
        },
        "astrometric refinement"
    );

    match method {
        RefinementMethod::External(solver) => {
            let working = match wcs {
                Some(guess) => {
                    let mut table = obj.clone();
                    table.apply_wcs(guess);
                    Cow::Owned(table)
                }
                None => Cow::Borrowed(obj),
            };
            let inputs = SolverInputs {
                objects: &working,
                catalog: cat,
                columns: &params.columns,
                sr: params.sr,
                order: params.order,
                initial: wcs,
            };
            let solution = solver.solve(&inputs)?;
            if solution.is_none() {
                warn!("external astrometric solver produced no solution");
            }
            Ok(solution.map(|wcs| AstrometricSolution {
                wcs,
                iterations: vec![],
            }))
        }
        RefinementMethod::Iterative(fitter) => iterate(matcher, *fitter, obj, cat, wcs, params),
    }
}

fn iterate(
    matcher: &dyn SpatialMatcher,
    fitter: &dyn WcsFitter,
    obj: &ObjectTable,
    cat: &CatalogTable,
    wcs: Option<&WcsSolution>,
    params: &AstrometryParams,
) -> Result<Option<AstrometricSolution>, PipelineError> {
    let columns = &params.columns;
    let cat_ra = cat.float_column(&columns.ra)?;
    let cat_dec = cat.float_column(&columns.dec)?;
    let (cat_mag, cat_magerr) = if params.use_photometry {
        let magerr = match &columns.mag_err {
            Some(name) => Some(cat.float_column(name)?),
            None => None,
        };
        (Some(cat.float_column(&columns.mag)?), magerr)
    } else {
        (None, None)
    };

    let (x, y) = (obj.x(), obj.y());
    let (mag, magerr, flags) = (obj.mag(), obj.magerr(), obj.flags());
    let (mut ra, mut dec): (Vec<Degree>, Vec<Degree>) = match wcs {
        Some(guess) => x
            .iter()
            .zip(&y)
            .map(|(&px, &py)| guess.pixel_to_world(px, py))
            .unzip(),
        None => (obj.ra(), obj.dec()),
    };

    let photometry = PhotometryParams::builder()
        .sr(params.sr)
        .min_matches(params.min_matches)
        .build()?;

    let mut current = wcs.cloned();
    let mut iterations = Vec::with_capacity(params.n_iterations);
    for iteration in 0..params.n_iterations {
        let pairs = match cat_mag {
            Some(cat_mag) => {
                let mut inputs = PhotometricInputs::new(
                    &ra, &dec, &mag, &magerr, &flags, cat_ra, cat_dec, cat_mag,
                );
                inputs.cat_magerr = cat_magerr;
                let Some(m) = photometric_match(matcher, &inputs, &photometry)? else {
                    info!(iteration, "too few good photometric matches, cannot refine WCS");
                    return Ok(None);
                };
                let good = m.good_pairs();
                FitPairs::gather(
                    &x,
                    &y,
                    cat_ra,
                    cat_dec,
                    good.into_iter().map(|k| (m.oidx[k], m.cidx[k], m.dist[k])),
                )
            }
            None => {
                let pairs = matcher.match_positions(&ra, &dec, cat_ra, cat_dec, params.sr)?;
                FitPairs::gather(
                    &x,
                    &y,
                    cat_ra,
                    cat_dec,
                    (0..pairs.len()).map(|k| (pairs.idx_a[k], pairs.idx_b[k], pairs.dist[k])),
                )
            }
        };

        if pairs.len() < params.min_matches {
            info!(
                iteration,
                matches = pairs.len(),
                min_matches = params.min_matches,
                "too few positional matches, cannot refine WCS"
            );
            return Ok(None);
        }
        info!(
            iteration,
            matches = pairs.len(),
            rms_arcsec = pairs.rms,
            "astrometric refinement pass"
        );

        let Some(fitted) = fitter.fit_wcs(
            &pairs.x,
            &pairs.y,
            &pairs.ra,
            &pairs.dec,
            params.order,
            current.as_ref(),
        )?
        else {
            info!(iteration, "degenerate WCS fit, cannot refine WCS");
            return Ok(None);
        };
        debug!(iteration, wcs = %fitted, "fitted solution");

        if params.update {
            (ra, dec) = x
                .iter()
                .zip(&y)
                .map(|(&px, &py)| fitted.pixel_to_world(px, py))
                .unzip();
        }
        iterations.push(IterationReport {
            iteration,
            matches: pairs.len(),
            rms: pairs.rms,
        });
        current = Some(fitted);
    }

    Ok(current.map(|wcs| AstrometricSolution { wcs, iterations }))
}

/// [`refine_astrometry`], then recompute the sky positions of `obj` from the refined
/// solution when `params.update` is set.
///
/// This is an **in-place** update of the table.
pub fn refine_astrometry_in_place(
    matcher: &dyn SpatialMatcher,
    obj: &mut ObjectTable,
    cat: &CatalogTable,
    wcs: Option<&WcsSolution>,
    params: &AstrometryParams,
    method: &RefinementMethod<'_>,
) -> Result<Option<AstrometricSolution>, PipelineError> {
    let solution = refine_astrometry(matcher, obj, cat, wcs, params, method)?;
    if let (Some(solution), true) = (&solution, params.update) {
        obj.apply_wcs(&solution.wcs);
    }
    Ok(solution)
}

#[cfg(test)]
mod refine_test {
    use std::cell::Cell;

    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        constants::ARCSEC,
        matching::KdTreeMatcher,
        tables::{CatalogColumns, ObjectRecord},
        wcs::{ExternalSolver, LinearWcsFitter},
    };

    fn truth() -> WcsSolution {
        WcsSolution::from_scale_rotation((150.0, 2.0), (195.0, 190.0), ARCSEC, 10.0, false)
            .unwrap()
    }

    /// 64 stars on a grid centred on the reference pixel. Objects carry sky positions
    /// from a slightly wrong solution.
    fn field() -> (ObjectTable, CatalogTable) {
        let truth = truth();
        let guess =
            WcsSolution::from_scale_rotation((150.0005, 2.0003), (195.0, 190.0), ARCSEC, 10.0, false)
                .unwrap();
        let (mut ra, mut dec, mut v) = (vec![], vec![], vec![]);
        let mut records = vec![];
        for i in 0..64 {
            let px = 20.0 + 50.0 * (i % 8) as f64;
            let py = 15.0 + 50.0 * (i / 8) as f64;
            let (t_ra, t_dec) = truth.pixel_to_world(px, py);
            let (g_ra, g_dec) = guess.pixel_to_world(px, py);
            let mag = -8.0 - 0.05 * i as f64;
            records.push(ObjectRecord::new(g_ra, g_dec, px, py, mag, 0.01));
            ra.push(t_ra);
            dec.push(t_dec);
            v.push(mag + 25.0);
        }
        let cat = CatalogTable::new()
            .with_float_column("RAJ2000", ra)
            .unwrap()
            .with_float_column("DEJ2000", dec)
            .unwrap()
            .with_float_column("V", v)
            .unwrap();
        (ObjectTable::from(records), cat)
    }

    #[test]
    fn test_iterative_recovers_truth() {
        let (obj, cat) = field();
        let fitter = LinearWcsFitter::new();
        let params = AstrometryParams::default();
        let solution = refine_astrometry(
            &KdTreeMatcher,
            &obj,
            &cat,
            None,
            &params,
            &RefinementMethod::Iterative(&fitter),
        )
        .unwrap()
        .unwrap();

        assert_eq!(solution.iterations.len(), 3);
        assert_eq!(solution.iterations[0].matches, 64);
        assert!(solution.iterations[2].rms < 1e-3);

        let (ra, dec) = solution.wcs.pixel_to_world(300.0, 250.0);
        let (t_ra, t_dec) = truth().pixel_to_world(300.0, 250.0);
        assert_relative_eq!(ra, t_ra, epsilon = 1e-8);
        assert_relative_eq!(dec, t_dec, epsilon = 1e-8);
    }

    #[test]
    fn test_in_place_updates_positions() {
        let (mut obj, cat) = field();
        let fitter = LinearWcsFitter::new();
        let params = AstrometryParams::builder()
            .use_photometry(false)
            .build()
            .unwrap();
        refine_astrometry_in_place(
            &KdTreeMatcher,
            &mut obj,
            &cat,
            None,
            &params,
            &RefinementMethod::Iterative(&fitter),
        )
        .unwrap()
        .unwrap();

        let ra_cat = cat.float_column("RAJ2000").unwrap();
        assert_relative_eq!(obj.get(10).unwrap().ra, ra_cat[10], epsilon = 1e-8);
    }

    #[test]
    fn test_too_few_matches() {
        let (obj, cat) = field();
        let fitter = LinearWcsFitter::new();
        let params = AstrometryParams::builder()
            .use_photometry(false)
            .min_matches(65)
            .build()
            .unwrap();
        assert!(refine_astrometry(
            &KdTreeMatcher,
            &obj,
            &cat,
            None,
            &params,
            &RefinementMethod::Iterative(&fitter),
        )
        .unwrap()
        .is_none());
    }

    #[test]
    fn test_missing_magnitude_column() {
        let (obj, cat) = field();
        let fitter = LinearWcsFitter::new();
        let params = AstrometryParams::builder()
            .columns(CatalogColumns::astrometry().magnitude("Gmag", None))
            .build()
            .unwrap();
        assert_eq!(
            refine_astrometry(
                &KdTreeMatcher,
                &obj,
                &cat,
                None,
                &params,
                &RefinementMethod::Iterative(&fitter),
            )
            .unwrap_err(),
            PipelineError::MissingColumn("Gmag".into())
        );
    }

    struct FixedSolver {
        calls: Cell<usize>,
    }

    impl ExternalSolver for FixedSolver {
        fn solve(&self, inputs: &SolverInputs<'_>) -> Result<Option<WcsSolution>, PipelineError> {
            self.calls.set(self.calls.get() + 1);
            assert_eq!(inputs.objects.len(), 64);
            Ok(Some(truth()))
        }
    }

    #[test]
    fn test_external_solver_bypasses_loop() {
        let (obj, cat) = field();
        let solver = FixedSolver {
            calls: Cell::new(0),
        };
        let solution = refine_astrometry(
            &KdTreeMatcher,
            &obj,
            &cat,
            None,
            &AstrometryParams::default(),
            &RefinementMethod::External(&solver),
        )
        .unwrap()
        .unwrap();
        assert_eq!(solver.calls.get(), 1);
        assert!(solution.iterations.is_empty());
        assert_eq!(solution.wcs, truth());
    }
}
