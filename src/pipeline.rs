//! # Pipeline: matcher, catalog services and environment
//!
//! [`Pipeline`] is the façade wiring together the collaborators shared by every stage:
//!
//! 1. **Environment** ([`PipelineEnv`]): HTTP agent and request timeout.
//! 2. **Spatial matcher** ([`SpatialMatcher`]): pairs objects with catalog rows.
//! 3. **Catalog services** ([`CatalogQuery`]): VizieR, SkyBot and NED lookups.
//!
//! Each entry point forwards to the free function of the corresponding module with the
//! owned collaborators, so that a caller processing many images configures them once.
//! The façade holds no mutable state: it is `Send + Sync` whenever its collaborators
//! are, and one instance may serve several threads.
//!
//! ## Typical usage
//!
//! ```rust, no_run
//! use skypipe::pipeline::Pipeline;
//! use skypipe::transients::{TransientFilterParams, TransientSelection};
//! # use skypipe::tables::ObjectTable;
//! # let objects: ObjectTable = unimplemented!();
//!
//! let pipeline = Pipeline::new();
//! let params = TransientFilterParams::builder()
//!     .pixscale(1.2 / 3600.0)
//!     .build()
//!     .unwrap();
//!
//! let selection = pipeline
//!     .filter_transient_candidates(&objects, None, &params)
//!     .unwrap();
//! println!("{} candidates", selection.count());
//! ```
use crate::{
    astrometry::{self, AstrometricSolution, AstrometryParams, RefinementMethod},
    catalogs::{CatalogQuery, CdsCatalogService},
    constants::Degree,
    env_state::PipelineEnv,
    matching::{KdTreeMatcher, MatchPairs, SpatialMatcher},
    photometry::{self, CalibrationParams, PhotometricInputs, PhotometricMatch, PhotometryParams},
    pipeline_errors::PipelineError,
    tables::{CatalogTable, ObjectTable},
    transients::{self, StageCount, TransientFilterParams, TransientSelection},
    wcs::WcsSolution,
};

/// Entry points of the processing pipeline over shared collaborators.
#[derive(Debug, Clone)]
pub struct Pipeline<M = KdTreeMatcher, Q = CdsCatalogService<KdTreeMatcher>> {
    env: PipelineEnv,
    matcher: M,
    catalogs: Q,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Pipeline with the kd-tree matcher and the CDS services, default timeout.
    pub fn new() -> Self {
        Self::with_env(PipelineEnv::new())
    }

    /// Pipeline with the kd-tree matcher and the CDS services over `env`.
    pub fn with_env(env: PipelineEnv) -> Self {
        let catalogs = CdsCatalogService::new(env.clone(), KdTreeMatcher);
        Pipeline {
            env,
            matcher: KdTreeMatcher,
            catalogs,
        }
    }
}

impl<M: SpatialMatcher, Q: CatalogQuery> Pipeline<M, Q> {
    /// Pipeline over caller-supplied collaborators.
    pub fn with_components(env: PipelineEnv, matcher: M, catalogs: Q) -> Self {
        Pipeline {
            env,
            matcher,
            catalogs,
        }
    }

    pub fn env(&self) -> &PipelineEnv {
        &self.env
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn catalogs(&self) -> &Q {
        &self.catalogs
    }

    /// See [`SpatialMatcher::match_positions`].
    pub fn match_positions(
        &self,
        ra_a: &[Degree],
        dec_a: &[Degree],
        ra_b: &[Degree],
        dec_b: &[Degree],
        radius: Degree,
    ) -> Result<MatchPairs, PipelineError> {
        self.matcher.match_positions(ra_a, dec_a, ra_b, dec_b, radius)
    }

    /// See [`photometry::photometric_match`].
    pub fn photometric_match(
        &self,
        inputs: &PhotometricInputs<'_>,
        params: &PhotometryParams,
    ) -> Result<Option<PhotometricMatch>, PipelineError> {
        photometry::photometric_match(&self.matcher, inputs, params)
    }

    /// See [`photometry::calibrate_photometry`].
    pub fn calibrate_photometry(
        &self,
        obj: &ObjectTable,
        cat: &CatalogTable,
        params: &CalibrationParams,
    ) -> Result<Option<PhotometricMatch>, PipelineError> {
        photometry::calibrate_photometry(&self.matcher, obj, cat, params)
    }

    /// See [`photometry::calibrate_photometry_in_place`].
    pub fn calibrate_photometry_in_place(
        &self,
        obj: &mut ObjectTable,
        cat: &CatalogTable,
        params: &CalibrationParams,
    ) -> Result<Option<PhotometricMatch>, PipelineError> {
        photometry::calibrate_photometry_in_place(&self.matcher, obj, cat, params)
    }

    /// See [`astrometry::refine_astrometry`].
    pub fn refine_astrometry(
        &self,
        obj: &ObjectTable,
        cat: &CatalogTable,
        wcs: Option<&WcsSolution>,
        params: &AstrometryParams,
        method: &RefinementMethod<'_>,
    ) -> Result<Option<AstrometricSolution>, PipelineError> {
        astrometry::refine_astrometry(&self.matcher, obj, cat, wcs, params, method)
    }

    /// See [`astrometry::refine_astrometry_in_place`].
    pub fn refine_astrometry_in_place(
        &self,
        obj: &mut ObjectTable,
        cat: &CatalogTable,
        wcs: Option<&WcsSolution>,
        params: &AstrometryParams,
        method: &RefinementMethod<'_>,
    ) -> Result<Option<AstrometricSolution>, PipelineError> {
        astrometry::refine_astrometry_in_place(&self.matcher, obj, cat, wcs, params, method)
    }

    /// See [`transients::filter_transient_candidates`].
    pub fn filter_transient_candidates(
        &self,
        obj: &ObjectTable,
        cat: Option<&CatalogTable>,
        params: &TransientFilterParams,
    ) -> Result<TransientSelection, PipelineError> {
        transients::filter_transient_candidates(&self.matcher, &self.catalogs, obj, cat, params)
    }

    /// See [`transients::filter_transient_candidates_staged`].
    pub fn filter_transient_candidates_staged(
        &self,
        obj: &ObjectTable,
        cat: Option<&CatalogTable>,
        params: &TransientFilterParams,
    ) -> Result<(TransientSelection, Vec<StageCount>), PipelineError> {
        transients::filter_transient_candidates_staged(
            &self.matcher,
            &self.catalogs,
            obj,
            cat,
            params,
        )
    }
}
