//! HTTP implementation of [`CatalogQuery`] on the CDS, IMCCE and NED services.
use hifitime::Epoch;
use tracing::{debug, info, warn};

use crate::{
    catalogs::{
        crossmatch, is_truncated, ned, registry::CatalogRegistry, search_cone, skybot,
        tap_parameters, vizier, CatalogQuery, CrossMatch, CONES_PER_QUERY,
    },
    constants::Degree,
    env_state::PipelineEnv,
    matching::{KdTreeMatcher, SpatialMatcher},
    pipeline_errors::PipelineError,
    tables::{CatalogTable, ObjectTable},
};

/// [`CatalogQuery`] backed by TAPVizieR, SkyBot and NED.
///
/// Requests go through the agent of the [`PipelineEnv`], so that they share its
/// connection pool and global timeout. Service rows are matched with the objects by
/// the `matcher`.
///
/// # Fields
///
/// * `env` - HTTP environment
/// * `matcher` - Local cross-match of the returned rows
/// * `registry` - Known static catalogs
/// * `max_rows` - Row limit of one TAP query; an answer reaching it is truncated
/// * `vizier_url`, `skybot_url`, `ned_url` - Service endpoints, overridable for mirrors
#[derive(Debug, Clone)]
pub struct CdsCatalogService<M = KdTreeMatcher> {
    env: PipelineEnv,
    matcher: M,
    registry: CatalogRegistry,
    max_rows: usize,
    vizier_url: String,
    skybot_url: String,
    ned_url: String,
}

impl Default for CdsCatalogService {
    fn default() -> Self {
        CdsCatalogService::new(PipelineEnv::default(), KdTreeMatcher)
    }
}

impl<M: SpatialMatcher> CdsCatalogService<M> {
    pub fn new(env: PipelineEnv, matcher: M) -> Self {
        CdsCatalogService {
            env,
            matcher,
            registry: CatalogRegistry::default(),
            max_rows: vizier::DEFAULT_MAX_ROWS,
            vizier_url: vizier::TAP_VIZIER_URL.to_string(),
            skybot_url: skybot::SKYBOT_URL.to_string(),
            ned_url: ned::NED_TAP_URL.to_string(),
        }
    }

    pub fn with_registry(mut self, registry: CatalogRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_vizier_url(mut self, url: &str) -> Self {
        self.vizier_url = url.to_string();
        self
    }

    pub fn with_skybot_url(mut self, url: &str) -> Self {
        self.skybot_url = url.to_string();
        self
    }

    pub fn with_ned_url(mut self, url: &str) -> Self {
        self.ned_url = url.to_string();
        self
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CatalogRegistry {
        &mut self.registry
    }

    pub fn env(&self) -> &PipelineEnv {
        &self.env
    }

    /// Rows of a TAP service around the objects.
    ///
    /// One cone covering every object is queried first. When that answer reaches
    /// `max_rows` it may miss rows near some objects, so the service is queried again
    /// with one cone of radius `sr` per object, [`CONES_PER_QUERY`] cones per request,
    /// and the answers are concatenated.
    ///
    /// Arguments
    /// ---------
    /// * `service`: name used in log messages
    /// * `query`: ADQL for a list of cone centers and their common radius
    /// * `fetch`: issues one ADQL query and parses its answer
    ///
    /// Return
    /// ------
    /// * `Ok(None)` when no object has a position.
    fn region_rows(
        &self,
        service: &str,
        objects: &ObjectTable,
        sr: Degree,
        query: impl Fn(&[(Degree, Degree)], Degree) -> String,
        fetch: impl Fn(&str) -> Result<CatalogTable, PipelineError>,
    ) -> Result<Option<CatalogTable>, PipelineError> {
        let Some((center, radius)) = search_cone(objects, sr) else {
            debug!(service, "no object position to query");
            return Ok(None);
        };
        debug!(service, ra = center.0, dec = center.1, radius, "region query");

        let rows = fetch(&query(&[center], radius))?;
        if !is_truncated(rows.len(), self.max_rows) {
            return Ok(Some(rows));
        }

        let centers: Vec<(Degree, Degree)> = objects
            .iter()
            .filter(|o| o.ra.is_finite() && o.dec.is_finite())
            .map(|o| (o.ra, o.dec))
            .collect();
        warn!(
            service,
            n_rows = rows.len(),
            max_rows = self.max_rows,
            n_cones = centers.len(),
            "region answer truncated, querying one cone per object"
        );

        let mut merged = CatalogTable::new();
        for chunk in centers.chunks(CONES_PER_QUERY) {
            let rows = fetch(&query(chunk, sr))?;
            if is_truncated(rows.len(), self.max_rows) {
                warn!(service, n_rows = rows.len(), "cone answer truncated, matches may be missing");
            }
            merged.append(rows)?;
        }
        Ok(Some(merged))
    }

    /// Match the objects with the rows of a parsed answer, if any.
    fn match_rows(
        &self,
        objects: &ObjectTable,
        rows: Option<CatalogTable>,
        columns: (&str, &str),
        sr: Degree,
    ) -> Result<Option<CrossMatch>, PipelineError> {
        match rows {
            Some(rows) if !rows.is_empty() => {
                crossmatch(&self.matcher, objects, &rows, columns.0, columns.1, sr)
            }
            _ => Ok(None),
        }
    }

    /// Log the outcome of one query and collapse every failure to `None`.
    fn settle(
        &self,
        service: &str,
        n_objects: usize,
        result: Result<Option<CrossMatch>, PipelineError>,
    ) -> Option<CrossMatch> {
        match result {
            Ok(Some(m)) => {
                info!(service, n_objects, n_matched = m.len(), "objects identified");
                Some(m)
            }
            Ok(None) => {
                debug!(service, n_objects, "no object identified");
                None
            }
            Err(error) => {
                warn!(service, %error, "catalog query failed");
                None
            }
        }
    }
}

impl<M: SpatialMatcher> CatalogQuery for CdsCatalogService<M> {
    fn xmatch_objects(
        &self,
        objects: &ObjectTable,
        catalog: &str,
        sr: Degree,
    ) -> Option<CrossMatch> {
        let descriptor = self.registry.resolve(catalog);
        debug!(catalog = %descriptor, "querying VizieR");

        let max_rows = self.max_rows.to_string();
        let fetch = |query: &str| {
            self.env
                .get_with_query(&self.vizier_url, &tap_parameters(query, &max_rows))
                .and_then(|body| vizier::parse_response(&descriptor, &body))
        };
        let result = self
            .region_rows(
                &descriptor.name,
                objects,
                sr,
                |centers, radius| vizier::cones_query(&descriptor, centers, radius),
                fetch,
            )
            .and_then(|rows| {
                self.match_rows(
                    objects,
                    rows,
                    (&descriptor.ra_column, &descriptor.dec_column),
                    sr,
                )
            });
        self.settle(&descriptor.name, objects.len(), result)
    }

    fn xmatch_moving_objects(
        &self,
        objects: &ObjectTable,
        time: Epoch,
        sr: Degree,
    ) -> Option<CrossMatch> {
        let Some((center, radius)) = search_cone(objects, sr) else {
            debug!("no object position to query");
            return None;
        };
        debug!(%time, ra = center.0, dec = center.1, radius, "querying SkyBot");

        let params = skybot::cone_parameters(time, center, radius);
        let params: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let result = self
            .env
            .get_with_query(&self.skybot_url, &params)
            .and_then(|body| skybot::parse_response(&body))
            .and_then(|rows| self.match_rows(objects, rows, (skybot::COL_RA, skybot::COL_DEC), sr));
        self.settle("SkyBot", objects.len(), result)
    }

    fn xmatch_extragalactic(&self, objects: &ObjectTable, sr: Degree) -> Option<CrossMatch> {
        let max_rows = self.max_rows.to_string();
        let fetch = |query: &str| {
            self.env
                .get_with_query(&self.ned_url, &tap_parameters(query, &max_rows))
                .and_then(|body| ned::parse_response(&body))
        };
        let result = self
            .region_rows("NED", objects, sr, ned::cones_query, fetch)
            .and_then(|rows| self.match_rows(objects, rows, (ned::COL_RA, ned::COL_DEC), sr));
        self.settle("NED", objects.len(), result)
    }
}
