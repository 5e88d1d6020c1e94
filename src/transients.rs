//! # Transient candidate filtering
//!
//! Narrows a list of detections down to the objects without any counterpart in the
//! known catalogs. Stages run in order on the surviving subset only, and the filter
//! stops querying as soon as nothing survives:
//!
//! 1. flagged detections (`flags != 0`), when `remove_flagged` is set,
//! 2. objects matching a caller-supplied local catalog within `sr`,
//! 3. objects identified in each external catalog, in the configured order,
//! 4. known solar-system bodies at the observation epoch, when `query_moving_objects`
//!    is set and an epoch is known (the `time` parameter, else the mean epoch of the
//!    objects),
//! 5. extragalactic objects from NED, when `query_extragalactic` is set.
//!
//! Failed or empty catalog queries remove nothing. Survivor counts of every stage are
//! logged and returned by [`filter_transient_candidates_staged`].
use std::cmp::Ordering::Greater;
use std::collections::HashSet;
use std::fmt;

use hifitime::Epoch;
use tracing::{debug, info};

use crate::{
    catalogs::{CatalogQuery, CrossMatch},
    constants::{Degree, ObjectId, DEFAULT_COL_DEC, DEFAULT_COL_RA, DEFAULT_MOVING_OBJECT_RADIUS},
    matching::SpatialMatcher,
    pipeline_errors::PipelineError,
    tables::{CatalogTable, ObjectTable},
};

/// Configuration of [`filter_transient_candidates`].
///
/// # Fields
///
/// * `sr` - Matching radius, degrees. Half the median FWHM when `None` and `pixscale`
///   is set, 1″ otherwise
/// * `pixscale` - Pixel scale, degrees per pixel
/// * `time` - Observation epoch for the moving-object query
/// * `cat_col_ra`, `cat_col_dec` - Position columns of the local catalog
/// * `external_catalogs` - Static catalogs queried in order
/// * `query_moving_objects` - Query SkyBot for solar-system bodies
/// * `moving_object_sr` - Matching radius of the moving-object query (10″)
/// * `query_extragalactic` - Query NED for extragalactic objects
/// * `remove_flagged` - Drop detections with non-zero flags
/// * `return_candidates` - Return the surviving rows instead of a mask
#[derive(Debug, Clone, PartialEq)]
pub struct TransientFilterParams {
    pub sr: Option<Degree>,
    pub pixscale: Option<Degree>,
    pub time: Option<Epoch>,
    pub cat_col_ra: String,
    pub cat_col_dec: String,
    pub external_catalogs: Vec<String>,
    pub query_moving_objects: bool,
    pub moving_object_sr: Degree,
    pub query_extragalactic: bool,
    pub remove_flagged: bool,
    pub return_candidates: bool,
}

impl Default for TransientFilterParams {
    fn default() -> Self {
        TransientFilterParams {
            sr: None,
            pixscale: None,
            time: None,
            cat_col_ra: DEFAULT_COL_RA.to_string(),
            cat_col_dec: DEFAULT_COL_DEC.to_string(),
            external_catalogs: vec!["ps1".into(), "usnob1".into(), "gsc".into()],
            query_moving_objects: true,
            moving_object_sr: DEFAULT_MOVING_OBJECT_RADIUS,
            query_extragalactic: false,
            remove_flagged: true,
            return_candidates: true,
        }
    }
}

impl TransientFilterParams {
    pub fn builder() -> TransientFilterParamsBuilder {
        TransientFilterParamsBuilder::default()
    }
}

impl fmt::Display for TransientFilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sr = self
            .sr
            .map_or("auto".to_string(), |sr| format!("{:.2}\"", sr * 3600.0));
        if f.alternate() {
            writeln!(f, "Transient filter parameters")?;
            writeln!(f, "---------------------------")?;
            writeln!(f, "  sr                   = {sr}")?;
            writeln!(f, "  pixscale             = {:?}", self.pixscale)?;
            writeln!(
                f,
                "  time                 = {}",
                self.time.map_or("objects".to_string(), |t| t.to_string())
            )?;
            writeln!(f, "  local catalog        = {}/{}", self.cat_col_ra, self.cat_col_dec)?;
            writeln!(f, "  external_catalogs    = {}", self.external_catalogs.join(", "))?;
            writeln!(f, "  query_moving_objects = {}", self.query_moving_objects)?;
            writeln!(f, "  moving_object_sr     = {:.2}\"", self.moving_object_sr * 3600.0)?;
            writeln!(f, "  query_extragalactic  = {}", self.query_extragalactic)?;
            writeln!(f, "  remove_flagged       = {}", self.remove_flagged)?;
            write!(f, "  return_candidates    = {}", self.return_candidates)
        } else {
            write!(
                f,
                "sr={sr} catalogs=[{}] skybot={} ned={} flagged={}",
                self.external_catalogs.join(","),
                self.query_moving_objects,
                self.query_extragalactic,
                self.remove_flagged
            )
        }
    }
}

/// Validating builder of [`TransientFilterParams`].
#[derive(Debug, Clone, Default)]
pub struct TransientFilterParamsBuilder {
    params: TransientFilterParams,
}

impl TransientFilterParamsBuilder {
    pub fn sr(mut self, v: Degree) -> Self {
        self.params.sr = Some(v);
        self
    }

    pub fn pixscale(mut self, v: Degree) -> Self {
        self.params.pixscale = Some(v);
        self
    }

    pub fn time(mut self, v: Epoch) -> Self {
        self.params.time = Some(v);
        self
    }

    pub fn local_catalog_columns(mut self, ra: &str, dec: &str) -> Self {
        self.params.cat_col_ra = ra.to_string();
        self.params.cat_col_dec = dec.to_string();
        self
    }

    pub fn external_catalogs<S: AsRef<str>>(mut self, catalogs: &[S]) -> Self {
        self.params.external_catalogs = catalogs.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn query_moving_objects(mut self, v: bool) -> Self {
        self.params.query_moving_objects = v;
        self
    }

    pub fn moving_object_sr(mut self, v: Degree) -> Self {
        self.params.moving_object_sr = v;
        self
    }

    pub fn query_extragalactic(mut self, v: bool) -> Self {
        self.params.query_extragalactic = v;
        self
    }

    pub fn remove_flagged(mut self, v: bool) -> Self {
        self.params.remove_flagged = v;
        self
    }

    pub fn return_candidates(mut self, v: bool) -> Self {
        self.params.return_candidates = v;
        self
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `sr`, `pixscale` and `moving_object_sr` are finite and > 0 when set.
    pub fn build(self) -> Result<TransientFilterParams, PipelineError> {
        let positive = |x: f64| x.partial_cmp(&0.0) == Some(Greater) && x.is_finite();
        let p = &self.params;
        for (name, value) in [
            ("sr", p.sr),
            ("pixscale", p.pixscale),
            ("moving_object_sr", Some(p.moving_object_sr)),
        ] {
            if value.is_some_and(|v| !positive(v)) {
                return Err(PipelineError::InvalidParameter(format!(
                    "{name} must be finite and > 0"
                )));
            }
        }
        Ok(self.params)
    }
}

/// Filtering stage, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStage {
    Input,
    Flagged,
    LocalCatalog,
    External(String),
    MovingObjects,
    Extragalactic,
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::Input => write!(f, "input"),
            FilterStage::Flagged => write!(f, "flagged"),
            FilterStage::LocalCatalog => write!(f, "local catalog"),
            FilterStage::External(name) => write!(f, "{name}"),
            FilterStage::MovingObjects => write!(f, "SkyBot"),
            FilterStage::Extragalactic => write!(f, "NED"),
        }
    }
}

/// Number of objects remaining after one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCount {
    pub stage: FilterStage,
    pub remaining: usize,
}

/// Filter output.
#[derive(Debug, Clone, PartialEq)]
pub enum TransientSelection {
    /// Surviving rows of the caller's table, in table order.
    Candidates(ObjectTable),
    /// One flag per row of the caller's table, `true` for survivors.
    Mask(Vec<bool>),
}

impl TransientSelection {
    /// Number of surviving objects.
    pub fn count(&self) -> usize {
        match self {
            TransientSelection::Candidates(table) => table.len(),
            TransientSelection::Mask(mask) => mask.iter().filter(|&&k| k).count(),
        }
    }
}

/// Surviving-set bookkeeping shared by the stages.
struct Survivors<'a> {
    objects: &'a ObjectTable,
    ids: Vec<ObjectId>,
    keep: Vec<bool>,
    stages: Vec<StageCount>,
}

impl Survivors<'_> {
    fn remaining(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    fn indices(&self) -> Vec<usize> {
        (0..self.keep.len()).filter(|&i| self.keep[i]).collect()
    }

    fn table(&self) -> ObjectTable {
        self.objects.select(&self.indices())
    }

    fn record(&mut self, stage: FilterStage) {
        let remaining = self.remaining();
        info!(stage = %stage, remaining, "candidates remaining");
        self.stages.push(StageCount { stage, remaining });
    }

    /// Drop every survivor identified by a catalog query.
    fn drop_identified(&mut self, xmatch: Option<CrossMatch>) {
        let Some(xmatch) = xmatch else {
            return;
        };
        let identified: HashSet<ObjectId> = xmatch.object_ids.into_iter().collect();
        for (keep, id) in self.keep.iter_mut().zip(&self.ids) {
            if identified.contains(id) {
                *keep = false;
            }
        }
    }
}

/// Select the detections without counterpart in any known catalog.
///
/// Arguments
/// ---------
/// * `matcher`: spatial matching primitive, used against the local catalog
/// * `query`: catalog services
/// * `obj`: detections, never modified
/// * `cat`: optional local catalog, positions in `params.cat_col_ra`/`cat_col_dec`
/// * `params`: filter configuration
///
/// Return
/// ------
/// * The surviving rows (or the mask), an error only for a malformed local catalog.
pub fn filter_transient_candidates(
    matcher: &dyn SpatialMatcher,
    query: &dyn CatalogQuery,
    obj: &ObjectTable,
    cat: Option<&CatalogTable>,
    params: &TransientFilterParams,
) -> Result<TransientSelection, PipelineError> {
    filter_transient_candidates_staged(matcher, query, obj, cat, params).map(|(s, _)| s)
}

/// [`filter_transient_candidates`], also returning the survivor count of every stage
/// that ran.
pub fn filter_transient_candidates_staged(
    matcher: &dyn SpatialMatcher,
    query: &dyn CatalogQuery,
    obj: &ObjectTable,
    cat: Option<&CatalogTable>,
    params: &TransientFilterParams,
) -> Result<(TransientSelection, Vec<StageCount>), PipelineError> {
    let sr = params.sr.unwrap_or_else(|| obj.matching_radius(params.pixscale));
    info!(
        n_objects = obj.len(),
        sr_arcsec = sr * 3600.0,
        "filtering transient candidates"
    );

    let working = obj.with_ids();
    let ids = working.ids().unwrap_or_default();
    let mut survivors = Survivors {
        objects: &working,
        ids,
        keep: vec![true; obj.len()],
        stages: vec![],
    };
    survivors.record(FilterStage::Input);

    if params.remove_flagged && survivors.remaining() > 0 {
        for (keep, record) in survivors.keep.iter_mut().zip(working.iter()) {
            *keep &= record.flags == 0;
        }
        survivors.record(FilterStage::Flagged);
    }

    if let Some(cat) = cat {
        if survivors.remaining() > 0 {
            let cat_ra = cat.float_column(&params.cat_col_ra)?;
            let cat_dec = cat.float_column(&params.cat_col_dec)?;
            let indices = survivors.indices();
            let subset = working.select(&indices);
            let pairs = matcher.match_positions(&subset.ra(), &subset.dec(), cat_ra, cat_dec, sr)?;
            for &a in &pairs.idx_a {
                survivors.keep[indices[a]] = false;
            }
            survivors.record(FilterStage::LocalCatalog);
        }
    }

    for catalog in &params.external_catalogs {
        if survivors.remaining() == 0 {
            break;
        }
        let xmatch = query.xmatch_objects(&survivors.table(), catalog, sr);
        survivors.drop_identified(xmatch);
        survivors.record(FilterStage::External(catalog.clone()));
    }

    if params.query_moving_objects && survivors.remaining() > 0 {
        match params.time.or_else(|| working.mean_epoch()) {
            Some(time) => {
                let xmatch =
                    query.xmatch_moving_objects(&survivors.table(), time, params.moving_object_sr);
                survivors.drop_identified(xmatch);
                survivors.record(FilterStage::MovingObjects);
            }
            None => debug!("no observation epoch, skipping the moving-object query"),
        }
    }

    if params.query_extragalactic && survivors.remaining() > 0 {
        let xmatch = query.xmatch_extragalactic(&survivors.table(), sr);
        survivors.drop_identified(xmatch);
        survivors.record(FilterStage::Extragalactic);
    }

    let Survivors { keep, stages, .. } = survivors;
    let selection = if params.return_candidates {
        TransientSelection::Candidates(obj.subset(&keep)?)
    } else {
        TransientSelection::Mask(keep)
    };
    Ok((selection, stages))
}
