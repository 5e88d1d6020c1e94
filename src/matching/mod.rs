//! # Spatial matching
//!
//! Positional cross-identification between two sets of sky positions.
//!
//! The pipeline never matches positions by itself: every stage goes through the
//! [`SpatialMatcher`] trait so that callers may plug their own primitive (HEALPix
//! index, GPU matcher, a mock counting its calls in tests). [`KdTreeMatcher`] is the
//! implementation shipped with the crate.
//!
//! ## Contract
//!
//! For every position of set A, the nearest position of set B lying within the
//! radius, if any:
//!
//! - pairs are ordered by A index, each A index appears at most once,
//! - a B index may be paired with several A positions,
//! - `dist[k] <= radius` for every pair,
//! - ties are broken by the lowest B index.
pub mod kdtree;

use crate::{constants::Degree, pipeline_errors::PipelineError};

pub use kdtree::KdTreeMatcher;

/// Matched index pairs with their separations.
///
/// # Fields
///
/// * `idx_a` - Index into set A
/// * `idx_b` - Index into set B
/// * `dist` - Great-circle separation in degrees
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchPairs {
    pub idx_a: Vec<usize>,
    pub idx_b: Vec<usize>,
    pub dist: Vec<Degree>,
}

impl MatchPairs {
    pub fn len(&self) -> usize {
        self.idx_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idx_a.is_empty()
    }

    pub(crate) fn push(&mut self, a: usize, b: usize, dist: Degree) {
        self.idx_a.push(a);
        self.idx_b.push(b);
        self.dist.push(dist);
    }

    /// Boolean mask over set A flagging the matched positions.
    pub fn matched_a(&self, n_a: usize) -> Vec<bool> {
        let mut mask = vec![false; n_a];
        for &a in &self.idx_a {
            mask[a] = true;
        }
        mask
    }
}

/// Nearest-neighbour matching within an angular radius.
pub trait SpatialMatcher {
    /// Match every position of A with its nearest neighbour in B.
    ///
    /// Arguments
    /// ---------
    /// * `ra_a`, `dec_a`: positions of set A, degrees
    /// * `ra_b`, `dec_b`: positions of set B, degrees
    /// * `radius`: matching radius, degrees
    ///
    /// Return
    /// ------
    /// * The matched pairs (possibly empty), or
    ///   [`PipelineError::MismatchedLength`] / [`PipelineError::InvalidParameter`] for
    ///   malformed inputs.
    fn match_positions(
        &self,
        ra_a: &[Degree],
        dec_a: &[Degree],
        ra_b: &[Degree],
        dec_b: &[Degree],
        radius: Degree,
    ) -> Result<MatchPairs, PipelineError>;
}

impl<T: SpatialMatcher + ?Sized> SpatialMatcher for &T {
    fn match_positions(
        &self,
        ra_a: &[Degree],
        dec_a: &[Degree],
        ra_b: &[Degree],
        dec_b: &[Degree],
        radius: Degree,
    ) -> Result<MatchPairs, PipelineError> {
        (**self).match_positions(ra_a, dec_a, ra_b, dec_b, radius)
    }
}

/// Shared input validation for [`SpatialMatcher`] implementations.
pub(crate) fn validate_inputs(
    ra_a: &[Degree],
    dec_a: &[Degree],
    ra_b: &[Degree],
    dec_b: &[Degree],
    radius: Degree,
) -> Result<(), PipelineError> {
    if ra_a.len() != dec_a.len() {
        return Err(PipelineError::mismatched("match set A", ra_a.len(), dec_a.len()));
    }
    if ra_b.len() != dec_b.len() {
        return Err(PipelineError::mismatched("match set B", ra_b.len(), dec_b.len()));
    }
    if !radius.is_finite() || radius < 0.0 {
        return Err(PipelineError::InvalidParameter(format!(
            "matching radius must be finite and non-negative, got {radius}"
        )));
    }
    Ok(())
}
