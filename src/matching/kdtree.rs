use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use tracing::debug;

use crate::{
    constants::Degree,
    matching::{validate_inputs, MatchPairs, SpatialMatcher},
    pipeline_errors::PipelineError,
    sphere::{angular_separation, chord_sq, radec_to_unit},
};

/// Item is the index into set B, 3D unit vectors, leaf capacity 32.
type Tree = ImmutableKdTree<f64, u32, 3, 32>;

/// Relative slack on the chord radius so that the exact separation check, not the
/// tree query, decides pairs lying on the boundary.
const CHORD_SLACK: f64 = 1e-9;

/// Per-point offset step applied to the indexed coordinates.
///
/// The immutable tree cannot split a leaf whose points all share one value on the
/// split axis, which happens with repeated positions or with every star on the
/// equator (z = 0). Point `k` is shifted by `(k + 1) * JITTER_STEP` on each axis, a
/// step above the spacing of `f64` values in `[-1, 1]`, so no two indexed points
/// share a coordinate. Only the tree sees the shifted copy.
const JITTER_STEP: f64 = 1e-15;

/// [`SpatialMatcher`] backed by a kd-tree over unit vectors.
///
/// Set B is indexed as 3D unit vectors, so the query is free of any right ascension
/// seam or polar singularity. Candidates are fetched by chord distance and then
/// confirmed with the exact great-circle separation.
#[derive(Debug, Clone, Copy, Default)]
pub struct KdTreeMatcher;

impl KdTreeMatcher {
    pub fn new() -> Self {
        KdTreeMatcher
    }
}

impl SpatialMatcher for KdTreeMatcher {
    fn match_positions(
        &self,
        ra_a: &[Degree],
        dec_a: &[Degree],
        ra_b: &[Degree],
        dec_b: &[Degree],
        radius: Degree,
    ) -> Result<MatchPairs, PipelineError> {
        validate_inputs(ra_a, dec_a, ra_b, dec_b, radius)?;

        let mut pairs = MatchPairs::default();

        // positions with NaN coordinates never take part in a match
        let (points, b_index): (Vec<[f64; 3]>, Vec<usize>) = ra_b
            .iter()
            .zip(dec_b)
            .enumerate()
            .filter(|(_, (r, d))| r.is_finite() && d.is_finite())
            .enumerate()
            .map(|(k, (i, (&r, &d)))| {
                let v = radec_to_unit(r, d);
                let shift = (k + 1) as f64 * JITTER_STEP;
                ([v.x + shift, v.y + shift, v.z + shift], i)
            })
            .unzip();

        if points.is_empty() || ra_a.is_empty() {
            return Ok(pairs);
        }

        let tree: Tree = ImmutableKdTree::new_from_slice(&points);
        let max_shift = 3f64.sqrt() * points.len() as f64 * JITTER_STEP;
        let chord = chord_sq(radius.min(180.0)).sqrt() + max_shift;
        let query_radius = chord * chord * (1.0 + CHORD_SLACK) + f64::EPSILON;

        for (ia, (&ra, &dec)) in ra_a.iter().zip(dec_a).enumerate() {
            if !ra.is_finite() || !dec.is_finite() {
                continue;
            }
            let v = radec_to_unit(ra, dec);

            let best = tree
                .within::<SquaredEuclidean>(&[v.x, v.y, v.z], query_radius)
                .into_iter()
                .map(|nn| {
                    let ib = b_index[nn.item as usize];
                    (ib, angular_separation(ra, dec, ra_b[ib], dec_b[ib]))
                })
                .filter(|&(_, sep)| sep <= radius)
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

            if let Some((ib, sep)) = best {
                pairs.push(ia, ib, sep);
            }
        }

        debug!(
            n_a = ra_a.len(),
            n_b = ra_b.len(),
            radius_arcsec = radius * 3600.0,
            n_matches = pairs.len(),
            "positional match"
        );
        Ok(pairs)
    }
}
