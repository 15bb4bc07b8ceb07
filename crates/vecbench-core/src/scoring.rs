//! Per-query correctness scores.

use crate::backend::IdRepr;
use crate::types::{Expectation, NativeId, SearchHit};
use std::collections::HashSet;

/// Fraction of expected annotations matched by at least one returned payload.
///
/// `None` when the query carries no expectations, so such queries do not pull
/// the mean hit-rate towards zero. This is a fraction in `[0, 1]`, not a
/// per-query count of matching payloads.
pub fn hits_at_k(hits: &[SearchHit], expected: &[Expectation]) -> Option<f64> {
    let expected: Vec<&Expectation> = expected.iter().filter(|e| !e.is_empty()).collect();
    if expected.is_empty() {
        return None;
    }
    let matched = expected
        .iter()
        .filter(|exp| hits.iter().any(|h| exp.matches(&h.payload)))
        .count();
    Some(matched as f64 / expected.len() as f64)
}

/// Fraction of the true neighbors present among the returned identifiers.
///
/// The denominator is the size of the true set, which is `min(k, N)`. `None`
/// when the true set is empty.
pub fn recall_at_k(truth: &HashSet<NativeId>, returned: &HashSet<NativeId>) -> Option<f64> {
    if truth.is_empty() {
        return None;
    }
    let found = truth.intersection(returned).count();
    Some(found as f64 / truth.len() as f64)
}

/// Recall of `hits` against reference rows `truth_rows`, comparing ids in `repr` form.
pub fn recall_for_hits(
    repr: IdRepr,
    truth_rows: impl IntoIterator<Item = Option<NativeId>>,
    hits: &[SearchHit],
) -> Option<f64> {
    let truth: HashSet<NativeId> = truth_rows.into_iter().flatten().collect();
    recall_at_k(&truth, &repr.result_ids(hits))
}
