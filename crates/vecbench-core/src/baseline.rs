//! Exact nearest-neighbor oracle used as ground truth for recall.
//!
//! Similarity is the dot product, which equals cosine similarity only when
//! both the query and the reference vectors are unit length. Callers are
//! expected to have checked that via [`crate::Dataset::check_normalized`];
//! it is not re-verified here.

use std::cmp::Ordering;

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Descending score, then ascending index.
#[inline]
fn rank(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// Indices of the `k` reference vectors most similar to `query`.
///
/// `reference` is row-major with `dimension` components per row. The result is
/// ordered by descending score with ties broken by ascending index, so it is
/// deterministic for a fixed input. When `k >= N` every index is returned once.
pub fn exact_top_k(query: &[f32], reference: &[f32], dimension: usize, k: usize) -> Vec<usize> {
    if k == 0 || dimension == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = reference
        .chunks_exact(dimension)
        .enumerate()
        .map(|(idx, row)| (idx, dot(query, row)))
        .collect();

    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, rank);
        scored.truncate(k);
    }
    scored.sort_unstable_by(rank);

    scored.into_iter().map(|(idx, _)| idx).collect()
}

/// Scores paired with indices, same ordering as [`exact_top_k`].
pub fn exact_top_k_scored(
    query: &[f32],
    reference: &[f32],
    dimension: usize,
    k: usize,
) -> Vec<(usize, f32)> {
    exact_top_k(query, reference, dimension, k)
        .into_iter()
        .map(|idx| (idx, dot(query, &reference[idx * dimension..(idx + 1) * dimension])))
        .collect()
}
