//! Brute-force top-k similarity search.
//!
//! Every query is scored against every corpus row with a dot product, which is
//! the cosine similarity because both sides are unit-normalized. There is no
//! index structure; cost is O(N·D) per query by construction.
//!
//! Score computation is split across corpus partitions with Rayon for large
//! matrices. Selection is a cheap partial select over the finished score
//! vector followed by a sort of only the k winners, so results are identical
//! whichever path computed the scores.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::env_flag_enabled;
use crate::error::{Result, RetrievalError};
use crate::search::quantized_store::{DEGENERATE_NORM, EmbeddingMatrix, l2_norm};

/// Minimum row count for parallel scoring.
/// Below this, Rayon overhead (~1-5µs per task) outweighs the benefit.
const PARALLEL_THRESHOLD: usize = 10_000;

/// Rows per parallel scoring task.
const PARALLEL_CHUNK_SIZE: usize = 1024;

/// Set RAGTUNE_PARALLEL_SEARCH=0 to force sequential scoring.
static PARALLEL_SEARCH_ENABLED: Lazy<bool> =
    Lazy::new(|| env_flag_enabled("RAGTUNE_PARALLEL_SEARCH"));

/// Set RAGTUNE_SIMD_DOT=0 to use the scalar dot product.
static SIMD_DOT_ENABLED: Lazy<bool> = Lazy::new(|| env_flag_enabled("RAGTUNE_SIMD_DOT"));

/// One ranked corpus row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub index: usize,
    pub score: f32,
}

/// Up to k hits, best first; equal scores ordered by ascending index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    hits: Vec<ScoredHit>,
}

impl RankedResult {
    pub fn hits(&self) -> &[ScoredHit] {
        &self.hits
    }

    /// Document indices in rank order.
    pub fn ids(&self) -> Vec<usize> {
        self.hits.iter().map(|h| h.index).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Rank order: higher score first, then lower index first.
///
/// `+ 0.0` folds `-0.0` into `+0.0` so signed zeros tie; NaN never reaches here.
#[inline]
fn rank_order(a: &ScoredHit, b: &ScoredHit) -> Ordering {
    (b.score + 0.0)
        .total_cmp(&(a.score + 0.0))
        .then_with(|| a.index.cmp(&b.index))
}

/// Top-`k` rows of `store` for every query in the batch.
///
/// Fails with `InvalidInput` unless `1 <= k <= store.len()`, every query has
/// the store's dimension and is finite. A query with near-zero magnitude is a
/// `DegenerateVector` error.
pub fn search<Q>(queries: &[Q], store: &EmbeddingMatrix, k: usize) -> Result<Vec<RankedResult>>
where
    Q: AsRef<[f32]> + Sync,
{
    let rows = store.len();
    if k == 0 || k > rows {
        return Err(RetrievalError::invalid(format!(
            "k must be in 1..={rows}, got {k}"
        )));
    }
    for (qi, query) in queries.iter().enumerate() {
        validate_query(qi, query.as_ref(), store.dimension())?;
    }

    let results: Vec<RankedResult> = queries
        .par_iter()
        .map(|query| top_k(&score_all(query.as_ref(), store), k))
        .collect();

    debug!(
        queries = queries.len(),
        rows,
        dimension = store.dimension(),
        k,
        "brute-force search completed"
    );
    Ok(results)
}

fn validate_query(qi: usize, query: &[f32], dimension: usize) -> Result<()> {
    if query.len() != dimension {
        return Err(RetrievalError::invalid(format!(
            "query {qi} dimension mismatch: expected {dimension}, got {}",
            query.len()
        )));
    }
    if query.iter().any(|v| !v.is_finite()) {
        return Err(RetrievalError::invalid(format!(
            "query {qi} has non-finite components"
        )));
    }
    let norm = l2_norm(query);
    if norm <= DEGENERATE_NORM {
        return Err(RetrievalError::degenerate(format!("query {qi}"), norm));
    }
    Ok(())
}

/// Dot product of `query` with every row, in row order.
fn score_all(query: &[f32], store: &EmbeddingMatrix) -> Vec<f32> {
    if *PARALLEL_SEARCH_ENABLED && store.len() >= PARALLEL_THRESHOLD {
        score_all_parallel(query, store)
    } else {
        score_all_sequential(query, store)
    }
}

fn score_all_sequential(query: &[f32], store: &EmbeddingMatrix) -> Vec<f32> {
    store.rows().map(|row| dot_product(row, query)).collect()
}

fn score_all_parallel(query: &[f32], store: &EmbeddingMatrix) -> Vec<f32> {
    let dim = store.dimension();
    let mut scores = vec![0.0f32; store.len()];
    scores
        .par_chunks_mut(PARALLEL_CHUNK_SIZE)
        .zip(store.as_slice().par_chunks(PARALLEL_CHUNK_SIZE * dim))
        .for_each(|(out, rows)| {
            for (slot, row) in out.iter_mut().zip(rows.chunks_exact(dim)) {
                *slot = dot_product(row, query);
            }
        });
    scores
}

/// Partial-select the `k` best scores, then sort just those.
fn top_k(scores: &[f32], k: usize) -> RankedResult {
    let mut hits: Vec<ScoredHit> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| ScoredHit { index, score })
        .collect();
    if k < hits.len() {
        hits.select_nth_unstable_by(k - 1, rank_order);
        hits.truncate(k);
    }
    hits.sort_unstable_by(rank_order);
    RankedResult { hits }
}

/// Scalar dot product (fallback when SIMD is disabled).
#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// SIMD dot product using the wide crate, 8 lanes per step.
/// SIMD reorders FP additions, so results differ from scalar by ~1e-7 relative.
#[inline]
fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    use wide::f32x8;

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let mut arr_a = [0.0f32; 8];
        let mut arr_b = [0.0f32; 8];
        arr_a.copy_from_slice(ca);
        arr_b.copy_from_slice(cb);
        sum += f32x8::from(arr_a) * f32x8::from(arr_b);
    }

    let mut scalar_sum: f32 = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += x * y;
    }
    scalar_sum
}

#[inline]
pub(crate) fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if *SIMD_DOT_ENABLED {
        dot_product_simd(a, b)
    } else {
        dot_product_scalar(a, b)
    }
}

/// Bench-only wrapper for scalar dot product.
#[doc(hidden)]
pub fn dot_product_scalar_bench(a: &[f32], b: &[f32]) -> f32 {
    dot_product_scalar(a, b)
}

/// Bench-only wrapper for SIMD dot product.
#[doc(hidden)]
pub fn dot_product_simd_bench(a: &[f32], b: &[f32]) -> f32 {
    dot_product_simd(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::corpus::synthetic_corpus;
    use crate::search::quantized_store::{pack, unpack};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn matrix(rows: &[&[f32]]) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows.iter().copied()).unwrap()
    }

    fn axes() -> EmbeddingMatrix {
        matrix(&[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0]])
    }

    #[test]
    fn finds_exact_match_first() {
        let results = search(&[vec![0.0, 1.0, 0.0]], &axes(), 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ids(), vec![1]);
        assert!((results[0].hits()[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_ascending_index() {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let store = matrix(&[&[0.0, 1.0], &[1.0, 0.0], &[1.0, 0.0], &[0.0, 1.0], &[s, s]]);
        let results = search(&[vec![1.0, 0.0]], &store, 4).unwrap();
        assert_eq!(results[0].ids(), vec![1, 2, 4, 0]);
    }

    #[test]
    fn signed_zero_scores_tie_by_index() {
        assert_eq!(top_k(&[-0.0, 0.0], 2).ids(), vec![0, 1]);
        assert_eq!(top_k(&[0.0, -0.0, 0.0], 2).ids(), vec![0, 1]);
        // The scalar path can yield -0.0 when every product is -0.0.
        let neg = dot_product_scalar(&[-0.0, -1.0], &[1.0, 0.0]);
        assert_eq!(neg, 0.0);
        let pos = dot_product_scalar(&[0.0, 1.0], &[1.0, 0.0]);
        assert_eq!(top_k(&[neg, pos], 2).ids(), vec![0, 1]);
    }

    #[test]
    fn k_equal_to_corpus_returns_everything_sorted() {
        let results = search(&[vec![0.6, 0.8, 0.0]], &axes(), 3).unwrap();
        assert_eq!(results[0].ids(), vec![1, 0, 2]);
    }

    #[test]
    fn k_out_of_range_is_rejected() {
        let q = [vec![1.0, 0.0, 0.0]];
        assert!(matches!(
            search(&q, &axes(), 0),
            Err(RetrievalError::InvalidInput(_))
        ));
        assert!(matches!(
            search(&q, &axes(), 4),
            Err(RetrievalError::InvalidInput(_))
        ));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = search(&[vec![1.0, 0.0]], &axes(), 1).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"), "{err}");
    }

    #[test]
    fn zero_query_is_degenerate() {
        let err = search(&[vec![0.0, 0.0, 0.0]], &axes(), 1).unwrap_err();
        assert!(matches!(err, RetrievalError::DegenerateVector { .. }));
    }

    #[test]
    fn nan_query_is_rejected() {
        let err = search(&[vec![f32::NAN, 1.0, 0.0]], &axes(), 1).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[test]
    fn batch_results_follow_query_order() {
        let queries = vec![
            vec![0.0, 0.0, 1.0],
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
        ];
        let results = search(&queries, &axes(), 1).unwrap();
        let firsts: Vec<usize> = results.iter().map(|r| r.ids()[0]).collect();
        assert_eq!(firsts, vec![2, 0, 1]);
    }

    #[test]
    fn empty_batch_yields_no_results() {
        let queries: Vec<Vec<f32>> = Vec::new();
        assert!(search(&queries, &axes(), 2).unwrap().is_empty());
    }

    #[test]
    fn parallel_scores_match_sequential() {
        let store = synthetic_corpus(PARALLEL_CHUNK_SIZE * 3 + 17, 16, 9).unwrap();
        let query = store.row(42).unwrap().to_vec();
        assert_eq!(
            score_all_parallel(&query, &store),
            score_all_sequential(&query, &store)
        );
    }

    #[test]
    fn packed_view_finds_same_nearest_row() {
        let store = synthetic_corpus(500, 32, 4).unwrap();
        let restored = unpack(&pack(&store));
        let query = store.row(123).unwrap().to_vec();
        let full = search(&[query.clone()], &store, 5).unwrap();
        let packed = search(&[query], &restored, 5).unwrap();
        assert_eq!(full[0].ids()[0], 123);
        assert_eq!(packed[0].ids()[0], 123);
    }

    #[test]
    fn simd_matches_scalar() {
        let a: Vec<f32> = (0..37).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..37).map(|i| (i as f32 * 0.11).cos()).collect();
        let simd = dot_product_simd(&a, &b);
        let scalar = dot_product_scalar(&a, &b);
        assert!((simd - scalar).abs() < 1e-4, "{simd} vs {scalar}");
        assert_eq!(dot_product_simd(&[], &[]), 0.0);
    }

    proptest! {
        #[test]
        fn top_k_dominates_the_rest(
            scores in prop::collection::vec(-4i32..4, 1..64),
            k_seed in 0usize..64,
        ) {
            // Small integer scores force plenty of ties.
            let scores: Vec<f32> = scores.into_iter().map(|s| s as f32 * 0.25).collect();
            let k = k_seed % scores.len() + 1;
            let ranked = top_k(&scores, k);

            prop_assert_eq!(ranked.len(), k);
            let ids: HashSet<usize> = ranked.ids().into_iter().collect();
            prop_assert_eq!(ids.len(), k);

            let worst = ranked.hits()[k - 1];
            for (idx, &s) in scores.iter().enumerate() {
                if !ids.contains(&idx) {
                    prop_assert!(s < worst.score || (s == worst.score && idx > worst.index));
                }
            }
            for pair in ranked.hits().windows(2) {
                prop_assert_eq!(rank_order(&pair[0], &pair[1]), Ordering::Less);
            }
        }
    }
}
