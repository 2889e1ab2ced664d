//! Synthetic corpus generation.
//!
//! Stands in for the ingestion/embedding stage: produces a seeded matrix of
//! unit-norm rows so the driver, tests and benches share reproducible data.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Result, RetrievalError};
use crate::search::quantized_store::{EmbeddingMatrix, l2_norm};

/// `n_docs` random unit vectors of dimension `dim`, reproducible from `seed`.
pub fn synthetic_corpus(n_docs: usize, dim: usize, seed: u64) -> Result<EmbeddingMatrix> {
    if dim == 0 {
        return Err(RetrievalError::invalid("dimension must be non-zero"));
    }
    let total = n_docs
        .checked_mul(dim)
        .ok_or_else(|| RetrievalError::invalid("corpus size overflow"))?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(total);
    let mut row = vec![0.0f32; dim];
    for _ in 0..n_docs {
        loop {
            for v in row.iter_mut() {
                *v = rng.gen_range(-1.0f32..1.0);
            }
            let norm = l2_norm(&row);
            // Resample the (astronomically rare) near-zero draw.
            if norm > 1e-3 {
                data.extend(row.iter().map(|v| v / norm));
                break;
            }
        }
    }
    EmbeddingMatrix::from_flat(dim, data)
}
