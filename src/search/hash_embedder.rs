//! FNV-1a feature hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed into one of `dimension`
//! buckets; a second hash bit picks the sign so unrelated tokens cancel
//! instead of piling up. The bucket vector is then L2-normalized.
//!
//! Not semantic, but deterministic and always available.

use crate::error::{Result, RetrievalError};
use crate::search::embedder::Embedder;
use crate::search::quantized_store::{DEGENERATE_NORM, l2_norm};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            id: format!("fnv1a-{dimension}"),
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(RetrievalError::invalid("embedder dimension must be non-zero"));
        }
        let mut vec = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }

        let norm = l2_norm(&vec);
        if norm <= DEGENERATE_NORM {
            return Err(RetrievalError::degenerate(
                format!("embedding of {:?}", truncate(text, 40)),
                norm,
            ));
        }
        for v in &mut vec {
            *v /= norm;
        }
        Ok(vec)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
