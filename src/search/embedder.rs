//! Embedder trait for turning query text into a search vector.
//!
//! Implementations must return L2-normalized vectors of exactly
//! [`Embedder::dimension`] components so dot products against the corpus are
//! cosine similarities.

use crate::error::Result;

pub trait Embedder: Send + Sync {
    /// Stable identifier, e.g. `"fnv1a-192"`.
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}
