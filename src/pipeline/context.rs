//! Context assembly: trims a ranked id list to fit a token budget and
//! renders the chosen documents into prompt text.
//!
//! Document text is looked up through a [`DocumentSource`] and kept in a
//! fixed-capacity LRU block cache keyed by document index, so popular
//! documents are fetched once however many requests include them.

use std::num::NonZeroUsize;
use std::sync::Arc;

use fxhash::FxBuildHasher;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::search::result_cache::CacheStats;

/// Chooses which ranked documents go into the generation prompt.
pub trait ContextAssembler: Send + Sync {
    fn assemble(&self, ranked_ids: &[usize], token_budget: usize) -> Vec<usize>;

    /// Prompt text for already chosen documents, in order. Assemblers without
    /// a document source render nothing.
    fn render(&self, _chosen_docs: &[usize]) -> String {
        String::new()
    }
}

/// Takes documents in rank order at a flat per-document token cost and stops
/// at the first one that no longer fits. Documents are never partially included.
#[derive(Debug, Clone)]
pub struct GreedyAssembler {
    tokens_per_doc: usize,
}

impl GreedyAssembler {
    pub fn new(tokens_per_doc: usize) -> Self {
        Self { tokens_per_doc }
    }

    pub fn tokens_per_doc(&self) -> usize {
        self.tokens_per_doc
    }
}

impl ContextAssembler for GreedyAssembler {
    fn assemble(&self, ranked_ids: &[usize], token_budget: usize) -> Vec<usize> {
        let mut room = token_budget;
        let mut picked = Vec::new();
        for &id in ranked_ids {
            if room < self.tokens_per_doc {
                break;
            }
            picked.push(id);
            room -= self.tokens_per_doc;
        }
        picked
    }
}

/// Where document text comes from.
pub trait DocumentSource: Send + Sync {
    fn text(&self, doc_id: usize) -> String;
}

/// Stable placeholder text per document index.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticDocuments;

impl DocumentSource for SyntheticDocuments {
    fn text(&self, doc_id: usize) -> String {
        format!("Doc#{doc_id} :: A short block of evidence text used for grounding.")
    }
}

/// Greedy selection plus an LRU cache of rendered document blocks.
pub struct BlockCachedAssembler {
    greedy: GreedyAssembler,
    source: Arc<dyn DocumentSource>,
    blocks: Mutex<BlockCache>,
}

struct BlockCache {
    entries: LruCache<usize, Arc<str>, FxBuildHasher>,
    stats: CacheStats,
}

impl std::fmt::Debug for BlockCachedAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let blocks = self.blocks.lock();
        f.debug_struct("BlockCachedAssembler")
            .field("tokens_per_doc", &self.greedy.tokens_per_doc())
            .field("cached_blocks", &blocks.entries.len())
            .field("stats", &blocks.stats)
            .finish()
    }
}

impl BlockCachedAssembler {
    /// `capacity` is the number of document blocks kept; zero is rejected.
    pub fn new(
        tokens_per_doc: usize,
        capacity: usize,
        source: Arc<dyn DocumentSource>,
    ) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or_else(|| RetrievalError::invalid("block cache capacity must be at least 1"))?;
        Ok(Self {
            greedy: GreedyAssembler::new(tokens_per_doc),
            source,
            blocks: Mutex::new(BlockCache {
                entries: LruCache::with_hasher(cap, FxBuildHasher::default()),
                stats: CacheStats::default(),
            }),
        })
    }

    /// Text for one document, from the cache or the source.
    pub fn block(&self, doc_id: usize) -> Arc<str> {
        let mut blocks = self.blocks.lock();
        if let Some(hit) = blocks.entries.get(&doc_id) {
            let hit = Arc::clone(hit);
            blocks.stats.hits += 1;
            return hit;
        }
        blocks.stats.misses += 1;
        let text: Arc<str> = Arc::from(self.source.text(doc_id));
        blocks.stats.inserts += 1;
        if let Some((evicted, _)) = blocks.entries.push(doc_id, Arc::clone(&text))
            && evicted != doc_id
        {
            blocks.stats.evictions += 1;
            debug!(evicted, "block cache evicted LRU entry");
        }
        text
    }

    pub fn stats(&self) -> CacheStats {
        self.blocks.lock().stats
    }

    pub fn cached_blocks(&self) -> usize {
        self.blocks.lock().entries.len()
    }
}

impl ContextAssembler for BlockCachedAssembler {
    fn assemble(&self, ranked_ids: &[usize], token_budget: usize) -> Vec<usize> {
        self.greedy.assemble(ranked_ids, token_budget)
    }

    fn render(&self, chosen_docs: &[usize]) -> String {
        let mut stitched = String::new();
        for &id in chosen_docs {
            stitched.push_str(&self.block(id));
            stitched.push('\n');
        }
        stitched
    }
}
