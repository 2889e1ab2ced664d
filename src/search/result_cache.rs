//! Fixed-capacity LRU cache of ranked search results.
//!
//! Keys are query [`Fingerprint`]s compared by exact equality; the cache never
//! sees query text. Two distinct queries with the same fingerprint share one
//! entry. Values are shared `Arc<RankedResult>`s so a hit hands back the very
//! result that was inserted.
//!
//! The cache is not synchronized. The orchestrator owns it and serves requests
//! one at a time.

use std::num::NonZeroUsize;
use std::sync::Arc;

use fxhash::FxBuildHasher;
use lru::LruCache;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::search::canonicalize::Fingerprint;
use crate::search::similarity::RankedResult;

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

pub struct ResultCache {
    entries: LruCache<Fingerprint, Arc<RankedResult>, FxBuildHasher>,
    stats: CacheStats,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ResultCache {
    /// Create a cache holding at most `capacity` results. Zero is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or_else(|| RetrievalError::invalid("cache capacity must be at least 1"))?;
        Ok(Self {
            entries: LruCache::with_hasher(cap, FxBuildHasher::default()),
            stats: CacheStats::default(),
        })
    }

    /// Look up a result and mark it most recently used.
    pub fn get(&mut self, key: &Fingerprint) -> Option<Arc<RankedResult>> {
        match self.entries.get(key) {
            Some(hit) => {
                self.stats.hits += 1;
                Some(Arc::clone(hit))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace, marking the key most recently used. Returns the
    /// fingerprint evicted to make room, if any.
    pub fn put(&mut self, key: Fingerprint, result: Arc<RankedResult>) -> Option<Fingerprint> {
        self.stats.inserts += 1;
        match self.entries.push(key, result) {
            Some((old_key, _)) if old_key != key => {
                self.stats.evictions += 1;
                debug!(evicted = %old_key.short_hex(), "result cache evicted LRU entry");
                Some(old_key)
            }
            _ => None,
        }
    }

    /// Membership check that does not touch recency.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::similarity::search;
    use crate::search::quantized_store::EmbeddingMatrix;

    fn key(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    fn ranked(first: usize) -> Arc<RankedResult> {
        let store = EmbeddingMatrix::from_rows([
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
        ])
        .unwrap();
        let query = store.row(first).unwrap().to_vec();
        let mut results = search(&[query], &store, 2).unwrap();
        Arc::new(results.remove(0))
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            ResultCache::new(0),
            Err(RetrievalError::InvalidInput(_))
        ));
    }

    #[test]
    fn inserting_past_capacity_evicts_least_recent() {
        let mut cache = ResultCache::new(3).unwrap();
        for n in 0..3 {
            assert_eq!(cache.put(key(n), ranked(0)), None);
        }
        assert_eq!(cache.put(key(3), ranked(0)), Some(key(0)));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = ResultCache::new(2).unwrap();
        cache.put(key(1), ranked(0));
        cache.put(key(2), ranked(1));
        assert!(cache.get(&key(1)).is_some());
        // key(2) is now the least recently used.
        assert_eq!(cache.put(key(3), ranked(2)), Some(key(2)));
        assert!(cache.contains(&key(1)));
    }

    #[test]
    fn replacing_a_key_refreshes_without_evicting() {
        let mut cache = ResultCache::new(2).unwrap();
        cache.put(key(1), ranked(0));
        cache.put(key(2), ranked(1));
        assert_eq!(cache.put(key(1), ranked(2)), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(1)).unwrap().ids()[0], 2);
        assert_eq!(cache.put(key(3), ranked(0)), Some(key(2)));
    }

    #[test]
    fn repeated_gets_return_the_same_result() {
        let mut cache = ResultCache::new(4).unwrap();
        let inserted = ranked(1);
        cache.put(key(9), Arc::clone(&inserted));
        let a = cache.get(&key(9)).unwrap();
        let b = cache.get(&key(9)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &inserted));
        assert_eq!(*a, *inserted);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let mut cache = ResultCache::new(1).unwrap();
        assert!(cache.get(&key(1)).is_none());
        cache.put(key(1), ranked(0));
        assert!(cache.get(&key(1)).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn capacity_one_keeps_only_latest() {
        let mut cache = ResultCache::new(1).unwrap();
        cache.put(key(1), ranked(0));
        assert_eq!(cache.put(key(2), ranked(1)), Some(key(1)));
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
    }
}
