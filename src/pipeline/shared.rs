//! Thread-safe handle that serializes requests through one orchestrator.
//!
//! Every request runs its whole state machine, feedback write included, while
//! holding the lock, so concurrent callers observe exactly the behavior of a
//! single sequential worker: same cache contents, same controller samples,
//! just in lock-acquisition order.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::pipeline::controller::Knobs;
use crate::pipeline::orchestrator::{Orchestrator, RequestOutcome, ServeTotals};
use crate::search::result_cache::CacheStats;

#[derive(Debug, Clone)]
pub struct SharedOrchestrator {
    inner: Arc<Mutex<Orchestrator>>,
}

impl SharedOrchestrator {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(orchestrator)),
        }
    }

    pub fn serve(&self, question: &str) -> Result<RequestOutcome> {
        self.inner.lock().serve(question)
    }

    pub fn next_knobs(&self) -> Knobs {
        self.inner.lock().next_knobs()
    }

    pub fn totals(&self) -> ServeTotals {
        self.inner.lock().totals()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.lock().cache_stats()
    }
}
