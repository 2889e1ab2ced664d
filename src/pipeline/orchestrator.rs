//! Per-request state machine.
//!
//! ```text
//! FINGERPRINT → CACHE_LOOKUP ─┬─ HIT ──────────────────────────────────────┐
//!                             └─ MISS → EMBED_QUERY → SEARCH → CACHE_INSERT ┤
//!                                                                           ▼
//!                          CONTEXT_ASSEMBLY → GENERATION → TIMING_FEEDBACK
//! ```
//!
//! The retrieval interval covers the cache lookup and, on a miss, embedding,
//! search and insertion. On a hit it is only the lookup, so the controller
//! sees a "fast" retrieval and drops back to the full-precision store even if
//! the cached result was produced from the packed one. That coupling is kept
//! on purpose; the `cache_hit_resets_packed_store_choice` integration test
//! pins it down.
//!
//! Requests are served strictly one at a time (`&mut self`). Use
//! [`super::shared::SharedOrchestrator`] to serve from several threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::RagtuneConfig;
use crate::error::{Result, RetrievalError};
use crate::pipeline::context::{BlockCachedAssembler, ContextAssembler, SyntheticDocuments};
use crate::pipeline::controller::{ControllerState, Knobs};
use crate::pipeline::generator::{Generator, SimulatedGenerator};
use crate::search::canonicalize::{Fingerprint, canonicalize_query};
use crate::search::embedder::Embedder;
use crate::search::hash_embedder::HashEmbedder;
use crate::search::quantized_store::QuantizedStore;
use crate::search::result_cache::{CacheStats, ResultCache};
use crate::search::similarity::{RankedResult, search};

/// Wall-clock intervals of one request, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub retrieval_ms: f64,
    pub context_ms: f64,
    pub generation_ms: f64,
    pub e2e_ms: f64,
}

/// Everything observable about one served request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub request: u64,
    pub fingerprint: String,
    pub knobs: Knobs,
    pub cache_hit: bool,
    pub timings: Timings,
    pub over_budget: bool,
    pub ranked_ids: Vec<usize>,
    pub chosen_docs: Vec<usize>,
    /// Size of the rendered context text.
    pub context_bytes: usize,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub report: RequestReport,
    /// The ranked result, shared with the cache entry.
    pub ranked: Arc<RankedResult>,
}

/// Running totals across all requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServeTotals {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub over_budget: u64,
    pub failures: u64,
}

pub struct Orchestrator {
    store: Arc<QuantizedStore>,
    embedder: Arc<dyn Embedder>,
    assembler: Arc<dyn ContextAssembler>,
    generator: Arc<dyn Generator>,
    cache: ResultCache,
    controller: ControllerState,
    totals: ServeTotals,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("rows", &self.store.len())
            .field("embedder", &self.embedder.id())
            .field("cache", &self.cache)
            .field("controller", &self.controller)
            .field("totals", &self.totals)
            .finish()
    }
}

impl Orchestrator {
    /// Wire the default collaborators: hash embedder, block-cached greedy
    /// assembler over synthetic documents, simulated generator.
    pub fn from_config(store: Arc<QuantizedStore>, config: &RagtuneConfig) -> Result<Self> {
        let embedder = Arc::new(HashEmbedder::new(store.dimension()));
        let assembler = Arc::new(BlockCachedAssembler::new(
            config.context.tokens_per_doc,
            config.context.block_cache_capacity,
            Arc::new(SyntheticDocuments),
        )?);
        let generator = Arc::new(SimulatedGenerator::new(
            config.generation.clone(),
            config.context.tokens_per_doc,
        ));
        Ok(Self {
            store,
            embedder,
            assembler,
            generator,
            cache: ResultCache::new(config.cache.capacity)?,
            controller: ControllerState::new(config.controller.clone()),
            totals: ServeTotals::default(),
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn ContextAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    /// Run one request through the full state machine and feed its timings
    /// back into the controller. A failed request leaves the controller as is.
    pub fn serve(&mut self, question: &str) -> Result<RequestOutcome> {
        match self.serve_inner(question) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.totals.failures += 1;
                warn!(error = %err, "request failed");
                Err(err)
            }
        }
    }

    fn serve_inner(&mut self, question: &str) -> Result<RequestOutcome> {
        let knobs = self.controller.next_knobs();
        let started = Instant::now();

        let canonical = canonicalize_query(question);
        if canonical.is_empty() {
            return Err(RetrievalError::invalid("query is empty"));
        }
        let fingerprint = Fingerprint::of_canonical(&canonical);

        let retrieval_start = Instant::now();
        let (ranked, cache_hit) = match self.cache.get(&fingerprint) {
            Some(hit) => (hit, true),
            None => {
                let ranked = Arc::new(self.retrieve(&canonical, &knobs)?);
                self.cache.put(fingerprint, Arc::clone(&ranked));
                (ranked, false)
            }
        };
        let retrieval_ms = millis(retrieval_start.elapsed());

        let context_start = Instant::now();
        let ranked_ids = ranked.ids();
        let chosen_docs = self.assembler.assemble(&ranked_ids, knobs.token_budget);
        let context_bytes = self.assembler.render(&chosen_docs).len();
        let context_ms = millis(context_start.elapsed());

        let generation_start = Instant::now();
        let answer = self
            .generator
            .generate(question, &chosen_docs, knobs.cheap_mode)?;
        let generation_ms = millis(generation_start.elapsed());

        let timings = Timings {
            retrieval_ms,
            context_ms,
            generation_ms,
            e2e_ms: millis(started.elapsed()),
        };
        self.controller.observe(retrieval_ms, generation_ms);

        let over_budget = timings.e2e_ms > self.controller.budget_ms();
        self.totals.requests += 1;
        if cache_hit {
            self.totals.cache_hits += 1;
        } else {
            self.totals.cache_misses += 1;
        }
        if over_budget {
            self.totals.over_budget += 1;
        }

        let report = RequestReport {
            request: self.totals.requests,
            fingerprint: fingerprint.short_hex(),
            knobs,
            cache_hit,
            timings,
            over_budget,
            ranked_ids,
            chosen_docs,
            context_bytes,
            answer,
        };

        info!(
            request = report.request,
            fingerprint = %report.fingerprint,
            cache_hit,
            top_k = knobs.top_k,
            token_budget = knobs.token_budget,
            cheap_mode = knobs.cheap_mode,
            store = knobs.representation().as_str(),
            retrieval_ms = timings.retrieval_ms,
            context_ms = timings.context_ms,
            generation_ms = timings.generation_ms,
            e2e_ms = timings.e2e_ms,
            "request served"
        );
        if over_budget {
            warn!(
                request = report.request,
                e2e_ms = timings.e2e_ms,
                budget_ms = self.controller.budget_ms(),
                "request exceeded latency budget"
            );
        }

        Ok(RequestOutcome { report, ranked })
    }

    /// EMBED_QUERY → SEARCH against the representation the knobs ask for.
    fn retrieve(&self, canonical: &str, knobs: &Knobs) -> Result<RankedResult> {
        let query = self.embedder.embed(canonical)?;
        let view = self.store.view(knobs.representation());
        let k = knobs.top_k.min(self.store.len());
        search(std::slice::from_ref(&query), &view, k)?
            .pop()
            .ok_or_else(|| RetrievalError::invalid("search returned no result for query"))
    }

    /// Knobs the next request will run with.
    pub fn next_knobs(&self) -> Knobs {
        self.controller.next_knobs()
    }

    pub fn controller(&self) -> &ControllerState {
        &self.controller
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn totals(&self) -> ServeTotals {
        self.totals
    }

    pub fn store(&self) -> &Arc<QuantizedStore> {
        &self.store
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
