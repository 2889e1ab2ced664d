//! Search layer facade.
//!
//! This module provides the retrieval core, including:
//!
//! - **[`quantized_store`]**: Corpus matrix in full (f32) and packed (int8 + per-row scale) form.
//! - **[`similarity`]**: Brute-force top-k dot-product search with SIMD and Rayon.
//! - **[`result_cache`]**: Fingerprint-keyed LRU cache of ranked results.
//! - **[`canonicalize`]**: Query normalization and SHA-256 fingerprints.
//! - **[`embedder`]**: Embedder trait for query vectors.
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic).
//! - **[`corpus`]**: Seeded synthetic corpus for the driver, tests and benches.

pub mod canonicalize;
pub mod corpus;
pub mod embedder;
pub mod hash_embedder;
pub mod quantized_store;
pub mod result_cache;
pub mod similarity;
