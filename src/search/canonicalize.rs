//! Query canonicalization and fingerprinting.
//!
//! The result cache is content-addressed: two requests share an entry exactly
//! when their canonical query text hashes to the same [`Fingerprint`].
//! Canonicalization must therefore be deterministic: the same visual text
//! always produces the same canonical form.
//!
//! # Processing Pipeline
//!
//! 1. **Unicode NFC normalization** - "café" (decomposed) → "café" (composed)
//! 2. **Whitespace normalization** - Collapse runs, trim
//!
//! Case is preserved; "RAG" and "rag" are different queries.
//!
//! # Example
//!
//! ```
//! use ragtune::search::canonicalize::{canonicalize_query, Fingerprint};
//!
//! assert_eq!(canonicalize_query("  what is\n rag  latency? "), "what is rag latency?");
//! assert_eq!(
//!     Fingerprint::of_query("what is rag latency?"),
//!     Fingerprint::of_query("what  is rag latency?  "),
//! );
//! ```

use std::fmt;

use ring::digest::{self, SHA256};
use unicode_normalization::UnicodeNormalization;

/// Number of fingerprint bytes; 256 bits of SHA-256.
pub const FINGERPRINT_BYTES: usize = 32;

/// Canonicalize query text before hashing or embedding.
pub fn canonicalize_query(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    normalize_whitespace(&normalized)
}

/// Collapse every whitespace run to a single space and trim both ends.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Deterministic content hash of a canonical query, used as the cache key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Hash already-canonical text. Callers normally want [`Fingerprint::of_query`].
    pub fn of_canonical(canonical: &str) -> Self {
        let digest = digest::digest(&SHA256, canonical.as_bytes());
        let mut hash = [0u8; FINGERPRINT_BYTES];
        hash.copy_from_slice(digest.as_ref());
        Self(hash)
    }

    /// Canonicalize then hash.
    pub fn of_query(text: &str) -> Self {
        Self::of_canonical(&canonicalize_query(text))
    }

    pub fn from_bytes(bytes: [u8; FINGERPRINT_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// First 8 bytes as hex, enough to tell requests apart in logs.
    pub fn short_hex(&self) -> String {
        self.0[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
