//! Error taxonomy for the retrieval core.
//!
//! Every failure is fatal to the single request that hit it. Nothing in this
//! crate retries or silently corrects input.

/// Errors surfaced by the store, search, cache and orchestration layers.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// Dimension mismatch, empty corpus, k out of range, malformed query, ...
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A vector whose magnitude is too close to zero to normalize.
    #[error("degenerate vector ({context}): norm {norm:e}")]
    DegenerateVector { context: String, norm: f32 },

    /// The generation collaborator failed.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl RetrievalError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn degenerate(context: impl Into<String>, norm: f32) -> Self {
        Self::DegenerateVector {
            context: context.into(),
            norm,
        }
    }
}

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;
