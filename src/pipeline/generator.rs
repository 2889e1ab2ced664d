//! Generation collaborator.
//!
//! The pipeline only observes how long generation takes and what text comes
//! back; the model behind it is opaque.

use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::Result;

pub trait Generator: Send + Sync {
    fn generate(&self, question: &str, chosen_docs: &[usize], cheap_mode: bool) -> Result<String>;
}

/// Sleeps for a latency that grows with the context size and drops in cheap mode.
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    config: GenerationConfig,
    tokens_per_doc: usize,
}

impl SimulatedGenerator {
    pub fn new(config: GenerationConfig, tokens_per_doc: usize) -> Self {
        Self {
            config,
            tokens_per_doc,
        }
    }

    /// Latency the simulation will spend for a given input. Negative, NaN and
    /// out-of-range totals sleep for zero instead of panicking.
    pub fn latency(&self, doc_count: usize, cheap_mode: bool) -> Duration {
        let base = if cheap_mode {
            self.config.cheap_base_ms
        } else {
            self.config.full_base_ms
        };
        let tokens = doc_count as f64 * self.tokens_per_doc as f64;
        let ms = base + self.config.per_token_ms * tokens;
        if !ms.is_finite() || ms <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::ZERO)
    }
}

impl Generator for SimulatedGenerator {
    fn generate(&self, question: &str, chosen_docs: &[usize], cheap_mode: bool) -> Result<String> {
        std::thread::sleep(self.latency(chosen_docs.len(), cheap_mode));
        Ok(format!("Answer: {question} (docs={})", chosen_docs.len()))
    }
}
