//! Runtime configuration.
//!
//! Values are layered, later sources win:
//!
//! 1. Built-in defaults ([`RagtuneConfig::default`])
//! 2. An optional TOML file ([`RagtuneConfig::load`])
//! 3. `RAGTUNE_*` environment variables ([`RagtuneConfig::apply_env`])
//!
//! # Example
//!
//! ```toml
//! [cache]
//! capacity = 1024
//!
//! [controller]
//! budget_ms = 60.0
//! ```

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagtuneConfig {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub controller: ControllerConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
}

/// Corpus validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Allowed deviation of a row norm from 1.0.
    pub norm_tolerance: f32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            norm_tolerance: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached ranked results.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 512 }
    }
}

/// Thresholds and knob values for the adaptive controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// End-to-end latency target the controller reacts to (default: 45ms).
    pub budget_ms: f64,
    /// Retrieval sample assumed before the first request.
    pub initial_retrieval_ms: f64,
    /// Generation sample assumed before the first request.
    pub initial_generation_ms: f64,
    /// Fraction of the budget generation may take before shrinking (default: 0.55).
    pub generation_share: f64,
    /// Fraction of the budget retrieval may take before switching (default: 0.30).
    pub retrieval_share: f64,
    pub default_top_k: usize,
    pub default_token_budget: usize,
    pub reduced_top_k: usize,
    pub reduced_token_budget: usize,
    /// Amount removed from top_k when retrieval is slow.
    pub retrieval_top_k_step: usize,
    /// top_k never drops below this when retrieval is slow.
    pub min_top_k: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            budget_ms: 45.0,
            initial_retrieval_ms: 8.0,
            initial_generation_ms: 18.0,
            generation_share: 0.55,
            retrieval_share: 0.30,
            default_top_k: 10,
            default_token_budget: 320,
            reduced_top_k: 7,
            reduced_token_budget: 220,
            retrieval_top_k_step: 2,
            min_top_k: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token cost charged for every included document.
    pub tokens_per_doc: usize,
    /// Number of rendered document blocks kept in the block cache.
    pub block_cache_capacity: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            tokens_per_doc: 45,
            block_cache_capacity: 4096,
        }
    }
}

/// Latency model for the simulated generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub full_base_ms: f64,
    pub cheap_base_ms: f64,
    pub per_token_ms: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            full_base_ms: 18.0,
            cheap_base_ms: 12.0,
            per_token_ms: 0.03,
        }
    }
}

impl RagtuneConfig {
    /// Load config from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut cfg: Self = toml::from_str(&raw)
            .with_context(|| format!("parse config file {}", path.display()))?;
        cfg.apply_env();
        cfg.validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Reject generation latencies that cannot be slept for.
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        for (name, value) in [
            ("generation.full_base_ms", g.full_base_ms),
            ("generation.cheap_base_ms", g.cheap_base_ms),
            ("generation.per_token_ms", g.per_token_ms),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("{name} must be a finite non-negative number, got {value}");
            }
        }
        Ok(())
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Override fields from `RAGTUNE_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        env_override("RAGTUNE_NORM_TOLERANCE", &mut self.store.norm_tolerance);
        env_override("RAGTUNE_CACHE_CAPACITY", &mut self.cache.capacity);
        env_override("RAGTUNE_BUDGET_MS", &mut self.controller.budget_ms);
        env_override(
            "RAGTUNE_GENERATION_SHARE",
            &mut self.controller.generation_share,
        );
        env_override(
            "RAGTUNE_RETRIEVAL_SHARE",
            &mut self.controller.retrieval_share,
        );
        env_override("RAGTUNE_TOKENS_PER_DOC", &mut self.context.tokens_per_doc);
        env_override(
            "RAGTUNE_BLOCK_CACHE_CAPACITY",
            &mut self.context.block_cache_capacity,
        );
    }
}

fn env_override<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(val) = dotenvy::var(key)
        && let Ok(parsed) = val.trim().parse()
    {
        *slot = parsed;
    }
}

/// Read a boolean toggle that defaults to on; `0` or `false` turns it off.
pub(crate) fn env_flag_enabled(key: &str) -> bool {
    dotenvy::var(key)
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
}
