//! Reactive knob controller.
//!
//! Reads the budget and the single most recent retrieval and generation
//! latencies, and picks the next request's operating point:
//!
//! | condition                              | effect                                          |
//! |----------------------------------------|-------------------------------------------------|
//! | `generation > 0.55 * budget`           | `token_budget = 220`, `top_k = 7`, cheap mode   |
//! | `retrieval > 0.30 * budget`            | `top_k = max(5, top_k - 2)`, packed store       |
//!
//! Both rules are independent and compose. There is no smoothing: a slow
//! request makes the next one cheaper, a fast one restores the defaults, so
//! alternating between two operating points is expected behavior.

use serde::{Deserialize, Serialize};

use crate::config::ControllerConfig;
use crate::search::quantized_store::Representation;

/// Operating parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Knobs {
    pub top_k: usize,
    pub token_budget: usize,
    pub cheap_mode: bool,
    pub use_packed_store: bool,
}

impl Knobs {
    pub fn representation(&self) -> Representation {
        if self.use_packed_store {
            Representation::Packed
        } else {
            Representation::Full
        }
    }
}

/// Stateless policy; all state is passed in.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveController {
    config: ControllerConfig,
}

impl AdaptiveController {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Pick knobs for the next request. Never fails: negative or non-finite
    /// inputs count as zero.
    pub fn choose(&self, budget_ms: f64, last_retrieval_ms: f64, last_generation_ms: f64) -> Knobs {
        let cfg = &self.config;
        let budget = sanitize(budget_ms);
        let retrieval = sanitize(last_retrieval_ms);
        let generation = sanitize(last_generation_ms);

        let mut knobs = Knobs {
            top_k: cfg.default_top_k,
            token_budget: cfg.default_token_budget,
            cheap_mode: false,
            use_packed_store: false,
        };

        if generation > budget * cfg.generation_share {
            knobs.token_budget = cfg.reduced_token_budget;
            knobs.top_k = cfg.reduced_top_k;
            knobs.cheap_mode = true;
        }

        if retrieval > budget * cfg.retrieval_share {
            knobs.top_k = knobs
                .top_k
                .saturating_sub(cfg.retrieval_top_k_step)
                .max(cfg.min_top_k);
            knobs.use_packed_store = true;
        }

        knobs
    }
}

fn sanitize(ms: f64) -> f64 {
    if ms.is_finite() && ms > 0.0 { ms } else { 0.0 }
}

/// Budget plus the most recent latency samples, threaded through the orchestrator.
#[derive(Debug, Clone)]
pub struct ControllerState {
    controller: AdaptiveController,
    budget_ms: f64,
    last_retrieval_ms: f64,
    last_generation_ms: f64,
}

impl ControllerState {
    /// Seeded with the configured budget and initial samples.
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            budget_ms: config.budget_ms,
            last_retrieval_ms: config.initial_retrieval_ms,
            last_generation_ms: config.initial_generation_ms,
            controller: AdaptiveController::new(config),
        }
    }

    pub fn next_knobs(&self) -> Knobs {
        self.controller
            .choose(self.budget_ms, self.last_retrieval_ms, self.last_generation_ms)
    }

    /// Replace both samples; older history is dropped.
    pub fn observe(&mut self, retrieval_ms: f64, generation_ms: f64) {
        self.last_retrieval_ms = sanitize(retrieval_ms);
        self.last_generation_ms = sanitize(generation_ms);
    }

    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }

    pub fn last_retrieval_ms(&self) -> f64 {
        self.last_retrieval_ms
    }

    pub fn last_generation_ms(&self) -> f64 {
        self.last_generation_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: f64 = 45.0;

    fn controller() -> AdaptiveController {
        AdaptiveController::default()
    }

    fn defaults() -> Knobs {
        Knobs {
            top_k: 10,
            token_budget: 320,
            cheap_mode: false,
            use_packed_store: false,
        }
    }

    #[test]
    fn quiet_request_keeps_defaults() {
        assert_eq!(controller().choose(BUDGET, 8.0, 18.0), defaults());
    }

    #[test]
    fn generation_dominated_shrinks_context() {
        let k = controller().choose(BUDGET, 8.0, 30.0);
        assert_eq!(k.top_k, 7);
        assert_eq!(k.token_budget, 220);
        assert!(k.cheap_mode);
        assert!(!k.use_packed_store);
    }

    #[test]
    fn retrieval_dominated_switches_to_packed() {
        let k = controller().choose(BUDGET, 15.0, 18.0);
        assert_eq!(k.top_k, 8);
        assert_eq!(k.token_budget, 320);
        assert!(!k.cheap_mode);
        assert!(k.use_packed_store);
        assert_eq!(k.representation(), Representation::Packed);
    }

    #[test]
    fn both_rules_compose_with_floor() {
        let k = controller().choose(BUDGET, 15.0, 30.0);
        assert_eq!(
            k,
            Knobs {
                top_k: 5,
                token_budget: 220,
                cheap_mode: true,
                use_packed_store: true,
            }
        );
    }

    #[test]
    fn thresholds_are_strict() {
        // Exactly at 0.55 * 45 = 24.75 and 0.30 * 45 = 13.5 nothing fires.
        assert_eq!(controller().choose(BUDGET, 13.5, 24.75), defaults());
    }

    #[test]
    fn floor_applies_when_step_would_undershoot() {
        let cfg = ControllerConfig {
            reduced_top_k: 6,
            ..ControllerConfig::default()
        };
        let k = AdaptiveController::new(cfg).choose(BUDGET, 20.0, 40.0);
        assert_eq!(k.top_k, 5);
    }

    #[test]
    fn malformed_latencies_count_as_zero() {
        let c = controller();
        assert_eq!(c.choose(BUDGET, -5.0, f64::NAN), defaults());
        assert_eq!(c.choose(BUDGET, f64::INFINITY, -1.0), defaults());
        // A zero budget makes any positive sample "too slow".
        let k = c.choose(f64::NAN, 1.0, 1.0);
        assert!(k.cheap_mode && k.use_packed_store);
    }

    #[test]
    fn generation_effects_ignore_retrieval() {
        let c = controller();
        for retr in [0.0, 5.0, 13.5, 14.0, 40.0, 500.0] {
            let k = c.choose(BUDGET, retr, 30.0);
            assert_eq!(k.token_budget, 220, "retrieval {retr}");
            assert!(k.cheap_mode, "retrieval {retr}");
        }
    }

    #[test]
    fn retrieval_effects_ignore_generation() {
        let c = controller();
        for gen_ms in [0.0, 10.0, 24.75, 25.0, 90.0] {
            let k = c.choose(BUDGET, 15.0, gen_ms);
            assert!(k.use_packed_store, "generation {gen_ms}");
            let base = c.choose(BUDGET, 0.0, gen_ms).top_k;
            assert_eq!(k.top_k, base.saturating_sub(2).max(5), "generation {gen_ms}");
        }
    }

    #[test]
    fn alternating_latencies_oscillate() {
        let mut state = ControllerState::new(ControllerConfig::default());
        assert_eq!(state.next_knobs(), defaults());
        state.observe(2.0, 40.0);
        assert!(state.next_knobs().cheap_mode);
        state.observe(2.0, 10.0);
        assert_eq!(state.next_knobs(), defaults());
        state.observe(2.0, 40.0);
        assert!(state.next_knobs().cheap_mode);
    }

    #[test]
    fn state_keeps_only_latest_sample() {
        let mut state = ControllerState::new(ControllerConfig::default());
        assert!((state.last_retrieval_ms() - 8.0).abs() < f64::EPSILON);
        assert!((state.last_generation_ms() - 18.0).abs() < f64::EPSILON);
        state.observe(20.0, 1.0);
        state.observe(-3.0, 2.0);
        assert_eq!(state.last_retrieval_ms(), 0.0);
        assert_eq!(state.last_generation_ms(), 2.0);
        assert!(!state.next_knobs().use_packed_store);
    }
}
