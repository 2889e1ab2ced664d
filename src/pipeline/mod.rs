//! Request pipeline around the search core.
//!
//! - **[`controller`]**: Latency-driven knob selection.
//! - **[`context`]**: Context assembly collaborator (greedy token budget).
//! - **[`generator`]**: Generation collaborator (simulated latency model).
//! - **[`orchestrator`]**: Per-request state machine with timing feedback.
//! - **[`shared`]**: Mutex-serialized handle for multi-threaded callers.

pub mod context;
pub mod controller;
pub mod generator;
pub mod orchestrator;
pub mod shared;
