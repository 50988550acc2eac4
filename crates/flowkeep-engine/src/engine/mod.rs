//! The execution engine: advances executions node-by-node against their workflow's graph.
//!
//! `registry.rs`'s type-erased `WorkflowFactory`/`WorkflowRegistry` pattern belonged to the
//! in-process-state-machine design this crate started from; the declarative graph plus
//! `Dispatcher` (`crate::activity`) replaces it, so this module now exposes only the engine.

mod executor;

pub use executor::{EngineConfig, EngineError, ExecutionEngine};
