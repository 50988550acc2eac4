//! Persistence layer: the durable state authority for executions, schedules, and signals.
//!
//! This module provides:
//! - [`ExecutionStore`] trait for execution/schedule/signal persistence
//! - [`InMemoryExecutionStore`] for tests and local development
//! - Postgres-backed persistence lives in the separate `flowkeep-storage` crate, which
//!   depends on this crate for the trait and model types.

mod memory;
mod store;

pub use memory::InMemoryExecutionStore;
pub use store::{CircuitBreakerRecord, ExecutionStore, LeasedExecution, StoreError};
