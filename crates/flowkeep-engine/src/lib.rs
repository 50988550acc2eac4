//! # Flowkeep Engine
//!
//! The durable workflow orchestration core: declarative workflow graphs compiled into
//! persistent executions, a worker loop that advances them node-by-node with
//! at-most-once side effects, retries with backoff, signal delivery, parallel fan-in,
//! sub-workflows, and schedules.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionEngine                         │
//! │  (advances one execution by one node per call to            │
//! │   execute_step; routes branches, loops, try/catch, parks     │
//! │   on wait_signal and sub_workflow, applies retry policy)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ExecutionStore                         │
//! │  (sole authority for durable state: workflows, executions,  │
//! │   the signal inbox, schedules, circuit breaker state)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Dispatcher                          │
//! │  (maps NodeKind to a NodeHandler, enforces timeout/panic      │
//! │   capture/duration around each node's side effect)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persistence implementations (in-memory for tests and local dev, Postgres for
//! production) live behind the [`persistence::ExecutionStore`] trait; Postgres itself is
//! implemented in the separate `flowkeep-storage` crate, which depends on this crate for
//! the trait and model types. The worker loop that drives executions to completion lives
//! in the separate `flowkeep-worker` crate.

pub mod activity;
pub mod engine;
pub mod external;
pub mod model;
pub mod persistence;
pub mod reliability;

/// Common imports for crates that embed the engine.
pub mod prelude {
    pub use crate::activity::{Dispatcher, DispatcherConfig, HandlerContext, HandlerOutcome, NodeHandler};
    pub use crate::engine::{EngineConfig, EngineError, ExecutionEngine};
    pub use crate::external::ExternalServices;
    pub use crate::model::{
        Execution, ExecutionLog, ExecutionState, ExecutionStatus, GraphConfig, NodeKind, Schedule,
        Signal, Workflow, WorkflowNode,
    };
    pub use crate::persistence::{ExecutionStore, InMemoryExecutionStore, StoreError};
    pub use crate::reliability::{CircuitBreakerConfig, DistributedCircuitBreaker, RetryPolicy};
}

pub use activity::{Dispatcher, DispatcherConfig};
pub use engine::{EngineConfig, EngineError, ExecutionEngine};
pub use external::ExternalServices;
pub use persistence::{ExecutionStore, InMemoryExecutionStore, StoreError};
pub use reliability::{CircuitBreakerConfig, RetryPolicy};
