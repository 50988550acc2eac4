//! The worker loop and schedule runner (§4.4, §4.5) that drive a `flowkeep-engine`
//! `ExecutionEngine` to completion against any `ExecutionStore`. Storage- and
//! transport-agnostic: wire this crate to `flowkeep-storage`'s Postgres store in
//! production, or `flowkeep_engine::persistence::InMemoryExecutionStore` for tests.

pub mod backpressure;
pub mod pool;
pub mod scheduler;

pub use backpressure::{BackpressureConfig, BackpressureError, BackpressureState};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
pub use scheduler::{ScheduleRunner, ScheduleRunnerConfig};
