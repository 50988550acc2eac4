//! PostgreSQL implementation of `flowkeep_engine::persistence::ExecutionStore`.
//!
//! Production persistence for the engine: optimistic concurrency on execution saves,
//! `SELECT ... FOR UPDATE SKIP LOCKED` for contention-free claiming across many worker
//! processes, and the same signal-matching and schedule-advancing semantics as
//! [`flowkeep_engine::persistence::InMemoryExecutionStore`], so callers never branch on
//! which store is active.

mod postgres;

pub use postgres::PostgresExecutionStore;

/// Embedded migrations (`migrations/`), applied via `sqlx::migrate!`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
