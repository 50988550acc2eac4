//! ExecutionStore trait definition: the sole authority for durable state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Execution, ExecutionLog, ExecutionState, Schedule, Signal, Workflow};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    /// Optimistic-concurrency conflict: the caller's `expected_version` no longer matches
    /// the row's current version.
    #[error("concurrency conflict on execution {execution_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        execution_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// An execution claimed by `claim_runnable_executions`, holding a short-lived lease.
#[derive(Debug, Clone)]
pub struct LeasedExecution {
    pub execution: Execution,
    pub lease_owner: String,
    pub lease_expires_at: DateTime<Utc>,
}

/// The sole authority for durable state: executions, their state, the signal inbox, and
/// schedules. Both the in-memory and Postgres implementations satisfy this trait identically;
/// callers never branch on which is active.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    // -- Workflow definitions --------------------------------------------------

    /// Inserts a new version. `workflow_id` is stable across versions; `version` must be
    /// one greater than the highest existing version for that id (or 1 for a new id).
    async fn create_workflow_version(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// The highest (current) version of a workflow, regardless of `is_active`.
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError>;

    async fn get_workflow_version(
        &self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<Workflow, StoreError>;

    /// All distinct workflow ids at their current version, newest first.
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Soft-delete: flips `is_active` to false on the current version. Existing executions
    /// are unaffected; new executions are rejected by `create_execution` at the engine layer.
    async fn set_workflow_active(&self, workflow_id: Uuid, is_active: bool) -> Result<(), StoreError>;

    // -- Execution lifecycle -------------------------------------------------

    async fn create_execution(&self, execution: Execution) -> Result<(), StoreError>;

    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError>;

    /// Executions of a workflow (any version), newest first, for the API's timeline view.
    async fn list_executions_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError>;

    /// Writes `new_state` and `new_status` atomically, enforcing optimistic concurrency
    /// on `expected_version`. Returns the execution's new version on success.
    async fn save_execution_state(
        &self,
        execution_id: Uuid,
        expected_version: i64,
        new_state: ExecutionState,
        new_status: crate::model::ExecutionStatus,
    ) -> Result<i64, StoreError>;

    /// Releases the caller's lease without otherwise changing status (used after a
    /// suspension point such as `waiting_for_signal` or the end of a worker's step budget).
    async fn release_lease(&self, execution_id: Uuid, lease_owner: &str) -> Result<(), StoreError>;

    // -- Worker scanning queries ----------------------------------------------

    /// Executions where `status = running` and unleased, or `status = failed` with
    /// `next_retry_at <= now`, or `status = waiting_for_signal` with a matching unprocessed
    /// signal. Assigns a lease to each returned row.
    async fn claim_runnable_executions(
        &self,
        worker_id: &str,
        max: usize,
        lease_duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeasedExecution>, StoreError>;

    /// Leases held past their `lease_expires_at` with no renewed claim, returned so the
    /// worker can log and retry them.
    async fn reclaim_stale_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    // -- Schedules -------------------------------------------------------------

    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StoreError>;

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule, StoreError>;

    /// Schedules with `next_fire_at <= now`; atomically advances `next_fire_at` by the rule
    /// so no two concurrent callers double-fire the same instant.
    async fn due_schedules(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<Schedule>, StoreError>;

    async fn set_schedule_active(&self, schedule_id: Uuid, is_active: bool) -> Result<(), StoreError>;

    // -- Signals -----------------------------------------------------------------

    async fn append_signal(&self, signal: Signal) -> Result<Uuid, StoreError>;

    /// Unprocessed signals addressed to a specific execution, oldest first.
    async fn pending_signals_for(&self, execution_id: Uuid) -> Result<Vec<Signal>, StoreError>;

    /// Unprocessed, unrouted (`execution_id = null`) signals of a given type, oldest first,
    /// optionally narrowed to a workflow.
    async fn pending_unrouted_signals(
        &self,
        signal_type: &str,
        workflow_id: Option<Uuid>,
    ) -> Result<Vec<Signal>, StoreError>;

    async fn mark_signal_processed(&self, signal_id: Uuid) -> Result<(), StoreError>;

    // -- Logs -----------------------------------------------------------------

    async fn append_log(&self, log: ExecutionLog) -> Result<(), StoreError>;

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError>;

    // -- Circuit breaker state (optional, default no-op) -----------------------
    //
    // Shared circuit-breaker state across workers, keyed by an arbitrary protection
    // domain (e.g. a connector slug). Stores that don't back a distributed deployment
    // may leave these as no-ops; `DistributedCircuitBreaker` then behaves as a
    // per-worker-local breaker.

    async fn get_circuit_breaker(
        &self,
        _key: &str,
    ) -> Result<Option<CircuitBreakerRecord>, StoreError> {
        Ok(None)
    }

    async fn upsert_circuit_breaker(
        &self,
        _key: &str,
        _state: crate::reliability::CircuitState,
        _failure_count: u32,
        _success_count: u32,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Persisted circuit breaker state, shared across workers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRecord {
    pub key: String,
    pub state: crate::reliability::CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
