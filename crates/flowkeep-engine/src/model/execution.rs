//! Runtime execution state: the live (or parked, or finished) progress of one workflow run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level lifecycle status of an execution.
///
/// `terminated` is distinct from `failed`: terminate is a deliberate externally-requested
/// stop, not an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    WaitingSignal,
    Completed,
    Failed,
    Terminated,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Terminated
        )
    }
}

/// How a `parallel_fanout` node's branches are awaited at the matching `parallel_join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum WaitMode {
    All,
    Any,
    NOfM { n: u32 },
}

/// Bookkeeping for one in-flight `parallel_fanout`/`parallel_join` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroupState {
    pub group_id: String,
    pub join_node_id: String,
    pub wait_mode: WaitMode,
    /// node_id of each spawned branch entry point.
    pub branch_node_ids: Vec<String>,
    /// branch node_id -> completed output, populated as branches finish.
    #[serde(default)]
    pub completed_branches: HashMap<String, serde_json::Value>,
    /// branch node_id -> error message, populated when a branch fails.
    #[serde(default)]
    pub failed_branches: HashMap<String, String>,
    pub spawned_at: DateTime<Utc>,
}

impl ParallelGroupState {
    /// Whether enough branches have reported in to satisfy `wait_mode` and proceed to the join.
    pub fn is_satisfied(&self) -> bool {
        let done = self.completed_branches.len();
        match self.wait_mode {
            WaitMode::All => done + self.failed_branches.len() >= self.branch_node_ids.len(),
            WaitMode::Any => done >= 1,
            WaitMode::NOfM { n } => done >= n as usize,
        }
    }
}

/// Bookkeeping for one in-flight `loop_start`/`loop_end` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopContext {
    pub loop_start_node_id: String,
    pub loop_end_node_id: String,
    pub iteration: u32,
    pub max_iterations: u32,
}

/// A linked sub-workflow invocation, tracked on the parent execution so a signal or
/// completion from the child can be routed back to the correct `sub_workflow` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubWorkflowLink {
    pub node_id: String,
    pub child_execution_id: Uuid,
    pub wait_for_completion: bool,
}

/// Bookkeeping for an in-flight `try`/`catch`/`finally` region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TryCatchBlock {
    pub try_node_id: String,
    pub catch_node_id: Option<String>,
    pub finally_node_id: Option<String>,
}

/// The full mutable state of an execution, persisted as a single unit on every step
/// (`ExecutionStore::save_execution_state`). This replaces event-sourced replay: the engine
/// reads this blob back wholesale rather than folding an event log.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionState {
    /// node_id of the node about to run, or that is currently parked awaiting a signal.
    pub current_node_id: Option<String>,
    /// node_id -> its most recent recorded `NodeExecutionResult`. Only the latest attempt
    /// per node survives here; the full per-attempt history is in the append-only
    /// execution log (`ExecutionStore::append_log`), not duplicated in this blob.
    #[serde(default)]
    pub node_results: HashMap<String, NodeExecutionResult>,
    /// node_ids in the order they reached a terminal per-node outcome (success, skipped,
    /// or permanently failed), satisfying the monotonic-progress invariant (§8 #1).
    #[serde(default)]
    pub completed_node_ids: Vec<String>,
    /// Set when the execution reaches a terminal status; `None` while still running.
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// The running data context threaded between nodes; each handler reads the upstream
    /// node's output from here and writes its own output back under its node_id.
    #[serde(default)]
    pub variables: serde_json::Value,
    #[serde(default)]
    pub active_parallel_groups: HashMap<String, ParallelGroupState>,
    #[serde(default)]
    pub active_loops: HashMap<String, LoopContext>,
    #[serde(default)]
    pub active_sub_workflows: Vec<SubWorkflowLink>,
    #[serde(default)]
    pub active_try_blocks: Vec<TryCatchBlock>,
    /// Set while `status == waiting_signal`; cleared once the awaited signal is delivered.
    #[serde(default)]
    pub awaiting_signal_type: Option<String>,
    #[serde(default)]
    pub awaiting_since: Option<DateTime<Utc>>,
}

/// Outcome classification of one node's handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResultStatus {
    Success,
    Failed,
    Skipped,
    Retrying,
}

/// The recorded outcome of dispatching one node, independent of routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub status: NodeResultStatus,
    #[serde(default)]
    pub output: serde_json::Value,
    pub error: Option<String>,
    /// Set by a handler's error to signal the retry policy should not be consulted.
    #[serde(default)]
    pub error_permanent: bool,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// One durable workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_version: i32,
    pub status: ExecutionStatus,
    pub state: ExecutionState,
    /// Optimistic-concurrency counter: bumped on every successful `save_execution_state`.
    pub version: i64,
    /// Set while a worker holds the execution's runnable lease.
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Soonest time the execution should next be picked up (immediate for runnable work,
    /// future for a timed retry backoff or a parked `wait_signal` timeout).
    pub next_runnable_at: Option<DateTime<Utc>>,
    pub parent_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_group_all_requires_every_branch() {
        let mut group = ParallelGroupState {
            group_id: "g1".into(),
            join_node_id: "join".into(),
            wait_mode: WaitMode::All,
            branch_node_ids: vec!["a".into(), "b".into()],
            completed_branches: HashMap::new(),
            failed_branches: HashMap::new(),
            spawned_at: Utc::now(),
        };
        assert!(!group.is_satisfied());
        group.completed_branches.insert("a".into(), serde_json::json!(1));
        assert!(!group.is_satisfied());
        group.completed_branches.insert("b".into(), serde_json::json!(2));
        assert!(group.is_satisfied());
    }

    #[test]
    fn parallel_group_all_counts_failures_toward_completion() {
        let mut group = ParallelGroupState {
            group_id: "g1".into(),
            join_node_id: "join".into(),
            wait_mode: WaitMode::All,
            branch_node_ids: vec!["a".into(), "b".into()],
            completed_branches: HashMap::new(),
            failed_branches: HashMap::new(),
            spawned_at: Utc::now(),
        };
        group.completed_branches.insert("a".into(), serde_json::json!(1));
        group.failed_branches.insert("b".into(), "boom".into());
        assert!(group.is_satisfied());
    }

    #[test]
    fn parallel_group_any_satisfied_by_one() {
        let mut group = ParallelGroupState {
            group_id: "g1".into(),
            join_node_id: "join".into(),
            wait_mode: WaitMode::Any,
            branch_node_ids: vec!["a".into(), "b".into(), "c".into()],
            completed_branches: HashMap::new(),
            failed_branches: HashMap::new(),
            spawned_at: Utc::now(),
        };
        assert!(!group.is_satisfied());
        group.completed_branches.insert("a".into(), serde_json::json!(1));
        assert!(group.is_satisfied());
    }

    #[test]
    fn parallel_group_n_of_m() {
        let mut group = ParallelGroupState {
            group_id: "g1".into(),
            join_node_id: "join".into(),
            wait_mode: WaitMode::NOfM { n: 2 },
            branch_node_ids: vec!["a".into(), "b".into(), "c".into()],
            completed_branches: HashMap::new(),
            failed_branches: HashMap::new(),
            spawned_at: Utc::now(),
        };
        group.completed_branches.insert("a".into(), serde_json::json!(1));
        assert!(!group.is_satisfied());
        group.completed_branches.insert("b".into(), serde_json::json!(2));
        assert!(group.is_satisfied());
    }

    #[test]
    fn execution_status_terminal_classification() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Terminated.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::WaitingSignal.is_terminal());
    }
}
