//! The execution engine: advances one [`Execution`] at a time according to its workflow's
//! graph (§4.2). Every public operation here is a single atomic transition against the
//! store; the worker loop (a separate crate) is responsible for claiming executions and
//! calling [`ExecutionEngine::execute_step`] repeatedly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::activity::handlers::PARK_KEY;
use crate::activity::Dispatcher;
use crate::model::{
    Execution, ExecutionLog, ExecutionState, ExecutionStatus, GraphConfig, GraphError, LogLevel,
    LoopContext, NodeExecutionResult, NodeKind, NodeResultStatus, ParallelGroupState, Signal,
    SubWorkflowLink, TryCatchBlock, WaitMode, WorkflowNode,
};
use crate::persistence::{ExecutionStore, LeasedExecution, StoreError};
use crate::reliability::RetryPolicy;

/// Errors raised by the engine itself, distinct from a handler's own `NodeExecutionResult`
/// failure (§7's "engine errors" category).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    #[error("node {0}: no matching branch and no default edge")]
    NoMatchingBranch(String),

    #[error("node {0}: more than one unconditional outgoing edge")]
    AmbiguousEdge(String),

    #[error("node {0} referenced by current_node_id does not exist in the graph")]
    UnknownNode(String),

    #[error("invalid graph for this execution: {0}")]
    InvalidGraph(String),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
}

/// Per-deployment defaults the engine applies when a node doesn't override them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Outcome of routing past a just-finished node: where execution goes next.
enum NextOutcome {
    Advance(String),
    Complete,
    Fail(String),
}

/// Drives executions node-by-node against their workflow's graph. Stateless between calls;
/// all durable state lives in the store.
pub struct ExecutionEngine {
    store: Arc<dyn ExecutionStore>,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn ExecutionStore>, dispatcher: Arc<Dispatcher>, config: EngineConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Loads `workflow_id` at its current version, validates the graph, and writes a new
    /// `running` execution with `current_node_id = null` (§4.2 `create_execution`).
    #[instrument(skip(self, trigger_data), fields(%workflow_id))]
    pub async fn create_execution(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
    ) -> Result<Execution, EngineError> {
        self.create_execution_inner(workflow_id, trigger_data, None).await
    }

    /// As [`Self::create_execution`], but links the new execution to `parent_execution_id`
    /// (used by the `sub_workflow` node; see [`Self::advance_past_node`]).
    pub async fn create_child_execution(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
        parent_execution_id: Uuid,
    ) -> Result<Execution, EngineError> {
        self.create_execution_inner(workflow_id, trigger_data, Some(parent_execution_id))
            .await
    }

    async fn create_execution_inner(
        &self,
        workflow_id: Uuid,
        trigger_data: Value,
        parent_execution_id: Option<Uuid>,
    ) -> Result<Execution, EngineError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }
        workflow.graph.validate()?;

        let now = Utc::now();
        let execution = Execution {
            execution_id: Uuid::now_v7(),
            workflow_id,
            workflow_version: workflow.version,
            status: ExecutionStatus::Running,
            state: ExecutionState {
                variables: trigger_data,
                ..ExecutionState::default()
            },
            version: 0,
            lease_owner: None,
            lease_expires_at: None,
            next_runnable_at: Some(now),
            parent_execution_id,
            created_at: now,
            updated_at: now,
        };
        self.store.create_execution(execution.clone()).await?;
        info!(execution_id = %execution.execution_id, "execution created");
        Ok(execution)
    }

    /// Performs one atomic advance of `leased` (§4.2 `execute_step`). Releases the caller's
    /// lease as part of every return path; the caller never has to remember to do so.
    #[instrument(skip(self, leased, cancellation), fields(execution_id = %leased.execution.execution_id))]
    pub async fn execute_step(
        &self,
        leased: LeasedExecution,
        cancellation: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let LeasedExecution {
            mut execution,
            lease_owner,
            ..
        } = leased;

        let workflow = self
            .store
            .get_workflow_version(execution.workflow_id, execution.workflow_version)
            .await?;
        let graph = &workflow.graph;

        if execution.status == ExecutionStatus::WaitingSignal {
            match self.consume_pending_signal(&execution).await? {
                Some(resumed) => execution = resumed,
                None => {
                    self.store.release_lease(execution.execution_id, &lease_owner).await?;
                    return Ok(execution);
                }
            }
        }

        if let Some(outcome) = self
            .poll_parked_sub_workflow(&execution, graph, &lease_owner)
            .await?
        {
            return Ok(outcome);
        }

        let node_id = match &execution.state.current_node_id {
            Some(id) => id.clone(),
            None => graph
                .entry_node_id()
                .ok_or(GraphError::NoEntry)?
                .to_string(),
        };
        let node = graph
            .node(&node_id)
            .ok_or_else(|| EngineError::UnknownNode(node_id.clone()))?
            .clone();

        if node.kind == NodeKind::ParallelFanout {
            return self
                .run_parallel_fanout(execution, graph, &node, &lease_owner, cancellation)
                .await;
        }

        let attempt = execution
            .state
            .node_results
            .get(&node_id)
            .map(|r| r.attempt + 1)
            .unwrap_or(1);
        let input = self.build_input(&execution, graph, &node);

        let result = self
            .dispatcher
            .dispatch(
                node.kind,
                &node_id,
                &node.config,
                &input,
                execution.execution_id,
                execution.workflow_id,
                attempt,
                self.store.clone(),
                cancellation,
            )
            .await;

        self.record_attempt(&execution, &node_id, &result).await;
        self.advance_past_node(execution, graph, &node, result, &lease_owner)
            .await
    }

    /// Reports an attempt to the durable execution log, giving per-attempt history even
    /// though `ExecutionState::node_results` keeps only the latest attempt per node.
    async fn record_attempt(&self, execution: &Execution, node_id: &str, result: &NodeExecutionResult) {
        let level = match result.status {
            NodeResultStatus::Success | NodeResultStatus::Skipped => LogLevel::Info,
            NodeResultStatus::Failed => LogLevel::Error,
            NodeResultStatus::Retrying => LogLevel::Warn,
        };
        let log = ExecutionLog {
            log_id: Uuid::now_v7(),
            execution_id: execution.execution_id,
            node_id: Some(node_id.to_string()),
            level,
            message: result
                .error
                .clone()
                .unwrap_or_else(|| format!("{node_id} {:?}", result.status)),
            context: serde_json::to_value(result).unwrap_or(Value::Null),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.append_log(log).await {
            warn!(error = %e, "failed to append execution log");
        }
    }

    /// Builds the `input_data` snapshot handed to a node's handler (§4.2's "view of
    /// `execution_data`"). Almost always the plain variables object; `loop_start` gets its
    /// current iteration folded in without polluting the persisted variables, and
    /// `parallel_join` gets the collected branch outputs instead of the ambient variables.
    fn build_input(&self, execution: &Execution, _graph: &GraphConfig, node: &WorkflowNode) -> Value {
        match node.kind {
            NodeKind::LoopStart => {
                let iteration = execution
                    .state
                    .active_loops
                    .get(&node.node_id)
                    .map(|ctx| ctx.iteration)
                    .unwrap_or(0);
                let mut input = execution.state.variables.clone();
                if let Some(obj) = input.as_object_mut() {
                    obj.insert("_iteration".to_string(), Value::from(iteration));
                } else {
                    input = serde_json::json!({"_iteration": iteration});
                }
                input
            }
            NodeKind::ParallelJoin => execution
                .state
                .active_parallel_groups
                .values()
                .find(|g| g.join_node_id == node.node_id)
                .map(|g| Value::Object(g.completed_branches.clone().into_iter().collect()))
                .unwrap_or_else(|| execution.state.variables.clone()),
            _ => execution.state.variables.clone(),
        }
    }

    /// Runs a `parallel_fanout` node: dispatches every branch successor concurrently
    /// in-process (§9's design note on replacing the thread-pool pattern with
    /// `join_all`/`FuturesUnordered`), then parks at the declared join node once the wait
    /// mode is satisfied. Branches are exactly the fanout's immediate successors — a single
    /// node deep — matching the tested topology in §8 S5; deeper branch chains are not
    /// threaded further by this engine.
    async fn run_parallel_fanout(
        &self,
        mut execution: Execution,
        graph: &GraphConfig,
        node: &WorkflowNode,
        lease_owner: &str,
        cancellation: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let node_id = node.node_id.clone();
        let group_id = node
            .config
            .get("group_id")
            .and_then(Value::as_str)
            .unwrap_or(&node_id)
            .to_string();
        let join_node_id = node
            .config
            .get("join_node_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EngineError::InvalidGraph(format!("{node_id}: parallel_fanout missing config.join_node_id"))
            })?
            .to_string();
        let wait_mode = parse_wait_mode(node.config.get("wait_mode"));

        let branches: Vec<String> = graph
            .default_edges(&node_id)
            .into_iter()
            .map(|e| e.to.clone())
            .collect();
        if branches.is_empty() {
            return Err(EngineError::InvalidGraph(format!(
                "{node_id}: parallel_fanout has no branch successors"
            )));
        }

        let input = execution.state.variables.clone();
        let dispatches = branches.iter().map(|branch_id| {
            let branch_node = graph.node(branch_id).expect("validated against dangling edges");
            self.dispatcher.dispatch(
                branch_node.kind,
                branch_id,
                &branch_node.config,
                &input,
                execution.execution_id,
                execution.workflow_id,
                1,
                self.store.clone(),
                cancellation.clone(),
            )
        });
        let results = futures::future::join_all(dispatches).await;

        let spawned_at = Utc::now();
        let mut group = ParallelGroupState {
            group_id: group_id.clone(),
            join_node_id: join_node_id.clone(),
            wait_mode,
            branch_node_ids: branches.clone(),
            completed_branches: HashMap::new(),
            failed_branches: HashMap::new(),
            spawned_at,
        };

        for (branch_id, result) in branches.iter().zip(results.into_iter()) {
            self.record_attempt(&execution, branch_id, &result).await;
            match result.status {
                NodeResultStatus::Success | NodeResultStatus::Skipped => {
                    group
                        .completed_branches
                        .insert(branch_id.clone(), result.output.clone());
                }
                _ => {
                    group
                        .failed_branches
                        .insert(branch_id.clone(), result.error.clone().unwrap_or_default());
                }
            }
            execution.state.node_results.insert(branch_id.clone(), result);
            execution.state.completed_node_ids.push(branch_id.clone());
        }
        execution.state.completed_node_ids.push(node_id.clone());
        execution.state.node_results.insert(
            node_id.clone(),
            NodeExecutionResult {
                node_id: node_id.clone(),
                status: NodeResultStatus::Success,
                output: serde_json::json!({"group_id": group_id}),
                error: None,
                error_permanent: false,
                attempt: 1,
                started_at: spawned_at,
                finished_at: Some(Utc::now()),
            },
        );

        if !group.is_satisfied() {
            return self
                .finish_with_error(
                    execution,
                    ExecutionStatus::Failed,
                    format!("parallel group {group_id} did not satisfy its wait mode"),
                    lease_owner,
                )
                .await;
        }

        execution.state.active_parallel_groups.insert(group_id, group);
        execution.state.current_node_id = Some(join_node_id);
        self.save(execution, ExecutionStatus::Running, lease_owner).await
    }

    /// If the execution is parked on a `sub_workflow` node waiting for its child, checks
    /// the child's status without re-dispatching the handler. Returns `Ok(Some(..))` when
    /// this step's work is fully done (either "still waiting" or "child just finished and
    /// its result was consumed"); `Ok(None)` means execution should proceed through the
    /// normal dispatch path below.
    async fn poll_parked_sub_workflow(
        &self,
        execution: &Execution,
        graph: &GraphConfig,
        lease_owner: &str,
    ) -> Result<Option<Execution>, EngineError> {
        let Some(link) = execution
            .state
            .active_sub_workflows
            .iter()
            .find(|l| l.wait_for_completion && !self.consumed(execution, l))
            .cloned()
        else {
            return Ok(None);
        };

        let child = self.store.get_execution(link.child_execution_id).await?;
        let mut execution = execution.clone();

        if !child.status.is_terminal() {
            self.store
                .release_lease(execution.execution_id, lease_owner)
                .await?;
            return Ok(Some(execution));
        }

        let output = serde_json::json!({
            "sub_execution_id": child.execution_id,
            "status": child.status,
            "execution_data": child.state.variables,
        });
        let result = NodeExecutionResult {
            node_id: link.node_id.clone(),
            status: if child.status == ExecutionStatus::Completed {
                NodeResultStatus::Success
            } else {
                NodeResultStatus::Failed
            },
            output,
            error: child.state.error_message.clone(),
            error_permanent: child.status != ExecutionStatus::Completed,
            attempt: 1,
            started_at: link_spawned_at(&execution, &link),
            finished_at: Some(Utc::now()),
        };
        self.record_attempt(&execution, &link.node_id, &result).await;

        execution
            .state
            .active_sub_workflows
            .retain(|l| l.child_execution_id != link.child_execution_id);

        let node = graph
            .node(&link.node_id)
            .ok_or_else(|| EngineError::UnknownNode(link.node_id.clone()))?
            .clone();
        Ok(Some(
            self.advance_past_node(execution, graph, &node, result, lease_owner)
                .await?,
        ))
    }

    fn consumed(&self, _execution: &Execution, _link: &SubWorkflowLink) -> bool {
        false
    }

    /// Looks up the signal that made this `WaitingSignal` execution claimable (targeted to
    /// it, or the oldest matching unrouted one), merges its payload into `variables` the
    /// same way [`Self::process_signal`] does, marks it processed, and clears the awaiting
    /// fields. `current_node_id`
    /// already points past the `wait_signal` node (`handle_park` set it there), so the
    /// caller resumes by dispatching normally — this never re-runs the parking node itself.
    ///
    /// Returns `None` if no matching signal is found after all (a race between the claim
    /// query and another worker consuming it first); the caller releases the lease and
    /// leaves the execution parked for the next poll.
    async fn consume_pending_signal(&self, execution: &Execution) -> Result<Option<Execution>, EngineError> {
        let Some(signal_type) = execution.state.awaiting_signal_type.clone() else {
            return Ok(None);
        };

        let signal = match self.find_matching_signal(execution, &signal_type).await? {
            Some(signal) => signal,
            None => return Ok(None),
        };

        self.store.mark_signal_processed(signal.signal_id).await?;

        let mut execution = execution.clone();
        execution.state.variables = merge_output(
            execution.state.variables.clone(),
            &format!("signal_{signal_type}"),
            &signal.payload,
        );
        execution.state.awaiting_signal_type = None;
        execution.state.awaiting_since = None;
        Ok(Some(execution))
    }

    /// Targeted signals take priority over unrouted ones, both ordered oldest-first, per
    /// §4.5's signal matching policy.
    async fn find_matching_signal(
        &self,
        execution: &Execution,
        signal_type: &str,
    ) -> Result<Option<Signal>, EngineError> {
        let targeted = self.store.pending_signals_for(execution.execution_id).await?;
        if let Some(signal) = targeted.into_iter().find(|s| s.signal_type == signal_type) {
            return Ok(Some(signal));
        }
        let unrouted = self
            .store
            .pending_unrouted_signals(signal_type, Some(execution.workflow_id))
            .await?;
        Ok(unrouted.into_iter().next())
    }

    /// Records `result`, applies routing or retry/try-catch handling, and persists the
    /// outcome. This is the body of §4.2's `execute_step` steps 4-7 for a single dispatched
    /// node (parallel fanout and the parked sub-workflow poll have their own entry points
    /// above but converge here for the shared success/failure bookkeeping).
    async fn advance_past_node(
        &self,
        mut execution: Execution,
        graph: &GraphConfig,
        node: &WorkflowNode,
        result: NodeExecutionResult,
        lease_owner: &str,
    ) -> Result<Execution, EngineError> {
        let node_id = node.node_id.clone();
        execution.state.node_results.insert(node_id.clone(), result.clone());

        if result.status == NodeResultStatus::Failed {
            return self.handle_failure(execution, graph, node, result, lease_owner).await;
        }

        execution.state.variables =
            merge_output(execution.state.variables.clone(), &node_id, &result.output);
        execution.state.completed_node_ids.push(node_id.clone());

        if let Some(park) = result.output.get(PARK_KEY).cloned() {
            return self.handle_park(execution, graph, node, park, lease_owner).await;
        }

        match self.route_after_success(&mut execution.state, graph, node, &result) {
            Ok(NextOutcome::Advance(next)) => {
                execution.state.current_node_id = Some(next);
                self.save(execution, ExecutionStatus::Running, lease_owner).await
            }
            Ok(NextOutcome::Complete) => {
                execution.state.current_node_id = None;
                self.save(execution, ExecutionStatus::Completed, lease_owner).await
            }
            Ok(NextOutcome::Fail(reason)) => {
                self.finish_with_error(execution, ExecutionStatus::Failed, reason, lease_owner)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// A handler asked the engine to park rather than advance (`wait_signal`, and
    /// `sub_workflow` with `wait_for_completion`). The eventual successor is computed now
    /// and stashed in `current_node_id`; resuming is purely a status flip, never a
    /// re-dispatch of the parking node (§9's resolved Open Questions).
    async fn handle_park(
        &self,
        mut execution: Execution,
        graph: &GraphConfig,
        node: &WorkflowNode,
        park: Value,
        lease_owner: &str,
    ) -> Result<Execution, EngineError> {
        let kind = park.get("kind").and_then(Value::as_str).unwrap_or_default();
        let node_id = node.node_id.clone();

        match kind {
            "wait_signal" => {
                let signal_type = park
                    .get("signal_type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let next = match default_edges_outcome(graph, &node_id) {
                    NextOutcome::Advance(n) => Some(n),
                    NextOutcome::Complete => None,
                    NextOutcome::Fail(reason) => {
                        return self
                            .finish_with_error(execution, ExecutionStatus::Failed, reason, lease_owner)
                            .await
                    }
                };
                execution.state.current_node_id = next;
                execution.state.awaiting_signal_type = Some(signal_type);
                execution.state.awaiting_since = Some(Utc::now());
                self.save(execution, ExecutionStatus::WaitingSignal, lease_owner).await
            }
            "sub_workflow" => {
                let workflow_id: Uuid = park
                    .get("workflow_id")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        EngineError::InvalidGraph(format!("{node_id}: sub_workflow has invalid workflow_id"))
                    })?;
                let wait_for_completion = park
                    .get("wait_for_completion")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let child_input = park.get("input").cloned().unwrap_or(Value::Null);

                let child = self
                    .create_child_execution(workflow_id, child_input, execution.execution_id)
                    .await?;

                execution.state.active_sub_workflows.push(SubWorkflowLink {
                    node_id: node_id.clone(),
                    child_execution_id: child.execution_id,
                    wait_for_completion,
                });

                if wait_for_completion {
                    let next = match default_edges_outcome(graph, &node_id) {
                        NextOutcome::Advance(n) => Some(n),
                        NextOutcome::Complete => None,
                        NextOutcome::Fail(reason) => {
                            return self
                                .finish_with_error(execution, ExecutionStatus::Failed, reason, lease_owner)
                                .await
                        }
                    };
                    execution.state.current_node_id = Some(node_id);
                    let _ = next; // consumed once the child completes, see poll_parked_sub_workflow
                    self.save(execution, ExecutionStatus::Running, lease_owner).await
                } else {
                    let output = serde_json::json!({"sub_execution_id": child.execution_id});
                    execution.state.variables = merge_output(execution.state.variables.clone(), &node_id, &output);
                    match default_edges_outcome(graph, &node_id) {
                        NextOutcome::Advance(next) => {
                            execution.state.current_node_id = Some(next);
                            self.save(execution, ExecutionStatus::Running, lease_owner).await
                        }
                        NextOutcome::Complete => {
                            execution.state.current_node_id = None;
                            self.save(execution, ExecutionStatus::Completed, lease_owner).await
                        }
                        NextOutcome::Fail(reason) => {
                            self.finish_with_error(execution, ExecutionStatus::Failed, reason, lease_owner)
                                .await
                        }
                    }
                }
            }
            other => {
                self.finish_with_error(
                    execution,
                    ExecutionStatus::Failed,
                    format!("{node_id}: unknown park sentinel kind '{other}'"),
                    lease_owner,
                )
                .await
            }
        }
    }

    /// A node failed. Applies the retry policy (§4.2.2); if retries are exhausted or the
    /// handler flagged the error permanent, looks for an enclosing `try` block (§4.2.1 rule
    /// 6) before giving up and terminating the execution.
    async fn handle_failure(
        &self,
        mut execution: Execution,
        graph: &GraphConfig,
        node: &WorkflowNode,
        result: NodeExecutionResult,
        lease_owner: &str,
    ) -> Result<Execution, EngineError> {
        let node_id = node.node_id.clone();

        if !result.error_permanent && self.config.retry_policy.has_attempts_remaining(result.attempt) {
            let delay = self.config.retry_policy.delay_for_attempt(result.attempt + 1);
            execution.next_runnable_at = Some(
                Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()),
            );
            return self.save(execution, ExecutionStatus::Failed, lease_owner).await;
        }

        execution.state.completed_node_ids.push(node_id.clone());

        if let Some(block) = execution.state.active_try_blocks.last().cloned() {
            execution.state.variables = merge_error(
                execution.state.variables.clone(),
                result.error.as_deref().unwrap_or("node failed"),
            );
            let target = block.catch_node_id.clone().or_else(|| block.finally_node_id.clone());
            if let Some(target_node) = target {
                if graph.node(&target_node).is_some() {
                    execution.state.active_try_blocks.pop();
                    execution.state.current_node_id = Some(target_node);
                    return self.save(execution, ExecutionStatus::Running, lease_owner).await;
                }
            }
        }

        self.finish_with_error(
            execution,
            ExecutionStatus::Failed,
            result.error.unwrap_or_else(|| format!("{node_id} failed")),
            lease_owner,
        )
        .await
    }

    /// Routing rules for a node that just succeeded (§4.2.1 rules 4-7), independent of the
    /// parallel/park special cases handled by their own callers above.
    fn route_after_success(
        &self,
        state: &mut ExecutionState,
        graph: &GraphConfig,
        node: &WorkflowNode,
        result: &NodeExecutionResult,
    ) -> Result<NextOutcome, EngineError> {
        let node_id = node.node_id.as_str();

        match node.kind {
            NodeKind::Condition | NodeKind::ConditionSwitch => {
                let branch = result.output.get("branch").and_then(Value::as_str);
                match branch {
                    Some(b) => {
                        let edges = graph.edges_for_branch(node_id, b);
                        if edges.is_empty() {
                            Ok(NextOutcome::Fail(format!(
                                "{node_id}: no edge for branch '{b}' and no default edge"
                            )))
                        } else {
                            Ok(NextOutcome::Advance(edges[0].to.clone()))
                        }
                    }
                    None => Err(EngineError::NoMatchingBranch(node_id.to_string())),
                }
            }
            NodeKind::LoopStart => {
                let max_iterations = node
                    .config
                    .get("max_iterations")
                    .and_then(Value::as_u64)
                    .unwrap_or(1) as u32;
                let loop_end_node_id = node
                    .config
                    .get("loop_end_node_id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                state
                    .active_loops
                    .entry(node_id.to_string())
                    .or_insert_with(|| LoopContext {
                        loop_start_node_id: node_id.to_string(),
                        loop_end_node_id: loop_end_node_id.unwrap_or_default(),
                        iteration: 0,
                        max_iterations,
                    });
                Ok(default_edges_outcome(graph, node_id))
            }
            NodeKind::LoopEnd => {
                let loop_signal = result.output.get("loop_signal").and_then(Value::as_str);
                let start_id = state
                    .active_loops
                    .iter()
                    .find(|(_, ctx)| ctx.loop_end_node_id == node_id)
                    .map(|(k, _)| k.clone());

                let Some(start_id) = start_id else {
                    return Ok(NextOutcome::Fail(format!(
                        "{node_id}: loop_end with no matching loop_start context"
                    )));
                };

                let repeat = loop_signal != Some("break")
                    && state
                        .active_loops
                        .get(&start_id)
                        .map(|ctx| ctx.iteration + 1 < ctx.max_iterations || loop_signal == Some("continue"))
                        .unwrap_or(false);

                if repeat {
                    if let Some(ctx) = state.active_loops.get_mut(&start_id) {
                        ctx.iteration += 1;
                    }
                } else {
                    state.active_loops.remove(&start_id);
                }

                let branch = if repeat { "repeat" } else { "exit" };
                let edges = graph.edges_for_branch(node_id, branch);
                if edges.is_empty() {
                    Ok(NextOutcome::Fail(format!(
                        "{node_id}: no '{branch}' edge declared"
                    )))
                } else {
                    Ok(NextOutcome::Advance(edges[0].to.clone()))
                }
            }
            NodeKind::Try => {
                state.active_try_blocks.push(TryCatchBlock {
                    try_node_id: node_id.to_string(),
                    catch_node_id: node
                        .config
                        .get("catch_node_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    finally_node_id: node
                        .config
                        .get("finally_node_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
                Ok(default_edges_outcome(graph, node_id))
            }
            NodeKind::Finally => {
                state
                    .active_try_blocks
                    .retain(|b| b.finally_node_id.as_deref() != Some(node_id));
                Ok(default_edges_outcome(graph, node_id))
            }
            NodeKind::ParallelJoin => {
                state
                    .active_parallel_groups
                    .retain(|_, g| g.join_node_id != node_id);
                Ok(default_edges_outcome(graph, node_id))
            }
            _ => Ok(default_edges_outcome(graph, node_id)),
        }
    }

    /// Legal only from `running` (§4.2.3).
    pub async fn pause(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self.store.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidTransition(format!(
                "cannot pause execution in status {:?}",
                execution.status
            )));
        }
        self.transition(execution, ExecutionStatus::Paused).await
    }

    /// Legal from `paused` or `waiting_for_signal` (§4.2.3).
    pub async fn resume(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self.store.get_execution(execution_id).await?;
        if !matches!(
            execution.status,
            ExecutionStatus::Paused | ExecutionStatus::WaitingSignal
        ) {
            return Err(EngineError::InvalidTransition(format!(
                "cannot resume execution in status {:?}",
                execution.status
            )));
        }
        self.transition(execution, ExecutionStatus::Running).await
    }

    /// Legal from `running` / `paused` / `waiting_for_signal`. Distinct from `failed`: this
    /// is a deliberate externally-requested stop, not an execution error (§4.2.3).
    pub async fn terminate(&self, execution_id: Uuid, reason: Option<String>) -> Result<Execution, EngineError> {
        let mut execution = self.store.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "execution {execution_id} is already terminal"
            )));
        }
        execution.state.error_message = reason;
        execution.state.completed_at = Some(Utc::now());
        self.transition(execution, ExecutionStatus::Terminated).await
    }

    async fn transition(&self, execution: Execution, status: ExecutionStatus) -> Result<Execution, EngineError> {
        let version = self
            .store
            .save_execution_state(
                execution.execution_id,
                execution.version,
                execution.state.clone(),
                status,
            )
            .await?;
        Ok(Execution {
            status,
            version,
            updated_at: Utc::now(),
            ..execution
        })
    }

    /// Delivers `signal_data` to an execution parked on `wait_for_signal` for
    /// `signal_type`, merging it into `execution_data` under `signal_<type>` and flipping
    /// the execution back to `running` (§4.2 `process_signal`). No-op check: if the
    /// execution isn't waiting for this type, the caller is expected to have left the
    /// signal queued in the store instead of calling this directly.
    pub async fn process_signal(
        &self,
        execution_id: Uuid,
        signal_type: &str,
        signal_data: Value,
    ) -> Result<Execution, EngineError> {
        let mut execution = self.store.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::WaitingSignal
            || execution.state.awaiting_signal_type.as_deref() != Some(signal_type)
        {
            return Err(EngineError::InvalidTransition(format!(
                "execution {execution_id} is not waiting for signal '{signal_type}'"
            )));
        }
        execution.state.variables = merge_output(
            execution.state.variables.clone(),
            &format!("signal_{signal_type}"),
            &signal_data,
        );
        execution.state.awaiting_signal_type = None;
        execution.state.awaiting_since = None;
        self.transition(execution, ExecutionStatus::Running).await
    }

    /// Creates a new execution of the same workflow version; if `from_node_id` is given,
    /// seeds it with the source's `node_results`/`variables` up to (not including) that
    /// node, so earlier side effects are not re-run (§4.2 `replay_execution`).
    pub async fn replay_execution(
        &self,
        execution_id: Uuid,
        from_node_id: Option<&str>,
    ) -> Result<Execution, EngineError> {
        let source = self.store.get_execution(execution_id).await?;
        let workflow = self
            .store
            .get_workflow_version(source.workflow_id, source.workflow_version)
            .await?;

        let mut state = ExecutionState::default();
        match from_node_id {
            None => {
                state.variables = source.state.variables.clone();
            }
            Some(node_id) => {
                let cutoff = source
                    .state
                    .completed_node_ids
                    .iter()
                    .position(|n| n == node_id)
                    .unwrap_or(source.state.completed_node_ids.len());
                for completed_id in &source.state.completed_node_ids[..cutoff] {
                    if let Some(result) = source.state.node_results.get(completed_id) {
                        state.node_results.insert(completed_id.clone(), result.clone());
                    }
                    state.completed_node_ids.push(completed_id.clone());
                }
                state.variables = source.state.variables.clone();
                state.current_node_id = Some(node_id.to_string());
            }
        }

        let now = Utc::now();
        let replay = Execution {
            execution_id: Uuid::now_v7(),
            workflow_id: source.workflow_id,
            workflow_version: workflow.version,
            status: ExecutionStatus::Running,
            state,
            version: 0,
            lease_owner: None,
            lease_expires_at: None,
            next_runnable_at: Some(now),
            parent_execution_id: source.parent_execution_id,
            created_at: now,
            updated_at: now,
        };
        self.store.create_execution(replay.clone()).await?;
        Ok(replay)
    }

    async fn save(
        &self,
        mut execution: Execution,
        status: ExecutionStatus,
        lease_owner: &str,
    ) -> Result<Execution, EngineError> {
        if status.is_terminal() && execution.state.completed_at.is_none() {
            execution.state.completed_at = Some(Utc::now());
        }
        let version = self
            .store
            .save_execution_state(
                execution.execution_id,
                execution.version,
                execution.state.clone(),
                status,
            )
            .await?;
        self.store
            .release_lease(execution.execution_id, lease_owner)
            .await?;
        Ok(Execution {
            status,
            version,
            updated_at: Utc::now(),
            ..execution
        })
    }

    async fn finish_with_error(
        &self,
        mut execution: Execution,
        status: ExecutionStatus,
        reason: String,
        lease_owner: &str,
    ) -> Result<Execution, EngineError> {
        execution.state.error_message = Some(reason);
        execution.state.current_node_id = None;
        self.save(execution, status, lease_owner).await
    }
}

fn link_spawned_at(execution: &Execution, link: &SubWorkflowLink) -> chrono::DateTime<Utc> {
    execution
        .state
        .node_results
        .get(&link.node_id)
        .map(|r| r.started_at)
        .unwrap_or(execution.updated_at)
}

fn default_edges_outcome(graph: &GraphConfig, node_id: &str) -> NextOutcome {
    let edges = graph.default_edges(node_id);
    match edges.len() {
        0 => NextOutcome::Complete,
        1 => NextOutcome::Advance(edges[0].to.clone()),
        _ => NextOutcome::Fail(format!("{node_id}: more than one unconditional outgoing edge")),
    }
}

fn merge_output(mut variables: Value, node_id: &str, output: &Value) -> Value {
    if !variables.is_object() {
        variables = Value::Object(serde_json::Map::new());
    }
    if let Some(obj) = variables.as_object_mut() {
        obj.insert(format!("{node_id}_output"), output.clone());
    }
    variables
}

fn merge_error(mut variables: Value, message: &str) -> Value {
    if !variables.is_object() {
        variables = Value::Object(serde_json::Map::new());
    }
    if let Some(obj) = variables.as_object_mut() {
        obj.insert("error".to_string(), Value::String(message.to_string()));
    }
    variables
}

/// `wait_mode` config accepts either a bare string (`"all"` / `"any"`) or an object
/// carrying a `mode` field plus mode-specific fields (`{"mode": "n_of_m", "n": 2}`); `n`
/// is read from that same object, not from the string the mode name came from.
fn parse_wait_mode(value: Option<&Value>) -> WaitMode {
    let mode = value.and_then(|v| v.as_str().or_else(|| v.get("mode").and_then(Value::as_str)));
    match mode {
        Some("any") => WaitMode::Any,
        Some("n_of_m") => {
            let n = value
                .and_then(|v| v.get("n"))
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            WaitMode::NOfM { n }
        }
        _ => WaitMode::All,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ExternalServices;
    use crate::model::{Edge, NodeKind as NK, Workflow, WorkflowNode as WfNode};
    use crate::persistence::InMemoryExecutionStore;

    fn node(id: &str, kind: NK, config: Value) -> WfNode {
        WfNode {
            node_id: id.to_string(),
            kind,
            config,
            position: None,
        }
    }

    fn edge(from: &str, to: &str, branch: Option<&str>) -> Edge {
        Edge {
            from: from.to_string(),
            to: to.to_string(),
            branch: branch.map(str::to_string),
        }
    }

    async fn engine_with_workflow(graph: GraphConfig) -> (ExecutionEngine, Uuid) {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let dispatcher = Arc::new(Dispatcher::with_builtin_handlers(
            store.clone(),
            ExternalServices::default(),
        ));
        let workflow_id = Uuid::now_v7();
        let workflow = Workflow {
            workflow_id,
            version: 1,
            graph,
            trigger_config: Value::Null,
            is_active: true,
            owner_id: None,
        };
        store.create_workflow_version(workflow).await.unwrap();
        let engine = ExecutionEngine::new(store, dispatcher, EngineConfig::default());
        (engine, workflow_id)
    }

    async fn run_to_terminal(engine: &ExecutionEngine, execution_id: Uuid, max_steps: usize) -> Execution {
        for _ in 0..max_steps {
            let execution = engine.store().get_execution(execution_id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            if execution.status != ExecutionStatus::Running {
                return execution;
            }
            let leased = engine
                .store()
                .claim_runnable_executions("test-worker", 1, std::time::Duration::from_secs(30), Utc::now())
                .await
                .unwrap();
            let Some(leased) = leased.into_iter().next() else {
                return execution;
            };
            engine
                .execute_step(leased, CancellationToken::new())
                .await
                .unwrap();
        }
        engine.store().get_execution(execution_id).await.unwrap()
    }

    #[tokio::test]
    async fn linear_happy_path_completes() {
        // trigger -> trigger-type pass-through, S1's simplest shape without http/condition.
        let graph = GraphConfig {
            nodes: vec![node("trigger", NK::Trigger, Value::Null), node("c", NK::Catch, Value::Null)],
            edges: vec![edge("trigger", "c", None)],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine
            .create_execution(workflow_id, serde_json::json!({"x": 1}))
            .await
            .unwrap();

        let execution = run_to_terminal(&engine, execution.execution_id, 10).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.state.completed_node_ids,
            vec!["trigger".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn single_node_graph_completes_immediately() {
        let graph = GraphConfig {
            nodes: vec![node("trigger", NK::Trigger, Value::Null)],
            edges: vec![],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();
        let execution = run_to_terminal(&engine, execution.execution_id, 5).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn condition_routes_true_and_false_branches() {
        let graph = GraphConfig {
            nodes: vec![
                node("trigger", NK::Trigger, Value::Null),
                node("b", NK::Condition, serde_json::json!({"expression": "x == 1"})),
                node("t", NK::Catch, Value::Null),
                node("f", NK::Catch, Value::Null),
            ],
            edges: vec![
                edge("trigger", "b", None),
                edge("b", "t", Some("true")),
                edge("b", "f", Some("false")),
            ],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine
            .create_execution(workflow_id, serde_json::json!({"x": 1}))
            .await
            .unwrap();
        let execution = run_to_terminal(&engine, execution.execution_id, 10).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.state.completed_node_ids.contains(&"t".to_string()));
        assert!(!execution.state.completed_node_ids.contains(&"f".to_string()));
    }

    #[tokio::test]
    async fn condition_without_default_edge_fails_on_no_match() {
        let graph = GraphConfig {
            nodes: vec![
                node("trigger", NK::Trigger, Value::Null),
                node("b", NK::Condition, serde_json::json!({"expression": "x == 1"})),
                node("t", NK::Catch, Value::Null),
            ],
            edges: vec![edge("trigger", "b", None), edge("b", "t", Some("true"))],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine
            .create_execution(workflow_id, serde_json::json!({"x": 2}))
            .await
            .unwrap();
        let execution = run_to_terminal(&engine, execution.execution_id, 10).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn wait_signal_parks_then_resumes_on_process_signal() {
        let graph = GraphConfig {
            nodes: vec![
                node("trigger", NK::Trigger, Value::Null),
                node(
                    "wait",
                    NK::WaitSignal,
                    serde_json::json!({"signal_type": "approval"}),
                ),
                node("d", NK::Catch, Value::Null),
            ],
            edges: vec![edge("trigger", "wait", None), edge("wait", "d", None)],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

        // Advance past trigger, then park at wait_signal.
        let execution = run_to_terminal(&engine, execution.execution_id, 2).await;
        assert_eq!(execution.status, ExecutionStatus::WaitingSignal);

        engine
            .process_signal(
                execution.execution_id,
                "approval",
                serde_json::json!({"approved": true}),
            )
            .await
            .unwrap();

        let execution = run_to_terminal(&engine, execution.execution_id, 5).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.state.variables["signal_approval"]["approved"],
            serde_json::json!(true)
        );
    }

    #[tokio::test]
    async fn wait_signal_resumes_from_a_signal_written_directly_to_the_store() {
        // Mirrors how a webhook subscription delivers a signal: no call to
        // `process_signal`, just a `Signal` row appended to the store out-of-band.
        let graph = GraphConfig {
            nodes: vec![
                node("trigger", NK::Trigger, Value::Null),
                node(
                    "wait",
                    NK::WaitSignal,
                    serde_json::json!({"signal_type": "approval"}),
                ),
                node("d", NK::Catch, Value::Null),
            ],
            edges: vec![edge("trigger", "wait", None), edge("wait", "d", None)],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

        let execution = run_to_terminal(&engine, execution.execution_id, 2).await;
        assert_eq!(execution.status, ExecutionStatus::WaitingSignal);

        engine
            .store()
            .append_signal(Signal {
                signal_id: Uuid::now_v7(),
                signal_type: "approval".to_string(),
                execution_id: None,
                workflow_id: Some(workflow_id),
                payload: serde_json::json!({"approved": true}),
                received_at: Utc::now(),
                processed_at: None,
            })
            .await
            .unwrap();

        // `run_to_terminal` stops as soon as status isn't `Running`, so drive the claim
        // loop directly here to exercise resuming out of `WaitingSignal`.
        let mut execution = execution;
        for _ in 0..5 {
            if execution.status.is_terminal() {
                break;
            }
            let leased = engine
                .store()
                .claim_runnable_executions("test-worker", 1, std::time::Duration::from_secs(30), Utc::now())
                .await
                .unwrap();
            let Some(leased) = leased.into_iter().next() else {
                break;
            };
            execution = engine.execute_step(leased, CancellationToken::new()).await.unwrap();
        }

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.state.variables["signal_approval"]["approved"],
            serde_json::json!(true)
        );

        let still_pending = engine
            .store()
            .pending_unrouted_signals("approval", Some(workflow_id))
            .await
            .unwrap();
        assert!(still_pending.is_empty());
    }

    #[tokio::test]
    async fn parallel_fanout_all_waits_for_every_branch() {
        let graph = GraphConfig {
            nodes: vec![
                node("trigger", NK::Trigger, Value::Null),
                node(
                    "fanout",
                    NK::ParallelFanout,
                    serde_json::json!({"join_node_id": "join", "wait_mode": "all"}),
                ),
                node("x", NK::Catch, Value::Null),
                node("y", NK::Catch, Value::Null),
                node("join", NK::ParallelJoin, Value::Null),
                node("end", NK::Catch, Value::Null),
            ],
            edges: vec![
                edge("trigger", "fanout", None),
                edge("fanout", "x", None),
                edge("fanout", "y", None),
                edge("join", "end", None),
            ],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();
        let execution = run_to_terminal(&engine, execution.execution_id, 10).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.state.completed_node_ids.contains(&"x".to_string()));
        assert!(execution.state.completed_node_ids.contains(&"y".to_string()));
        assert!(execution.state.variables.get("join_output").is_some());
    }

    #[tokio::test]
    async fn parallel_fanout_n_of_m_reads_n_from_the_wait_mode_object() {
        // wait_mode is an object, not a bare string: `parse_wait_mode` must read both
        // `mode` and `n` off that same object (not off the string it once expected).
        // Only one of three branches succeeds; with `n: 2` correctly parsed the group is
        // not satisfied and the execution fails. If `n` silently defaulted (or the whole
        // mode fell back to `all`, which this fan-out would also satisfy since every
        // branch resolves synchronously), this would incorrectly complete instead.
        let graph = GraphConfig {
            nodes: vec![
                node("trigger", NK::Trigger, Value::Null),
                node(
                    "fanout",
                    NK::ParallelFanout,
                    serde_json::json!({
                        "join_node_id": "join",
                        "wait_mode": {"mode": "n_of_m", "n": 2},
                    }),
                ),
                node("ok", NK::Catch, Value::Null),
                node("bad1", NK::Condition, Value::Null),
                node("bad2", NK::Condition, Value::Null),
                node("join", NK::ParallelJoin, Value::Null),
                node("end", NK::Catch, Value::Null),
            ],
            edges: vec![
                edge("trigger", "fanout", None),
                edge("fanout", "ok", None),
                edge("fanout", "bad1", None),
                edge("fanout", "bad2", None),
                edge("join", "end", None),
            ],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();
        let execution = run_to_terminal(&engine, execution.execution_id, 10).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution
            .state
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("did not satisfy its wait mode"));
    }

    #[tokio::test]
    async fn pause_then_resume_returns_to_running() {
        let graph = GraphConfig {
            nodes: vec![node("trigger", NK::Trigger, Value::Null), node("c", NK::Catch, Value::Null)],
            edges: vec![edge("trigger", "c", None)],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

        let paused = engine.pause(execution.execution_id).await.unwrap();
        assert_eq!(paused.status, ExecutionStatus::Paused);

        let resumed = engine.resume(execution.execution_id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn terminate_is_distinct_from_failed() {
        let graph = GraphConfig {
            nodes: vec![node("trigger", NK::Trigger, Value::Null)],
            edges: vec![],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine.create_execution(workflow_id, Value::Null).await.unwrap();

        let terminated = engine
            .terminate(execution.execution_id, Some("user abort".to_string()))
            .await
            .unwrap();
        assert_eq!(terminated.status, ExecutionStatus::Terminated);
        assert_eq!(terminated.state.error_message.as_deref(), Some("user abort"));
    }

    #[tokio::test]
    async fn replay_from_scratch_reproduces_trigger_data() {
        let graph = GraphConfig {
            nodes: vec![node("trigger", NK::Trigger, Value::Null)],
            edges: vec![],
        };
        let (engine, workflow_id) = engine_with_workflow(graph).await;
        let execution = engine
            .create_execution(workflow_id, serde_json::json!({"x": 1}))
            .await
            .unwrap();
        let execution = run_to_terminal(&engine, execution.execution_id, 5).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let replay = engine.replay_execution(execution.execution_id, None).await.unwrap();
        assert_eq!(replay.state.variables, serde_json::json!({"x": 1}));
        assert_ne!(replay.execution_id, execution.execution_id);
    }
}
