//! The worker loop (§4.4): each iteration claims a batch of runnable executions, spawns
//! one task per execution to call `execute_step`, and separately advances due schedules.
//! A task touches exactly one execution at a time and never holds the lease across more
//! than one step — `ExecutionEngine::execute_step` releases it on every return path.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flowkeep_engine::engine::ExecutionEngine;
use flowkeep_engine::persistence::ExecutionStore;

use crate::backpressure::{BackpressureConfig, BackpressureState};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Stable identity recorded as `lease_owner`; distinguishes this worker's claims from
    /// every other worker's in the store.
    pub worker_id: String,
    /// Max executions claimed per poll cycle.
    pub batch_size: usize,
    /// Upper bound on concurrently in-flight `execute_step` calls.
    pub max_concurrency: usize,
    pub lease_duration: Duration,
    pub poll_interval: Duration,
    /// How often `reclaim_stale_leases` is checked, independent of the main poll cadence.
    pub stale_lease_check_interval: Duration,
    pub backpressure: BackpressureConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            batch_size: 20,
            max_concurrency: 20,
            lease_duration: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            stale_lease_check_interval: Duration::from_secs(15),
            backpressure: BackpressureConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(String),
}

/// Drives executions to completion by repeatedly claiming runnable work and advancing it.
/// Does not own schedule polling (see [`crate::scheduler::ScheduleRunner`]) or signal
/// ingress (the `flowkeep-signals` crate) — both write through the same `ExecutionStore`
/// this pool reads `claim_runnable_executions` from, so they compose without coordination
/// beyond the store itself.
pub struct WorkerPool {
    engine: Arc<ExecutionEngine>,
    config: WorkerPoolConfig,
    backpressure: Arc<BackpressureState>,
    cancellation: CancellationToken,
}

impl WorkerPool {
    pub fn new(engine: Arc<ExecutionEngine>, config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        config
            .backpressure
            .validate()
            .map_err(|e| WorkerPoolError::InvalidConfig(e.to_string()))?;
        if config.batch_size == 0 {
            return Err(WorkerPoolError::InvalidConfig("batch_size must be > 0".into()));
        }
        let backpressure = Arc::new(BackpressureState::new(
            config.backpressure.clone(),
            config.max_concurrency,
        ));
        Ok(Self {
            engine,
            config,
            backpressure,
            cancellation: CancellationToken::new(),
        })
    }

    /// A token this pool observes: cancelling it stops claiming new work. In-flight steps
    /// are allowed to finish their current node (§4.4 "Cancellation"); they are not aborted
    /// mid-handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs the poll loop until the cancellation token fires. Intended to be spawned as its
    /// own task; returns once no more claims will be attempted and in-flight steps drain.
    pub async fn run(&self) {
        info!(worker_id = %self.config.worker_id, "worker pool starting");
        let mut stale_lease_tick = tokio::time::interval(self.config.stale_lease_check_interval);

        while !self.cancellation.is_cancelled() {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.poll_once().await;
                }
                _ = stale_lease_tick.tick() => {
                    self.reclaim_stale_leases().await;
                }
            }
        }
        info!(worker_id = %self.config.worker_id, "worker pool stopped");
    }

    /// One claim-and-dispatch cycle; exposed directly so tests and the CLI can drive the
    /// loop deterministically instead of waiting on the sleep-based `run`.
    pub async fn poll_once(&self) {
        if !self.backpressure.should_claim() {
            debug!(worker_id = %self.config.worker_id, "backpressure active, skipping claim");
            return;
        }

        let available = self.backpressure.available_slots().min(self.config.batch_size);
        if available == 0 {
            return;
        }

        let claimed = match self
            .engine
            .store()
            .claim_runnable_executions(
                &self.config.worker_id,
                available,
                self.config.lease_duration,
                chrono::Utc::now(),
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(worker_id = %self.config.worker_id, error = %e, "claim_runnable_executions failed");
                return;
            }
        };

        if claimed.is_empty() {
            return;
        }
        debug!(worker_id = %self.config.worker_id, count = claimed.len(), "claimed executions");

        let mut handles = Vec::with_capacity(claimed.len());
        for leased in claimed {
            let engine = self.engine.clone();
            let backpressure = self.backpressure.clone();
            let cancellation = self.cancellation.clone();
            backpressure.step_started();
            handles.push(tokio::spawn(async move {
                let execution_id = leased.execution.execution_id;
                let result = engine.execute_step(leased, cancellation).await;
                backpressure.step_finished();
                if let Err(e) = result {
                    warn!(%execution_id, error = %e, "execute_step failed");
                }
            }));
        }
        futures::future::join_all(handles).await;
    }

    async fn reclaim_stale_leases(&self) {
        match self.engine.store().reclaim_stale_leases(chrono::Utc::now()).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                warn!(worker_id = %self.config.worker_id, count = reclaimed.len(), "reclaimed stale leases");
            }
            Ok(_) => {}
            Err(e) => {
                error!(worker_id = %self.config.worker_id, error = %e, "reclaim_stale_leases failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowkeep_engine::activity::Dispatcher;
    use flowkeep_engine::engine::EngineConfig;
    use flowkeep_engine::external::ExternalServices;
    use flowkeep_engine::model::{Edge, GraphConfig, NodeKind, Workflow, WorkflowNode};
    use flowkeep_engine::persistence::InMemoryExecutionStore;

    fn trigger_only_workflow(workflow_id: Uuid) -> Workflow {
        Workflow {
            workflow_id,
            version: 1,
            graph: GraphConfig {
                nodes: vec![WorkflowNode {
                    node_id: "start".into(),
                    kind: NodeKind::Trigger,
                    config: serde_json::json!({}),
                    position: None,
                }],
                edges: vec![],
            },
            trigger_config: serde_json::json!({}),
            is_active: true,
            owner_id: None,
        }
    }

    fn two_node_workflow(workflow_id: Uuid) -> Workflow {
        let mut wf = trigger_only_workflow(workflow_id);
        wf.graph.nodes.push(WorkflowNode {
            node_id: "code".into(),
            kind: NodeKind::Code,
            config: serde_json::json!({"language": "echo"}),
            position: None,
        });
        wf.graph.edges.push(Edge {
            from: "start".into(),
            to: "code".into(),
            branch: None,
        });
        wf
    }

    async fn make_engine() -> (Arc<ExecutionEngine>, Arc<dyn ExecutionStore>) {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let dispatcher = Arc::new(Dispatcher::with_builtin_handlers(
            store.clone(),
            ExternalServices::default(),
        ));
        let engine = Arc::new(ExecutionEngine::new(store.clone(), dispatcher, EngineConfig::default()));
        (engine, store)
    }

    #[tokio::test]
    async fn poll_once_advances_claimed_executions_to_completion() {
        let (engine, store) = make_engine().await;
        let workflow_id = Uuid::now_v7();
        store.create_workflow_version(two_node_workflow(workflow_id)).await.unwrap();

        let execution = engine
            .create_execution(workflow_id, serde_json::json!({}))
            .await
            .unwrap();

        let pool = WorkerPool::new(engine.clone(), WorkerPoolConfig::default()).unwrap();
        // Two nodes to advance through: trigger, then code.
        pool.poll_once().await;
        pool.poll_once().await;

        let final_execution = store.get_execution(execution.execution_id).await.unwrap();
        assert_eq!(
            final_execution.status,
            flowkeep_engine::model::ExecutionStatus::Completed
        );
    }

    #[tokio::test]
    async fn poll_once_is_a_no_op_when_nothing_is_runnable() {
        let (engine, _store) = make_engine().await;
        let pool = WorkerPool::new(engine, WorkerPoolConfig::default()).unwrap();
        pool.poll_once().await;
    }

    #[test]
    fn rejects_zero_batch_size() {
        let (engine, _store) = (
            Arc::new(ExecutionEngine::new(
                Arc::new(InMemoryExecutionStore::new()),
                Arc::new(Dispatcher::with_builtin_handlers(
                    Arc::new(InMemoryExecutionStore::new()),
                    ExternalServices::default(),
                )),
                EngineConfig::default(),
            )),
            (),
        );
        let config = WorkerPoolConfig {
            batch_size: 0,
            ..WorkerPoolConfig::default()
        };
        assert!(WorkerPool::new(engine, config).is_err());
    }
}
