//! Maps [`NodeKind`] to a [`NodeHandler`] and enforces timeout/capture/duration around
//! every call, independent of what the handler itself does.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::external::ExternalServices;
use crate::model::{NodeExecutionResult, NodeKind, NodeResultStatus};
use crate::persistence::ExecutionStore;

use super::{HandlerContext, HandlerOutcome, NodeHandler};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Used when a node's `config.timeout_seconds` is absent.
    pub default_node_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_node_timeout: Duration::from_secs(30),
        }
    }
}

/// A table mapping `node_type` to a handler, plus the dispatcher itself: the component
/// that enforces the per-node timeout, captures panics as failed results, and measures
/// `duration_ms` (§4.3). Handlers never measure their own duration or catch their own
/// panics; that would let a misbehaving handler violate the contract.
pub struct Dispatcher {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn is_registered(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Builds the registry described in §4.3/§9 with every built-in handler wired to its
    /// `NodeKind`. Connector/agent/code default to narrow stub implementations per §6 —
    /// the real integrations are external collaborators out of scope for this core.
    pub fn with_builtin_handlers(store: Arc<dyn ExecutionStore>, external: ExternalServices) -> Self {
        let mut dispatcher = Self::new(DispatcherConfig::default());
        dispatcher
            .register(NodeKind::Trigger, Arc::new(super::handlers::TriggerHandler))
            .register(
                NodeKind::HttpRequest,
                Arc::new(super::handlers::HttpRequestHandler::new()),
            )
            .register(
                NodeKind::Code,
                Arc::new(super::handlers::CodeHandler::new(external.code_runner.clone())),
            )
            .register(NodeKind::Condition, Arc::new(super::handlers::ConditionHandler))
            .register(
                NodeKind::ConditionSwitch,
                Arc::new(super::handlers::SwitchHandler),
            )
            .register(
                NodeKind::Connector,
                Arc::new(super::handlers::ConnectorHandler::new(external.credentials.clone())),
            )
            .register(
                NodeKind::Agent,
                Arc::new(super::handlers::AgentHandler::new(external.agent.clone())),
            )
            .register(
                NodeKind::SubWorkflow,
                Arc::new(super::handlers::SubWorkflowHandler::new(store)),
            )
            .register(
                NodeKind::ParallelJoin,
                Arc::new(super::handlers::MarkerHandler),
            )
            .register(
                NodeKind::WaitSignal,
                Arc::new(super::handlers::WaitSignalHandler),
            )
            .register(
                NodeKind::LoopStart,
                Arc::new(super::handlers::LoopStartHandler),
            )
            .register(NodeKind::LoopEnd, Arc::new(super::handlers::MarkerHandler))
            .register(NodeKind::Try, Arc::new(super::handlers::MarkerHandler))
            .register(NodeKind::Catch, Arc::new(super::handlers::MarkerHandler))
            .register(NodeKind::Finally, Arc::new(super::handlers::MarkerHandler));
        dispatcher
    }

    /// Invokes the handler registered for `kind`, enforcing `timeout` (falling back to
    /// `config.timeout_seconds` on the node, else the dispatcher default), catching any
    /// panic as a failed result, and stamping `duration_ms` itself.
    pub async fn dispatch(
        &self,
        kind: NodeKind,
        node_id: &str,
        node_config: &serde_json::Value,
        input: &serde_json::Value,
        execution_id: Uuid,
        workflow_id: Uuid,
        attempt: u32,
        store: Arc<dyn ExecutionStore>,
        cancellation: CancellationToken,
    ) -> NodeExecutionResult {
        let started_at = Utc::now();
        let timeout = node_config
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_node_timeout);

        let handler = match self.handlers.get(&kind) {
            Some(handler) => handler.clone(),
            None => {
                return Self::finish(
                    node_id,
                    started_at,
                    attempt,
                    HandlerOutcome::failed_permanent(format!(
                        "no handler registered for node kind {kind:?}"
                    )),
                )
            }
        };

        let ctx = HandlerContext::new(
            execution_id,
            workflow_id,
            node_id,
            attempt,
            cancellation,
            store,
        );
        let config = node_config.clone();
        let input = input.clone();

        let call = AssertUnwindSafe(async move { handler.execute(&ctx, &config, &input).await })
            .catch_unwind();

        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let message = panic_message(&panic);
                HandlerOutcome::failed(format!("handler panicked: {message}"))
            }
            Err(_) => HandlerOutcome::failed("timeout"),
        };

        Self::finish(node_id, started_at, attempt, outcome)
    }

    fn finish(
        node_id: &str,
        started_at: chrono::DateTime<Utc>,
        attempt: u32,
        outcome: HandlerOutcome,
    ) -> NodeExecutionResult {
        let finished_at = Utc::now();
        NodeExecutionResult {
            node_id: node_id.to_string(),
            status: if outcome.success {
                NodeResultStatus::Success
            } else {
                NodeResultStatus::Failed
            },
            output: if outcome.success && outcome.branch.is_some() {
                merge_branch(outcome.output, outcome.branch.as_deref())
            } else {
                outcome.output
            },
            error: outcome.error,
            error_permanent: outcome.error_permanent,
            attempt,
            started_at,
            finished_at: Some(finished_at),
        }
    }
}

fn merge_branch(mut output: serde_json::Value, branch: Option<&str>) -> serde_json::Value {
    if let (Some(obj), Some(branch)) = (output.as_object_mut(), branch) {
        obj.entry("branch")
            .or_insert_with(|| serde_json::Value::String(branch.to_string()));
    }
    output
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
