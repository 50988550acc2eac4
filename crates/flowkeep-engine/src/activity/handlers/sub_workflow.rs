use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::handlers::PARK_KEY;
use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::persistence::ExecutionStore;

/// Starts (or resumes waiting on) a child execution of `config.workflow_id` (§5
/// `sub_workflow`, §8's resolved Open Question: the wait is reactive, driven by the
/// child's own completion claiming the parent back onto the runnable queue, never
/// busy-polled). The handler never creates the child execution itself — creating rows is
/// the engine's job, since only the engine can assign the parent/child link atomically
/// alongside the parent's own state save. It only asks, via the `_park` sentinel, whether
/// a child needs to be spawned and whether the parent should wait for it.
pub struct SubWorkflowHandler {
    #[allow(dead_code)]
    store: Arc<dyn ExecutionStore>,
}

impl SubWorkflowHandler {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeHandler for SubWorkflowHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome {
        let Some(workflow_id) = config.get("workflow_id").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("sub_workflow node missing required config.workflow_id");
        };
        let wait_for_completion = config
            .get("wait_for_completion")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        HandlerOutcome::success(json!({
            PARK_KEY: {
                "kind": "sub_workflow",
                "workflow_id": workflow_id,
                "wait_for_completion": wait_for_completion,
                "input": input,
            }
        }))
    }
}
