use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// Surfaces the current iteration index so downstream nodes can read
/// `output.iteration` (§5 `loop_start`). The engine owns the actual `LoopContext`
/// push/pop and `max_iterations` bound (§8's loop semantics resolution), and folds the
/// current iteration into `input._iteration` before dispatching this node; this handler
/// only reports where the engine already says the loop is. `ctx.attempt` is the retry
/// counter, not the loop position, so it plays no part here.
pub struct LoopStartHandler;

#[async_trait]
impl NodeHandler for LoopStartHandler {
    async fn execute(&self, _ctx: &HandlerContext, _config: &Value, input: &Value) -> HandlerOutcome {
        let iteration = input.get("_iteration").and_then(Value::as_u64).unwrap_or(0);
        HandlerOutcome::success(json!({
            "iteration": iteration,
            "input": input,
        }))
    }
}
