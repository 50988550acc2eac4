use async_trait::async_trait;
use serde_json::Value;

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// No-op pass-through for structural nodes (`parallel_join`, `loop_end`, `try`, `catch`,
/// `finally`) whose behaviour lives in the engine's next-node selection rather than in a
/// dispatched handler (§9). Dispatching still goes through the normal timeout/capture path
/// so these nodes show up in `node_results` like any other.
pub struct MarkerHandler;

#[async_trait]
impl NodeHandler for MarkerHandler {
    async fn execute(&self, _ctx: &HandlerContext, _config: &Value, input: &Value) -> HandlerOutcome {
        HandlerOutcome::success(input.clone())
    }
}
