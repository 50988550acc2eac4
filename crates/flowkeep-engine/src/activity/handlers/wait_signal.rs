use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::handlers::PARK_KEY;
use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// Requests that the engine park the execution in `WaitingSignal` for `config.signal_type`
/// rather than advance (§5 `wait_signal`, §9's `_park` sentinel). The handler itself never
/// touches `ExecutionState`; it only asks for the transition.
pub struct WaitSignalHandler;

#[async_trait]
impl NodeHandler for WaitSignalHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, _input: &Value) -> HandlerOutcome {
        let Some(signal_type) = config.get("signal_type").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("wait_signal node missing required config.signal_type");
        };
        HandlerOutcome::success(json!({
            PARK_KEY: {
                "kind": "wait_signal",
                "signal_type": signal_type,
            }
        }))
    }
}
