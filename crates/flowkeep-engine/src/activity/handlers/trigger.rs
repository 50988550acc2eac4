use async_trait::async_trait;
use serde_json::Value;

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// Pass-through: output equals input. Used both for the workflow's entry `trigger` node
/// and for terminal pass-through nodes in test graphs (§8 S1 node `C`).
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(&self, _ctx: &HandlerContext, _config: &Value, input: &Value) -> HandlerOutcome {
        HandlerOutcome::success(input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryExecutionStore;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    #[tokio::test]
    async fn output_equals_input() {
        let handler = TriggerHandler;
        let ctx = HandlerContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "trigger",
            1,
            CancellationToken::new(),
            Arc::new(InMemoryExecutionStore::new()),
        );
        let input = serde_json::json!({"a": 1});
        let outcome = handler.execute(&ctx, &Value::Null, &input).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, input);
    }
}
