use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::external::AgentInvoker;

/// Runs `config.prompt` (with `config.tools`, if any) through the configured
/// [`AgentInvoker`] (§6), passing `input` as context.
pub struct AgentHandler {
    invoker: Arc<dyn AgentInvoker>,
}

impl AgentHandler {
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl NodeHandler for AgentHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome {
        let Some(prompt) = config.get("prompt").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("agent node missing required config.prompt");
        };
        let tools = config.get("tools").cloned().unwrap_or(Value::Null);

        match self.invoker.invoke(prompt, &tools, input).await {
            Ok(result) => HandlerOutcome::success(json!({
                "output": result.output,
                "tool_calls": result.tool_calls,
            })),
            Err(e) => HandlerOutcome::failed(e.to_string()),
        }
    }
}
