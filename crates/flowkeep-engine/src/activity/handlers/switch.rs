use async_trait::async_trait;
use serde_json::Value;

use crate::activity::handlers::expression;
use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// Multi-way routing: `config.cases: [{expression, branch}]`, evaluated in declaration
/// order, first match wins. Falls through to the `"default"` branch label if declared, or
/// the graph's unconditional edge otherwise (§4.3's condition_switch, §8 S4).
pub struct SwitchHandler;

#[async_trait]
impl NodeHandler for SwitchHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome {
        let Some(cases) = config.get("cases").and_then(Value::as_array) else {
            return HandlerOutcome::failed_permanent("condition_switch node missing required config.cases");
        };

        for case in cases {
            let Some(expr) = case.get("expression").and_then(Value::as_str) else {
                continue;
            };
            if expression::evaluate(expr, input) {
                let branch = case
                    .get("branch")
                    .and_then(Value::as_str)
                    .unwrap_or("default");
                return HandlerOutcome::success_with_branch(input.clone(), branch);
            }
        }

        HandlerOutcome::success_with_branch(input.clone(), "default")
    }
}
