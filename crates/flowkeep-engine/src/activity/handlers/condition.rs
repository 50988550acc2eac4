use async_trait::async_trait;
use serde_json::Value;

use crate::activity::handlers::expression;
use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// Evaluates `config.expression` against `input` and routes on the boolean result via the
/// `"true"`/`"false"` branch labels (§4.3, §8 S2). The node itself never fails: an
/// unresolvable expression evaluates falsy, same as the underlying evaluator's convention.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome {
        let Some(expr) = config.get("expression").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("condition node missing required config.expression");
        };
        let result = expression::evaluate(expr, input);
        let branch = if result { "true" } else { "false" };
        HandlerOutcome::success_with_branch(input.clone(), branch)
    }
}
