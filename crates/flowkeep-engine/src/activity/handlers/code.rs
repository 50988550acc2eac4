use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::external::CodeRunner;

/// Delegates to the configured [`CodeRunner`] (§6). `config: {language, source,
/// timeout_seconds?}`. A non-zero exit code is a failed result; the runner's own
/// stdout/stderr/parsed_json survive in `output` either way so a retry or the caller can
/// inspect what happened.
pub struct CodeHandler {
    runner: Arc<dyn CodeRunner>,
}

impl CodeHandler {
    pub fn new(runner: Arc<dyn CodeRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NodeHandler for CodeHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome {
        let Some(language) = config.get("language").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("code node missing required config.language");
        };
        let Some(source) = config.get("source").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("code node missing required config.source");
        };
        let timeout = config
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        match self.runner.run(language, source, input, timeout).await {
            Ok(result) => {
                let output = json!({
                    "stdout": result.stdout,
                    "stderr": result.stderr,
                    "exit_code": result.exit_code,
                    "memory_bytes": result.memory_bytes,
                    "parsed_json": result.parsed_json,
                });
                if result.exit_code == 0 {
                    HandlerOutcome::success(output)
                } else {
                    let mut outcome = HandlerOutcome::failed(format!(
                        "code exited with status {}",
                        result.exit_code
                    ));
                    outcome.output = output;
                    outcome
                }
            }
            Err(e) => HandlerOutcome::failed(e.to_string()),
        }
    }
}
