use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};
use crate::external::CredentialProvider;
use crate::reliability::{CircuitBreakerConfig, CircuitBreakerError, DistributedCircuitBreaker};

/// Resolves credentials for `config.connector_slug`/`config.user_id` and hands the call
/// off to the integration itself (§4.3, §6). This core only owns token resolution; the
/// actual third-party call is out of scope and stubbed until a real integration is wired.
///
/// Each distinct `connector_slug` gets its own breaker, keyed `connector:<slug>` and shared
/// across workers through the execution store, so one worker tripping a connector's breaker
/// is immediately visible to every other worker calling the same connector.
pub struct ConnectorHandler {
    credentials: Arc<dyn CredentialProvider>,
    breaker_config: CircuitBreakerConfig,
}

impl ConnectorHandler {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            breaker_config: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }
}

#[async_trait]
impl NodeHandler for ConnectorHandler {
    async fn execute(&self, ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome {
        let Some(connector_slug) = config.get("connector_slug").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("connector node missing required config.connector_slug");
        };
        let user_id = config.get("user_id").and_then(Value::as_str).unwrap_or("");

        let breaker = DistributedCircuitBreaker::new(
            format!("connector:{connector_slug}"),
            self.breaker_config.clone(),
            ctx.store().clone(),
        );
        let permit = match breaker.allow().await {
            Ok(permit) => permit,
            Err(CircuitBreakerError::Open(key)) | Err(CircuitBreakerError::HalfOpenExhausted(key)) => {
                return HandlerOutcome::failed(format!("circuit breaker open for {key}"));
            }
            Err(CircuitBreakerError::Store(e)) => {
                return HandlerOutcome::failed(format!("circuit breaker store error: {e}"));
            }
        };

        match self.credentials.get(connector_slug, user_id).await {
            Ok(token) => {
                permit.success().await;
                HandlerOutcome::success(json!({
                    "connector_slug": connector_slug,
                    "action": config.get("action"),
                    "input": input,
                    "token_expires_at": token.expires_at,
                }))
            }
            Err(e) => {
                permit.failure().await;
                HandlerOutcome::failed(e.to_string())
            }
        }
    }
}
