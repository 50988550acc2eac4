//! The narrow interfaces this core consumes from collaborators it does not implement
//! (§6): credential resolution, code sandboxing, secret storage, and agent/LLM
//! invocation. Each is a trait with no production implementation in this crate — only a
//! stub that keeps the `code`/`connector`/`agent` handlers testable end-to-end before the
//! real integrations exist.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Failed(String),
}

/// Resolves `(connector_slug, user_id)` to a token bundle. Credential refresh, if needed,
/// is the connector integration's own responsibility (§4.3).
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    async fn get(&self, connector_slug: &str, user_id: &str) -> Result<TokenBundle, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extras: serde_json::Value,
}

/// Executes source in a sandbox (the `code` node's backing interface).
#[async_trait]
pub trait CodeRunner: Send + Sync + 'static {
    async fn run(
        &self,
        language: &str,
        source: &str,
        input: &serde_json::Value,
        timeout: Duration,
    ) -> Result<CodeRunResult, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub memory_bytes: Option<u64>,
    pub parsed_json: Option<serde_json::Value>,
}

/// Fetches a named secret (`key`, `env`, `path` — the secret's logical coordinates;
/// opaque to this core).
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    async fn get(&self, key: &str, env: &str, path: &str) -> Result<String, ExternalError>;
}

/// Runs a prompt against a model with tool results, backing the `agent` node.
#[async_trait]
pub trait AgentInvoker: Send + Sync + 'static {
    async fn invoke(
        &self,
        prompt: &str,
        tools: &serde_json::Value,
        context: &serde_json::Value,
    ) -> Result<AgentInvokeResult, ExternalError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvokeResult {
    pub output: String,
    pub tool_calls: serde_json::Value,
}

/// Errors `NotConfigured` for every call; satisfies the `connector`/`agent` handler
/// contracts without a real integration wired up.
pub struct UnconfiguredCredentialProvider;

#[async_trait]
impl CredentialProvider for UnconfiguredCredentialProvider {
    async fn get(&self, connector_slug: &str, _user_id: &str) -> Result<TokenBundle, ExternalError> {
        Err(ExternalError::NotConfigured(format!(
            "no credential provider configured for connector '{connector_slug}'"
        )))
    }
}

/// Echoes `input` back as `parsed_json`/`stdout` without running anything, so `code`
/// nodes are deterministic and offline-testable until a real sandbox is wired in.
pub struct EchoCodeRunner;

#[async_trait]
impl CodeRunner for EchoCodeRunner {
    async fn run(
        &self,
        _language: &str,
        _source: &str,
        input: &serde_json::Value,
        _timeout: Duration,
    ) -> Result<CodeRunResult, ExternalError> {
        Ok(CodeRunResult {
            stdout: input.to_string(),
            stderr: String::new(),
            exit_code: 0,
            memory_bytes: None,
            parsed_json: Some(input.clone()),
        })
    }
}

pub struct UnconfiguredSecretStore;

#[async_trait]
impl SecretStore for UnconfiguredSecretStore {
    async fn get(&self, key: &str, _env: &str, _path: &str) -> Result<String, ExternalError> {
        Err(ExternalError::NotConfigured(format!(
            "no secret store configured for key '{key}'"
        )))
    }
}

/// Returns a canned, clearly-labelled stub response rather than calling a model.
pub struct UnconfiguredAgentInvoker;

#[async_trait]
impl AgentInvoker for UnconfiguredAgentInvoker {
    async fn invoke(
        &self,
        _prompt: &str,
        _tools: &serde_json::Value,
        _context: &serde_json::Value,
    ) -> Result<AgentInvokeResult, ExternalError> {
        Err(ExternalError::NotConfigured(
            "no agent invoker configured".to_string(),
        ))
    }
}

/// The bundle of external collaborators wired into the `connector`/`code`/`agent`
/// handlers. Defaults to the unconfigured stubs; a real deployment supplies its own.
#[derive(Clone)]
pub struct ExternalServices {
    pub credentials: std::sync::Arc<dyn CredentialProvider>,
    pub code_runner: std::sync::Arc<dyn CodeRunner>,
    pub secrets: std::sync::Arc<dyn SecretStore>,
    pub agent: std::sync::Arc<dyn AgentInvoker>,
}

impl Default for ExternalServices {
    fn default() -> Self {
        Self {
            credentials: std::sync::Arc::new(UnconfiguredCredentialProvider),
            code_runner: std::sync::Arc::new(EchoCodeRunner),
            secrets: std::sync::Arc::new(UnconfiguredSecretStore),
            agent: std::sync::Arc::new(UnconfiguredAgentInvoker),
        }
    }
}
