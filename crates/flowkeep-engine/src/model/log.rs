//! Append-only execution log entries, for observability and replay diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of an execution's audit trail. Distinct from tracing spans emitted to stdout:
/// these are persisted per-execution and surfaced through the API/CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub log_id: Uuid,
    pub execution_id: Uuid,
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}
