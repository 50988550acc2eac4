//! Cron-driven workflow triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A recurring trigger: fires `workflow_id` every time `cron_expr` (5-field, UTC) elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: Uuid,
    pub workflow_id: Uuid,
    pub cron_expr: String,
    pub is_active: bool,
    pub next_fire_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Seed data merged into the started execution's initial variables.
    #[serde(default)]
    pub trigger_payload: serde_json::Value,
}
