//! External signals: webhook/manual events delivered into a waiting execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound signal, either addressed to a specific execution or left for the
/// matching policy to route to the oldest eligible waiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: Uuid,
    pub signal_type: String,
    /// If set, delivered directly to this execution, bypassing the matching policy.
    pub execution_id: Option<Uuid>,
    /// Narrows matching to waiters of this workflow when `execution_id` is unset.
    pub workflow_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Signal {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}
