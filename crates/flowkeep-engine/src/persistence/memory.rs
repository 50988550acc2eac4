//! In-memory implementation of ExecutionStore, for tests and local development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::model::{
    Execution, ExecutionLog, ExecutionState, ExecutionStatus, Schedule, Signal, Workflow,
};

struct SignalRow {
    signal: Signal,
}

/// In-memory implementation of [`ExecutionStore`].
///
/// Provides the same observable semantics as the Postgres-backed store (in particular,
/// optimistic concurrency on `save_execution_state` and lease exclusivity on
/// `claim_runnable_executions`), without a database. This is the default store for the
/// worker binary when no database is configured, and backs every engine unit test.
pub struct InMemoryExecutionStore {
    /// workflow_id -> versions, ordered by `version`.
    workflows: RwLock<HashMap<Uuid, Vec<Workflow>>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
    schedules: RwLock<HashMap<Uuid, Schedule>>,
    signals: RwLock<HashMap<Uuid, SignalRow>>,
    logs: RwLock<HashMap<Uuid, Vec<ExecutionLog>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            schedules: RwLock::new(HashMap::new()),
            signals: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }

    /// Clears all data. For tests.
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.executions.write().clear();
        self.schedules.write().clear();
        self.signals.write().clear();
        self.logs.write().clear();
    }

    fn is_runnable(execution: &Execution, now: DateTime<Utc>, has_matching_signal: bool) -> bool {
        if execution.lease_owner.is_some() {
            if let Some(expires) = execution.lease_expires_at {
                if expires > now {
                    return false;
                }
            }
        }
        match execution.status {
            ExecutionStatus::Running => true,
            ExecutionStatus::Failed => execution
                .next_runnable_at
                .map(|at| at <= now)
                .unwrap_or(false),
            ExecutionStatus::WaitingSignal => has_matching_signal,
            _ => false,
        }
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_workflow_version(&self, workflow: Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .entry(workflow.workflow_id)
            .or_default()
            .push(workflow);
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .get(&workflow_id)
            .and_then(|versions| versions.iter().max_by_key(|w| w.version).cloned())
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn get_workflow_version(
        &self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .get(&workflow_id)
            .and_then(|versions| versions.iter().find(|w| w.version == version).cloned())
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let mut latest: Vec<Workflow> = self
            .workflows
            .read()
            .values()
            .filter_map(|versions| versions.iter().max_by_key(|w| w.version).cloned())
            .collect();
        latest.sort_by_key(|w| w.workflow_id);
        Ok(latest)
    }

    async fn set_workflow_active(&self, workflow_id: Uuid, is_active: bool) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write();
        let versions = workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        let current = versions
            .iter_mut()
            .max_by_key(|w| w.version)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))?;
        current.is_active = is_active;
        Ok(())
    }

    async fn create_execution(&self, execution: Execution) -> Result<(), StoreError> {
        self.executions
            .write()
            .insert(execution.execution_id, execution);
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .get(&execution_id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(execution_id))
    }

    async fn list_executions_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut matching: Vec<Execution> = self
            .executions
            .read()
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn save_execution_state(
        &self,
        execution_id: Uuid,
        expected_version: i64,
        new_state: ExecutionState,
        new_status: ExecutionStatus,
    ) -> Result<i64, StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        if execution.version != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                execution_id,
                expected: expected_version,
                actual: execution.version,
            });
        }

        execution.state = new_state;
        execution.status = new_status;
        execution.version += 1;
        execution.updated_at = Utc::now();
        if new_status.is_terminal() {
            execution.lease_owner = None;
            execution.lease_expires_at = None;
            execution.next_runnable_at = None;
        }
        Ok(execution.version)
    }

    async fn release_lease(&self, execution_id: Uuid, lease_owner: &str) -> Result<(), StoreError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        if execution.lease_owner.as_deref() == Some(lease_owner) {
            execution.lease_owner = None;
            execution.lease_expires_at = None;
        }
        Ok(())
    }

    async fn claim_runnable_executions(
        &self,
        worker_id: &str,
        max: usize,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeasedExecution>, StoreError> {
        let signals = self.signals.read();
        let mut executions = self.executions.write();
        let mut claimed = Vec::new();

        for execution in executions.values_mut() {
            if claimed.len() >= max {
                break;
            }

            let has_matching_signal = execution.status == ExecutionStatus::WaitingSignal
                && execution.state.awaiting_signal_type.as_ref().is_some_and(|ty| {
                    signals.values().any(|row| {
                        !row.signal.is_processed()
                            && &row.signal.signal_type == ty
                            && (row.signal.execution_id == Some(execution.execution_id)
                                || (row.signal.execution_id.is_none()
                                    && row
                                        .signal
                                        .workflow_id
                                        .map(|w| w == execution.workflow_id)
                                        .unwrap_or(true)))
                    })
                });

            if !Self::is_runnable(execution, now, has_matching_signal) {
                continue;
            }

            let lease_expires_at = now + chrono::Duration::from_std(lease_duration).unwrap_or_default();
            execution.lease_owner = Some(worker_id.to_string());
            execution.lease_expires_at = Some(lease_expires_at);

            claimed.push(LeasedExecution {
                execution: execution.clone(),
                lease_owner: worker_id.to_string(),
                lease_expires_at,
            });
        }

        Ok(claimed)
    }

    async fn reclaim_stale_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut executions = self.executions.write();
        let mut reclaimed = Vec::new();
        for execution in executions.values_mut() {
            if let Some(expires) = execution.lease_expires_at {
                if expires <= now && !execution.status.is_terminal() {
                    execution.lease_owner = None;
                    execution.lease_expires_at = None;
                    reclaimed.push(execution.execution_id);
                }
            }
        }
        Ok(reclaimed)
    }

    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StoreError> {
        self.schedules
            .write()
            .insert(schedule.schedule_id, schedule);
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule, StoreError> {
        self.schedules
            .read()
            .get(&schedule_id)
            .cloned()
            .ok_or(StoreError::ScheduleNotFound(schedule_id))
    }

    async fn due_schedules(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<Schedule>, StoreError> {
        let mut schedules = self.schedules.write();
        let mut fired = Vec::new();

        for schedule in schedules.values_mut() {
            if fired.len() >= max {
                break;
            }
            if schedule.is_active && schedule.next_fire_at <= now {
                let cron_schedule: cron::Schedule = match schedule.cron_expr.parse() {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                if let Some(next) = cron_schedule.after(&now).next() {
                    schedule.last_fired_at = Some(now);
                    schedule.next_fire_at = next;
                }
                fired.push(schedule.clone());
            }
        }
        Ok(fired)
    }

    async fn set_schedule_active(&self, schedule_id: Uuid, is_active: bool) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write();
        let schedule = schedules
            .get_mut(&schedule_id)
            .ok_or(StoreError::ScheduleNotFound(schedule_id))?;
        schedule.is_active = is_active;
        Ok(())
    }

    async fn append_signal(&self, signal: Signal) -> Result<Uuid, StoreError> {
        let signal_id = signal.signal_id;
        self.signals.write().insert(signal_id, SignalRow { signal });
        Ok(signal_id)
    }

    async fn pending_signals_for(&self, execution_id: Uuid) -> Result<Vec<Signal>, StoreError> {
        let signals = self.signals.read();
        let mut matching: Vec<Signal> = signals
            .values()
            .filter(|row| !row.signal.is_processed() && row.signal.execution_id == Some(execution_id))
            .map(|row| row.signal.clone())
            .collect();
        matching.sort_by_key(|s| s.received_at);
        Ok(matching)
    }

    async fn pending_unrouted_signals(
        &self,
        signal_type: &str,
        workflow_id: Option<Uuid>,
    ) -> Result<Vec<Signal>, StoreError> {
        let signals = self.signals.read();
        let mut matching: Vec<Signal> = signals
            .values()
            .filter(|row| {
                !row.signal.is_processed()
                    && row.signal.execution_id.is_none()
                    && row.signal.signal_type == signal_type
                    && match (row.signal.workflow_id, workflow_id) {
                        (Some(sub), Some(want)) => sub == want,
                        (None, _) => true,
                        (Some(_), None) => false,
                    }
            })
            .map(|row| row.signal.clone())
            .collect();
        matching.sort_by_key(|s| s.received_at);
        Ok(matching)
    }

    async fn mark_signal_processed(&self, signal_id: Uuid) -> Result<(), StoreError> {
        let mut signals = self.signals.write();
        if let Some(row) = signals.get_mut(&signal_id) {
            row.signal.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn append_log(&self, log: ExecutionLog) -> Result<(), StoreError> {
        self.logs
            .write()
            .entry(log.execution_id)
            .or_default()
            .push(log);
        Ok(())
    }

    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError> {
        Ok(self
            .logs
            .read()
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }
}
