//! PostgreSQL-backed [`ExecutionStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use flowkeep_engine::model::{Execution, ExecutionLog, ExecutionState, ExecutionStatus, LogLevel, Schedule, Signal, Workflow};
use flowkeep_engine::persistence::{CircuitBreakerRecord, ExecutionStore, LeasedExecution, StoreError};
use flowkeep_engine::reliability::CircuitState;

/// PostgreSQL implementation of [`ExecutionStore`], built on a shared connection pool.
#[derive(Clone)]
pub struct PostgresExecutionStore {
    pool: PgPool,
}

impl PostgresExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connects and applies embedded migrations. Convenience for binaries; tests and
    /// callers that manage their own pool should use [`Self::new`] directly.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        crate::MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }
}

fn status_to_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Paused => "paused",
        ExecutionStatus::WaitingSignal => "waiting_signal",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Terminated => "terminated",
    }
}

fn status_from_str(s: &str) -> Result<ExecutionStatus, StoreError> {
    Ok(match s {
        "running" => ExecutionStatus::Running,
        "paused" => ExecutionStatus::Paused,
        "waiting_signal" => ExecutionStatus::WaitingSignal,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        "terminated" => ExecutionStatus::Terminated,
        other => return Err(StoreError::Database(format!("unknown execution status '{other}'"))),
    })
}

fn circuit_state_from_str(s: &str) -> Result<CircuitState, StoreError> {
    Ok(match s {
        "closed" => CircuitState::Closed,
        "open" => CircuitState::Open,
        "half_open" => CircuitState::HalfOpen,
        other => return Err(StoreError::Database(format!("unknown circuit state '{other}'"))),
    })
}

fn level_to_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn level_from_str(s: &str) -> Result<LogLevel, StoreError> {
    Ok(match s {
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        other => return Err(StoreError::Database(format!("unknown log level '{other}'"))),
    })
}

fn workflow_from_row(row: &sqlx::postgres::PgRow) -> Result<Workflow, StoreError> {
    let graph_json: serde_json::Value = row.get("graph");
    let graph = serde_json::from_value(graph_json).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(Workflow {
        workflow_id: row.get("workflow_id"),
        version: row.get("version"),
        graph,
        trigger_config: row.get("trigger_config"),
        is_active: row.get("is_active"),
        owner_id: row.get("owner_id"),
    })
}

fn execution_from_row(row: &sqlx::postgres::PgRow) -> Result<Execution, StoreError> {
    let state_json: serde_json::Value = row.get("state");
    let state: ExecutionState = serde_json::from_value(state_json).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let status_str: String = row.get("status");
    Ok(Execution {
        execution_id: row.get("execution_id"),
        workflow_id: row.get("workflow_id"),
        workflow_version: row.get("workflow_version"),
        status: status_from_str(&status_str)?,
        state,
        version: row.get("version"),
        lease_owner: row.get("lease_owner"),
        lease_expires_at: row.get("lease_expires_at"),
        next_runnable_at: row.get("next_runnable_at"),
        parent_execution_id: row.get("parent_execution_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn signal_from_row(row: &sqlx::postgres::PgRow) -> Signal {
    Signal {
        signal_id: row.get("signal_id"),
        signal_type: row.get("signal_type"),
        execution_id: row.get("execution_id"),
        workflow_id: row.get("workflow_id"),
        payload: row.get("payload"),
        received_at: row.get("received_at"),
        processed_at: row.get("processed_at"),
    }
}

fn schedule_from_row(row: &sqlx::postgres::PgRow) -> Schedule {
    Schedule {
        schedule_id: row.get("schedule_id"),
        workflow_id: row.get("workflow_id"),
        cron_expr: row.get("cron_expr"),
        is_active: row.get("is_active"),
        next_fire_at: row.get("next_fire_at"),
        last_fired_at: row.get("last_fired_at"),
        trigger_payload: row.get("trigger_payload"),
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    #[instrument(skip(self, workflow))]
    async fn create_workflow_version(&self, workflow: Workflow) -> Result<(), StoreError> {
        let graph_json =
            serde_json::to_value(&workflow.graph).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflows (workflow_id, version, graph, trigger_config, is_active, owner_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(workflow.workflow_id)
        .bind(workflow.version)
        .bind(&graph_json)
        .bind(&workflow.trigger_config)
        .bind(workflow.is_active)
        .bind(&workflow.owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create workflow version: {e}");
            StoreError::Database(e.to_string())
        })?;

        debug!(workflow_id = %workflow.workflow_id, version = workflow.version, "created workflow version");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, version, graph, trigger_config, is_active, owner_id
            FROM workflows
            WHERE workflow_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        workflow_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_workflow_version(&self, workflow_id: Uuid, version: i32) -> Result<Workflow, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, version, graph, trigger_config, is_active, owner_id
            FROM workflows
            WHERE workflow_id = $1 AND version = $2
            "#,
        )
        .bind(workflow_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        workflow_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (workflow_id) workflow_id, version, graph, trigger_config, is_active, owner_id
            FROM workflows
            ORDER BY workflow_id, version DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(workflow_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn set_workflow_active(&self, workflow_id: Uuid, is_active: bool) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET is_active = $2
            WHERE workflow_id = $1 AND version = (SELECT MAX(version) FROM workflows WHERE workflow_id = $1)
            "#,
        )
        .bind(workflow_id)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        Ok(())
    }

    #[instrument(skip(self, execution))]
    async fn create_execution(&self, execution: Execution) -> Result<(), StoreError> {
        let state_json =
            serde_json::to_value(&execution.state).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO executions (
                execution_id, workflow_id, workflow_version, status, state, version,
                lease_owner, lease_expires_at, next_runnable_at, parent_execution_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(execution.execution_id)
        .bind(execution.workflow_id)
        .bind(execution.workflow_version)
        .bind(status_to_str(execution.status))
        .bind(&state_json)
        .bind(execution.version)
        .bind(&execution.lease_owner)
        .bind(execution.lease_expires_at)
        .bind(execution.next_runnable_at)
        .bind(execution.parent_execution_id)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create execution: {e}");
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, workflow_id, workflow_version, status, state, version,
                   lease_owner, lease_expires_at, next_runnable_at, parent_execution_id,
                   created_at, updated_at
            FROM executions
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::ExecutionNotFound(execution_id))?;

        execution_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_executions_for_workflow(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, workflow_id, workflow_version, status, state, version,
                   lease_owner, lease_expires_at, next_runnable_at, parent_execution_id,
                   created_at, updated_at
            FROM executions
            WHERE workflow_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(workflow_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(execution_from_row).collect()
    }

    #[instrument(skip(self, new_state))]
    async fn save_execution_state(
        &self,
        execution_id: Uuid,
        expected_version: i64,
        new_state: ExecutionState,
        new_status: ExecutionStatus,
    ) -> Result<i64, StoreError> {
        let state_json =
            serde_json::to_value(&new_state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let clears_lease = new_status.is_terminal();

        let row = sqlx::query(
            r#"
            UPDATE executions
            SET state = $3,
                status = $4,
                version = version + 1,
                updated_at = NOW(),
                lease_owner = CASE WHEN $5 THEN NULL ELSE lease_owner END,
                lease_expires_at = CASE WHEN $5 THEN NULL ELSE lease_expires_at END,
                next_runnable_at = CASE WHEN $5 THEN NULL ELSE next_runnable_at END
            WHERE execution_id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(execution_id)
        .bind(expected_version)
        .bind(&state_json)
        .bind(status_to_str(new_status))
        .bind(clears_lease)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        match row {
            Some(row) => Ok(row.get("version")),
            None => {
                let actual = self.get_execution(execution_id).await?.version;
                Err(StoreError::ConcurrencyConflict {
                    execution_id,
                    expected: expected_version,
                    actual,
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn release_lease(&self, execution_id: Uuid, lease_owner: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE executions
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE execution_id = $1 AND lease_owner = $2
            "#,
        )
        .bind(execution_id)
        .bind(lease_owner)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_runnable_executions(
        &self,
        worker_id: &str,
        max: usize,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeasedExecution>, StoreError> {
        let lease_expires_at = now + chrono::Duration::from_std(lease_duration).unwrap_or_default();

        // SKIP LOCKED keeps concurrent workers from blocking on each other's in-flight
        // claims; each worker simply moves on to the next claimable row.
        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT e.execution_id
                FROM executions e
                WHERE (e.lease_owner IS NULL OR e.lease_expires_at <= $4)
                  AND (
                        e.status = 'running'
                        OR (e.status = 'failed' AND e.next_runnable_at IS NOT NULL AND e.next_runnable_at <= $4)
                        OR (
                            e.status = 'waiting_signal'
                            AND EXISTS (
                                SELECT 1 FROM signals s
                                WHERE s.processed_at IS NULL
                                  AND s.signal_type = (e.state ->> 'awaiting_signal_type')
                                  AND (
                                        s.execution_id = e.execution_id
                                        OR (s.execution_id IS NULL AND (s.workflow_id IS NULL OR s.workflow_id = e.workflow_id))
                                      )
                            )
                        )
                      )
                ORDER BY e.created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE executions e
            SET lease_owner = $1, lease_expires_at = $2
            FROM claimable c
            WHERE e.execution_id = c.execution_id
            RETURNING e.execution_id, e.workflow_id, e.workflow_version, e.status, e.state, e.version,
                      e.lease_owner, e.lease_expires_at, e.next_runnable_at, e.parent_execution_id,
                      e.created_at, e.updated_at
            "#,
        )
        .bind(worker_id)
        .bind(lease_expires_at)
        .bind(max as i64)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to claim runnable executions: {e}");
            StoreError::Database(e.to_string())
        })?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            claimed.push(LeasedExecution {
                execution: execution_from_row(row)?,
                lease_owner: worker_id.to_string(),
                lease_expires_at,
            });
        }

        if !claimed.is_empty() {
            debug!(worker_id, count = claimed.len(), "claimed runnable executions");
        }
        Ok(claimed)
    }

    #[instrument(skip(self))]
    async fn reclaim_stale_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE executions
            SET lease_owner = NULL, lease_expires_at = NULL
            WHERE lease_expires_at IS NOT NULL
              AND lease_expires_at <= $1
              AND status NOT IN ('completed', 'failed', 'terminated')
            RETURNING execution_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("execution_id")).collect())
    }

    #[instrument(skip(self, schedule))]
    async fn create_schedule(&self, schedule: Schedule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                schedule_id, workflow_id, cron_expr, is_active, next_fire_at,
                last_fired_at, trigger_payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(schedule.schedule_id)
        .bind(schedule.workflow_id)
        .bind(&schedule.cron_expr)
        .bind(schedule.is_active)
        .bind(schedule.next_fire_at)
        .bind(schedule.last_fired_at)
        .bind(&schedule.trigger_payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Schedule, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT schedule_id, workflow_id, cron_expr, is_active, next_fire_at, last_fired_at, trigger_payload
            FROM schedules
            WHERE schedule_id = $1
            "#,
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::ScheduleNotFound(schedule_id))?;

        Ok(schedule_from_row(&row))
    }

    #[instrument(skip(self))]
    async fn due_schedules(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<Schedule>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = sqlx::query(
            r#"
            SELECT schedule_id, workflow_id, cron_expr, is_active, next_fire_at, last_fired_at, trigger_payload
            FROM schedules
            WHERE is_active AND next_fire_at <= $1
            ORDER BY next_fire_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut fired = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut schedule = schedule_from_row(row);

            let cron_schedule: cron::Schedule = match schedule.cron_expr.parse() {
                Ok(s) => s,
                Err(_) => continue,
            };
            let Some(next) = cron_schedule.after(&now).next() else {
                continue;
            };

            sqlx::query(
                r#"
                UPDATE schedules SET last_fired_at = $2, next_fire_at = $3 WHERE schedule_id = $1
                "#,
            )
            .bind(schedule.schedule_id)
            .bind(now)
            .bind(next)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            schedule.last_fired_at = Some(now);
            schedule.next_fire_at = next;
            fired.push(schedule);
        }

        tx.commit().await.map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(fired)
    }

    #[instrument(skip(self))]
    async fn set_schedule_active(&self, schedule_id: Uuid, is_active: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE schedules SET is_active = $2 WHERE schedule_id = $1")
            .bind(schedule_id)
            .bind(is_active)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ScheduleNotFound(schedule_id));
        }
        Ok(())
    }

    #[instrument(skip(self, signal))]
    async fn append_signal(&self, signal: Signal) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO signals (signal_id, signal_type, execution_id, workflow_id, payload, received_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(signal.signal_id)
        .bind(&signal.signal_type)
        .bind(signal.execution_id)
        .bind(signal.workflow_id)
        .bind(&signal.payload)
        .bind(signal.received_at)
        .bind(signal.processed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(signal.signal_id)
    }

    #[instrument(skip(self))]
    async fn pending_signals_for(&self, execution_id: Uuid) -> Result<Vec<Signal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT signal_id, signal_type, execution_id, workflow_id, payload, received_at, processed_at
            FROM signals
            WHERE processed_at IS NULL AND execution_id = $1
            ORDER BY received_at
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(signal_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn pending_unrouted_signals(
        &self,
        signal_type: &str,
        workflow_id: Option<Uuid>,
    ) -> Result<Vec<Signal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT signal_id, signal_type, execution_id, workflow_id, payload, received_at, processed_at
            FROM signals
            WHERE processed_at IS NULL
              AND execution_id IS NULL
              AND signal_type = $1
              AND (workflow_id IS NULL OR $2 IS NULL OR workflow_id = $2)
            ORDER BY received_at
            "#,
        )
        .bind(signal_type)
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.iter().map(signal_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn mark_signal_processed(&self, signal_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE signals SET processed_at = NOW() WHERE signal_id = $1")
            .bind(signal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, log))]
    async fn append_log(&self, log: ExecutionLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (log_id, execution_id, node_id, level, message, context, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.log_id)
        .bind(log.execution_id)
        .bind(&log.node_id)
        .bind(level_to_str(log.level))
        .bind(&log.message)
        .bind(&log.context)
        .bind(log.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_logs(&self, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT log_id, execution_id, node_id, level, message, context, recorded_at
            FROM execution_logs
            WHERE execution_id = $1
            ORDER BY recorded_at
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            let level_str: String = row.get("level");
            logs.push(ExecutionLog {
                log_id: row.get("log_id"),
                execution_id: row.get("execution_id"),
                node_id: row.get("node_id"),
                level: level_from_str(&level_str)?,
                message: row.get("message"),
                context: row.get("context"),
                recorded_at: row.get("recorded_at"),
            });
        }
        Ok(logs)
    }

    #[instrument(skip(self))]
    async fn get_circuit_breaker(&self, key: &str) -> Result<Option<CircuitBreakerRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT key, state, failure_count, success_count, opened_at, updated_at
            FROM circuit_breakers
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let state_str: String = row.get("state");
        Ok(Some(CircuitBreakerRecord {
            key: row.get("key"),
            state: circuit_state_from_str(&state_str)?,
            failure_count: row.get::<i32, _>("failure_count") as u32,
            success_count: row.get::<i32, _>("success_count") as u32,
            opened_at: row.get("opened_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    #[instrument(skip(self))]
    async fn upsert_circuit_breaker(
        &self,
        key: &str,
        state: CircuitState,
        failure_count: u32,
        success_count: u32,
    ) -> Result<(), StoreError> {
        let opened_at = matches!(state, CircuitState::Open).then(Utc::now);

        sqlx::query(
            r#"
            INSERT INTO circuit_breakers (key, state, failure_count, success_count, opened_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (key) DO UPDATE SET
                state = EXCLUDED.state,
                failure_count = EXCLUDED.failure_count,
                success_count = EXCLUDED.success_count,
                opened_at = CASE WHEN EXCLUDED.state = 'open' THEN COALESCE(circuit_breakers.opened_at, EXCLUDED.opened_at) ELSE NULL END,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(state.to_string())
        .bind(failure_count as i32)
        .bind(success_count as i32)
        .bind(opened_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }
}
