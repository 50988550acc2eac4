//! Schedule polling (§4.5 "Schedules"): fires due schedules by creating a new execution
//! per fire. `ExecutionStore::due_schedules` itself advances `next_fire_at` atomically, so
//! concurrent schedulers (multiple worker processes) never double-fire the same instant —
//! this runner just needs to call it on a cadence and create the resulting executions.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowkeep_engine::engine::ExecutionEngine;
use flowkeep_engine::model::Schedule;

#[derive(Debug, Clone)]
pub struct ScheduleRunnerConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl Default for ScheduleRunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

/// Polls `due_schedules` and turns each fired schedule into a new execution. Runs
/// independently of [`crate::pool::WorkerPool`] — creation needs no lease.
pub struct ScheduleRunner {
    engine: Arc<ExecutionEngine>,
    config: ScheduleRunnerConfig,
    cancellation: CancellationToken,
}

impl ScheduleRunner {
    pub fn new(engine: Arc<ExecutionEngine>, config: ScheduleRunnerConfig) -> Self {
        Self {
            engine,
            config,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn run(&self) {
        info!("schedule runner starting");
        while !self.cancellation.is_cancelled() {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.poll_once().await;
                }
            }
        }
        info!("schedule runner stopped");
    }

    pub async fn poll_once(&self) {
        let due = match self
            .engine
            .store()
            .due_schedules(chrono::Utc::now(), self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due_schedules failed");
                return;
            }
        };

        for schedule in due {
            self.fire(schedule).await;
        }
    }

    async fn fire(&self, schedule: Schedule) {
        let trigger_data = serde_json::json!({
            "schedule_id": schedule.schedule_id,
            "fired_at": chrono::Utc::now(),
            "payload": schedule.trigger_payload,
        });
        match self.engine.create_execution(schedule.workflow_id, trigger_data).await {
            Ok(execution) => {
                info!(
                    schedule_id = %schedule.schedule_id,
                    execution_id = %execution.execution_id,
                    "schedule fired"
                );
            }
            Err(e) => {
                // Per §4.5 failure semantics: a schedule whose workflow is gone or inactive
                // logs and skips rather than blocking the next fire.
                warn!(schedule_id = %schedule.schedule_id, error = %e, "schedule failed to create execution, skipping");
            }
        }
    }
}
