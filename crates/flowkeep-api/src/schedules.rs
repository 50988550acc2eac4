//! Cron schedule management. The store exposes no arbitrary update or hard delete, so
//! `PATCH .../activate` and `DELETE` (deactivate) are the update/delete surface, matching
//! the workflow resource's own soft-delete shape and the CLI's `schedule` subcommands.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use flowkeep_engine::model::Schedule;
use flowkeep_engine::persistence::ExecutionStore;

use crate::common::store_error_status;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ExecutionStore>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/schedules", post(create_schedule))
        .route("/v1/schedules/:schedule_id", get(get_schedule).delete(deactivate_schedule))
        .route("/v1/schedules/:schedule_id/activate", patch(activate_schedule))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    workflow_id: Uuid,
    cron_expr: String,
    #[serde(default)]
    trigger_payload: serde_json::Value,
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<Json<Schedule>, StatusCode> {
    let parsed: cron::Schedule = req.cron_expr.parse().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
    let next_fire_at = parsed
        .after(&chrono::Utc::now())
        .next()
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;

    let schedule = Schedule {
        schedule_id: Uuid::now_v7(),
        workflow_id: req.workflow_id,
        cron_expr: req.cron_expr,
        is_active: true,
        next_fire_at,
        last_fired_at: None,
        trigger_payload: req.trigger_payload,
    };
    state.store.create_schedule(schedule.clone()).await.map_err(|e| {
        tracing::error!(error = %e, "failed to create schedule");
        store_error_status(&e)
    })?;
    Ok(Json(schedule))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Schedule>, StatusCode> {
    let schedule = state.store.get_schedule(schedule_id).await.map_err(|e| {
        tracing::error!(error = %e, %schedule_id, "failed to get schedule");
        store_error_status(&e)
    })?;
    Ok(Json(schedule))
}

async fn activate_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    state.store.set_schedule_active(schedule_id, true).await.map_err(|e| {
        tracing::error!(error = %e, %schedule_id, "failed to activate schedule");
        store_error_status(&e)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deactivate_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    state.store.set_schedule_active(schedule_id, false).await.map_err(|e| {
        tracing::error!(error = %e, %schedule_id, "failed to deactivate schedule");
        store_error_status(&e)
    })?;
    Ok(StatusCode::NO_CONTENT)
}
