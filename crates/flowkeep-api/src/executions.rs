//! Execution inspection and control: status, logs, pause/resume/terminate, replay.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use flowkeep_engine::engine::ExecutionEngine;
use flowkeep_engine::model::{Execution, ExecutionLog};

use crate::common::{engine_error_status, store_error_status, ListResponse};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/executions/:execution_id", get(get_execution))
        .route("/v1/executions/:execution_id/logs", get(get_execution_logs))
        .route("/v1/executions/:execution_id/pause", post(pause_execution))
        .route("/v1/executions/:execution_id/resume", post(resume_execution))
        .route("/v1/executions/:execution_id/terminate", post(terminate_execution))
        .route("/v1/executions/:execution_id/replay", post(replay_execution))
        .route("/v1/executions/:execution_id/signal", post(signal_execution))
        .with_state(state)
}

async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state.engine.store().get_execution(execution_id).await.map_err(|e| {
        tracing::error!(error = %e, %execution_id, "failed to get execution");
        store_error_status(&e)
    })?;
    Ok(Json(execution))
}

/// The execution's append-only log is its timeline: node entries, retries, and
/// lifecycle transitions in the order they were recorded.
async fn get_execution_logs(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<ListResponse<ExecutionLog>>, StatusCode> {
    let logs = state.engine.store().list_logs(execution_id).await.map_err(|e| {
        tracing::error!(error = %e, %execution_id, "failed to list execution logs");
        store_error_status(&e)
    })?;
    Ok(Json(logs.into()))
}

async fn pause_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state.engine.pause(execution_id).await.map_err(|e| {
        tracing::error!(error = %e, %execution_id, "failed to pause execution");
        engine_error_status(&e)
    })?;
    Ok(Json(execution))
}

async fn resume_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state.engine.resume(execution_id).await.map_err(|e| {
        tracing::error!(error = %e, %execution_id, "failed to resume execution");
        engine_error_status(&e)
    })?;
    Ok(Json(execution))
}

#[derive(Deserialize, Default)]
pub struct TerminateRequest {
    reason: Option<String>,
}

async fn terminate_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
    Json(req): Json<TerminateRequest>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state.engine.terminate(execution_id, req.reason).await.map_err(|e| {
        tracing::error!(error = %e, %execution_id, "failed to terminate execution");
        engine_error_status(&e)
    })?;
    Ok(Json(execution))
}

#[derive(Deserialize, Default)]
pub struct ReplayQuery {
    from_node: Option<String>,
}

async fn replay_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state
        .engine
        .replay_execution(execution_id, query.from_node.as_deref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %execution_id, "failed to replay execution");
            engine_error_status(&e)
        })?;
    Ok(Json(execution))
}

#[derive(Deserialize)]
pub struct SignalRequest {
    signal_type: String,
    #[serde(default)]
    signal_data: serde_json::Value,
}

async fn signal_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state
        .engine
        .process_signal(execution_id, &req.signal_type, req.signal_data)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %execution_id, "failed to process signal");
            engine_error_status(&e)
        })?;
    Ok(Json(execution))
}
