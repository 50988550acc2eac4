//! Workflow definition endpoints: register/list/inspect workflow versions, soft
//! activate/deactivate, and start a new execution of a workflow's current version.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use flowkeep_engine::engine::ExecutionEngine;
use flowkeep_engine::model::{Execution, GraphConfig, Workflow};
use flowkeep_engine::persistence::ExecutionStore;

use crate::common::{store_error_status, ListResponse};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/v1/workflows/:workflow_id", get(get_workflow).delete(deactivate_workflow))
        .route("/v1/workflows/:workflow_id/activate", patch(activate_workflow))
        .route("/v1/workflows/:workflow_id/executions", post(create_execution))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct CreateWorkflowRequest {
    workflow_id: Option<Uuid>,
    graph: GraphConfig,
    #[serde(default)]
    trigger_config: serde_json::Value,
    owner_id: Option<String>,
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<Json<Workflow>, StatusCode> {
    req.graph.validate().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let store = state.engine.store();
    let workflow_id = req.workflow_id.unwrap_or_else(Uuid::now_v7);
    let version = match store.get_workflow(workflow_id).await {
        Ok(existing) => existing.version + 1,
        Err(_) => 1,
    };

    let workflow = Workflow {
        workflow_id,
        version,
        graph: req.graph,
        trigger_config: req.trigger_config,
        is_active: true,
        owner_id: req.owner_id,
    };
    store.create_workflow_version(workflow.clone()).await.map_err(|e| {
        tracing::error!(error = %e, %workflow_id, "failed to create workflow version");
        store_error_status(&e)
    })?;
    Ok(Json(workflow))
}

async fn list_workflows(State(state): State<AppState>) -> Result<Json<ListResponse<Workflow>>, StatusCode> {
    let workflows = state.engine.store().list_workflows().await.map_err(|e| {
        tracing::error!(error = %e, "failed to list workflows");
        store_error_status(&e)
    })?;
    Ok(Json(workflows.into()))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<Workflow>, StatusCode> {
    let workflow = state.engine.store().get_workflow(workflow_id).await.map_err(|e| {
        tracing::error!(error = %e, %workflow_id, "failed to get workflow");
        store_error_status(&e)
    })?;
    Ok(Json(workflow))
}

async fn activate_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .store()
        .set_workflow_active(workflow_id, true)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %workflow_id, "failed to activate workflow");
            store_error_status(&e)
        })?;
    Ok(StatusCode::NO_CONTENT)
}

/// There is no hard delete: `DELETE /v1/workflows/:id` deactivates, matching the
/// store's own `is_active` soft-delete and the CLI's `deactivate` subcommand.
async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    state
        .engine
        .store()
        .set_workflow_active(workflow_id, false)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %workflow_id, "failed to deactivate workflow");
            store_error_status(&e)
        })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateExecutionRequest {
    #[serde(default)]
    trigger_data: serde_json::Value,
}

async fn create_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<CreateExecutionRequest>,
) -> Result<Json<Execution>, StatusCode> {
    let execution = state
        .engine
        .create_execution(workflow_id, req.trigger_data)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, %workflow_id, "failed to create execution");
            crate::common::engine_error_status(&e)
        })?;
    Ok(Json(execution))
}
