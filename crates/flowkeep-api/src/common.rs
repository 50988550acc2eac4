//! Shared response envelopes and error-to-HTTP-status mapping.

use axum::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;

use flowkeep_engine::engine::EngineError;
use flowkeep_engine::persistence::StoreError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Maps a store error to the HTTP status a client should see. Logging happens at the
/// call site, where the node/execution id is still in scope.
pub fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::ExecutionNotFound(_) | StoreError::WorkflowNotFound(_) | StoreError::ScheduleNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        StoreError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        StoreError::InvalidTransition(_) => StatusCode::CONFLICT,
        StoreError::Database(_) | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn engine_error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Store(store_err) => store_error_status(store_err),
        EngineError::WorkflowInactive(_) => StatusCode::CONFLICT,
        EngineError::NoMatchingBranch(_)
        | EngineError::AmbiguousEdge(_)
        | EngineError::UnknownNode(_)
        | EngineError::InvalidGraph(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Graph(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::InvalidTransition(_) => StatusCode::CONFLICT,
    }
}
