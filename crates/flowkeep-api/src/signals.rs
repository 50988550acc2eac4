//! Webhook signal ingress: `POST /:connector/webhook?trigger_id=...`, the HTTP transport
//! over `flowkeep_signals::WebhookIngress`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use flowkeep_signals::{IngressError, WebhookIngress};

#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<WebhookIngress>,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/:connector/webhook", post(receive_webhook)).with_state(state)
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    trigger_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct WebhookReceipt {
    pub matched_subscriptions: u32,
    pub signal_ids: Vec<Uuid>,
}

const SIGNATURE_HEADER: &str = "x-signal-signature";

async fn receive_webhook(
    State(state): State<AppState>,
    Path(_connector): Path<String>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let receipt = state
        .ingress
        .ingest(&query.trigger_id, &body, signature)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, trigger_id = %query.trigger_id, "webhook ingress rejected");
            match e {
                IngressError::UnknownTrigger(_) => StatusCode::NOT_FOUND,
                IngressError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        })?;

    Ok(Json(WebhookReceipt {
        matched_subscriptions: receipt.matched_subscriptions,
        signal_ids: receipt.signal_ids,
    }))
}
