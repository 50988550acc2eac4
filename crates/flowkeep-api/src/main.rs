// flowkeep-api
//
// HTTP surface over the engine: the Workflow API (register/inspect workflows, start/
// control executions), webhook signal ingress, and schedule management. Holds no
// orchestration state of its own — `flowkeep-cli serve` (or a `flowkeep-worker` process)
// is what actually advances executions; this binary is a thin axum front door onto the
// same `ExecutionStore`.

mod common;
mod executions;
mod schedules;
mod signals;
mod workflows;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use flowkeep_engine::activity::Dispatcher;
use flowkeep_engine::engine::{EngineConfig, ExecutionEngine};
use flowkeep_engine::external::ExternalServices;
use flowkeep_engine::persistence::{ExecutionStore, InMemoryExecutionStore};
use flowkeep_signals::{InMemorySubscriptionRegistry, WebhookIngress};
use flowkeep_storage::PostgresExecutionStore;

#[derive(OpenApi)]
#[openapi(
    paths(),
    tags((name = "flowkeep", description = "Durable workflow orchestration API"))
)]
struct ApiDoc;

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn build_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn ExecutionStore>> {
    match database_url {
        Some(url) => Ok(Arc::new(PostgresExecutionStore::connect(url).await?)),
        None => Ok(Arc::new(InMemoryExecutionStore::new())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let database_url = std::env::var("FLOWKEEP_DATABASE_URL").ok();
    let bind_addr: SocketAddr = std::env::var("FLOWKEEP_API_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    let store = build_store(database_url.as_deref()).await?;
    let dispatcher = Arc::new(Dispatcher::with_builtin_handlers(store.clone(), ExternalServices::default()));
    let engine = Arc::new(ExecutionEngine::new(store.clone(), dispatcher, EngineConfig::default()));

    // Webhook subscriptions are registered out-of-band (e.g. by a workflow's trigger
    // config) and are not yet persisted, so this starts empty; wiring a persisted
    // subscription registry is future work.
    let registry = Arc::new(InMemorySubscriptionRegistry::new());
    let ingress = Arc::new(WebhookIngress::new(registry, store.clone()));

    let app = Router::new()
        .route("/health", get(health))
        .merge(workflows::routes(workflows::AppState { engine: engine.clone() }))
        .merge(executions::routes(executions::AppState { engine: engine.clone() }))
        .merge(schedules::routes(schedules::AppState { store: store.clone() }))
        .merge(signals::routes(signals::AppState { ingress }))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    tracing::info!(%bind_addr, "flowkeep-api listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
