// Builds the engine's store from `--database-url`, falling back to an in-memory store
// for local exploration. The in-memory store does not persist across invocations, so
// most commands other than `serve` are only useful against a real database.

use std::sync::Arc;

use flowkeep_engine::activity::Dispatcher;
use flowkeep_engine::engine::{EngineConfig, ExecutionEngine};
use flowkeep_engine::external::ExternalServices;
use flowkeep_engine::persistence::{ExecutionStore, InMemoryExecutionStore};
use flowkeep_storage::PostgresExecutionStore;

pub async fn build(database_url: Option<&str>) -> anyhow::Result<Arc<dyn ExecutionStore>> {
    match database_url {
        Some(url) => {
            let store = PostgresExecutionStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryExecutionStore::new())),
    }
}

/// Builds the engine with the stub `ExternalServices`; a deployment with real
/// connector/code/agent integrations would supply its own here instead.
pub async fn build_engine(database_url: Option<&str>) -> anyhow::Result<Arc<ExecutionEngine>> {
    let store = build(database_url).await?;
    let dispatcher = Arc::new(Dispatcher::with_builtin_handlers(store.clone(), ExternalServices::default()));
    Ok(Arc::new(ExecutionEngine::new(store, dispatcher, EngineConfig::default())))
}
