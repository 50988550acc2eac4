//! Handler execution context: everything a node handler is allowed to read, and nothing
//! it is allowed to mutate directly.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::persistence::ExecutionStore;

/// Passed to every [`NodeHandler::execute`](super::NodeHandler::execute) call.
///
/// Carries read-only identity (which execution/node/attempt this is), a read-through
/// handle to the store for handlers that need to look up a related entity (`sub_workflow`
/// polling a child's status), and a cooperative cancellation token the dispatcher signals
/// on timeout or on observing an external terminate request (§4.4 "Cancellation").
pub struct HandlerContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub node_id: String,
    /// 1-based attempt number for this node (bumped on each scheduled retry).
    pub attempt: u32,
    pub cancellation: CancellationToken,
    store: Arc<dyn ExecutionStore>,
}

impl HandlerContext {
    pub fn new(
        execution_id: Uuid,
        workflow_id: Uuid,
        node_id: impl Into<String>,
        attempt: u32,
        cancellation: CancellationToken,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            node_id: node_id.into(),
            attempt,
            cancellation,
            store,
        }
    }

    /// Read-through access to the store. Handlers must not write through this handle;
    /// the dispatcher/engine own all mutation (§4.3).
    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryExecutionStore;

    #[test]
    fn context_exposes_identity_and_cancellation() {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let ctx = HandlerContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "n1",
            1,
            CancellationToken::new(),
            store,
        );
        assert_eq!(ctx.node_id, "n1");
        assert_eq!(ctx.attempt, 1);
        assert!(!ctx.is_cancelled());
    }
}
