//! The activity dispatcher: maps a [`NodeKind`](crate::model::NodeKind) to a handler and
//! enforces the timeout/capture/duration contract around every call (§4.3 of the node
//! dispatcher design). Handlers themselves never mutate shared state; they return a
//! [`NodeExecutionResult`](crate::model::NodeExecutionResult)-shaped outcome that the
//! engine is solely responsible for persisting.

mod context;
mod dispatcher;
pub mod handlers;

pub use context::HandlerContext;
pub use dispatcher::{Dispatcher, DispatcherConfig};

use async_trait::async_trait;
use serde_json::Value;

/// The typed outcome of a handler invocation, independent of the bookkeeping (attempt
/// number, timing) the dispatcher adds on top to build a full `NodeExecutionResult`.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub error_permanent: bool,
    /// Only meaningful for `condition`/`*_switch`/`loop_start`: the routing label the
    /// engine's next-node selection should use. `None` leaves routing to the graph's
    /// unconditional/default edges.
    pub branch: Option<String>,
}

impl HandlerOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            error_permanent: false,
            branch: None,
        }
    }

    pub fn success_with_branch(output: Value, branch: impl Into<String>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            error_permanent: false,
            branch: Some(branch.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            error_permanent: false,
            branch: None,
        }
    }

    pub fn failed_permanent(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            error_permanent: true,
            branch: None,
        }
    }
}

/// A handler implementing one `NodeKind`'s behaviour. Handlers MUST NOT mutate shared
/// state directly (§4.3); they may call back into the store only for read-through lookups
/// via [`HandlerContext::store`].
#[async_trait]
pub trait NodeHandler: Send + Sync + 'static {
    /// `execute(node_id, node_config, input_data, execution_id?, store?) -> NodeExecutionResult`
    /// from the spec, minus the bookkeeping the dispatcher adds.
    async fn execute(&self, ctx: &HandlerContext, config: &Value, input: &Value) -> HandlerOutcome;
}
