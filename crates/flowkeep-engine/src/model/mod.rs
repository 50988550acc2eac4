//! The declarative workflow graph and its runtime execution state.

mod execution;
mod log;
mod schedule;
mod signal;
mod workflow;

pub use execution::{
    Execution, ExecutionState, ExecutionStatus, LoopContext, NodeExecutionResult,
    NodeResultStatus, ParallelGroupState, SubWorkflowLink, TryCatchBlock, WaitMode,
};
pub use log::{ExecutionLog, LogLevel};
pub use schedule::Schedule;
pub use signal::Signal;
pub use workflow::{Edge, GraphConfig, GraphError, NodeKind, Workflow, WorkflowNode};
