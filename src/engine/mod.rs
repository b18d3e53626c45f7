//! Execution engine for workflows.

mod active;
mod executor;
mod proxy;
mod run_data;
mod static_data;

pub use active::ActiveWorkflow;
pub use executor::{RunOptions, WorkflowExecutor};
pub use proxy::{DataProxy, RunView};
pub use run_data::{
    ExecutionMode, ExecutionStatus, RunData, RunError, RunRecord, SourceRef, TaskResult,
    TaskStatus,
};
pub use static_data::{StaticDataHandle, StaticDataStore};
