//! Workflow execution.
//!
//! [`TaskExecutor`] runs a single node and produces its run record;
//! [`WorkflowRunner`] walks a workflow one ready node at a time, merging
//! each node's update into its children.

mod executor;
mod runner;

pub use executor::TaskExecutor;
pub use runner::{ReadyOrder, WorkflowResult, WorkflowRunner, submission_documents};
