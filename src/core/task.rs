//! Task trait, task context, and task results.
//!
//! The `Task` trait is the unit of work of a workflow node. A task resolves
//! its declared parameters from the node's [`ParameterContext`], performs one
//! computation, and returns a [`TaskResult`] whose `update` payload is merged
//! into the contexts of the node's children.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::context::{ContextError, ParamSpec, ParameterContext, ResolvedParams};
use super::types::NodeId;
use crate::sim::{CodecError, SimError};

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Error resolving parameters or writing results.
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// The simulation layer rejected the input.
    #[error("simulation error: {0}")]
    Simulation(#[from] SimError),

    /// An encoded structure could not be decoded or encoded.
    #[error("structure codec error: {0}")]
    Codec(#[from] CodecError),

    /// Writing an artifact failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Output of a completed task.
///
/// `stored_data` is informational and kept with the run record. `update` is
/// merged into the context of every child node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub stored_data: ParameterContext,
    pub update: ParameterContext,
}

impl TaskResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational value.
    pub fn set_stored<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), ContextError> {
        self.stored_data.insert(key, value)
    }

    /// Record a value for the children's contexts.
    pub fn set_update<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), ContextError> {
        self.update.insert(key, value)
    }

    /// Builder form of [`set_update`](Self::set_update).
    pub fn with_update<T: Serialize>(mut self, key: &str, value: T) -> Result<Self, ContextError> {
        self.set_update(key, value)?;
        Ok(self)
    }

    /// Builder form of [`set_stored`](Self::set_stored).
    pub fn with_stored<T: Serialize>(mut self, key: &str, value: T) -> Result<Self, ContextError> {
        self.set_stored(key, value)?;
        Ok(self)
    }
}

/// Execution context passed to a task.
///
/// The context is owned by the invocation: `params` is a copy of the node's
/// parameter context, and lines written with [`write_line`](Self::write_line)
/// become the captured output of the run record.
pub struct TaskContext {
    /// The node being executed.
    pub node_id: NodeId,

    /// The node's parameter context (seed plus parent updates).
    pub params: ParameterContext,

    work_dir: Option<PathBuf>,
    output: Vec<String>,
}

impl TaskContext {
    /// Create a new task context.
    pub fn new(node_id: NodeId, params: ParameterContext) -> Self {
        Self {
            node_id,
            params,
            work_dir: None,
            output: Vec::new(),
        }
    }

    /// Attach the working directory created for this invocation.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Working directory of this invocation, if the executor created one.
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Resolve declared parameters from `params`.
    pub fn resolve(&self, specs: &[ParamSpec]) -> Result<ResolvedParams, ContextError> {
        self.params.resolve(specs)
    }

    /// Append a line to the captured output.
    pub fn write_line(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::trace!(node = %self.node_id, "{}", line);
        self.output.push(line);
    }

    /// Captured output so far, newline separated.
    pub fn captured_output(&self) -> String {
        self.output.join("\n")
    }
}

/// The core trait for defining workflow tasks.
///
/// # Example
///
/// ```ignore
/// use catflow::{ParamSpec, Task, TaskContext, TaskError, TaskResult};
/// use async_trait::async_trait;
///
/// struct Double;
///
/// #[async_trait]
/// impl Task for Double {
///     fn name(&self) -> &str {
///         "double"
///     }
///
///     fn parameters(&self) -> Vec<ParamSpec> {
///         vec![ParamSpec::optional("value", 1)]
///     }
///
///     async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
///         let params = ctx.resolve(&self.parameters())?;
///         let value: i64 = params.get("value")?;
///         Ok(TaskResult::new().with_update("doubled", value * 2)?)
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Name/version string of this task kind.
    fn name(&self) -> &str;

    /// Declared optional inputs and their defaults.
    fn parameters(&self) -> Vec<ParamSpec> {
        Vec::new()
    }

    /// Keys the update payload will carry, given the node's seed context.
    ///
    /// Used for collision checks at assembly time. An empty list means the
    /// keys are not known in advance.
    fn update_keys(&self, _seed: &ParameterContext) -> Vec<String> {
        Vec::new()
    }

    /// Execute the task.
    ///
    /// # Returns
    /// * `Ok(TaskResult)` - Task completed
    /// * `Err(TaskError)` - Task failed; dependents will not run
    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DoubleTask;

    #[async_trait]
    impl Task for DoubleTask {
        fn name(&self) -> &str {
            "double"
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::optional("value", 21)]
        }

        fn update_keys(&self, _seed: &ParameterContext) -> Vec<String> {
            vec!["doubled".to_string()]
        }

        async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
            let params = ctx.resolve(&self.parameters())?;
            let value: i64 = params.get("value")?;
            ctx.write_line(format!("doubling {}", value));
            Ok(TaskResult::new()
                .with_update("doubled", value * 2)?
                .with_stored("input", value)?)
        }
    }

    struct NeedsSlab;

    #[async_trait]
    impl Task for NeedsSlab {
        fn name(&self) -> &str {
            "needs_slab"
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("slab")]
        }

        async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
            ctx.resolve(&self.parameters())?;
            Ok(TaskResult::new())
        }
    }

    #[tokio::test]
    async fn test_task_uses_default_parameter() {
        let mut ctx = TaskContext::new(NodeId::new("n"), ParameterContext::new());

        let result = DoubleTask.execute(&mut ctx).await.unwrap();

        assert_eq!(result.update.get::<i64>("doubled").unwrap(), 42);
        assert_eq!(result.stored_data.get::<i64>("input").unwrap(), 21);
        assert_eq!(ctx.captured_output(), "doubling 21");
    }

    #[tokio::test]
    async fn test_task_reads_context_value() {
        let params = ParameterContext::new().with("value", 5);
        let mut ctx = TaskContext::new(NodeId::new("n"), params);

        let result = DoubleTask.execute(&mut ctx).await.unwrap();

        assert_eq!(result.update.get::<i64>("doubled").unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_required_parameter_fails() {
        let mut ctx = TaskContext::new(NodeId::new("n"), ParameterContext::new());

        let err = NeedsSlab.execute(&mut ctx).await.unwrap_err();

        assert!(matches!(
            err,
            TaskError::Context(ContextError::MissingParameter(_))
        ));
        assert!(err.to_string().contains("slab"));
    }

    #[test]
    fn test_default_trait_methods() {
        assert!(NeedsSlab.description().is_none());
        assert!(NeedsSlab.update_keys(&ParameterContext::new()).is_empty());
        assert_eq!(DoubleTask.update_keys(&ParameterContext::new()), vec!["doubled"]);
    }

    #[test]
    fn test_task_context_work_dir() {
        let ctx = TaskContext::new(NodeId::new("n"), ParameterContext::new());
        assert!(ctx.work_dir().is_none());

        let ctx = ctx.with_work_dir("/tmp/launch");
        assert_eq!(ctx.work_dir(), Some(Path::new("/tmp/launch")));
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::ExecutionFailed("bad geometry".to_string());
        assert_eq!(err.to_string(), "execution failed: bad geometry");
    }
}
