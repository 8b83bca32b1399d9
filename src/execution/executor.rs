//! Single-node execution.
//!
//! The `TaskExecutor` runs one node's task and turns the outcome into a
//! [`RunRecord`]. When a launch root is configured each invocation gets its
//! own working directory, `launch-<timestamp>-<node>`, optionally removed
//! afterwards. Failures are recorded, never retried.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::context::ParameterContext;
use crate::core::task::{Task, TaskContext};
use crate::core::types::{NodeId, RunId};
use crate::storage::{NodeState, RunRecord};

/// Executor for running one task invocation.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    launch_root: Option<PathBuf>,
    cleanup: bool,
}

/// Node id as a single path component under the launch root.
fn dir_component(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

impl TaskExecutor {
    /// Executor that runs tasks without a working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a working directory under `root` for every invocation.
    pub fn with_launch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.launch_root = Some(root.into());
        self
    }

    /// Remove working directories once the task returns.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn launch_root(&self) -> Option<&Path> {
        self.launch_root.as_deref()
    }

    async fn create_launch_dir(&self, node_id: &NodeId) -> std::io::Result<Option<PathBuf>> {
        let Some(root) = &self.launch_root else {
            return Ok(None);
        };
        let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S-%6f");
        let dir = root.join(format!("launch-{}-{}", stamp, dir_component(node_id.as_str())));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Some(dir))
    }

    /// Run `task` on a copy of the node's context.
    ///
    /// The returned record carries the task result on success and the error
    /// text on failure. `sequence` is the record's position in the run.
    pub async fn execute(
        &self,
        run_id: &RunId,
        sequence: u64,
        node_id: &NodeId,
        task: &dyn Task,
        params: ParameterContext,
    ) -> RunRecord {
        let span = info_span!("node", node = %node_id, task = task.name(), sequence);
        async move {
            let started_at = Utc::now();
            let start_time = Instant::now();

            let mut record = RunRecord {
                run_id: run_id.clone(),
                node_id: node_id.clone(),
                sequence,
                started_at,
                ended_at: started_at,
                duration: Default::default(),
                directory: None,
                state: NodeState::Failed,
                stdout: String::new(),
                error: None,
                result: None,
            };

            let directory = match self.create_launch_dir(node_id).await {
                Ok(dir) => dir,
                Err(e) => {
                    record.error = Some(format!("failed to create launch directory: {}", e));
                    record.ended_at = Utc::now();
                    record.duration = start_time.elapsed();
                    return record;
                }
            };

            let mut ctx = TaskContext::new(node_id.clone(), params);
            if let Some(dir) = &directory {
                ctx = ctx.with_work_dir(dir);
            }

            debug!("executing task");
            match task.execute(&mut ctx).await {
                Ok(result) => {
                    record.state = NodeState::Completed;
                    record.result = Some(result);
                }
                Err(err) => {
                    warn!(error = %err, "task failed");
                    record.error = Some(err.to_string());
                }
            }
            record.stdout = ctx.captured_output();
            record.ended_at = Utc::now();
            record.duration = start_time.elapsed();

            if self.cleanup
                && let Some(dir) = &directory
                && let Err(e) = tokio::fs::remove_dir_all(dir).await
            {
                warn!(dir = %dir.display(), error = %e, "failed to remove launch directory");
            }
            record.directory = directory;
            record
        }
        .instrument(span)
        .await
    }
}
