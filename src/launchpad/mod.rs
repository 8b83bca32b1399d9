//! Submission boundary.
//!
//! A [`LaunchPad`] accepts workflows, runs them, and answers queries about
//! their persisted state. Callers interact with it in three steps:
//! [`submit`](LaunchPad::submit), [`run`](LaunchPad::run), and
//! [`fetch`](LaunchPad::fetch).

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::dag::{Workflow, WorkflowError};
use crate::core::task::TaskResult;
use crate::core::types::{NodeId, RunId};
use crate::execution::{WorkflowResult, WorkflowRunner, submission_documents};
use crate::storage::{RunRecord, Storage, StorageError, StoredNode, StoredWorkflow, WorkflowState};

/// Errors from the submission boundary.
#[derive(Debug, Error)]
pub enum LaunchPadError {
    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    #[error("run {run_id} already started (state: {state})")]
    AlreadyRan { run_id: RunId, state: WorkflowState },

    #[error("node '{node_id}' of run {run_id} has no completed run")]
    NotCompleted { run_id: RunId, node_id: NodeId },

    #[error("invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Front door for submitting and running workflows against a store.
pub struct LaunchPad {
    storage: Arc<dyn Storage>,
    runner: WorkflowRunner,
    /// Executable workflows by run; the slot is emptied when the run starts.
    pending: Mutex<HashMap<RunId, Option<Workflow>>>,
}

impl LaunchPad {
    /// Launch pad with a default runner.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_runner(storage, WorkflowRunner::default())
    }

    pub fn with_runner(storage: Arc<dyn Storage>, runner: WorkflowRunner) -> Self {
        Self {
            storage,
            runner,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn runner(&self) -> &WorkflowRunner {
        &self.runner
    }

    /// Persist `workflow` and its nodes in their initial state.
    pub async fn submit(&self, workflow: Workflow) -> Result<RunId, LaunchPadError> {
        workflow.validate()?;

        let run_id = RunId::new();
        let (stored, nodes) = submission_documents(&run_id, &workflow);
        self.storage.save_workflow(stored).await?;
        for node in nodes {
            self.storage.save_node(node).await?;
        }
        info!(workflow = %workflow.id(), run = %run_id, nodes = workflow.len(), "submitted workflow");

        self.pending.lock().await.insert(run_id.clone(), Some(workflow));
        Ok(run_id)
    }

    /// Run a submitted workflow to the end.
    ///
    /// Each submission runs at most once.
    pub async fn run(&self, run_id: &RunId) -> Result<WorkflowResult, LaunchPadError> {
        let stored = match self.storage.get_workflow(run_id).await {
            Ok(stored) => stored,
            Err(StorageError::NotFound(_)) => return Err(LaunchPadError::UnknownRun(run_id.clone())),
            Err(e) => return Err(e.into()),
        };
        if stored.state != WorkflowState::Ready {
            return Err(LaunchPadError::AlreadyRan {
                run_id: run_id.clone(),
                state: stored.state,
            });
        }
        let taken = match self.pending.lock().await.get_mut(run_id) {
            Some(slot) => slot.take(),
            None => return Err(LaunchPadError::UnknownRun(run_id.clone())),
        };
        let Some(workflow) = taken else {
            // another caller started it after our state check
            let state = match self.storage.get_workflow(run_id).await?.state {
                WorkflowState::Ready => WorkflowState::Running,
                state => state,
            };
            return Err(LaunchPadError::AlreadyRan {
                run_id: run_id.clone(),
                state,
            });
        };

        Ok(self.runner.run(&workflow, run_id, self.storage.as_ref()).await?)
    }

    /// Submit and run in one call.
    pub async fn launch(&self, workflow: Workflow) -> Result<WorkflowResult, LaunchPadError> {
        let run_id = self.submit(workflow).await?;
        self.run(&run_id).await
    }

    /// Result of the node's most recent successful run.
    pub async fn fetch(&self, run_id: &RunId, node_id: &NodeId) -> Result<TaskResult, LaunchPadError> {
        self.last_run(run_id, node_id)
            .await?
            .filter(RunRecord::is_success)
            .and_then(|record| record.result)
            .ok_or_else(|| LaunchPadError::NotCompleted {
                run_id: run_id.clone(),
                node_id: node_id.clone(),
            })
    }

    /// Stored document of one node.
    pub async fn node(&self, run_id: &RunId, node_id: &NodeId) -> Result<StoredNode, LaunchPadError> {
        Ok(self.storage.get_node(run_id, node_id).await?)
    }

    pub async fn last_run(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
    ) -> Result<Option<RunRecord>, LaunchPadError> {
        Ok(self.storage.last_run(run_id, node_id).await?)
    }

    pub async fn run_records(&self, run_id: &RunId) -> Result<Vec<RunRecord>, LaunchPadError> {
        Ok(self.storage.list_run_records(run_id).await?)
    }

    pub async fn workflows(&self) -> Result<Vec<StoredWorkflow>, LaunchPadError> {
        Ok(self.storage.list_workflows().await?)
    }

    /// Drop every stored document and pending workflow.
    pub async fn reset(&self) -> Result<(), LaunchPadError> {
        self.storage.reset().await?;
        self.pending.lock().await.clear();
        Ok(())
    }
}
