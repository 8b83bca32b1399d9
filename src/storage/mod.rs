//! Document storage for submitted workflows, node state, and run records.
//!
//! The store holds one document per submitted workflow, one per node, and an
//! append-only list of run records. Backends are pluggable (in-memory,
//! SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::context::{MergePolicy, ParameterContext};
use crate::core::task::TaskResult;
use crate::core::types::{NodeId, RunId, WorkflowId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// State of a node within a submitted workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for its parents.
    Waiting,
    /// Currently executing.
    Running,
    /// Finished; its run record holds the result.
    Completed,
    /// The task raised an error.
    Failed,
    /// Never ran because an ancestor failed.
    Skipped,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Failed | NodeState::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Waiting => "waiting",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// State of a submitted workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Submitted, not yet run.
    Ready,
    Running,
    /// Every node completed.
    Completed,
    /// At least one node failed.
    Failed,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Ready => "ready",
            WorkflowState::Running => "running",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Stored document of a submitted workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub state: WorkflowState,
    pub merge_policy: MergePolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Node ids in insertion order.
    pub node_ids: Vec<NodeId>,
}

impl StoredWorkflow {
    pub fn new(run_id: RunId, workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            workflow_id,
            name: name.into(),
            state: WorkflowState::Ready,
            merge_policy: MergePolicy::default(),
            created_at: now,
            updated_at: now,
            node_ids: Vec::new(),
        }
    }

    pub fn set_state(&mut self, state: WorkflowState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Stored document of one node of a submitted workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub run_id: RunId,
    pub node_id: NodeId,
    /// Position of the node in its workflow.
    pub index: usize,
    /// Task kind.
    pub task: String,
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
    /// The node's parameter context: its seed, then parent updates as they
    /// are merged.
    pub spec: ParameterContext,
    pub state: NodeState,
    /// Error that failed the node before its task ran (merge conflicts).
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredNode {
    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// One execution of one node. Records are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub node_id: NodeId,
    /// Execution order within the run, starting at 1.
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    /// Working directory, when one was created.
    pub directory: Option<PathBuf>,
    pub state: NodeState,
    /// Captured task output.
    pub stdout: String,
    pub error: Option<String>,
    pub result: Option<TaskResult>,
}

impl RunRecord {
    pub fn is_success(&self) -> bool {
        self.state == NodeState::Completed
    }
}

/// Storage trait for persisting workflow documents.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Remove everything.
    async fn reset(&self) -> Result<(), StorageError>;

    // Workflow operations

    /// Save a newly submitted workflow.
    async fn save_workflow(&self, workflow: StoredWorkflow) -> Result<(), StorageError>;

    async fn get_workflow(&self, run_id: &RunId) -> Result<StoredWorkflow, StorageError>;

    /// All workflows, oldest first.
    async fn list_workflows(&self) -> Result<Vec<StoredWorkflow>, StorageError>;

    async fn update_workflow(&self, workflow: StoredWorkflow) -> Result<(), StorageError>;

    // Node operations

    async fn save_node(&self, node: StoredNode) -> Result<(), StorageError>;

    async fn get_node(&self, run_id: &RunId, node_id: &NodeId) -> Result<StoredNode, StorageError>;

    async fn update_node(&self, node: StoredNode) -> Result<(), StorageError>;

    /// Nodes of a run in workflow order.
    async fn list_nodes(&self, run_id: &RunId) -> Result<Vec<StoredNode>, StorageError>;

    // Run record operations

    /// Append a record; `(run_id, sequence)` must be unique.
    async fn append_run_record(&self, record: RunRecord) -> Result<(), StorageError>;

    /// Records of a run ordered by sequence.
    async fn list_run_records(&self, run_id: &RunId) -> Result<Vec<RunRecord>, StorageError>;

    /// Most recent record of a node, if it ever ran.
    async fn last_run(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
    ) -> Result<Option<RunRecord>, StorageError>;
}
