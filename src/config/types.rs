//! Configuration type definitions.
//!
//! Global settings (`catflow.yaml`) and workflow definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::context::MergePolicy;
use crate::execution::{ReadyOrder, TaskExecutor, WorkflowRunner};

/// Global configuration (catflow.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Storage configuration.
    pub storage: Option<StorageConfig>,
    /// Root under which each node invocation gets its own directory.
    pub launch_dir: Option<PathBuf>,
    /// Remove invocation directories when the task returns.
    pub cleanup_launch_dirs: bool,
    /// Tie-break among ready nodes.
    pub ready_order: ReadyOrder,
    /// Merge policy for workflows that do not set one.
    pub merge_policy: Option<MergePolicy>,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_filter: Option<String>,
}

impl GlobalConfig {
    /// Executor honoring the launch directory settings.
    pub fn executor(&self) -> TaskExecutor {
        let executor = TaskExecutor::new().with_cleanup(self.cleanup_launch_dirs);
        match &self.launch_dir {
            Some(dir) => executor.with_launch_root(dir),
            None => executor,
        }
    }

    /// Runner honoring the executor and ready order settings.
    pub fn runner(&self) -> WorkflowRunner {
        WorkflowRunner::new(self.executor()).with_ready_order(self.ready_order)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Workflow definition from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Collision policy for parent updates.
    pub merge_policy: Option<MergePolicy>,
    /// Nodes in insertion order.
    pub nodes: Vec<NodeConfig>,
}

impl WorkflowConfig {
    /// True when no node declares dependencies, in which case nodes are
    /// chained in file order.
    pub fn is_implicit_chain(&self) -> bool {
        self.nodes.iter().all(|n| n.depends_on.is_empty())
    }
}

/// One node of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier (unique within the workflow).
    pub id: String,
    /// Registered task name.
    pub task: String,
    /// Seed parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_yaml::Value>,
    /// Parent nodes.
    #[serde(default)]
    pub depends_on: Vec<String>,
}
