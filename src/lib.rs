//! catflow - workflows for catalysis simulations.
//!
//! Tasks (lattice scans, equation-of-state fits, slab relaxations,
//! adsorbate placement, nudged elastic band) are wired into a DAG whose
//! nodes hand their results to their children through a parameter context.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod launchpad;
pub mod sim;
pub mod storage;
pub mod tasks;
pub mod testing;

pub use config::{
    ConfigError, GlobalConfig, StorageConfig, WorkflowConfig, WorkflowConfigBuilder, YamlLoader,
    load_workflows_from_directory,
};
pub use core::context::{ContextError, MergePolicy, ParamSpec, ParameterContext, ResolvedParams};
pub use core::dag::{TaskNode, Workflow, WorkflowBuilder, WorkflowError};
pub use core::task::{Task, TaskContext, TaskError, TaskResult};
pub use core::types::{NodeId, RunId, WorkflowId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{ReadyOrder, TaskExecutor, WorkflowResult, WorkflowRunner};
pub use launchpad::{LaunchPad, LaunchPadError};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{
    InMemoryStorage, NodeState, RunRecord, Storage, StorageError, StoredNode, StoredWorkflow,
    WorkflowState,
};
pub use tasks::TaskRegistry;
