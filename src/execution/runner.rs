//! Sequential workflow execution.
//!
//! The `WorkflowRunner` repeatedly picks one ready node, runs it, persists
//! its run record, and merges its update into the contexts of its children.
//! Nodes whose ancestors failed are marked skipped once nothing else can run.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::context::ParameterContext;
use crate::core::dag::Workflow;
use crate::core::types::{NodeId, RunId};
use crate::events::{Event, EventBus};
use crate::storage::{
    InMemoryStorage, NodeState, RunRecord, Storage, StorageError, StoredNode, StoredWorkflow,
    WorkflowState,
};

use super::executor::TaskExecutor;

/// Which ready node runs first when several are ready at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyOrder {
    /// Earliest added node first.
    #[default]
    Insertion,
    /// Latest added node first.
    ReverseInsertion,
}

impl ReadyOrder {
    fn pick<'a>(&self, ready: &'a [NodeId]) -> Option<&'a NodeId> {
        match self {
            ReadyOrder::Insertion => ready.first(),
            ReadyOrder::ReverseInsertion => ready.last(),
        }
    }
}

/// Result of running a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub run_id: RunId,
    /// Whether every node completed.
    pub success: bool,
    /// Total duration of the run.
    pub duration: Duration,
    /// Run records in execution order.
    pub records: Vec<RunRecord>,
    /// Final state of each node.
    pub states: HashMap<NodeId, NodeState>,
    /// Nodes in the order their tasks were invoked.
    pub order: Vec<NodeId>,
    /// Nodes that failed, in the order they failed.
    pub failed: Vec<NodeId>,
    /// Nodes that never ran because an ancestor failed.
    pub skipped: Vec<NodeId>,
}

impl WorkflowResult {
    pub fn completed_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s == NodeState::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.states.get(node_id).copied()
    }

    /// Run record of a node, if it ran.
    pub fn record(&self, node_id: &NodeId) -> Option<&RunRecord> {
        self.records.iter().rev().find(|r| &r.node_id == node_id)
    }
}

/// Documents persisted when a workflow is submitted: the workflow itself
/// and one node document per node, all in their initial state.
pub fn submission_documents(run_id: &RunId, workflow: &Workflow) -> (StoredWorkflow, Vec<StoredNode>) {
    let mut stored = StoredWorkflow::new(run_id.clone(), workflow.id().clone(), workflow.name());
    stored.merge_policy = workflow.merge_policy();
    stored.node_ids = workflow.node_ids();

    let nodes = workflow
        .nodes()
        .iter()
        .enumerate()
        .map(|(index, node)| StoredNode {
            run_id: run_id.clone(),
            node_id: node.id.clone(),
            index,
            task: node.task.name().to_string(),
            parents: workflow.parents(&node.id).map(<[NodeId]>::to_vec).unwrap_or_default(),
            children: workflow.children(&node.id),
            spec: node.seed.clone(),
            state: NodeState::Waiting,
            error: None,
            updated_at: stored.created_at,
        })
        .collect();
    (stored, nodes)
}

/// Runs workflows one node at a time.
pub struct WorkflowRunner {
    executor: TaskExecutor,
    ready_order: ReadyOrder,
    event_bus: Option<Arc<EventBus>>,
}

impl WorkflowRunner {
    pub fn new(executor: TaskExecutor) -> Self {
        Self {
            executor,
            ready_order: ReadyOrder::default(),
            event_bus: None,
        }
    }

    pub fn with_ready_order(mut self, order: ReadyOrder) -> Self {
        self.ready_order = order;
        self
    }

    /// Emit lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn ready_order(&self) -> ReadyOrder {
        self.ready_order
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }

    /// Submit `workflow` to a fresh in-memory store and run it.
    pub async fn execute(&self, workflow: &Workflow) -> Result<WorkflowResult, StorageError> {
        let storage = InMemoryStorage::new();
        let run_id = RunId::new();
        let (stored, nodes) = submission_documents(&run_id, workflow);
        storage.save_workflow(stored).await?;
        for node in nodes {
            storage.save_node(node).await?;
        }
        self.run(workflow, &run_id, &storage).await
    }

    /// Run a submitted workflow.
    ///
    /// Storage errors abort the run; task errors only fail their node.
    pub async fn run(
        &self,
        workflow: &Workflow,
        run_id: &RunId,
        storage: &dyn Storage,
    ) -> Result<WorkflowResult, StorageError> {
        let span = info_span!(
            "workflow_run",
            workflow = %workflow.id(),
            run = %run_id,
            node_count = workflow.len(),
        );
        self.run_inner(workflow, run_id, storage).instrument(span).await
    }

    async fn run_inner(
        &self,
        workflow: &Workflow,
        run_id: &RunId,
        storage: &dyn Storage,
    ) -> Result<WorkflowResult, StorageError> {
        let start_time = Instant::now();
        let policy = workflow.merge_policy();

        let mut stored_workflow = storage.get_workflow(run_id).await?;
        let mut stored_nodes: HashMap<NodeId, StoredNode> = storage
            .list_nodes(run_id)
            .await?
            .into_iter()
            .map(|n| (n.node_id.clone(), n))
            .collect();

        stored_workflow.set_state(WorkflowState::Running);
        storage.update_workflow(stored_workflow.clone()).await?;
        self.emit(Event::workflow_started(workflow.id().clone(), run_id.clone()))
            .await;
        debug!(order = ?self.ready_order, ?policy, "starting workflow run");

        let mut states: HashMap<NodeId, NodeState> = workflow
            .node_ids()
            .into_iter()
            .map(|id| (id, NodeState::Waiting))
            .collect();
        let mut contexts: HashMap<NodeId, ParameterContext> = workflow
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), n.seed.clone()))
            .collect();
        let mut completed: HashSet<NodeId> = HashSet::new();
        let mut records = Vec::new();
        let mut order = Vec::new();
        let mut failed = Vec::new();
        let mut sequence = 0u64;

        loop {
            let ready: Vec<NodeId> = workflow
                .ready_nodes(&completed)
                .into_iter()
                .filter(|id| states.get(id) == Some(&NodeState::Waiting))
                .collect();
            let Some(node_id) = self.ready_order.pick(&ready).cloned() else {
                break;
            };
            let Some(node) = workflow.node(&node_id) else {
                break;
            };

            sequence += 1;
            states.insert(node_id.clone(), NodeState::Running);
            self.persist_state(storage, &mut stored_nodes, &node_id, NodeState::Running, None)
                .await?;
            self.emit(Event::node_started(
                node_id.clone(),
                run_id.clone(),
                node.task.name(),
            ))
            .await;

            let params = contexts.get(&node_id).cloned().unwrap_or_default();
            let record = self
                .executor
                .execute(run_id, sequence, &node_id, node.task.as_ref(), params)
                .await;

            // the record is durable before the node counts as completed
            storage.append_run_record(record.clone()).await?;
            order.push(node_id.clone());

            match &record.result {
                Some(result) if record.is_success() => {
                    states.insert(node_id.clone(), NodeState::Completed);
                    completed.insert(node_id.clone());
                    self.persist_state(storage, &mut stored_nodes, &node_id, NodeState::Completed, None)
                        .await?;
                    self.emit(Event::node_completed(
                        node_id.clone(),
                        run_id.clone(),
                        record.duration,
                        result.update.keys(),
                    ))
                    .await;

                    for child in workflow.children(&node_id) {
                        if states.get(&child) != Some(&NodeState::Waiting) {
                            continue;
                        }
                        let Some(context) = contexts.get_mut(&child) else {
                            continue;
                        };
                        match context.merge(&result.update, policy, node_id.as_str()) {
                            Ok(overwritten) => {
                                if !overwritten.is_empty() {
                                    debug!(child = %child, parent = %node_id, keys = ?overwritten, "update overwrote existing keys");
                                }
                                if let Some(stored) = stored_nodes.get_mut(&child) {
                                    stored.spec = context.clone();
                                    storage.update_node(stored.clone()).await?;
                                }
                            }
                            Err(e) => {
                                warn!(child = %child, parent = %node_id, error = %e, "merge conflict");
                                states.insert(child.clone(), NodeState::Failed);
                                failed.push(child.clone());
                                self.persist_state(
                                    storage,
                                    &mut stored_nodes,
                                    &child,
                                    NodeState::Failed,
                                    Some(e.to_string()),
                                )
                                .await?;
                                self.emit(Event::node_failed(child, run_id.clone(), e.to_string()))
                                    .await;
                            }
                        }
                    }
                }
                _ => {
                    let error = record.error.clone().unwrap_or_default();
                    states.insert(node_id.clone(), NodeState::Failed);
                    failed.push(node_id.clone());
                    self.persist_state(storage, &mut stored_nodes, &node_id, NodeState::Failed, None)
                        .await?;
                    self.emit(Event::node_failed(node_id.clone(), run_id.clone(), error))
                        .await;
                }
            }
            records.push(record);
        }

        let mut skipped = Vec::new();
        for id in workflow.node_ids() {
            if states.get(&id) == Some(&NodeState::Waiting) {
                states.insert(id.clone(), NodeState::Skipped);
                self.persist_state(storage, &mut stored_nodes, &id, NodeState::Skipped, None)
                    .await?;
                self.emit(Event::node_skipped(id.clone(), run_id.clone())).await;
                skipped.push(id);
            }
        }

        let success = failed.is_empty() && skipped.is_empty();
        let duration = start_time.elapsed();
        stored_workflow.set_state(if success {
            WorkflowState::Completed
        } else {
            WorkflowState::Failed
        });
        storage.update_workflow(stored_workflow).await?;
        self.emit(Event::workflow_completed(
            workflow.id().clone(),
            run_id.clone(),
            success,
            duration,
        ))
        .await;
        info!(
            success,
            completed = completed.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "workflow run finished"
        );

        Ok(WorkflowResult {
            run_id: run_id.clone(),
            success,
            duration,
            records,
            states,
            order,
            failed,
            skipped,
        })
    }

    async fn persist_state(
        &self,
        storage: &dyn Storage,
        stored_nodes: &mut HashMap<NodeId, StoredNode>,
        node_id: &NodeId,
        state: NodeState,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        let stored = stored_nodes
            .get_mut(node_id)
            .ok_or_else(|| StorageError::NotFound(format!("node: {}", node_id)))?;
        stored.set_state(state);
        if error.is_some() {
            stored.error = error;
        }
        storage.update_node(stored.clone()).await
    }
}

impl Default for WorkflowRunner {
    fn default() -> Self {
        Self::new(TaskExecutor::new())
    }
}
