//! Workflow graphs of task nodes.
//!
//! A workflow is a directed acyclic graph: each node runs one task with its
//! own seed context, and runs only after all of its parents completed.
//! Nodes keep their insertion order, which is what every ordering query in
//! this module falls back on.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use super::context::{MergePolicy, ParameterContext};
use super::task::Task;
use super::types::{NodeId, WorkflowId};

/// Errors detected while assembling a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A cycle was detected in the graph.
    #[error("cycle detected involving node: {0}")]
    CycleDetected(NodeId),

    /// A dependency references a node that doesn't exist.
    #[error("missing dependency: node '{from}' depends on non-existent node '{to}'")]
    MissingDependency { from: NodeId, to: NodeId },

    /// Attempted to add a duplicate node.
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// The same parent was declared twice for a node.
    #[error("duplicate edge: '{child}' already depends on '{parent}'")]
    DuplicateEdge { child: NodeId, parent: NodeId },

    /// Node not found in the workflow.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Workflow has no nodes.
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    /// Two writers would set the same key in a node's context.
    #[error("key collision on '{key}' in the context of node '{node}'")]
    KeyCollision { node: NodeId, key: String },
}

/// A node in the workflow.
#[derive(Clone)]
pub struct TaskNode {
    /// The node ID.
    pub id: NodeId,

    /// The task implementation.
    pub task: Arc<dyn Task>,

    /// Literal parameters supplied by the caller.
    pub seed: ParameterContext,
}

/// A directed acyclic graph of task nodes.
#[derive(Clone)]
pub struct Workflow {
    id: WorkflowId,
    name: String,

    /// Nodes in insertion order.
    nodes: Vec<TaskNode>,
    index: HashMap<NodeId, usize>,

    /// Edges: node -> the nodes it depends on, in declaration order.
    parents: HashMap<NodeId, Vec<NodeId>>,

    merge_policy: MergePolicy,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "nodes",
                &self
                    .nodes
                    .iter()
                    .map(|n| (&n.id, n.task.name()))
                    .collect::<Vec<_>>(),
            )
            .field("parents", &self.parents)
            .field("merge_policy", &self.merge_policy)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Create a new empty workflow.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(id),
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            parents: HashMap::new(),
            merge_policy: MergePolicy::default(),
        }
    }

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Policy used when parent updates are merged into child contexts.
    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn set_merge_policy(&mut self, policy: MergePolicy) {
        self.merge_policy = policy;
    }

    /// Add a node with no dependencies.
    pub fn add_node(
        &mut self,
        id: impl Into<NodeId>,
        task: Arc<dyn Task>,
        seed: ParameterContext,
    ) -> Result<(), WorkflowError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(WorkflowError::DuplicateNode(id));
        }

        self.index.insert(id.clone(), self.nodes.len());
        self.parents.insert(id.clone(), Vec::new());
        self.nodes.push(TaskNode { id, task, seed });
        Ok(())
    }

    /// Add a dependency: `child` runs only after `parent` completed.
    pub fn add_dependency(&mut self, child: &NodeId, parent: &NodeId) -> Result<(), WorkflowError> {
        if !self.index.contains_key(child) {
            return Err(WorkflowError::NodeNotFound(child.clone()));
        }
        if !self.index.contains_key(parent) {
            return Err(WorkflowError::MissingDependency {
                from: child.clone(),
                to: parent.clone(),
            });
        }

        let deps = self.parents.entry(child.clone()).or_default();
        if deps.contains(parent) {
            return Err(WorkflowError::DuplicateEdge {
                child: child.clone(),
                parent: parent.clone(),
            });
        }
        deps.push(parent.clone());
        Ok(())
    }

    /// Get a node by ID.
    pub fn node(&self, id: &NodeId) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Node IDs in insertion order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Position of a node in insertion order.
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Parents of a node, in declaration order.
    pub fn parents(&self, id: &NodeId) -> Option<&[NodeId]> {
        self.parents.get(id).map(|v| v.as_slice())
    }

    /// Nodes that depend on the given node, in insertion order.
    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.parents.get(&n.id).is_some_and(|deps| deps.contains(id)))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Nodes without parents, in insertion order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.parents.get(&n.id).is_none_or(|deps| deps.is_empty()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Nodes not yet completed whose parents all are, in insertion order.
    pub fn ready_nodes(&self, completed: &HashSet<NodeId>) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| !completed.contains(&n.id))
            .filter(|n| {
                self.parents
                    .get(&n.id)
                    .map(|deps| deps.iter().all(|dep| completed.contains(dep)))
                    .unwrap_or(true)
            })
            .map(|n| n.id.clone())
            .collect()
    }

    /// Validate acyclicity and return nodes in topological order.
    ///
    /// Among nodes whose parents are all placed, the earliest inserted goes
    /// first, so the order is deterministic.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, WorkflowError> {
        // Kahn's algorithm over insertion positions
        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| self.parents.get(&n.id).map_or(0, |deps| deps.len()))
            .collect();
        let children: Vec<Vec<usize>> = self
            .nodes
            .iter()
            .map(|n| {
                self.children(&n.id)
                    .iter()
                    .filter_map(|c| self.position(c))
                    .collect()
            })
            .collect();

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(i) = queue.pop_front() {
            result.push(self.nodes[i].id.clone());
            for &child in &children[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if result.len() != self.nodes.len() {
            let cycle_node = in_degree
                .iter()
                .position(|&d| d > 0)
                .map(|i| self.nodes[i].id.clone())
                .unwrap_or_else(|| self.nodes[0].id.clone());
            return Err(WorkflowError::CycleDetected(cycle_node));
        }

        Ok(result)
    }

    /// Validate the workflow structure.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }

        for (from, deps) in &self.parents {
            for to in deps {
                if !self.index.contains_key(to) {
                    return Err(WorkflowError::MissingDependency {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        self.topological_sort()?;

        if self.merge_policy == MergePolicy::RejectConflicts {
            self.check_key_collisions()?;
        }

        Ok(())
    }

    /// Check that no two writers declare the same key for any node's context.
    ///
    /// Writers are the node's own seed and each parent's declared update keys.
    fn check_key_collisions(&self) -> Result<(), WorkflowError> {
        for node in &self.nodes {
            let mut seen: HashSet<String> = node.seed.keys().into_iter().collect();
            for parent_id in self.parents(&node.id).unwrap_or(&[]) {
                let Some(parent) = self.node(parent_id) else {
                    continue;
                };
                for key in parent.task.update_keys(&parent.seed) {
                    if !seen.insert(key.clone()) {
                        return Err(WorkflowError::KeyCollision {
                            node: node.id.clone(),
                            key,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builder for constructing workflows fluently.
///
/// The first assembly error is kept and returned from [`build`](Self::build).
pub struct WorkflowBuilder {
    workflow: Workflow,
    last: Option<NodeId>,
    error: Option<WorkflowError>,
}

impl WorkflowBuilder {
    /// Create a new workflow builder.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow::new(id, name),
            last: None,
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), WorkflowError>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// Add a node without dependencies.
    pub fn add_node(mut self, id: &str, task: Arc<dyn Task>, seed: ParameterContext) -> Self {
        let result = self.workflow.add_node(id, task, seed);
        self.record(result);
        self.last = Some(NodeId::new(id));
        self
    }

    /// Add a node that depends on the given parents.
    pub fn add_node_with_deps(
        mut self,
        id: &str,
        task: Arc<dyn Task>,
        seed: ParameterContext,
        depends_on: &[&str],
    ) -> Self {
        self = self.add_node(id, task, seed);
        let node_id = NodeId::new(id);
        for dep in depends_on {
            let result = self.workflow.add_dependency(&node_id, &NodeId::new(*dep));
            self.record(result);
        }
        self
    }

    /// Add a node that depends on the previously added node.
    ///
    /// Calling only `then` yields a linear chain in call order.
    pub fn then(self, id: &str, task: Arc<dyn Task>, seed: ParameterContext) -> Self {
        match self.last.clone() {
            Some(prev) => self.add_node_with_deps(id, task, seed, &[prev.as_str()]),
            None => self.add_node(id, task, seed),
        }
    }

    /// Add a dependency between existing nodes.
    pub fn add_dependency(mut self, child: &str, parent: &str) -> Self {
        let result = self
            .workflow
            .add_dependency(&NodeId::new(child), &NodeId::new(parent));
        self.record(result);
        self
    }

    /// Set the merge policy for parent updates.
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.workflow.set_merge_policy(policy);
        self
    }

    /// Build the workflow, validating it in the process.
    pub fn build(self) -> Result<Workflow, WorkflowError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.workflow.validate()?;
        Ok(self.workflow)
    }
}
