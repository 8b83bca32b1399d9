//! Testing utilities for users of the catflow library.
//!
//! This module provides helpers for testing workflows without running real
//! simulations:
//!
//! - [`RecordingTask`], [`WritingTask`], [`FailingTask`]: tasks with
//!   predictable behavior
//! - [`QuadraticLattice`], [`FlatPotential`], [`DoubleWell`]: analytic
//!   calculators
//! - [`TestHarness`]: runs workflows against in-memory storage

use async_trait::async_trait;
use nalgebra::{Matrix3, Vector3};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::context::ParameterContext;
use crate::core::dag::Workflow;
use crate::core::task::{Task, TaskContext, TaskError, TaskResult};
use crate::core::types::NodeId;
use crate::execution::{ReadyOrder, WorkflowResult, WorkflowRunner};
use crate::launchpad::{LaunchPad, LaunchPadError};
use crate::sim::{Atoms, Calculator, Evaluation, SimError};
use crate::storage::{InMemoryStorage, StoredNode};

/// Shared log of task invocations, in call order.
#[derive(Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<(NodeId, ParameterContext)>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, node_id: NodeId, params: ParameterContext) {
        self.entries.lock().await.push((node_id, params));
    }

    /// Node ids in the order their tasks ran.
    pub async fn order(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Context the node's task was invoked with.
    pub async fn context_of(&self, node_id: &NodeId) -> Option<ParameterContext> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, params)| params.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// A task that records its node id and context, then succeeds with an
/// empty result.
pub struct RecordingTask {
    name: String,
    log: Arc<ExecutionLog>,
}

impl RecordingTask {
    pub fn new(name: impl Into<String>, log: Arc<ExecutionLog>) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

#[async_trait]
impl Task for RecordingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        self.log.record(ctx.node_id.clone(), ctx.params.clone()).await;
        Ok(TaskResult::new())
    }
}

/// A task that returns a fixed update.
///
/// Its update keys are not declared, so collisions only show up when the
/// update is merged.
pub struct WritingTask {
    name: String,
    update: ParameterContext,
    stored: ParameterContext,
}

impl WritingTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            update: ParameterContext::new(),
            stored: ParameterContext::new(),
        }
    }

    /// Add a key to the update handed to children.
    pub fn with_update(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.update = self.update.with(key, value);
        self
    }

    /// Add a key to the informational data.
    pub fn with_stored(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.stored = self.stored.with(key, value);
        self
    }
}

#[async_trait]
impl Task for WritingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        for key in self.update.keys() {
            ctx.write_line(format!("writing {}", key));
        }
        Ok(TaskResult {
            stored_data: self.stored.clone(),
            update: self.update.clone(),
        })
    }
}

/// A task whose every invocation fails.
///
/// # Example
///
/// ```
/// use catflow::testing::FailingTask;
///
/// let task = FailingTask::with_error("relax", "did not converge");
/// ```
pub struct FailingTask {
    name: String,
    error_message: String,
}

impl FailingTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_error(name, "intentional test failure")
    }

    /// Create a task that fails with a custom error message.
    pub fn with_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_message: message.into(),
        }
    }
}

#[async_trait]
impl Task for FailingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        Err(TaskError::ExecutionFailed(self.error_message.clone()))
    }
}

/// E = (a - a0)² for a primitive fcc cell of lattice constant a.
///
/// Forces are zero.
#[derive(Debug, Clone, Copy)]
pub struct QuadraticLattice {
    a0: f64,
}

impl QuadraticLattice {
    pub fn new(a0: f64) -> Self {
        Self { a0 }
    }
}

impl Calculator for QuadraticLattice {
    fn name(&self) -> &str {
        "quadratic-lattice"
    }

    fn compute(&self, atoms: &Atoms) -> Result<Evaluation, SimError> {
        let a = (4.0 * atoms.volume()).cbrt();
        Ok(Evaluation {
            energy: (a - self.a0).powi(2),
            forces: vec![Vector3::zeros(); atoms.len()],
        })
    }
}

/// Constant energy per atom and no forces; relaxations converge at once.
#[derive(Debug, Clone, Copy)]
pub struct FlatPotential {
    per_atom: f64,
}

impl FlatPotential {
    pub fn new(per_atom: f64) -> Self {
        Self { per_atom }
    }
}

impl Calculator for FlatPotential {
    fn name(&self) -> &str {
        "flat"
    }

    fn compute(&self, atoms: &Atoms) -> Result<Evaluation, SimError> {
        Ok(Evaluation {
            energy: self.per_atom * atoms.len() as f64,
            forces: vec![Vector3::zeros(); atoms.len()],
        })
    }
}

/// One particle in E = (x² - 1)² + y², minima at x = ±1 and a saddle of
/// height 1 at the origin.
#[derive(Debug, Clone, Copy)]
pub struct DoubleWell;

impl DoubleWell {
    /// A single H atom at (x, y, 0) in a non-periodic 10 Å box.
    pub fn particle(x: f64, y: f64) -> Atoms {
        let mut atoms = Atoms::new(Matrix3::from_diagonal_element(10.0), [false; 3]);
        atoms.push("H", Vector3::new(x, y, 0.0), 0);
        atoms
    }
}

impl Calculator for DoubleWell {
    fn name(&self) -> &str {
        "double-well"
    }

    fn compute(&self, atoms: &Atoms) -> Result<Evaluation, SimError> {
        let p = atoms
            .positions()
            .first()
            .ok_or_else(|| SimError::InvalidInput("double well needs one atom".to_string()))?;
        let energy = (p.x * p.x - 1.0).powi(2) + p.y * p.y;
        let force = Vector3::new(-4.0 * p.x * (p.x * p.x - 1.0), -2.0 * p.y, 0.0);
        let mut forces = vec![Vector3::zeros(); atoms.len()];
        forces[0] = force;
        Ok(Evaluation { energy, forces })
    }
}

/// A test harness for running workflows with in-memory storage.
///
/// # Example
///
/// ```ignore
/// use catflow::testing::TestHarness;
///
/// let harness = TestHarness::new();
/// let result = harness.execute(workflow).await?;
/// assert!(result.workflow_result.success);
/// ```
pub struct TestHarness {
    launchpad: LaunchPad,
}

/// Result from TestHarness execution.
pub struct TestResult {
    /// The workflow execution result.
    pub workflow_result: WorkflowResult,
    /// Stored node documents after the run, in workflow order.
    pub nodes: Vec<StoredNode>,
}

impl TestResult {
    /// Final stored context of a node.
    pub fn context(&self, node_id: &str) -> Option<&ParameterContext> {
        self.nodes
            .iter()
            .find(|n| n.node_id.as_str() == node_id)
            .map(|n| &n.spec)
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_ready_order(ReadyOrder::default())
    }

    pub fn with_ready_order(order: ReadyOrder) -> Self {
        let runner = WorkflowRunner::default().with_ready_order(order);
        Self {
            launchpad: LaunchPad::with_runner(Arc::new(InMemoryStorage::new()), runner),
        }
    }

    pub fn launchpad(&self) -> &LaunchPad {
        &self.launchpad
    }

    /// Submit and run a workflow.
    pub async fn execute(&self, workflow: Workflow) -> Result<TestResult, LaunchPadError> {
        let workflow_result = self.launchpad.launch(workflow).await?;
        let nodes = self
            .launchpad
            .storage()
            .list_nodes(&workflow_result.run_id)
            .await?;
        Ok(TestResult {
            workflow_result,
            nodes,
        })
    }

    /// Execute and assert success.
    pub async fn execute_and_assert_success(&self, workflow: Workflow) -> TestResult {
        let result = self.execute(workflow).await.unwrap_or_else(|e| panic!("{}", e));
        assert!(
            result.workflow_result.success,
            "Expected workflow to succeed, but it failed. Failed nodes: {:?}",
            result.workflow_result.failed
        );
        result
    }

    /// Execute and assert failure.
    pub async fn execute_and_assert_failure(&self, workflow: Workflow) -> TestResult {
        let result = self.execute(workflow).await.unwrap_or_else(|e| panic!("{}", e));
        assert!(
            !result.workflow_result.success,
            "Expected workflow to fail, but it succeeded"
        );
        result
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
