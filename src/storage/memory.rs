//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for tests and one-shot runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{RunRecord, Storage, StorageError, StoredNode, StoredWorkflow};
use crate::core::types::{NodeId, RunId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    workflows: RwLock<HashMap<RunId, StoredWorkflow>>,
    nodes: RwLock<HashMap<(RunId, NodeId), StoredNode>>,
    records: RwLock<HashMap<RunId, Vec<RunRecord>>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn reset(&self) -> Result<(), StorageError> {
        self.workflows
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        self.nodes
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    async fn save_workflow(&self, workflow: StoredWorkflow) -> Result<(), StorageError> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if workflows.contains_key(&workflow.run_id) {
            return Err(StorageError::DuplicateKey(format!(
                "workflow: {}",
                workflow.run_id
            )));
        }
        workflows.insert(workflow.run_id.clone(), workflow);
        Ok(())
    }

    async fn get_workflow(&self, run_id: &RunId) -> Result<StoredWorkflow, StorageError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        workflows
            .get(run_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("workflow: {}", run_id)))
    }

    async fn list_workflows(&self) -> Result<Vec<StoredWorkflow>, StorageError> {
        let workflows = self
            .workflows
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = workflows.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn update_workflow(&self, workflow: StoredWorkflow) -> Result<(), StorageError> {
        let mut workflows = self
            .workflows
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if !workflows.contains_key(&workflow.run_id) {
            return Err(StorageError::NotFound(format!(
                "workflow: {}",
                workflow.run_id
            )));
        }
        workflows.insert(workflow.run_id.clone(), workflow);
        Ok(())
    }

    async fn save_node(&self, node: StoredNode) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write().map_err(|_| StorageError::LockPoisoned)?;
        let key = (node.run_id.clone(), node.node_id.clone());
        if nodes.contains_key(&key) {
            return Err(StorageError::DuplicateKey(format!(
                "node: {}/{}",
                node.run_id, node.node_id
            )));
        }
        nodes.insert(key, node);
        Ok(())
    }

    async fn get_node(&self, run_id: &RunId, node_id: &NodeId) -> Result<StoredNode, StorageError> {
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        nodes
            .get(&(run_id.clone(), node_id.clone()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("node: {}/{}", run_id, node_id)))
    }

    async fn update_node(&self, node: StoredNode) -> Result<(), StorageError> {
        let mut nodes = self.nodes.write().map_err(|_| StorageError::LockPoisoned)?;
        let key = (node.run_id.clone(), node.node_id.clone());
        if !nodes.contains_key(&key) {
            return Err(StorageError::NotFound(format!(
                "node: {}/{}",
                node.run_id, node.node_id
            )));
        }
        nodes.insert(key, node);
        Ok(())
    }

    async fn list_nodes(&self, run_id: &RunId) -> Result<Vec<StoredNode>, StorageError> {
        let nodes = self.nodes.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = nodes
            .values()
            .filter(|n| &n.run_id == run_id)
            .cloned()
            .collect();
        result.sort_by_key(|n| n.index);
        Ok(result)
    }

    async fn append_run_record(&self, record: RunRecord) -> Result<(), StorageError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        let run = records.entry(record.run_id.clone()).or_default();
        if run.iter().any(|r| r.sequence == record.sequence) {
            return Err(StorageError::DuplicateKey(format!(
                "run record: {}/{}",
                record.run_id, record.sequence
            )));
        }
        run.push(record);
        run.sort_by_key(|r| r.sequence);
        Ok(())
    }

    async fn list_run_records(&self, run_id: &RunId) -> Result<Vec<RunRecord>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.get(run_id).cloned().unwrap_or_default())
    }

    async fn last_run(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
    ) -> Result<Option<RunRecord>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(records
            .get(run_id)
            .and_then(|run| run.iter().rev().find(|r| &r.node_id == node_id))
            .cloned())
    }
}
