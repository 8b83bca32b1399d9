//! Common test utilities shared across integration tests.

use catflow::testing::{FlatPotential, QuadraticLattice};
use catflow::{
    LaunchPad, NodeId, NodeState, ParameterContext, RunId, Storage, TaskRegistry, WorkflowRunner,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry whose tasks evaluate E = (a - 3.85)² for bulk cells.
pub fn quadratic_registry() -> TaskRegistry {
    TaskRegistry::new().with_calculator(Arc::new(QuadraticLattice::new(3.85)))
}

/// Registry whose tasks see a flat energy surface of `per_atom` eV/atom.
pub fn flat_registry(per_atom: f64) -> TaskRegistry {
    TaskRegistry::new().with_calculator(Arc::new(FlatPotential::new(per_atom)))
}

/// Launch pad over a fresh in-memory store.
pub fn memory_launchpad(runner: WorkflowRunner) -> LaunchPad {
    LaunchPad::with_runner(Arc::new(catflow::InMemoryStorage::new()), runner)
}

/// Seed context from key/value pairs.
pub fn seed(pairs: &[(&str, serde_json::Value)]) -> ParameterContext {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Stored state of every node of a run, keyed by node id.
pub async fn stored_states(storage: &dyn Storage, run_id: &RunId) -> HashMap<String, NodeState> {
    storage
        .list_nodes(run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|n| (n.node_id.to_string(), n.state))
        .collect()
}

/// Position of `id` in an execution order.
pub fn position(order: &[NodeId], id: &str) -> usize {
    order
        .iter()
        .position(|n| n.as_str() == id)
        .unwrap_or_else(|| panic!("node '{}' never ran", id))
}
