//! End-to-end workflow scenarios.
//!
//! Workflows are built in code, submitted to a launch pad, run, and their
//! results fetched back from storage.

use catflow::sim::codec;
use catflow::testing::{FailingTask, WritingTask};
use catflow::{
    LaunchPadError, MergePolicy, NodeId, NodeState, ParameterContext, ReadyOrder, TaskRegistry,
    WorkflowBuilder, WorkflowRunner,
};
use serde_json::json;
use std::sync::Arc;

use crate::common::{memory_launchpad, position, quadratic_registry, seed, stored_states};

#[tokio::test]
async fn test_single_lattice_scan_finds_deterministic_minimum() {
    let registry = quadratic_registry();
    let workflow = WorkflowBuilder::new("scan", "Lattice scan")
        .add_node("scan", registry.create("lattice_scan").unwrap(), ParameterContext::new())
        .build()
        .unwrap();
    let pad = memory_launchpad(WorkflowRunner::default());

    let run_id = pad.submit(workflow).await.unwrap();
    let result = pad.run(&run_id).await.unwrap();
    assert!(result.success);

    let scan = pad.fetch(&run_id, &NodeId::new("scan")).await.unwrap();
    assert_eq!(scan.update.get::<usize>("minimum_index").unwrap(), 8);
    assert!((scan.update.get::<f64>("lattice_constant").unwrap() - 3.85).abs() < 1e-9);
    assert!(scan.update.get::<f64>("minimum_energy").unwrap() < 1e-12);
    assert_eq!(scan.update.get::<Vec<f64>>("energies").unwrap().len(), 24);

    // absent parameters resolved to their declared defaults
    assert_eq!(scan.stored_data.get::<String>("symbol").unwrap(), "Pt");
    assert_eq!(scan.stored_data.get::<usize>("points").unwrap(), 24);

    let record = pad.last_run(&run_id, &NodeId::new("scan")).await.unwrap().unwrap();
    assert_eq!(record.stdout.lines().count(), 25);
}

#[tokio::test]
async fn test_scan_then_fit_chain() {
    let registry = TaskRegistry::new();
    let workflow = WorkflowBuilder::new("bulk", "Bulk Pt")
        .add_node("scan", registry.create("lattice_scan").unwrap(), ParameterContext::new())
        .then("fit", registry.create("eos_fit").unwrap(), ParameterContext::new())
        .build()
        .unwrap();
    let pad = memory_launchpad(WorkflowRunner::default());

    let result = pad.launch(workflow).await.unwrap();

    assert!(result.success, "failed nodes: {:?}", result.failed);
    assert_eq!(result.order, vec![NodeId::new("scan"), NodeId::new("fit")]);

    let fit_node = pad.node(&result.run_id, &NodeId::new("fit")).await.unwrap();
    assert!(fit_node.spec.contains("volumes"));
    assert!(fit_node.spec.contains("energies"));

    let scan = pad.fetch(&result.run_id, &NodeId::new("scan")).await.unwrap();
    let fit = pad.fetch(&result.run_id, &NodeId::new("fit")).await.unwrap();
    let scanned: f64 = scan.update.get("lattice_constant").unwrap();
    let fitted: f64 = fit.update.get("lattice_constant").unwrap();
    assert!((scanned - fitted).abs() < 0.02, "scan {} vs fit {}", scanned, fitted);
    assert!(fit.update.get::<f64>("bulk_modulus").unwrap() > 0.0);
}

/// root -> (left -> left_2), root -> right, (left_2, right) -> join
fn fan_in() -> catflow::Workflow {
    let write = |key: &str, value: i64| Arc::new(WritingTask::new("write").with_update(key, value));
    WorkflowBuilder::new("fan", "Fan in")
        .add_node("root", write("root", 0), ParameterContext::new())
        .add_node_with_deps("left", write("left", 1), ParameterContext::new(), &["root"])
        .add_node_with_deps("left_2", write("left_2", 2), ParameterContext::new(), &["left"])
        .add_node_with_deps("right", write("right", 3), ParameterContext::new(), &["root"])
        .add_node_with_deps("join", write("join", 4), ParameterContext::new(), &["left_2", "right"])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_fan_in_waits_for_both_branches() {
    for order in [ReadyOrder::Insertion, ReadyOrder::ReverseInsertion] {
        let pad = memory_launchpad(WorkflowRunner::default().with_ready_order(order));
        let result = pad.launch(fan_in()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.order.len(), 5);
        let join = position(&result.order, "join");
        assert_eq!(join, 4, "{:?}: join ran at {}", order, join);
        assert!(position(&result.order, "left") < position(&result.order, "left_2"));
        assert_eq!(position(&result.order, "root"), 0);

        // only direct parents contribute to a node's context
        let join_node = pad.node(&result.run_id, &NodeId::new("join")).await.unwrap();
        assert_eq!(join_node.spec.get::<i64>("left_2").unwrap(), 2);
        assert_eq!(join_node.spec.get::<i64>("right").unwrap(), 3);
        assert!(!join_node.spec.contains("root"));
    }
}

#[tokio::test]
async fn test_ready_order_changes_sibling_order() {
    let pad = memory_launchpad(WorkflowRunner::default());
    let forward = pad.launch(fan_in()).await.unwrap();
    let pad = memory_launchpad(WorkflowRunner::default().with_ready_order(ReadyOrder::ReverseInsertion));
    let reverse = pad.launch(fan_in()).await.unwrap();

    let ids = |order: &[NodeId]| order.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    assert_eq!(ids(&forward.order), vec!["root", "left", "left_2", "right", "join"]);
    assert_eq!(ids(&reverse.order), vec!["root", "right", "left", "left_2", "join"]);
}

fn collision(policy: MergePolicy) -> catflow::Workflow {
    WorkflowBuilder::new("collide", "Collision")
        .add_node(
            "first",
            Arc::new(WritingTask::new("write").with_update("energy", -1.0)),
            ParameterContext::new(),
        )
        .add_node(
            "second",
            Arc::new(WritingTask::new("write").with_update("energy", -2.0)),
            ParameterContext::new(),
        )
        .add_node_with_deps(
            "child",
            Arc::new(WritingTask::new("write")),
            seed(&[("label", json!("child"))]),
            &["first", "second"],
        )
        .merge_policy(policy)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_later_completed_parent_wins_collision() {
    let pad = memory_launchpad(WorkflowRunner::default());
    let result = pad.launch(collision(MergePolicy::LastWriterWins)).await.unwrap();
    assert!(result.success);
    let child = pad.node(&result.run_id, &NodeId::new("child")).await.unwrap();
    assert_eq!(child.spec.get::<f64>("energy").unwrap(), -2.0);
    assert_eq!(child.spec.get::<String>("label").unwrap(), "child");

    let pad = memory_launchpad(WorkflowRunner::default().with_ready_order(ReadyOrder::ReverseInsertion));
    let result = pad.launch(collision(MergePolicy::LastWriterWins)).await.unwrap();
    let child = pad.node(&result.run_id, &NodeId::new("child")).await.unwrap();
    assert_eq!(child.spec.get::<f64>("energy").unwrap(), -1.0);
}

#[tokio::test]
async fn test_reject_conflicts_fails_child() {
    let pad = memory_launchpad(WorkflowRunner::default());
    let result = pad.launch(collision(MergePolicy::RejectConflicts)).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failed, vec![NodeId::new("child")]);
    let child = pad.node(&result.run_id, &NodeId::new("child")).await.unwrap();
    assert_eq!(child.state, NodeState::Failed);
    assert!(child.error.unwrap().contains("energy"));
    // the child never ran
    assert!(pad.last_run(&result.run_id, &NodeId::new("child")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failure_skips_dependents_only() {
    let registry = quadratic_registry();
    let workflow = WorkflowBuilder::new("partial", "Partial failure")
        // no lattice_constant in its context
        .add_node("slab", registry.create("surface_relax").unwrap(), ParameterContext::new())
        .add_node_with_deps(
            "adsorbed",
            registry.create("adsorbate").unwrap(),
            ParameterContext::new(),
            &["slab"],
        )
        .add_node("scan", registry.create("lattice_scan").unwrap(), ParameterContext::new())
        .add_node_with_deps(
            "flaky",
            Arc::new(FailingTask::new("flaky")),
            ParameterContext::new(),
            &["scan"],
        )
        .build()
        .unwrap();
    let pad = memory_launchpad(WorkflowRunner::default());

    let result = pad.launch(workflow).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.failed, vec![NodeId::new("slab"), NodeId::new("flaky")]);
    assert_eq!(result.skipped, vec![NodeId::new("adsorbed")]);

    let states = stored_states(pad.storage().as_ref(), &result.run_id).await;
    assert_eq!(states["slab"], NodeState::Failed);
    assert_eq!(states["adsorbed"], NodeState::Skipped);
    assert_eq!(states["scan"], NodeState::Completed);
    assert_eq!(states["flaky"], NodeState::Failed);

    let slab_record = pad.last_run(&result.run_id, &NodeId::new("slab")).await.unwrap().unwrap();
    assert!(slab_record.error.unwrap().contains("lattice_constant"));
    assert!(matches!(
        pad.fetch(&result.run_id, &NodeId::new("adsorbed")).await,
        Err(LaunchPadError::NotCompleted { .. })
    ));
}

#[tokio::test]
async fn test_adsorption_path_fan_in() {
    let registry = TaskRegistry::new();
    let quick = |extra: &[(&str, serde_json::Value)]| {
        let mut pairs = vec![("max_steps", json!(40)), ("fmax", json!(0.1))];
        pairs.extend(extra.iter().cloned());
        seed(&pairs)
    };
    let workflow = WorkflowBuilder::new("path", "O hop on Pt(111)")
        .add_node(
            "slab",
            registry.create("surface_relax").unwrap(),
            quick(&[("lattice_constant", json!(3.92)), ("size", json!([1, 1, 3]))]),
        )
        .add_node_with_deps(
            "initial",
            registry.create("adsorbate").unwrap(),
            quick(&[("site", json!("fcc")), ("output", json!("initial"))]),
            &["slab"],
        )
        .add_node_with_deps(
            "final",
            registry.create("adsorbate").unwrap(),
            quick(&[("site", json!("hcp")), ("output", json!("final"))]),
            &["slab"],
        )
        .add_node_with_deps(
            "neb",
            registry.create("neb").unwrap(),
            quick(&[("images", json!(3)), ("climb", json!(true))]),
            &["initial", "final"],
        )
        .merge_policy(MergePolicy::RejectConflicts)
        .build()
        .unwrap();
    let pad = memory_launchpad(WorkflowRunner::default());

    let result = pad.launch(workflow).await.unwrap();

    assert!(result.success, "failed nodes: {:?}", result.failed);
    assert_eq!(position(&result.order, "neb"), 3);

    let neb = pad.fetch(&result.run_id, &NodeId::new("neb")).await.unwrap();
    let path = codec::decode(&neb.update.get::<String>("path").unwrap()).unwrap();
    assert_eq!(path.len(), 5);
    assert!(path.iter().all(|image| image.formula() == "OPt3"));
    let barrier: f64 = neb.update.get("barrier").unwrap();
    assert!(barrier.is_finite() && barrier >= 0.0);
    assert!(neb.update.get::<f64>("reaction_energy").unwrap().is_finite());
}
