//! Run documents persisted in SQLite and read back from a new connection.

use catflow::testing::{FailingTask, WritingTask};
use catflow::{
    LaunchPad, LaunchPadError, NodeId, NodeState, ParameterContext, SqliteStorage, Storage,
    WorkflowBuilder, WorkflowState,
};
use std::sync::Arc;

use crate::common::{quadratic_registry, stored_states};

#[tokio::test]
async fn test_run_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("runs.db");
    let registry = quadratic_registry();

    let workflow = WorkflowBuilder::new("scan", "Scan")
        .add_node("scan", registry.create("lattice_scan").unwrap(), ParameterContext::new())
        .then(
            "report",
            Arc::new(WritingTask::new("report").with_update("done", true)),
            ParameterContext::new(),
        )
        .build()
        .unwrap();

    let run_id = {
        let storage = Arc::new(SqliteStorage::new(&db).await.unwrap());
        let pad = LaunchPad::new(storage.clone());
        let run_id = pad.submit(workflow).await.unwrap();
        assert!(pad.run(&run_id).await.unwrap().success);
        storage.close().await;
        run_id
    };

    let storage = Arc::new(SqliteStorage::new(&db).await.unwrap());
    let pad = LaunchPad::new(storage.clone());

    let stored = storage.get_workflow(&run_id).await.unwrap();
    assert_eq!(stored.state, WorkflowState::Completed);
    assert_eq!(stored.node_ids, vec![NodeId::new("scan"), NodeId::new("report")]);

    let scan = pad.fetch(&run_id, &NodeId::new("scan")).await.unwrap();
    assert_eq!(scan.update.get::<usize>("minimum_index").unwrap(), 8);

    let report = pad.node(&run_id, &NodeId::new("report")).await.unwrap();
    assert_eq!(report.state, NodeState::Completed);
    assert!(report.spec.contains("energies"));

    let records = pad.run_records(&run_id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].node_id, NodeId::new("scan"));
    assert!(records[0].ended_at <= records[1].started_at);

    // a finished run cannot be started again, even from a new launch pad
    assert!(matches!(
        pad.run(&run_id).await,
        Err(LaunchPadError::AlreadyRan { .. })
    ));
}

#[tokio::test]
async fn test_failed_and_skipped_states_are_persisted() {
    let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
    let pad = LaunchPad::new(storage.clone());
    let workflow = WorkflowBuilder::new("wf", "Failing chain")
        .add_node("bad", Arc::new(FailingTask::new("bad")), ParameterContext::new())
        .then("after", Arc::new(WritingTask::new("after")), ParameterContext::new())
        .build()
        .unwrap();

    let result = pad.launch(workflow).await.unwrap();

    let states = stored_states(storage.as_ref(), &result.run_id).await;
    assert_eq!(states["bad"], NodeState::Failed);
    assert_eq!(states["after"], NodeState::Skipped);
    assert_eq!(
        storage.get_workflow(&result.run_id).await.unwrap().state,
        WorkflowState::Failed
    );

    let records = storage.list_run_records(&result.run_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error.as_deref(), Some("execution failed: intentional test failure"));
}
