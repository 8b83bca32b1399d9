//! Workflows loaded from YAML and run with global settings.

use catflow::{
    ConfigError, GlobalConfig, InMemoryStorage, LaunchPad, NodeId, WorkflowConfigBuilder,
    YamlLoader,
};
use std::path::Path;
use std::sync::Arc;

use crate::common::{flat_registry, memory_launchpad, quadratic_registry};

const SLAB_WORKFLOW: &str = r#"
id: pt111
name: Pt(111) slab
description: Lattice constant from a scan, then a relaxed slab
nodes:
  - id: scan
    task: lattice_scan
    params:
      span: [3.80, 3.90]
      step: 0.01
  - id: slab
    task: surface_relax
    params:
      size: [1, 1, 3]
      vacuum: 8.0
"#;

fn global_config(launch_dir: &Path, cleanup: bool) -> GlobalConfig {
    let yaml = format!(
        "launch_dir: {}\ncleanup_launch_dirs: {}\nready_order: insertion\n",
        launch_dir.display(),
        cleanup
    );
    YamlLoader::parse_global_config(&yaml).unwrap()
}

#[tokio::test]
async fn test_yaml_workflow_runs_in_launch_directories() {
    let root = tempfile::tempdir().unwrap();
    let file = root.path().join("pt111.yaml");
    std::fs::write(&file, SLAB_WORKFLOW).unwrap();
    let launch_dir = root.path().join("launches");

    let config = YamlLoader::load_workflow(&file).unwrap();
    let workflow = WorkflowConfigBuilder::build(config, &quadratic_registry()).unwrap();
    let global = global_config(&launch_dir, false);
    let pad = memory_launchpad(global.runner());

    let result = pad.launch(workflow).await.unwrap();
    assert!(result.success, "failed nodes: {:?}", result.failed);

    let slab = pad.node(&result.run_id, &NodeId::new("slab")).await.unwrap();
    assert!((slab.spec.get::<f64>("lattice_constant").unwrap() - 3.85).abs() < 1e-9);
    assert_eq!(slab.spec.get::<Vec<usize>>("size").unwrap(), vec![1, 1, 3]);

    let scan_record = result.record(&NodeId::new("scan")).unwrap();
    let dir = scan_record.directory.as_ref().unwrap();
    assert!(dir.starts_with(&launch_dir));
    let csv = std::fs::read_to_string(dir.join("lattice_scan.csv")).unwrap();
    assert_eq!(csv.lines().count(), 12);

    let slab_record = result.record(&NodeId::new("slab")).unwrap();
    let slab_dir = slab_record.directory.as_ref().unwrap();
    assert!(slab_dir.to_string_lossy().ends_with("-slab"));
    assert_eq!(std::fs::read_dir(&launch_dir).unwrap().count(), 2);
}

#[tokio::test]
async fn test_cleanup_removes_launch_directories() {
    let root = tempfile::tempdir().unwrap();
    let config = YamlLoader::parse_workflow(SLAB_WORKFLOW).unwrap();
    let workflow = WorkflowConfigBuilder::build(config, &flat_registry(-1.0)).unwrap();
    let global = global_config(root.path(), true);
    let pad = LaunchPad::with_runner(Arc::new(InMemoryStorage::new()), global.runner());

    let result = pad.launch(workflow).await.unwrap();

    assert!(result.success);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    let slab = pad.fetch(&result.run_id, &NodeId::new("slab")).await.unwrap();
    assert_eq!(slab.update.get::<f64>("slab_energy").unwrap(), -3.0);
}

#[test]
fn test_unknown_task_in_yaml() {
    let yaml = r#"
id: bad
name: Bad
nodes:
  - id: dft
    task: vasp_relax
"#;
    let config = YamlLoader::parse_workflow(yaml).unwrap();
    let err = WorkflowConfigBuilder::build(config, &quadratic_registry()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownTask { ref node, .. } if node == "dft"));
}
