//! Workflow builder from YAML configuration.
//!
//! Converts a [`WorkflowConfig`] into an executable [`Workflow`], creating
//! each node's task from a [`TaskRegistry`].

use std::path::Path;

use crate::core::context::ParameterContext;
use crate::core::dag::{Workflow, WorkflowBuilder};
use crate::tasks::TaskRegistry;

use super::error::ConfigError;
use super::types::{NodeConfig, WorkflowConfig};
use super::yaml::YamlLoader;

/// Builder for creating workflows from YAML configuration.
pub struct WorkflowConfigBuilder;

impl WorkflowConfigBuilder {
    /// Build a workflow from its definition.
    ///
    /// When no node declares `depends_on`, nodes are chained in file order.
    pub fn build(config: WorkflowConfig, registry: &TaskRegistry) -> Result<Workflow, ConfigError> {
        let chain = config.is_implicit_chain();
        let mut builder = WorkflowBuilder::new(&config.id, &config.name)
            .merge_policy(config.merge_policy.unwrap_or_default());

        for node in &config.nodes {
            let task = registry
                .create(&node.task)
                .ok_or_else(|| ConfigError::UnknownTask {
                    node: node.id.clone(),
                    task: node.task.clone(),
                })?;
            let seed = Self::seed(node)?;

            builder = if chain {
                builder.then(&node.id, task, seed)
            } else {
                let deps: Vec<&str> = node.depends_on.iter().map(|s| s.as_str()).collect();
                builder.add_node_with_deps(&node.id, task, seed, &deps)
            };
        }

        Ok(builder.build()?)
    }

    /// Convert YAML parameters into the node's seed context.
    fn seed(node: &NodeConfig) -> Result<ParameterContext, ConfigError> {
        let mut seed = ParameterContext::new();
        for (key, value) in &node.params {
            let json_value = serde_json::to_value(value).map_err(|e| {
                ConfigError::InvalidConfig(format!("node '{}' parameter '{}': {}", node.id, key, e))
            })?;
            seed.insert_raw(key.clone(), json_value);
        }
        Ok(seed)
    }
}

/// Load and build every workflow definition in a directory, sorted by file
/// name.
pub fn load_workflows_from_directory(
    dir: impl AsRef<Path>,
    registry: &TaskRegistry,
) -> Result<Vec<Workflow>, ConfigError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(ConfigError::InvalidConfig(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let read_error = |source| ConfigError::DirReadError {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if let Some(ext) = path.extension()
            && (ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| WorkflowConfigBuilder::build(YamlLoader::load_workflow(&path)?, registry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::MergePolicy;
    use crate::core::dag::WorkflowError;
    use crate::core::types::NodeId;

    #[test]
    fn test_build_implicit_chain() {
        let yaml = r#"
id: bulk
name: Bulk
nodes:
  - id: scan
    task: lattice_scan
    params:
      span: [3.8, 4.0]
  - id: fit
    task: eos_fit
  - id: slab
    task: surface_relax
"#;
        let config = YamlLoader::parse_workflow(yaml).unwrap();
        let workflow = WorkflowConfigBuilder::build(config, &TaskRegistry::new()).unwrap();

        assert_eq!(workflow.len(), 3);
        assert_eq!(workflow.parents(&NodeId::new("fit")).unwrap(), &[NodeId::new("scan")]);
        assert_eq!(workflow.parents(&NodeId::new("slab")).unwrap(), &[NodeId::new("fit")]);

        let scan = workflow.node(&NodeId::new("scan")).unwrap();
        assert_eq!(scan.task.name(), "lattice_scan");
        assert_eq!(scan.seed.get::<Vec<f64>>("span").unwrap(), vec![3.8, 4.0]);
    }

    #[test]
    fn test_build_fan_in() {
        let yaml = r#"
id: fan
name: Fan
nodes:
  - id: slab
    task: surface_relax
    params: { lattice_constant: 3.92 }
  - id: initial
    task: adsorbate
    params: { site: fcc, output: initial }
    depends_on: [slab]
  - id: final
    task: adsorbate
    params: { site: hcp, output: final }
    depends_on: [slab]
  - id: neb
    task: neb
    depends_on: [initial, final]
"#;
        let config = YamlLoader::parse_workflow(yaml).unwrap();
        let workflow = WorkflowConfigBuilder::build(config, &TaskRegistry::new()).unwrap();

        assert_eq!(workflow.roots(), vec![NodeId::new("slab")]);
        assert_eq!(
            workflow.parents(&NodeId::new("neb")).unwrap(),
            &[NodeId::new("initial"), NodeId::new("final")]
        );
        assert_eq!(workflow.merge_policy(), MergePolicy::LastWriterWins);
    }

    #[test]
    fn test_unknown_task() {
        let yaml = r#"
id: x
name: X
nodes:
  - id: a
    task: dft
"#;
        let config = YamlLoader::parse_workflow(yaml).unwrap();
        let err = WorkflowConfigBuilder::build(config, &TaskRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTask { ref task, .. } if task == "dft"));
    }

    #[test]
    fn test_reject_conflicts_checks_declared_keys() {
        let yaml = r#"
id: x
name: X
merge_policy: reject_conflicts
nodes:
  - id: a
    task: lattice_scan
  - id: b
    task: eos_fit
    params: { lattice_constant: 3.9 }
    depends_on: [a]
"#;
        let config = YamlLoader::parse_workflow(yaml).unwrap();
        let err = WorkflowConfigBuilder::build(config, &TaskRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Workflow(WorkflowError::KeyCollision { ref key, .. }) if key == "lattice_constant"
        ));
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "id: b\nname: B\nnodes:\n  - id: fit\n    task: eos_fit\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.yml"),
            "id: a\nname: A\nnodes:\n  - id: scan\n    task: lattice_scan\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let workflows = load_workflows_from_directory(dir.path(), &TaskRegistry::new()).unwrap();
        let ids: Vec<&str> = workflows.iter().map(|w| w.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
