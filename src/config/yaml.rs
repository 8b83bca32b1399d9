//! YAML configuration parsing.
//!
//! Parses workflow definitions and global configuration from YAML files.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use super::error::ConfigError;
use super::types::{GlobalConfig, WorkflowConfig};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    fn read(path: &Path) -> Result<String, ConfigError> {
        std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = Self::read(path)?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load a workflow definition from a file.
    pub fn load_workflow(path: impl AsRef<Path>) -> Result<WorkflowConfig, ConfigError> {
        let path = path.as_ref();
        let content = Self::read(path)?;
        let config: WorkflowConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_workflow(&config)?;
        Ok(config)
    }

    /// Parse a workflow definition from a YAML string.
    pub fn parse_workflow(yaml: &str) -> Result<WorkflowConfig, ConfigError> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        Self::validate_workflow(&config)?;
        Ok(config)
    }

    /// Validate a workflow definition.
    fn validate_workflow(config: &WorkflowConfig) -> Result<(), ConfigError> {
        if config.id.is_empty() {
            return Err(ConfigError::MissingField("id".into()));
        }

        if config.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }

        if config.nodes.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "workflow must have at least one node".into(),
            ));
        }

        let mut node_ids: HashSet<&str> = HashSet::new();
        for node in &config.nodes {
            if node.task.is_empty() {
                return Err(ConfigError::MissingField(format!("nodes.{}.task", node.id)));
            }
            if !node_ids.insert(&node.id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }

        for node in &config.nodes {
            let mut seen_deps = HashSet::new();
            for dep in &node.depends_on {
                if dep == &node.id {
                    return Err(ConfigError::InvalidConfig(format!(
                        "node '{}' cannot depend on itself",
                        node.id
                    )));
                }
                if !node_ids.contains(dep.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "node '{}' depends on unknown node '{}'",
                        node.id, dep
                    )));
                }
                if !seen_deps.insert(dep) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "node '{}' has duplicate dependency '{}'",
                        node.id, dep
                    )));
                }
            }
        }

        Self::validate_no_cycles(config)
    }

    /// Kahn's algorithm over the declared dependencies.
    fn validate_no_cycles(config: &WorkflowConfig) -> Result<(), ConfigError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut reverse_deps: HashMap<&str, Vec<&str>> = HashMap::new();

        for node in &config.nodes {
            in_degree.insert(&node.id, node.depends_on.len());
            reverse_deps.insert(&node.id, Vec::new());
        }
        for node in &config.nodes {
            for dep in &node.depends_on {
                reverse_deps.entry(dep.as_str()).or_default().push(&node.id);
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited_count = 0;

        while let Some(id) = queue.pop_front() {
            visited_count += 1;
            if let Some(downstream) = reverse_deps.get(id) {
                for next in downstream {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }

        if visited_count != config.nodes.len() {
            let mut cycle_nodes: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            cycle_nodes.sort_unstable();

            return Err(ConfigError::InvalidConfig(format!(
                "dependency cycle detected involving nodes: {}",
                cycle_nodes.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::core::context::MergePolicy;
    use crate::execution::ReadyOrder;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
id: scan
name: Lattice scan
nodes:
  - id: scan
    task: lattice_scan
"#;
        let config = YamlLoader::parse_workflow(yaml).unwrap();
        assert_eq!(config.id, "scan");
        assert_eq!(config.nodes.len(), 1);
        assert!(config.nodes[0].params.is_empty());
        assert!(config.merge_policy.is_none());
        assert!(config.is_implicit_chain());
    }

    #[test]
    fn test_parse_workflow_with_params_and_deps() {
        let yaml = r#"
id: surface
name: Surface
description: Relax a Pt(111) slab
merge_policy: reject_conflicts
nodes:
  - id: scan
    task: lattice_scan
    params:
      symbol: Pt
      span: [3.8, 4.0]
      step: 0.02
  - id: slab
    task: surface_relax
    params:
      size: [2, 2, 3]
    depends_on: [scan]
"#;
        let config = YamlLoader::parse_workflow(yaml).unwrap();
        assert_eq!(config.merge_policy, Some(MergePolicy::RejectConflicts));
        assert_eq!(config.nodes[0].params.len(), 3);
        assert_eq!(config.nodes[1].depends_on, vec!["scan"]);
        assert!(!config.is_implicit_chain());
    }

    #[test]
    fn test_rejects_empty_nodes() {
        let yaml = "id: x\nname: X\nnodes: []\n";
        assert!(matches!(
            YamlLoader::parse_workflow(yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_missing_name() {
        let yaml = r#"
id: x
name: ""
nodes:
  - id: a
    task: eos_fit
"#;
        assert!(matches!(
            YamlLoader::parse_workflow(yaml),
            Err(ConfigError::MissingField(field)) if field == "name"
        ));
    }

    #[test]
    fn test_rejects_duplicate_node() {
        let yaml = r#"
id: x
name: X
nodes:
  - id: a
    task: eos_fit
  - id: a
    task: eos_fit
"#;
        let err = YamlLoader::parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate node id"));
    }

    #[test]
    fn test_rejects_unknown_and_self_dependency() {
        let unknown = r#"
id: x
name: X
nodes:
  - id: a
    task: eos_fit
    depends_on: [ghost]
"#;
        let err = YamlLoader::parse_workflow(unknown).unwrap_err();
        assert!(err.to_string().contains("unknown node 'ghost'"));

        let itself = r#"
id: x
name: X
nodes:
  - id: a
    task: eos_fit
    depends_on: [a]
"#;
        let err = YamlLoader::parse_workflow(itself).unwrap_err();
        assert!(err.to_string().contains("cannot depend on itself"));
    }

    #[test]
    fn test_rejects_cycle() {
        let yaml = r#"
id: x
name: X
nodes:
  - id: a
    task: eos_fit
    depends_on: [b]
  - id: b
    task: eos_fit
    depends_on: [a]
"#;
        let err = YamlLoader::parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("cycle detected involving nodes: a, b"));
    }

    #[test]
    fn test_parse_global_config() {
        let yaml = r#"
storage:
  type: sqlite
  path: runs.db
launch_dir: /tmp/catflow
cleanup_launch_dirs: true
ready_order: reverse_insertion
merge_policy: reject_conflicts
log_filter: catflow=debug
"#;
        let config = YamlLoader::parse_global_config(yaml).unwrap();
        assert_eq!(
            config.storage,
            Some(StorageConfig::Sqlite {
                path: "runs.db".into()
            })
        );
        assert_eq!(config.ready_order, ReadyOrder::ReverseInsertion);
        assert_eq!(config.merge_policy, Some(MergePolicy::RejectConflicts));
        assert!(config.cleanup_launch_dirs);
        assert_eq!(
            config.runner().executor().launch_root(),
            Some(Path::new("/tmp/catflow"))
        );
    }

    #[test]
    fn test_global_config_defaults() {
        let config = YamlLoader::parse_global_config("{}").unwrap();
        assert!(config.storage.is_none());
        assert_eq!(config.ready_order, ReadyOrder::Insertion);
        assert!(config.executor().launch_root().is_none());
    }

    #[test]
    fn test_load_workflow_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "id: [unclosed").unwrap();

        let err = YamlLoader::load_workflow(&path).unwrap_err();
        assert!(matches!(err, ConfigError::YamlFileError { .. }));
        assert!(err.to_string().contains("broken.yaml"));

        let missing = YamlLoader::load_workflow(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::FileReadError { .. }));
    }
}
