//! Configuration loading and parsing.
//!
//! YAML files describe global settings and workflows; see [`YamlLoader`]
//! and [`WorkflowConfigBuilder`].

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{WorkflowConfigBuilder, load_workflows_from_directory};
pub use error::ConfigError;
pub use types::{GlobalConfig, NodeConfig, StorageConfig, WorkflowConfig};
pub use yaml::YamlLoader;
