//! catflow - catalysis workflows from YAML.
//!
//! Usage:
//!   catflow run <workflow> [--config <file>] [--db <file>]   Submit and run a workflow
//!   catflow validate <path>                                  Validate a workflow file or directory
//!   catflow tasks                                            List the registered task kinds
//!   catflow show --db <file> <run-id>                        Show a stored run

use catflow::core::context::ParamDefault;
use catflow::{
    Event, EventBus, EventHandler, GlobalConfig, InMemoryStorage, LaunchPad, Storage,
    StorageConfig, TaskRegistry, WorkflowConfigBuilder, YamlLoader, load_workflows_from_directory,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// catflow - workflows for catalysis simulations
#[derive(Parser)]
#[command(name = "catflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a workflow and run it to completion
    Run {
        /// Path to the workflow YAML file
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Global configuration file (catflow.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// SQLite database for run documents (overrides the configured storage)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Validate workflow definitions without running them
    Validate {
        /// Workflow YAML file or directory of workflow files
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// List the registered task kinds and their parameters
    Tasks,

    /// Show the stored state of a run
    Show {
        /// SQLite database holding the run
        #[arg(long)]
        db: PathBuf,

        /// Run id printed by `catflow run`
        #[arg(value_name = "RUN_ID")]
        run_id: String,
    },
}

/// Event handler that logs node progress.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::WorkflowStarted {
                workflow_id,
                run_id,
                ..
            } => {
                info!("Workflow '{}' started (run: {})", workflow_id, run_id);
            }
            Event::WorkflowCompleted {
                workflow_id,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!("Workflow '{}' completed in {:?}", workflow_id, duration);
                } else {
                    error!("Workflow '{}' failed after {:?}", workflow_id, duration);
                }
            }
            Event::NodeStarted { node_id, task, .. } => {
                info!("  Node '{}' started ({})", node_id, task);
            }
            Event::NodeCompleted {
                node_id,
                duration,
                update_keys,
                ..
            } => {
                info!(
                    "  Node '{}' completed in {:?}; update: [{}]",
                    node_id,
                    duration,
                    update_keys.join(", ")
                );
            }
            Event::NodeFailed { node_id, error, .. } => {
                warn!("  Node '{}' failed: {}", node_id, error);
            }
            Event::NodeSkipped { node_id, .. } => {
                warn!("  Node '{}' skipped", node_id);
            }
        }
    }
}

fn init_logging(filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            config,
            db,
        } => {
            let global = match &config {
                Some(path) => YamlLoader::load_global_config(path)?,
                None => GlobalConfig::default(),
            };
            init_logging(global.log_filter.as_deref());
            run_workflow(&workflow, global, db).await?;
        }
        Commands::Validate { path } => {
            init_logging(None);
            validate(&path)?;
        }
        Commands::Tasks => {
            list_tasks();
        }
        Commands::Show { db, run_id } => {
            init_logging(None);
            show_run(&db, &run_id).await?;
        }
    }

    Ok(())
}

async fn open_storage(
    global: &GlobalConfig,
    db: Option<PathBuf>,
) -> Result<Arc<dyn Storage>, Box<dyn std::error::Error>> {
    let config = match db {
        Some(path) => StorageConfig::Sqlite {
            path: path.display().to_string(),
        },
        None => global.storage.clone().unwrap_or_default(),
    };
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStorage::new())),
        StorageConfig::Sqlite { path } => open_sqlite(Path::new(&path)).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(path: &Path) -> Result<Arc<dyn Storage>, Box<dyn std::error::Error>> {
    info!("Using SQLite storage at {}", path.display());
    Ok(Arc::new(catflow::SqliteStorage::new(path).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(path: &Path) -> Result<Arc<dyn Storage>, Box<dyn std::error::Error>> {
    Err(format!(
        "cannot open '{}': catflow was built without the sqlite feature",
        path.display()
    )
    .into())
}

/// Submit and run one workflow file.
async fn run_workflow(
    path: &Path,
    global: GlobalConfig,
    db: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading workflow from: {}", path.display());
    let mut config = YamlLoader::load_workflow(path)?;
    if config.merge_policy.is_none() {
        config.merge_policy = global.merge_policy;
    }
    let workflow = WorkflowConfigBuilder::build(config, &TaskRegistry::new())?;

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;
    let runner = global.runner().with_event_bus(event_bus);

    let storage = open_storage(&global, db).await?;
    let launchpad = LaunchPad::with_runner(storage, runner);

    let run_id = launchpad.submit(workflow).await?;
    info!("Submitted run {}", run_id);
    let result = launchpad.run(&run_id).await?;

    println!("Run: {}", run_id);
    for record in &result.records {
        println!("  {} [{}] {:?}", record.node_id, record.state, record.duration);
        if let Some(result) = &record.result {
            for (key, value) in result.update.iter() {
                // encoded structures are long; show only scalars and short values
                let text = value.to_string();
                if text.len() <= 80 {
                    println!("    {} = {}", key, text);
                } else {
                    println!("    {} = <{} bytes>", key, text.len());
                }
            }
        }
        if let Some(err) = &record.error {
            println!("    error: {}", err);
        }
    }
    for node in &result.skipped {
        println!("  {} [skipped]", node);
    }

    if result.success {
        Ok(())
    } else {
        Err(format!(
            "workflow failed: {} node(s) failed, {} skipped",
            result.failed_count(),
            result.skipped_count()
        )
        .into())
    }
}

/// Validate a workflow file or every workflow in a directory.
fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating: {}", path.display());
    let registry = TaskRegistry::new();

    let result = if path.is_dir() {
        load_workflows_from_directory(path, &registry)
    } else {
        YamlLoader::load_workflow(path)
            .and_then(|config| WorkflowConfigBuilder::build(config, &registry))
            .map(|workflow| vec![workflow])
    };

    match result {
        Ok(workflows) => {
            info!("All {} workflow(s) are valid:", workflows.len());
            for workflow in &workflows {
                info!(
                    "  - {} ({}): {} node(s) OK",
                    workflow.id(),
                    workflow.name(),
                    workflow.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the registered task kinds.
fn list_tasks() {
    let registry = TaskRegistry::new();
    for name in registry.names() {
        let Some(task) = registry.create(name) else {
            continue;
        };
        println!("{}", name);
        if let Some(description) = task.description() {
            println!("  {}", description);
        }
        for spec in task.parameters() {
            let default = match &spec.default {
                ParamDefault::Value(value) => value.to_string(),
                ParamDefault::Computed(f) => f().to_string(),
                ParamDefault::Required => "required".to_string(),
            };
            println!("    {:<18} {:<16} {}", spec.name, default, spec.description);
        }
        println!();
    }
}

/// Print a stored run.
#[cfg(feature = "sqlite")]
async fn show_run(db: &Path, run_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let run_id = catflow::RunId::parse(run_id)?;
    let storage = catflow::SqliteStorage::new(db).await?;

    let workflow = storage.get_workflow(&run_id).await?;
    println!("Run: {}", workflow.run_id);
    println!("  Workflow: {} ({})", workflow.workflow_id, workflow.name);
    println!("  State: {}", workflow.state);
    println!("  Created: {}", workflow.created_at);
    println!();

    for node in storage.list_nodes(&run_id).await? {
        let parents: Vec<&str> = node.parents.iter().map(|p| p.as_str()).collect();
        if parents.is_empty() {
            println!("  {} [{}] {}", node.node_id, node.state, node.task);
        } else {
            println!(
                "  {} [{}] {} (depends on: {})",
                node.node_id,
                node.state,
                node.task,
                parents.join(", ")
            );
        }
        if let Some(err) = &node.error {
            println!("    error: {}", err);
        }
        if let Some(record) = storage.last_run(&run_id, &node.node_id).await? {
            println!(
                "    run #{} started {} took {:?}",
                record.sequence, record.started_at, record.duration
            );
            if let Some(dir) = &record.directory {
                println!("    directory: {}", dir.display());
            }
        }
    }

    storage.close().await;
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
async fn show_run(db: &Path, _run_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    Err(format!(
        "cannot open '{}': catflow was built without the sqlite feature",
        db.display()
    )
    .into())
}
