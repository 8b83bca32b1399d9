//! Built-in simulation tasks and the registry that names them.
//!
//! Each task holds the calculator it evaluates energies with. Structures
//! travel between tasks as encoded trajectories (see [`crate::sim::codec`]),
//! so a child that needs a structure reads the last frame of a string value
//! in its context.
//!
//! | task | update keys |
//! |---|---|
//! | `lattice_scan` | `lattice_constant`, `minimum_index`, `minimum_energy`, `volumes`, `energies` |
//! | `eos_fit` | `lattice_constant`, `v0`, `e0`, `bulk_modulus` |
//! | `surface_relax` | `slab`, `slab_energy` |
//! | `adsorbate` | `<output>`, `<output>_energy` |
//! | `neb` | `barrier`, `reaction_energy`, `path`, `transition_state` |

mod adsorbate;
mod eos_fit;
mod lattice_scan;
mod neb;
mod surface_relax;

pub use adsorbate::AdsorbateTask;
pub use eos_fit::EosFitTask;
pub use lattice_scan::LatticeScanTask;
pub use neb::NebTask;
pub use surface_relax::SurfaceRelaxTask;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::task::Task;
use crate::sim::{Calculator, LennardJones, StepTrace};

type TaskFactory = Box<dyn Fn(Arc<dyn Calculator>) -> Arc<dyn Task> + Send + Sync>;

/// Maps task names to constructors.
///
/// Every task a registry creates shares the registry's calculator.
pub struct TaskRegistry {
    calculator: Arc<dyn Calculator>,
    factories: BTreeMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// An empty registry using the default Lennard-Jones calculator.
    pub fn empty() -> Self {
        Self {
            calculator: Arc::new(LennardJones::new()),
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the five built-in tasks.
    pub fn new() -> Self {
        Self::empty()
            .register(LatticeScanTask::NAME, |c| Arc::new(LatticeScanTask::with_calculator(c)))
            .register(EosFitTask::NAME, |_| Arc::new(EosFitTask::new()))
            .register(SurfaceRelaxTask::NAME, |c| {
                Arc::new(SurfaceRelaxTask::with_calculator(c))
            })
            .register(AdsorbateTask::NAME, |c| Arc::new(AdsorbateTask::with_calculator(c)))
            .register(NebTask::NAME, |c| Arc::new(NebTask::with_calculator(c)))
    }

    /// Replace the calculator handed to factories.
    pub fn with_calculator(mut self, calculator: Arc<dyn Calculator>) -> Self {
        self.calculator = calculator;
        self
    }

    /// Register (or replace) a task kind.
    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(Arc<dyn Calculator>) -> Arc<dyn Task> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Instantiate a task by name.
    pub fn create(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.factories
            .get(name)
            .map(|factory| factory(self.calculator.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn calculator(&self) -> &Arc<dyn Calculator> {
        &self.calculator
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Optimizer trace line prefixed with the calculator name.
pub(crate) fn trace_line(calculator: &dyn Calculator, trace: &StepTrace) -> String {
    format!("[{}] {}", calculator.name(), trace.line())
}
