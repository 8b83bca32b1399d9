//! Build and relax an fcc(111) slab.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::trace_line;
use crate::core::context::{ParamSpec, ParameterContext};
use crate::core::task::{Task, TaskContext, TaskError, TaskResult};
use crate::sim::{Calculator, LennardJones, codec, fcc111, fix_bottom_layers, relax};

/// Builds an fcc(111) slab at a given lattice constant, fixes its bottom
/// layers, and relaxes the rest. The update carries the whole relaxation
/// trajectory as `slab`; children use its last frame.
pub struct SurfaceRelaxTask {
    calculator: Arc<dyn Calculator>,
}

impl SurfaceRelaxTask {
    pub const NAME: &'static str = "surface_relax";

    pub fn new() -> Self {
        Self::with_calculator(Arc::new(LennardJones::new()))
    }

    pub fn with_calculator(calculator: Arc<dyn Calculator>) -> Self {
        Self { calculator }
    }
}

impl Default for SurfaceRelaxTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for SurfaceRelaxTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("symbol", "Pt"),
            ParamSpec::required("lattice_constant").describe("fcc lattice constant (Å)"),
            ParamSpec::optional("size", vec![2, 2, 3]).describe("surface cells along x, y and layer count"),
            ParamSpec::optional("vacuum", 10.0).describe("vacuum above and below the slab (Å)"),
            ParamSpec::optional("fixed_layers", 1),
            ParamSpec::optional("fmax", 0.05).describe("force threshold (eV/Å)"),
            ParamSpec::optional("max_steps", 500),
        ]
    }

    fn update_keys(&self, _seed: &ParameterContext) -> Vec<String> {
        vec!["slab".to_string(), "slab_energy".to_string()]
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        let params = ctx.resolve(&self.parameters())?;
        let symbol: String = params.get("symbol")?;
        let a: f64 = params.get("lattice_constant")?;
        let [nx, ny, layers]: [usize; 3] = params.get("size")?;
        let vacuum: f64 = params.get("vacuum")?;
        let fixed_layers: usize = params.get("fixed_layers")?;
        let fmax: f64 = params.get("fmax")?;
        let max_steps: usize = params.get("max_steps")?;

        let mut slab = fcc111(&symbol, (nx, ny, layers), a, vacuum)?;
        fix_bottom_layers(&mut slab, fixed_layers);
        ctx.write_line(format!(
            "relaxing {} fcc(111) {}x{}x{} at a = {:.4}",
            symbol, nx, ny, layers, a
        ));

        let calculator = self.calculator.as_ref();
        let relaxation = relax(slab, calculator, fmax, max_steps, &mut |trace| {
            ctx.write_line(trace_line(calculator, trace))
        })?;
        let report = relaxation.report;
        if report.converged {
            debug!(steps = report.steps, energy = report.energy, "slab relaxed");
        } else {
            warn!(steps = report.steps, fmax = report.fmax, "slab relaxation did not converge");
            ctx.write_line(format!(
                "not converged after {} steps (fmax {:.4})",
                report.steps, report.fmax
            ));
        }

        let mut result = TaskResult::new();
        result.set_update("slab", codec::encode(&relaxation.trajectory)?)?;
        result.set_update("slab_energy", report.energy)?;
        result.set_stored("converged", report.converged)?;
        result.set_stored("steps", report.steps)?;
        result.set_stored("formula", relaxation.atoms.formula())?;
        Ok(result)
    }

    fn description(&self) -> Option<&str> {
        Some("build an fcc(111) slab and relax it with FIRE")
    }
}
