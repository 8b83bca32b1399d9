//! Equation-of-state fit over a scanned energy curve.

use async_trait::async_trait;

use crate::core::context::{ParamSpec, ParameterContext};
use crate::core::task::{Task, TaskContext, TaskError, TaskResult};
use crate::sim::EquationOfState;

/// Fits `volumes`/`energies` (usually a `lattice_scan` update) and reports
/// the equilibrium lattice constant, volume, energy, and bulk modulus in GPa.
#[derive(Debug, Default)]
pub struct EosFitTask;

impl EosFitTask {
    pub const NAME: &'static str = "eos_fit";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Task for EosFitTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("volumes").describe("primitive cell volumes (Å³)"),
            ParamSpec::required("energies").describe("energies at those volumes (eV)"),
        ]
    }

    fn update_keys(&self, _seed: &ParameterContext) -> Vec<String> {
        ["lattice_constant", "v0", "e0", "bulk_modulus"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        let params = ctx.resolve(&self.parameters())?;
        let volumes: Vec<f64> = params.get("volumes")?;
        let energies: Vec<f64> = params.get("energies")?;

        let fit = EquationOfState::new(volumes, energies)?.fit()?;
        let lattice_constant = fit.fcc_lattice_constant();
        ctx.write_line(format!(
            "v0 = {:.4} A^3, e0 = {:.6} eV, B = {:.2} GPa, a = {:.4} A",
            fit.v0,
            fit.e0,
            fit.bulk_modulus_gpa(),
            lattice_constant
        ));

        let mut result = TaskResult::new();
        result.set_update("lattice_constant", lattice_constant)?;
        result.set_update("v0", fit.v0)?;
        result.set_update("e0", fit.e0)?;
        result.set_update("bulk_modulus", fit.bulk_modulus_gpa())?;
        result.set_stored("fit", fit)?;
        Ok(result)
    }

    fn description(&self) -> Option<&str> {
        Some("fit a stabilized jellium equation of state to an energy-volume curve")
    }
}
