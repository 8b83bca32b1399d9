//! Lattice-constant sweep of an fcc bulk crystal.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::core::context::{ParamSpec, ParameterContext};
use crate::core::task::{Task, TaskContext, TaskError, TaskResult};
use crate::sim::{Calculator, LennardJones, bulk_fcc};

/// Evaluates the bulk energy over an inclusive range of lattice constants
/// and reports the lowest point.
///
/// Parameters: `symbol` ("Pt"), `span` ([3.77, 4.0] Å), `step` (0.01 Å).
pub struct LatticeScanTask {
    calculator: Arc<dyn Calculator>,
}

impl LatticeScanTask {
    pub const NAME: &'static str = "lattice_scan";

    pub fn new() -> Self {
        Self::with_calculator(Arc::new(LennardJones::new()))
    }

    pub fn with_calculator(calculator: Arc<dyn Calculator>) -> Self {
        Self { calculator }
    }
}

impl Default for LatticeScanTask {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound on the number of lattice constants in one sweep.
pub const MAX_SWEEP_POINTS: usize = 10_000;

/// Lattice constants from `start` to `stop` inclusive.
pub(crate) fn sweep(start: f64, stop: f64, step: f64) -> Result<Vec<f64>, TaskError> {
    if !(step > 0.0) || !start.is_finite() || !stop.is_finite() || stop < start {
        return Err(TaskError::ExecutionFailed(format!(
            "invalid sweep: span [{}, {}] with step {}",
            start, stop, step
        )));
    }
    let intervals = ((stop - start) / step).round();
    if !intervals.is_finite() || intervals >= MAX_SWEEP_POINTS as f64 {
        return Err(TaskError::ExecutionFailed(format!(
            "sweep over [{}, {}] with step {} exceeds {} points",
            start, stop, step, MAX_SWEEP_POINTS
        )));
    }
    let n = intervals as usize + 1;
    Ok((0..n).map(|i| start + i as f64 * step).collect())
}

#[async_trait]
impl Task for LatticeScanTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::optional("symbol", "Pt").describe("element of the fcc crystal"),
            ParamSpec::optional("span", vec![3.77, 4.0]).describe("first and last lattice constant (Å)"),
            ParamSpec::optional("step", 0.01).describe("sweep increment (Å)"),
        ]
    }

    fn update_keys(&self, _seed: &ParameterContext) -> Vec<String> {
        ["lattice_constant", "minimum_index", "minimum_energy", "volumes", "energies"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        let params = ctx.resolve(&self.parameters())?;
        let symbol: String = params.get("symbol")?;
        let [start, stop]: [f64; 2] = params.get("span")?;
        let step: f64 = params.get("step")?;

        let constants = sweep(start, stop, step)?;
        let mut volumes = Vec::with_capacity(constants.len());
        let mut energies = Vec::with_capacity(constants.len());
        let mut csv = String::from("lattice_constant,volume,energy\n");

        ctx.write_line(format!(
            "scanning {} with {} points ({})",
            symbol,
            constants.len(),
            self.calculator.name()
        ));
        for &a in &constants {
            let atoms = bulk_fcc(&symbol, a)?;
            let energy = self.calculator.compute(&atoms)?.energy;
            ctx.write_line(format!("{:8.4} {:12.6} {:14.6}", a, atoms.volume(), energy));
            csv.push_str(&format!("{},{},{}\n", a, atoms.volume(), energy));
            volumes.push(atoms.volume());
            energies.push(energy);
        }

        let (minimum_index, minimum_energy) = energies
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (i, e)| if e < best.1 { (i, e) } else { best });
        let lattice_constant = constants[minimum_index];
        debug!(%symbol, lattice_constant, minimum_energy, "lattice scan finished");

        if let Some(dir) = ctx.work_dir() {
            tokio::fs::write(dir.join("lattice_scan.csv"), csv).await?;
        }

        let mut result = TaskResult::new();
        result.set_update("lattice_constant", lattice_constant)?;
        result.set_update("minimum_index", minimum_index)?;
        result.set_update("minimum_energy", minimum_energy)?;
        result.set_update("volumes", &volumes)?;
        result.set_update("energies", &energies)?;
        result.set_stored("symbol", &symbol)?;
        result.set_stored("points", constants.len())?;
        Ok(result)
    }

    fn description(&self) -> Option<&str> {
        Some("sweep the fcc lattice constant and report the lowest-energy point")
    }
}
