//! Adsorbate placement and relaxation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::trace_line;
use crate::core::context::{ParamSpec, ParameterContext};
use crate::core::task::{Task, TaskContext, TaskError, TaskResult};
use crate::sim::{Calculator, LennardJones, Site, add_adsorbate, codec, relax};

const DEFAULT_OUTPUT: &str = "adsorbed";

/// Places an adsorbate on the last frame of `slab` and relaxes the result.
///
/// The update key is chosen by the `output` parameter, so two placements can
/// feed the `initial` and `final` inputs of an NEB node.
pub struct AdsorbateTask {
    calculator: Arc<dyn Calculator>,
}

impl AdsorbateTask {
    pub const NAME: &'static str = "adsorbate";

    pub fn new() -> Self {
        Self::with_calculator(Arc::new(LennardJones::new()))
    }

    pub fn with_calculator(calculator: Arc<dyn Calculator>) -> Self {
        Self { calculator }
    }
}

impl Default for AdsorbateTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for AdsorbateTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("slab").describe("encoded slab trajectory"),
            ParamSpec::optional("adsorbate", "O"),
            ParamSpec::optional("site", "fcc").describe("ontop, bridge, fcc or hcp"),
            ParamSpec::optional("height", 1.5).describe("height above the top layer (Å)"),
            ParamSpec::optional("output", DEFAULT_OUTPUT).describe("update key for the relaxed structure"),
            ParamSpec::optional("fmax", 0.05),
            ParamSpec::optional("max_steps", 500),
        ]
    }

    fn update_keys(&self, seed: &ParameterContext) -> Vec<String> {
        let output = seed
            .get_optional::<String>("output")
            .unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
        vec![format!("{}_energy", output), output]
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        let params = ctx.resolve(&self.parameters())?;
        let encoded: String = params.get("slab")?;
        let symbol: String = params.get("adsorbate")?;
        let site: Site = params.get::<String>("site")?.parse()?;
        let height: f64 = params.get("height")?;
        let output: String = params.get("output")?;
        let fmax: f64 = params.get("fmax")?;
        let max_steps: usize = params.get("max_steps")?;

        let mut slab = codec::decode_last(&encoded)?;
        add_adsorbate(&mut slab, &symbol, height, site)?;
        ctx.write_line(format!("placed {} at {} site, {:.2} A up", symbol, site, height));

        let calculator = self.calculator.as_ref();
        let relaxation = relax(slab, calculator, fmax, max_steps, &mut |trace| {
            ctx.write_line(trace_line(calculator, trace))
        })?;
        let report = relaxation.report;
        if !report.converged {
            warn!(steps = report.steps, fmax = report.fmax, "adsorbate relaxation did not converge");
        }

        let mut result = TaskResult::new();
        result.set_update(&output, codec::encode(&relaxation.trajectory)?)?;
        result.set_update(&format!("{}_energy", output), report.energy)?;
        result.set_stored("site", site)?;
        result.set_stored("converged", report.converged)?;
        result.set_stored("formula", relaxation.atoms.formula())?;
        Ok(result)
    }

    fn description(&self) -> Option<&str> {
        Some("place an adsorbate on a relaxed slab and relax the combined structure")
    }
}
