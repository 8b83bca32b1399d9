//! Minimum-energy path between two structures.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::trace_line;
use crate::core::context::{ParamSpec, ParameterContext};
use crate::core::task::{Task, TaskContext, TaskError, TaskResult};
use crate::sim::{Calculator, Fire, LennardJones, Neb, codec, interpolate};

/// Runs a nudged elastic band between the last frames of `initial` and
/// `final`, reporting the barrier and the transition-state image.
pub struct NebTask {
    calculator: Arc<dyn Calculator>,
}

impl NebTask {
    pub const NAME: &'static str = "neb";

    pub fn new() -> Self {
        Self::with_calculator(Arc::new(LennardJones::new()))
    }

    pub fn with_calculator(calculator: Arc<dyn Calculator>) -> Self {
        Self { calculator }
    }
}

impl Default for NebTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for NebTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("initial").describe("encoded initial state"),
            ParamSpec::required("final").describe("encoded final state"),
            ParamSpec::optional("images", 5).describe("interior images"),
            ParamSpec::optional("spring", 0.1).describe("spring constant (eV/Å²)"),
            ParamSpec::optional("climb", false),
            ParamSpec::optional("fmax", 0.05),
            ParamSpec::optional("max_steps", 500),
        ]
    }

    fn update_keys(&self, _seed: &ParameterContext) -> Vec<String> {
        ["barrier", "reaction_energy", "path", "transition_state"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<TaskResult, TaskError> {
        let params = ctx.resolve(&self.parameters())?;
        let initial = codec::decode_last(&params.get::<String>("initial")?)?;
        let final_state = codec::decode_last(&params.get::<String>("final")?)?;
        let images: usize = params.get("images")?;
        let spring: f64 = params.get("spring")?;
        let climb: bool = params.get("climb")?;
        let fmax: f64 = params.get("fmax")?;
        let max_steps: usize = params.get("max_steps")?;

        if images == 0 {
            return Err(TaskError::ExecutionFailed(
                "neb needs at least one interior image".to_string(),
            ));
        }

        let calculator = self.calculator.as_ref();
        let path = interpolate(&initial, &final_state, images)?;
        let mut band = Neb::new(path, calculator, spring, climb)?;
        ctx.write_line(format!(
            "band of {} images, k = {}, climb = {}",
            images + 2,
            spring,
            climb
        ));

        let report = Fire::new(fmax, max_steps).run(&mut band, &mut |trace| {
            ctx.write_line(trace_line(calculator, trace))
        })?;
        if !report.converged {
            warn!(steps = report.steps, fmax = report.fmax, "band did not converge");
        }

        let barrier = band.barrier();
        let reaction_energy = band.reaction_energy();
        info!(barrier, reaction_energy, "neb finished");
        for (i, e) in band.energies().iter().enumerate() {
            ctx.write_line(format!("image {:2} {:14.6}", i, e));
        }

        let mut result = TaskResult::new();
        result.set_update("barrier", barrier)?;
        result.set_update("reaction_energy", reaction_energy)?;
        result.set_update("transition_state", codec::encode(&[band.transition_state().clone()])?)?;
        result.set_stored("energies", band.energies())?;
        result.set_stored("converged", report.converged)?;
        result.set_update("path", codec::encode(&band.into_images())?)?;
        Ok(result)
    }

    fn description(&self) -> Option<&str> {
        Some("nudged elastic band between two encoded structures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NodeId;
    use crate::testing::DoubleWell;

    fn endpoints() -> ParameterContext {
        let initial = DoubleWell::particle(-1.0, 0.0);
        let final_state = DoubleWell::particle(1.0, 0.0);
        ParameterContext::new()
            .with("initial", codec::encode(&[initial]).unwrap())
            .with("final", codec::encode(&[final_state]).unwrap())
    }

    #[tokio::test]
    async fn test_neb_reports_barrier_and_path() {
        let task = NebTask::with_calculator(Arc::new(DoubleWell));
        let params = endpoints().with("images", 3).with("climb", true);
        let mut ctx = TaskContext::new(NodeId::new("neb"), params);

        let result = task.execute(&mut ctx).await.unwrap();

        let barrier: f64 = result.update.get("barrier").unwrap();
        assert!((barrier - 1.0).abs() < 1e-6);
        assert!(result.update.get::<f64>("reaction_energy").unwrap().abs() < 1e-12);
        let path = codec::decode(&result.update.get::<String>("path").unwrap()).unwrap();
        assert_eq!(path.len(), 5);
        let ts = codec::decode_last(&result.update.get::<String>("transition_state").unwrap())
            .unwrap();
        assert!(ts.positions()[0].x.abs() < 1e-6);
    }

    #[test]
    fn test_defaults_resolve() {
        let params = endpoints().resolve(&NebTask::new().parameters()).unwrap();

        assert_eq!(params.get::<usize>("images").unwrap(), 5);
        assert_eq!(params.get::<f64>("spring").unwrap(), 0.1);
        assert!(!params.get::<bool>("climb").unwrap());
        assert_eq!(params.get::<f64>("fmax").unwrap(), 0.05);
        assert_eq!(params.get::<usize>("max_steps").unwrap(), 500);
    }

    #[tokio::test]
    async fn test_neb_with_defaults_has_seven_frames() {
        let task = NebTask::with_calculator(Arc::new(DoubleWell));
        let mut ctx = TaskContext::new(NodeId::new("neb"), endpoints());

        let result = task.execute(&mut ctx).await.unwrap();

        let path = codec::decode(&result.update.get::<String>("path").unwrap()).unwrap();
        assert_eq!(path.len(), 7);
        assert!(ctx.captured_output().starts_with("band of 7 images, k = 0.1, climb = false"));
    }

    #[tokio::test]
    async fn test_neb_rejects_mismatched_endpoints() {
        let mut other = DoubleWell::particle(1.0, 0.0);
        other.push("H", nalgebra::Vector3::new(3.0, 0.0, 0.0), 0);
        let params = endpoints().with("final", codec::encode(&[other]).unwrap());
        let mut ctx = TaskContext::new(NodeId::new("neb"), params);

        let err = NebTask::with_calculator(Arc::new(DoubleWell))
            .execute(&mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskError::Simulation(crate::sim::SimError::ImageMismatch(_))
        ));
    }
}
