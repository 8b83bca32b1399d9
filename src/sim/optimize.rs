//! Geometry optimization with the FIRE algorithm.
//!
//! Optimizers stop at a force threshold or an iteration cap. Hitting the cap
//! is not an error: the report says `converged: false` and the structure
//! keeps whatever residual force it has.

use nalgebra::Vector3;

use super::SimError;
use super::atoms::Atoms;
use super::calculator::Calculator;

/// Something with positions, an energy, and forces.
pub trait Optimizable {
    fn positions(&self) -> Vec<Vector3<f64>>;

    fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<(), SimError>;

    /// Energy and forces at the current positions, constrained degrees of
    /// freedom already zeroed.
    fn evaluate(&mut self) -> Result<(f64, Vec<Vector3<f64>>), SimError>;
}

/// One optimizer iteration, as seen by an observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTrace {
    pub step: usize,
    pub energy: f64,
    pub fmax: f64,
}

impl StepTrace {
    /// Trace line in the usual `FIRE: step energy fmax` layout.
    pub fn line(&self) -> String {
        format!(
            "FIRE: {:4} {:15.6} {:12.4}",
            self.step, self.energy, self.fmax
        )
    }
}

/// Outcome of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationReport {
    pub converged: bool,
    pub steps: usize,
    pub energy: f64,
    pub fmax: f64,
}

/// Fast inertial relaxation engine.
#[derive(Debug, Clone)]
pub struct Fire {
    pub fmax: f64,
    pub max_steps: usize,
    pub dt: f64,
    pub dt_max: f64,
    pub max_move: f64,
    pub n_min: usize,
    pub f_inc: f64,
    pub f_dec: f64,
    pub a_start: f64,
    pub f_a: f64,
}

impl Fire {
    /// Optimizer converging to `fmax` (eV/Å) within `max_steps` iterations.
    pub fn new(fmax: f64, max_steps: usize) -> Self {
        Self {
            fmax,
            max_steps,
            dt: 0.1,
            dt_max: 1.0,
            max_move: 0.2,
            n_min: 5,
            f_inc: 1.1,
            f_dec: 0.5,
            a_start: 0.1,
            f_a: 0.99,
        }
    }

    /// Run until converged or out of steps, reporting every iteration.
    pub fn run(
        &self,
        target: &mut dyn Optimizable,
        observer: &mut dyn FnMut(&StepTrace),
    ) -> Result<OptimizationReport, SimError> {
        let mut r = target.positions();
        let mut v = vec![Vector3::zeros(); r.len()];
        let mut dt = self.dt;
        let mut a = self.a_start;
        let mut n_positive = 0usize;
        let mut first = true;

        let mut step = 0;
        loop {
            let (energy, f) = target.evaluate()?;
            let fmax = f.iter().map(|fi| fi.norm()).fold(0.0, f64::max);
            let trace = StepTrace { step, energy, fmax };
            observer(&trace);

            if fmax < self.fmax || step >= self.max_steps {
                return Ok(OptimizationReport {
                    converged: fmax < self.fmax,
                    steps: step,
                    energy,
                    fmax,
                });
            }

            if !first {
                let vf: f64 = v.iter().zip(&f).map(|(vi, fi)| vi.dot(fi)).sum();
                if vf > 0.0 {
                    let v_norm = norm(&v);
                    let f_norm = norm(&f);
                    for (vi, fi) in v.iter_mut().zip(&f) {
                        *vi = *vi * (1.0 - a) + fi * (a * v_norm / f_norm);
                    }
                    if n_positive > self.n_min {
                        dt = (dt * self.f_inc).min(self.dt_max);
                        a *= self.f_a;
                    }
                    n_positive += 1;
                } else {
                    v.iter_mut().for_each(|vi| *vi = Vector3::zeros());
                    a = self.a_start;
                    dt *= self.f_dec;
                    n_positive = 0;
                }
            }
            first = false;

            let mut dr: Vec<Vector3<f64>> = v
                .iter_mut()
                .zip(&f)
                .map(|(vi, fi)| {
                    *vi += fi * dt;
                    *vi * dt
                })
                .collect();
            let dr_norm = norm(&dr);
            if dr_norm > self.max_move {
                let scale = self.max_move / dr_norm;
                dr.iter_mut().for_each(|d| *d *= scale);
            }
            for (ri, di) in r.iter_mut().zip(&dr) {
                *ri += di;
            }
            target.set_positions(&r)?;
            step += 1;
        }
    }
}

fn norm(vectors: &[Vector3<f64>]) -> f64 {
    vectors.iter().map(|x| x.norm_squared()).sum::<f64>().sqrt()
}

/// A structure relaxed under a calculator, recording every evaluated frame.
pub struct RelaxTarget<'a> {
    pub atoms: Atoms,
    calculator: &'a dyn Calculator,
    trajectory: Vec<Atoms>,
}

impl<'a> RelaxTarget<'a> {
    pub fn new(atoms: Atoms, calculator: &'a dyn Calculator) -> Self {
        Self {
            atoms,
            calculator,
            trajectory: Vec::new(),
        }
    }

    /// Evaluated frames, oldest first.
    pub fn into_trajectory(self) -> Vec<Atoms> {
        self.trajectory
    }
}

impl Optimizable for RelaxTarget<'_> {
    fn positions(&self) -> Vec<Vector3<f64>> {
        self.atoms.positions().to_vec()
    }

    fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<(), SimError> {
        self.atoms.set_positions(positions)
    }

    fn evaluate(&mut self) -> Result<(f64, Vec<Vector3<f64>>), SimError> {
        let eval = self.calculator.compute(&self.atoms)?;
        let forces = eval
            .forces
            .iter()
            .zip(self.atoms.fixed())
            .map(|(f, &fixed)| if fixed { Vector3::zeros() } else { *f })
            .collect();
        self.trajectory.push(self.atoms.clone());
        Ok((eval.energy, forces))
    }
}

/// Result of [`relax`].
pub struct Relaxation {
    pub atoms: Atoms,
    pub report: OptimizationReport,
    pub trajectory: Vec<Atoms>,
}

/// Relax `atoms` with FIRE; the trajectory ends with the returned structure.
pub fn relax(
    atoms: Atoms,
    calculator: &dyn Calculator,
    fmax: f64,
    max_steps: usize,
    observer: &mut dyn FnMut(&StepTrace),
) -> Result<Relaxation, SimError> {
    let mut target = RelaxTarget::new(atoms, calculator);
    let report = Fire::new(fmax, max_steps).run(&mut target, observer)?;
    let atoms = target.atoms.clone();
    Ok(Relaxation {
        atoms,
        report,
        trajectory: target.into_trajectory(),
    })
}
