//! Equation-of-state fitting.
//!
//! Energies are fit with the stabilized jellium form, a cubic polynomial in
//! `t = V^(-1/3)`. The equilibrium volume is the minimum of that cubic.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::SimError;

/// eV/Å³ to GPa.
pub const EV_PER_A3_TO_GPA: f64 = 160.217_663_4;

/// Parameters of a fitted equation of state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EosFit {
    /// Equilibrium volume (Å³).
    pub v0: f64,
    /// Energy at the equilibrium volume (eV).
    pub e0: f64,
    /// Bulk modulus (eV/Å³).
    pub bulk_modulus: f64,
}

impl EosFit {
    pub fn bulk_modulus_gpa(&self) -> f64 {
        self.bulk_modulus * EV_PER_A3_TO_GPA
    }

    /// Cubic lattice constant when `v0` is the volume of a primitive fcc cell.
    pub fn fcc_lattice_constant(&self) -> f64 {
        (4.0 * self.v0).cbrt()
    }
}

/// Energy-volume data to fit.
#[derive(Debug, Clone)]
pub struct EquationOfState {
    volumes: Vec<f64>,
    energies: Vec<f64>,
}

impl EquationOfState {
    pub fn new(volumes: Vec<f64>, energies: Vec<f64>) -> Result<Self, SimError> {
        if volumes.len() != energies.len() {
            return Err(SimError::InvalidInput(format!(
                "{} volumes but {} energies",
                volumes.len(),
                energies.len()
            )));
        }
        if volumes.iter().any(|&v| !(v > 0.0)) {
            return Err(SimError::InvalidInput(
                "volumes must be positive".to_string(),
            ));
        }
        if volumes.len() < 4 {
            return Err(SimError::InsufficientData(format!(
                "need at least 4 points, got {}",
                volumes.len()
            )));
        }
        Ok(Self { volumes, energies })
    }

    /// Fit and locate the minimum.
    pub fn fit(&self) -> Result<EosFit, SimError> {
        let t: Vec<f64> = self.volumes.iter().map(|v| v.powf(-1.0 / 3.0)).collect();
        let design = DMatrix::from_fn(t.len(), 4, |i, j| t[i].powi(j as i32));
        let rhs = DVector::from_column_slice(&self.energies);
        let c = design
            .svd(true, true)
            .solve(&rhs, 1e-14)
            .map_err(|e| SimError::InvalidInput(format!("least squares failed: {}", e)))?;
        let (c0, c1, c2, c3) = (c[0], c[1], c[2], c[3]);

        let energy = |x: f64| c0 + c1 * x + c2 * x * x + c3 * x * x * x;
        let curvature = |x: f64| 2.0 * c2 + 6.0 * c3 * x;

        // dE/dt = 3 c3 t^2 + 2 c2 t + c1
        let (qa, qb, qc) = (3.0 * c3, 2.0 * c2, c1);
        let disc = qb * qb - 4.0 * qa * qc;
        if disc < 0.0 {
            return Err(SimError::NoMinimum);
        }
        let q = -0.5 * (qb + qb.signum() * disc.sqrt());
        let t_mean = t.iter().sum::<f64>() / t.len() as f64;
        let t_lo = t.iter().copied().fold(f64::INFINITY, f64::min);
        let t_hi = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = t_hi - t_lo;

        // stationary points further than one data span outside the samples are fit artifacts
        let t0 = [q / qa, qc / q]
            .into_iter()
            .filter(|x| x.is_finite() && *x > 0.0 && curvature(*x) > 0.0)
            .filter(|x| *x >= t_lo - span && *x <= t_hi + span)
            .min_by(|a, b| (a - t_mean).abs().total_cmp(&(b - t_mean).abs()))
            .ok_or(SimError::NoMinimum)?;

        Ok(EosFit {
            v0: t0.powi(-3),
            e0: energy(t0),
            bulk_modulus: t0.powi(5) * curvature(t0) / 9.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic_in_t(a0: f64, k: f64, e0: f64) -> (Vec<f64>, Vec<f64>) {
        let t0 = (a0.powi(3) / 4.0).powf(-1.0 / 3.0);
        (0..9)
            .map(|i| {
                let a = 3.80 + 0.025 * i as f64;
                let v = a.powi(3) / 4.0;
                let t = v.powf(-1.0 / 3.0);
                (v, e0 + k * (t - t0).powi(2))
            })
            .unzip()
    }

    #[test]
    fn test_fit_recovers_minimum() {
        let (volumes, energies) = quadratic_in_t(3.9, 400.0, -5.5);

        let fit = EquationOfState::new(volumes, energies).unwrap().fit().unwrap();

        assert!((fit.fcc_lattice_constant() - 3.9).abs() < 1e-6);
        assert!((fit.e0 + 5.5).abs() < 1e-9);

        let t0 = fit.v0.powf(-1.0 / 3.0);
        let expected_b = t0.powi(5) * 800.0 / 9.0;
        assert!((fit.bulk_modulus - expected_b).abs() / expected_b < 1e-6);
        assert!(fit.bulk_modulus_gpa() > 0.0);
    }

    #[test]
    fn test_fit_requires_four_points() {
        let result = EquationOfState::new(vec![10.0, 11.0, 12.0], vec![1.0, 0.0, 1.0]);
        assert!(matches!(result, Err(SimError::InsufficientData(_))));
    }

    #[test]
    fn test_fit_rejects_mismatched_lengths() {
        let result = EquationOfState::new(vec![10.0, 11.0], vec![1.0]);
        assert!(matches!(result, Err(SimError::InvalidInput(_))));
    }

    #[test]
    fn test_fit_without_minimum() {
        // concave in t: the only stationary point in range is a maximum
        let volumes = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        let t_mid = 12f64.powf(-1.0 / 3.0);
        let energies: Vec<f64> = volumes
            .iter()
            .map(|v: &f64| -50.0 * (v.powf(-1.0 / 3.0) - t_mid).powi(2))
            .collect();

        let result = EquationOfState::new(volumes, energies).unwrap().fit();

        assert!(matches!(result, Err(SimError::NoMinimum)));
    }
}
