//! Energy and force calculators.

use nalgebra::Vector3;
use std::collections::HashMap;

use super::SimError;
use super::atoms::Atoms;

/// Energy (eV) and per-atom forces (eV/Å) of a structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub energy: f64,
    pub forces: Vec<Vector3<f64>>,
}

impl Evaluation {
    /// Largest force norm among the atoms that are free to move.
    pub fn max_force(&self, fixed: &[bool]) -> f64 {
        self.forces
            .iter()
            .zip(fixed.iter().chain(std::iter::repeat(&false)))
            .filter(|&(_, &is_fixed)| !is_fixed)
            .map(|(f, _)| f.norm())
            .fold(0.0, f64::max)
    }
}

/// Computes potential energy and forces for a structure.
pub trait Calculator: Send + Sync {
    /// Short name used in traces.
    fn name(&self) -> &str;

    fn compute(&self, atoms: &Atoms) -> Result<Evaluation, SimError>;
}

/// 12-6 pair parameters for one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairParams {
    /// Well depth in eV.
    pub epsilon: f64,
    /// Zero-crossing distance in Å.
    pub sigma: f64,
}

/// Shifted Lennard-Jones pair potential with Lorentz-Berthelot mixing.
///
/// Pairs interact up to `cutoff * sigma_ij`; the pair energy is shifted to
/// zero at the cutoff. Periodic images are summed along periodic axes.
#[derive(Debug, Clone)]
pub struct LennardJones {
    params: HashMap<String, PairParams>,
    cutoff: f64,
}

/// Metal parameters fitted to fcc lattice constants and surface energies;
/// light elements from the universal force field.
const DEFAULT_PARAMS: &[(&str, f64, f64)] = &[
    ("Ag", 0.1977, 2.644),
    ("Al", 0.1743, 2.620),
    ("Au", 0.2294, 2.629),
    ("Cu", 0.2047, 2.330),
    ("Ni", 0.2450, 2.220),
    ("Pd", 0.2667, 2.520),
    ("Pt", 0.3382, 2.534),
    ("H", 0.0019, 2.571),
    ("C", 0.0046, 3.431),
    ("N", 0.0030, 3.261),
    ("O", 0.0026, 3.118),
];

/// Periodic images summed per axis and direction. Cells thinner than
/// `cutoff / MAX_IMAGE_RANGE` are rejected.
const MAX_IMAGE_RANGE: i64 = 20;

impl LennardJones {
    /// Calculator with the built-in element table and a 2.5 sigma cutoff.
    pub fn new() -> Self {
        let params = DEFAULT_PARAMS
            .iter()
            .map(|&(symbol, epsilon, sigma)| (symbol.to_string(), PairParams { epsilon, sigma }))
            .collect();
        Self {
            params,
            cutoff: 2.5,
        }
    }

    /// Override or add the parameters of one element.
    pub fn with_element(mut self, symbol: &str, epsilon: f64, sigma: f64) -> Self {
        self.params
            .insert(symbol.to_string(), PairParams { epsilon, sigma });
        self
    }

    /// Set the cutoff in units of the pair sigma.
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    fn element(&self, symbol: &str) -> Result<PairParams, SimError> {
        self.params
            .get(symbol)
            .copied()
            .ok_or_else(|| SimError::UnknownElement(symbol.to_string()))
    }

    fn mix(a: PairParams, b: PairParams) -> PairParams {
        PairParams {
            epsilon: (a.epsilon * b.epsilon).sqrt(),
            sigma: 0.5 * (a.sigma + b.sigma),
        }
    }

    /// Lattice translations needed to cover `radius` along each periodic axis.
    fn image_range(atoms: &Atoms, radius: f64) -> Result<[i64; 3], SimError> {
        let volume = atoms.volume();
        let mut range = [0i64; 3];
        for axis in 0..3 {
            if !atoms.pbc()[axis] {
                continue;
            }
            let j = atoms.lattice_vector((axis + 1) % 3);
            let k = atoms.lattice_vector((axis + 2) % 3);
            let face = j.cross(&k).norm();
            if volume < 1e-12 || face < 1e-12 {
                return Err(SimError::InvalidInput(
                    "periodic structure with a degenerate cell".to_string(),
                ));
            }
            let repeats = (radius / (volume / face)).ceil();
            if !repeats.is_finite() || repeats > MAX_IMAGE_RANGE as f64 {
                return Err(SimError::InvalidInput(format!(
                    "cell height {:.4} Å along axis {} is too small for a {:.4} Å cutoff",
                    volume / face,
                    axis,
                    radius
                )));
            }
            range[axis] = repeats as i64;
        }
        Ok(range)
    }
}

impl Default for LennardJones {
    fn default() -> Self {
        Self::new()
    }
}

impl Calculator for LennardJones {
    fn name(&self) -> &str {
        "lennard-jones"
    }

    fn compute(&self, atoms: &Atoms) -> Result<Evaluation, SimError> {
        let species: Vec<PairParams> = atoms
            .symbols()
            .iter()
            .map(|s| self.element(s))
            .collect::<Result<_, _>>()?;
        let max_sigma = species.iter().map(|p| p.sigma).fold(0.0, f64::max);
        let range = Self::image_range(atoms, self.cutoff * max_sigma)?;

        let mut translations = Vec::new();
        for n0 in -range[0]..=range[0] {
            for n1 in -range[1]..=range[1] {
                for n2 in -range[2]..=range[2] {
                    let t = atoms.lattice_vector(0) * n0 as f64
                        + atoms.lattice_vector(1) * n1 as f64
                        + atoms.lattice_vector(2) * n2 as f64;
                    translations.push((n0 == 0 && n1 == 0 && n2 == 0, t));
                }
            }
        }

        let positions = atoms.positions();
        let mut energy = 0.0;
        let mut forces = vec![Vector3::zeros(); atoms.len()];

        for i in 0..atoms.len() {
            for j in 0..atoms.len() {
                let pair = Self::mix(species[i], species[j]);
                let rc = self.cutoff * pair.sigma;
                let shift = {
                    let s6 = (pair.sigma / rc).powi(6);
                    4.0 * pair.epsilon * (s6 * s6 - s6)
                };
                for (is_origin, t) in &translations {
                    if i == j && *is_origin {
                        continue;
                    }
                    let r_vec = positions[j] + t - positions[i];
                    let r = r_vec.norm();
                    if r >= rc {
                        continue;
                    }
                    if r < 1e-8 {
                        return Err(SimError::InvalidInput(format!(
                            "atoms {} and {} overlap",
                            i, j
                        )));
                    }
                    let s6 = (pair.sigma / r).powi(6);
                    let s12 = s6 * s6;
                    // each pair is visited from both ends
                    energy += 0.5 * (4.0 * pair.epsilon * (s12 - s6) - shift);
                    let d_phi = 24.0 * pair.epsilon * (s6 - 2.0 * s12) / r;
                    forces[i] += r_vec * (d_phi / r);
                }
            }
        }

        Ok(Evaluation { energy, forces })
    }
}
