//! Nudged elastic band.
//!
//! The band is a chain of images between two fixed endpoints. Interior images
//! feel the true force perpendicular to the path plus a spring force along
//! it. Tangents follow the upwind scheme of Henkelman and Jónsson, and the
//! highest image can be made to climb.

use nalgebra::Vector3;

use super::SimError;
use super::atoms::Atoms;
use super::calculator::Calculator;
use super::optimize::Optimizable;

/// Linearly interpolate `interior` images between two endpoints.
///
/// The returned path holds `interior + 2` images, endpoints included.
pub fn interpolate(
    initial: &Atoms,
    final_state: &Atoms,
    interior: usize,
) -> Result<Vec<Atoms>, SimError> {
    check_compatible(initial, final_state)?;

    let steps = (interior + 1) as f64;
    let mut path = Vec::with_capacity(interior + 2);
    path.push(initial.clone());
    for i in 1..=interior {
        let f = i as f64 / steps;
        let positions: Vec<Vector3<f64>> = initial
            .positions()
            .iter()
            .zip(final_state.positions())
            .map(|(a, b)| a + (b - a) * f)
            .collect();
        let mut image = initial.clone();
        image.set_positions(&positions)?;
        path.push(image);
    }
    path.push(final_state.clone());
    Ok(path)
}

fn check_compatible(a: &Atoms, b: &Atoms) -> Result<(), SimError> {
    if a.len() != b.len() {
        return Err(SimError::ImageMismatch(format!(
            "{} atoms vs {} atoms",
            a.len(),
            b.len()
        )));
    }
    if let Some(i) = (0..a.len()).find(|&i| a.symbols()[i] != b.symbols()[i]) {
        return Err(SimError::ImageMismatch(format!(
            "atom {} is {} in one image and {} in the other",
            i,
            a.symbols()[i],
            b.symbols()[i]
        )));
    }
    Ok(())
}

/// An elastic band under a calculator, optimizable as a whole.
pub struct Neb<'a> {
    images: Vec<Atoms>,
    energies: Vec<f64>,
    calculator: &'a dyn Calculator,
    spring: f64,
    climb: bool,
}

impl<'a> Neb<'a> {
    /// Build a band from a full path (endpoints included). Endpoint energies
    /// are computed once here.
    pub fn new(
        images: Vec<Atoms>,
        calculator: &'a dyn Calculator,
        spring: f64,
        climb: bool,
    ) -> Result<Self, SimError> {
        if images.len() < 3 {
            return Err(SimError::InvalidInput(format!(
                "a band needs at least one interior image, got {} images",
                images.len()
            )));
        }
        for image in &images[1..] {
            check_compatible(&images[0], image)?;
        }

        let mut energies = vec![0.0; images.len()];
        let last = images.len() - 1;
        energies[0] = calculator.compute(&images[0])?.energy;
        energies[last] = calculator.compute(&images[last])?.energy;

        Ok(Self {
            images,
            energies,
            calculator,
            spring,
            climb,
        })
    }

    pub fn images(&self) -> &[Atoms] {
        &self.images
    }

    pub fn into_images(self) -> Vec<Atoms> {
        self.images
    }

    /// Image energies from the last evaluation, endpoints included.
    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    /// Index of the highest-energy interior image.
    pub fn highest_image(&self) -> usize {
        let last = self.images.len() - 1;
        (1..last)
            .max_by(|&a, &b| self.energies[a].total_cmp(&self.energies[b]))
            .unwrap_or(1)
    }

    /// Forward barrier: highest image energy above the initial state.
    pub fn barrier(&self) -> f64 {
        self.energies[self.highest_image()].max(self.energies[self.images.len() - 1])
            - self.energies[0]
    }

    /// Final minus initial energy.
    pub fn reaction_energy(&self) -> f64 {
        self.energies[self.images.len() - 1] - self.energies[0]
    }

    pub fn transition_state(&self) -> &Atoms {
        &self.images[self.highest_image()]
    }

    fn atoms_per_image(&self) -> usize {
        self.images[0].len()
    }

    fn tangent(&self, i: usize) -> Vec<Vector3<f64>> {
        let prev = self.images[i - 1].positions();
        let here = self.images[i].positions();
        let next = self.images[i + 1].positions();
        let t_plus: Vec<Vector3<f64>> = next.iter().zip(here).map(|(n, h)| n - h).collect();
        let t_minus: Vec<Vector3<f64>> = here.iter().zip(prev).map(|(h, p)| h - p).collect();

        let (e_prev, e, e_next) = (self.energies[i - 1], self.energies[i], self.energies[i + 1]);
        let tangent: Vec<Vector3<f64>> = if e_next > e && e > e_prev {
            t_plus
        } else if e_next < e && e < e_prev {
            t_minus
        } else {
            let d_max = (e_next - e).abs().max((e_prev - e).abs());
            let d_min = (e_next - e).abs().min((e_prev - e).abs());
            let (w_plus, w_minus) = if e_next > e_prev {
                (d_max, d_min)
            } else {
                (d_min, d_max)
            };
            t_plus
                .iter()
                .zip(&t_minus)
                .map(|(p, m)| p * w_plus + m * w_minus)
                .collect()
        };

        // equal energies on both sides leave no weighted tangent
        let tangent: Vec<Vector3<f64>> = if norm(&tangent) < 1e-12 {
            next.iter().zip(prev).map(|(n, p)| n - p).collect()
        } else {
            tangent
        };
        let n = norm(&tangent);
        if n < 1e-12 {
            return tangent;
        }
        tangent.into_iter().map(|t| t / n).collect()
    }
}

impl Optimizable for Neb<'_> {
    fn positions(&self) -> Vec<Vector3<f64>> {
        let last = self.images.len() - 1;
        self.images[1..last]
            .iter()
            .flat_map(|image| image.positions().iter().copied())
            .collect()
    }

    fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<(), SimError> {
        let per_image = self.atoms_per_image();
        let last = self.images.len() - 1;
        if positions.len() != per_image * (last - 1) {
            return Err(SimError::InvalidInput(format!(
                "expected {} band positions, got {}",
                per_image * (last - 1),
                positions.len()
            )));
        }
        for (image, chunk) in self.images[1..last]
            .iter_mut()
            .zip(positions.chunks(per_image.max(1)))
        {
            image.set_positions(chunk)?;
        }
        Ok(())
    }

    fn evaluate(&mut self) -> Result<(f64, Vec<Vector3<f64>>), SimError> {
        let last = self.images.len() - 1;
        let mut true_forces = Vec::with_capacity(last - 1);
        for i in 1..last {
            let eval = self.calculator.compute(&self.images[i])?;
            self.energies[i] = eval.energy;
            true_forces.push(eval.forces);
        }

        let climber = self.climb.then(|| self.highest_image());
        let mut band_forces = Vec::with_capacity(self.atoms_per_image() * (last - 1));
        for (i, forces) in (1..last).zip(true_forces) {
            let tau = self.tangent(i);
            let f_par = dot(&forces, &tau);

            let image_forces: Vec<Vector3<f64>> = if climber == Some(i) {
                forces
                    .iter()
                    .zip(&tau)
                    .map(|(f, t)| f - t * (2.0 * f_par))
                    .collect()
            } else {
                let here = self.images[i].positions();
                let d_next = distance(self.images[i + 1].positions(), here);
                let d_prev = distance(here, self.images[i - 1].positions());
                let f_spring = self.spring * (d_next - d_prev);
                forces
                    .iter()
                    .zip(&tau)
                    .map(|(f, t)| f - t * f_par + t * f_spring)
                    .collect()
            };

            band_forces.extend(
                image_forces
                    .into_iter()
                    .zip(self.images[i].fixed())
                    .map(|(f, &fixed)| if fixed { Vector3::zeros() } else { f }),
            );
        }

        let energy = self.energies[1..last]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        Ok((energy, band_forces))
    }
}

fn dot(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.dot(y)).sum()
}

fn norm(v: &[Vector3<f64>]) -> f64 {
    dot(v, v).sqrt()
}

fn distance(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).norm_squared())
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::calculator::Evaluation;
    use crate::sim::optimize::Fire;
    use nalgebra::Matrix3;

    /// One particle in E = (x² - 1)² + y², minima at x = ±1, saddle at the origin.
    struct DoubleWell;

    impl Calculator for DoubleWell {
        fn name(&self) -> &str {
            "double-well"
        }

        fn compute(&self, atoms: &Atoms) -> Result<Evaluation, SimError> {
            let p = atoms.positions()[0];
            let energy = (p.x * p.x - 1.0).powi(2) + p.y * p.y;
            let force = Vector3::new(-4.0 * p.x * (p.x * p.x - 1.0), -2.0 * p.y, 0.0);
            Ok(Evaluation {
                energy,
                forces: vec![force],
            })
        }
    }

    fn particle(x: f64, y: f64) -> Atoms {
        let mut atoms = Atoms::new(Matrix3::from_diagonal_element(10.0), [false; 3]);
        atoms.push("H", Vector3::new(x, y, 0.0), 0);
        atoms
    }

    #[test]
    fn test_interpolate_includes_endpoints() {
        let path = interpolate(&particle(-1.0, 0.0), &particle(1.0, 0.0), 3).unwrap();

        assert_eq!(path.len(), 5);
        let xs: Vec<f64> = path.iter().map(|a| a.positions()[0].x).collect();
        assert_eq!(xs, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_interpolate_rejects_different_species() {
        let mut other = Atoms::new(Matrix3::from_diagonal_element(10.0), [false; 3]);
        other.push("O", Vector3::zeros(), 0);

        let err = interpolate(&particle(0.0, 0.0), &other, 3).unwrap_err();
        assert!(matches!(err, SimError::ImageMismatch(_)));
    }

    #[test]
    fn test_climbing_band_finds_saddle() {
        let mut path = interpolate(&particle(-1.0, 0.0), &particle(1.0, 0.0), 3).unwrap();
        // bow the band off the minimum energy path
        for image in &mut path[1..4] {
            let p = image.positions()[0];
            image.set_positions(&[Vector3::new(p.x, 0.3, 0.0)]).unwrap();
        }
        let calc = DoubleWell;
        let mut band = Neb::new(path, &calc, 0.1, true).unwrap();

        let report = Fire::new(1e-3, 2000).run(&mut band, &mut |_| {}).unwrap();

        assert!(report.converged);
        assert!((band.barrier() - 1.0).abs() < 1e-3);
        assert!(band.reaction_energy().abs() < 1e-12);
        let saddle = band.transition_state().positions()[0];
        assert!(saddle.x.abs() < 1e-2 && saddle.y.abs() < 1e-2);
    }

    #[test]
    fn test_tangent_on_flat_energy_profile() {
        let calc = DoubleWell;
        // both endpoints sit at E = 0 and the interior energy is still unset
        let band = Neb::new(
            vec![particle(-1.0, 0.0), particle(0.0, 0.5), particle(1.0, 0.0)],
            &calc,
            0.1,
            false,
        )
        .unwrap();

        let tangent = band.tangent(1);

        assert!((tangent[0] - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_band_requires_interior_image() {
        let calc = DoubleWell;
        let result = Neb::new(vec![particle(-1.0, 0.0), particle(1.0, 0.0)], &calc, 0.1, false);
        assert!(matches!(result, Err(SimError::InvalidInput(_))));
    }
}
