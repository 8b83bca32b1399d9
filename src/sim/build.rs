//! Structure builders: fcc bulk, fcc(111) slabs, and adsorbates.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::SimError;
use super::atoms::Atoms;

/// High-symmetry adsorption sites on an fcc(111) surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    OnTop,
    Bridge,
    Fcc,
    Hcp,
}

impl Site {
    /// Fractional coordinates in the 1x1 surface cell, relative to a top-layer atom.
    fn fractional(self) -> (f64, f64) {
        match self {
            Site::OnTop => (0.0, 0.0),
            Site::Bridge => (0.5, 0.0),
            Site::Fcc => (1.0 / 3.0, 1.0 / 3.0),
            Site::Hcp => (2.0 / 3.0, 2.0 / 3.0),
        }
    }
}

impl FromStr for Site {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ontop" | "top" => Ok(Site::OnTop),
            "bridge" => Ok(Site::Bridge),
            "fcc" => Ok(Site::Fcc),
            "hcp" => Ok(Site::Hcp),
            other => Err(SimError::InvalidInput(format!("unknown site '{}'", other))),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Site::OnTop => "ontop",
            Site::Bridge => "bridge",
            Site::Fcc => "fcc",
            Site::Hcp => "hcp",
        };
        write!(f, "{}", name)
    }
}

/// Primitive fcc cell with lattice constant `a` (volume a³/4).
pub fn bulk_fcc(symbol: &str, a: f64) -> Result<Atoms, SimError> {
    if !(a > 0.0) {
        return Err(SimError::InvalidInput(format!(
            "lattice constant must be positive, got {}",
            a
        )));
    }
    let h = a / 2.0;
    let cell = Matrix3::new(0.0, h, h, h, 0.0, h, h, h, 0.0);
    let mut atoms = Atoms::new(cell, [true; 3]);
    atoms.push(symbol, Vector3::zeros(), 0);
    Ok(atoms)
}

/// An fcc(111) slab of `nx` x `ny` surface cells and `layers` layers.
///
/// Layers are stacked ABC with `vacuum` Å of empty space above and below.
/// Tags count layers from the top (1 = surface layer). Periodic in-plane
/// only.
pub fn fcc111(
    symbol: &str,
    size: (usize, usize, usize),
    a: f64,
    vacuum: f64,
) -> Result<Atoms, SimError> {
    let (nx, ny, layers) = size;
    if nx == 0 || ny == 0 || layers == 0 {
        return Err(SimError::InvalidInput(format!(
            "slab size must be positive, got {:?}",
            size
        )));
    }
    if !(a > 0.0) || vacuum < 0.0 {
        return Err(SimError::InvalidInput(format!(
            "invalid slab geometry: a = {}, vacuum = {}",
            a, vacuum
        )));
    }

    let d = a / 2f64.sqrt();
    let a1 = Vector3::new(d, 0.0, 0.0);
    let a2 = Vector3::new(d / 2.0, d * 3f64.sqrt() / 2.0, 0.0);
    let spacing = a / 3f64.sqrt();
    let height = (layers - 1) as f64 * spacing + 2.0 * vacuum;

    let cell = Matrix3::from_rows(&[
        (a1 * nx as f64).transpose(),
        (a2 * ny as f64).transpose(),
        Vector3::new(0.0, 0.0, height).transpose(),
    ]);
    let mut atoms = Atoms::new(cell, [true, true, false]);

    for layer in 0..layers {
        let depth = layers - 1 - layer;
        let (fx, fy) = match depth % 3 {
            0 => (0.0, 0.0),
            1 => (2.0 / 3.0, 2.0 / 3.0),
            _ => (1.0 / 3.0, 1.0 / 3.0),
        };
        let z = vacuum + layer as f64 * spacing;
        for j in 0..ny {
            for i in 0..nx {
                let position =
                    a1 * (i as f64 + fx) + a2 * (j as f64 + fy) + Vector3::new(0.0, 0.0, z);
                atoms.push(symbol, position, depth + 1);
            }
        }
    }

    Ok(atoms)
}

/// Fix the bottom `count` layers of a tagged slab.
pub fn fix_bottom_layers(atoms: &mut Atoms, count: usize) {
    let layers = atoms.tags().iter().copied().max().unwrap_or(0);
    let threshold = layers.saturating_sub(count);
    let to_fix: Vec<usize> = atoms
        .tags()
        .iter()
        .enumerate()
        .filter(|&(_, &tag)| tag > threshold)
        .map(|(i, _)| i)
        .collect();
    for i in to_fix {
        atoms.set_fixed(i, true);
    }
}

/// Place an adsorbate `height` Å above the top layer of an fcc(111) slab.
pub fn add_adsorbate(
    slab: &mut Atoms,
    symbol: &str,
    height: f64,
    site: Site,
) -> Result<(), SimError> {
    let top: Vec<&Vector3<f64>> = slab
        .positions()
        .iter()
        .zip(slab.tags())
        .filter(|&(_, &tag)| tag == 1)
        .map(|(p, _)| p)
        .collect();
    let Some(anchor) = top.first() else {
        return Err(SimError::InvalidInput(
            "slab has no tagged top layer".to_string(),
        ));
    };

    // Surface nearest-neighbor distance from the area per top-layer atom.
    let v1 = slab.lattice_vector(0);
    let v2 = slab.lattice_vector(1);
    let area = v1.cross(&v2).norm();
    let d = (area / (top.len() as f64 * 3f64.sqrt() / 2.0)).sqrt();
    let u1 = v1.normalize() * d;
    let u2 = v2.normalize() * d;

    let top_z = top.iter().map(|p| p.z).fold(f64::NEG_INFINITY, f64::max);
    let (fx, fy) = site.fractional();
    let lateral = u1 * fx + u2 * fy;
    let position = Vector3::new(anchor.x + lateral.x, anchor.y + lateral.y, top_z + height);

    slab.push(symbol, position, 0);
    Ok(())
}
