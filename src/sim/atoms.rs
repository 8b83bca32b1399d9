//! Atomic structures.

use nalgebra::{Matrix3, Vector3};
use std::collections::BTreeMap;

use super::SimError;

/// A periodic (or partially periodic) collection of atoms.
///
/// The cell is stored row-wise: row `i` is lattice vector `i`. Atoms can be
/// fixed, in which case optimizers leave them in place. `tags` carry the
/// layer index of slab atoms (1 = top layer, 0 = untagged).
#[derive(Debug, Clone, PartialEq)]
pub struct Atoms {
    symbols: Vec<String>,
    positions: Vec<Vector3<f64>>,
    cell: Matrix3<f64>,
    pbc: [bool; 3],
    fixed: Vec<bool>,
    tags: Vec<usize>,
}

impl Atoms {
    /// Create an empty structure with the given cell and periodicity.
    pub fn new(cell: Matrix3<f64>, pbc: [bool; 3]) -> Self {
        Self {
            symbols: Vec::new(),
            positions: Vec::new(),
            cell,
            pbc,
            fixed: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Assemble a structure from parallel arrays, checking their lengths.
    pub fn from_parts(
        symbols: Vec<String>,
        positions: Vec<Vector3<f64>>,
        cell: Matrix3<f64>,
        pbc: [bool; 3],
        fixed: Vec<bool>,
        tags: Vec<usize>,
    ) -> Result<Self, SimError> {
        let n = symbols.len();
        if positions.len() != n || fixed.len() != n || tags.len() != n {
            return Err(SimError::InvalidInput(format!(
                "{} symbols but {} positions, {} constraints, {} tags",
                n,
                positions.len(),
                fixed.len(),
                tags.len()
            )));
        }
        Ok(Self {
            symbols,
            positions,
            cell,
            pbc,
            fixed,
            tags,
        })
    }

    /// Append an atom.
    pub fn push(&mut self, symbol: impl Into<String>, position: Vector3<f64>, tag: usize) {
        self.symbols.push(symbol.into());
        self.positions.push(position);
        self.fixed.push(false);
        self.tags.push(tag);
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    pub fn cell(&self) -> &Matrix3<f64> {
        &self.cell
    }

    pub fn pbc(&self) -> [bool; 3] {
        self.pbc
    }

    pub fn fixed(&self) -> &[bool] {
        &self.fixed
    }

    pub fn tags(&self) -> &[usize] {
        &self.tags
    }

    /// Lattice vector `i` (row `i` of the cell).
    pub fn lattice_vector(&self, i: usize) -> Vector3<f64> {
        self.cell.row(i).transpose()
    }

    /// Replace all positions.
    pub fn set_positions(&mut self, positions: &[Vector3<f64>]) -> Result<(), SimError> {
        if positions.len() != self.positions.len() {
            return Err(SimError::InvalidInput(format!(
                "expected {} positions, got {}",
                self.positions.len(),
                positions.len()
            )));
        }
        self.positions.copy_from_slice(positions);
        Ok(())
    }

    /// Fix (or release) the atom at `index`.
    pub fn set_fixed(&mut self, index: usize, fixed: bool) {
        if let Some(flag) = self.fixed.get_mut(index) {
            *flag = fixed;
        }
    }

    /// Cell volume in Å³.
    pub fn volume(&self) -> f64 {
        self.cell.determinant().abs()
    }

    /// Highest z coordinate, or 0 for an empty structure.
    pub fn max_z(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.positions
            .iter()
            .map(|p| p.z)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Element counts.
    pub fn composition(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for symbol in &self.symbols {
            *counts.entry(symbol.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Chemical formula with elements in alphabetical order, e.g. `OPt12`.
    pub fn formula(&self) -> String {
        self.composition()
            .iter()
            .map(|(symbol, &count)| {
                if count == 1 {
                    symbol.clone()
                } else {
                    format!("{}{}", symbol, count)
                }
            })
            .collect()
    }
}
