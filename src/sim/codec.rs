//! Text encoding of structures and trajectories.
//!
//! A trajectory is a JSON document holding a list of frames. Structures pass
//! between tasks in this form so that they fit in a parameter context.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::atoms::Atoms;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed structure document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame {frame}: {message}")]
    ShapeMismatch { frame: usize, message: String },

    #[error("structure document holds no frames")]
    Empty,
}

#[derive(Debug, Serialize, Deserialize)]
struct TrajectoryDoc {
    frames: Vec<FrameDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameDoc {
    symbols: Vec<String>,
    positions: Vec<[f64; 3]>,
    cell: [[f64; 3]; 3],
    pbc: [bool; 3],
    #[serde(default)]
    fixed: Vec<bool>,
    #[serde(default)]
    tags: Vec<usize>,
}

impl From<&Atoms> for FrameDoc {
    fn from(atoms: &Atoms) -> Self {
        let row = |i: usize| {
            let v = atoms.lattice_vector(i);
            [v.x, v.y, v.z]
        };
        Self {
            symbols: atoms.symbols().to_vec(),
            positions: atoms.positions().iter().map(|p| [p.x, p.y, p.z]).collect(),
            cell: [row(0), row(1), row(2)],
            pbc: atoms.pbc(),
            fixed: atoms.fixed().to_vec(),
            tags: atoms.tags().to_vec(),
        }
    }
}

impl FrameDoc {
    fn into_atoms(self, frame: usize) -> Result<Atoms, CodecError> {
        let n = self.symbols.len();
        let mismatch = |what: &str, len: usize| CodecError::ShapeMismatch {
            frame,
            message: format!("{} atoms but {} {}", n, len, what),
        };
        if self.positions.len() != n {
            return Err(mismatch("positions", self.positions.len()));
        }
        // constraints and tags may be omitted
        let fixed = if self.fixed.is_empty() {
            vec![false; n]
        } else if self.fixed.len() == n {
            self.fixed
        } else {
            return Err(mismatch("constraint flags", self.fixed.len()));
        };
        let tags = if self.tags.is_empty() {
            vec![0; n]
        } else if self.tags.len() == n {
            self.tags
        } else {
            return Err(mismatch("tags", self.tags.len()));
        };

        let cell = Matrix3::from_rows(&[
            Vector3::from(self.cell[0]).transpose(),
            Vector3::from(self.cell[1]).transpose(),
            Vector3::from(self.cell[2]).transpose(),
        ]);
        let positions = self.positions.into_iter().map(Vector3::from).collect();

        Atoms::from_parts(self.symbols, positions, cell, self.pbc, fixed, tags).map_err(|e| {
            CodecError::ShapeMismatch {
                frame,
                message: e.to_string(),
            }
        })
    }
}

/// Encode a sequence of structures.
pub fn encode(frames: &[Atoms]) -> Result<String, CodecError> {
    let doc = TrajectoryDoc {
        frames: frames.iter().map(FrameDoc::from).collect(),
    };
    Ok(serde_json::to_string(&doc)?)
}

/// Decode every frame of a document.
pub fn decode(text: &str) -> Result<Vec<Atoms>, CodecError> {
    let doc: TrajectoryDoc = serde_json::from_str(text)?;
    if doc.frames.is_empty() {
        return Err(CodecError::Empty);
    }
    doc.frames
        .into_iter()
        .enumerate()
        .map(|(i, frame)| frame.into_atoms(i))
        .collect()
}

/// Decode only the final frame.
pub fn decode_last(text: &str) -> Result<Atoms, CodecError> {
    let mut doc: TrajectoryDoc = serde_json::from_str(text)?;
    let last = doc.frames.pop().ok_or(CodecError::Empty)?;
    last.into_atoms(doc.frames.len())
}
