//! Atomistic simulation primitives used by the built-in tasks.
//!
//! Nothing in here knows about workflows; tasks call into it the same way
//! they would call an external simulation library.

pub mod atoms;
pub mod build;
pub mod calculator;
pub mod codec;
pub mod eos;
pub mod neb;
pub mod optimize;

use thiserror::Error;

pub use atoms::Atoms;
pub use build::{Site, add_adsorbate, bulk_fcc, fcc111, fix_bottom_layers};
pub use calculator::{Calculator, Evaluation, LennardJones};
pub use codec::CodecError;
pub use eos::{EosFit, EquationOfState};
pub use neb::{Neb, interpolate};
pub use optimize::{Fire, OptimizationReport, Relaxation, StepTrace, relax};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("no parameters for element '{0}'")]
    UnknownElement(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("fitted curve has no minimum")]
    NoMinimum,

    #[error("images are incompatible: {0}")]
    ImageMismatch(String),
}
