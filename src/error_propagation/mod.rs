//! Worst-case error bounds for typed programs.

pub mod affine;
pub mod engine;

pub use affine::{ErrorForm, NoiseKind, NoiseSymbol};
pub use engine::{ErrorEngine, ErrorOutcome};
