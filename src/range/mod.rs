//! Range propagation: interval arithmetic, abstract memory and the engine.

pub mod engine;
pub mod interval;
pub mod memory;

pub use engine::{RangeEngine, RangeOutcome};
pub use interval::Evaluated;
pub use memory::{Location, PointsTo};
