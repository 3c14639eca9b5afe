//! Struct-aware metadata model shared by all engines.

pub mod encoding;
pub mod info;
pub mod seeds;
pub mod shape;

pub use info::{CmpErrorInfo, FixedPointFormat, FloatFormat, MdInfo, NumericType, Range, ValueInfo};
pub use seeds::SeedTable;
pub use shape::{FieldShape, Shape, ShapeCache, ShapeId};
