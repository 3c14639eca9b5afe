//! Static analyses for converting floating-point programs to fixed point.
//!
//! The pipeline propagates value ranges over a [`Program`](fxp_ir::Program),
//! derives a fixed-point format for every enabled value and bounds the
//! worst-case error the conversion introduces. See [`Analysis`].

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod error_propagation;
pub mod fixed_point;
pub mod intrinsics;
pub mod metadata;
pub mod pipeline;
pub mod range;
pub mod report;
pub mod walk;

pub use config::{AnalysisConfig, SizingPolicy};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use error::AnalysisError;
pub use error_propagation::{ErrorEngine, ErrorForm, ErrorOutcome};
pub use fixed_point::{derive, TypeDeriver, TypeGenError};
pub use metadata::{
    CmpErrorInfo, FixedPointFormat, FloatFormat, MdInfo, NumericType, Range, SeedTable, ShapeCache, ValueInfo,
};
pub use pipeline::{Analysis, AnalysisResult, PersistedRecords, SizingFeedback};
pub use range::{RangeEngine, RangeOutcome};
pub use report::{ErrorReport, FlaggedComparison};
