//! Fatal analysis errors.
//!
//! Imprecision is never an error: it is reported through
//! [`Diagnostics`](crate::diagnostics::Diagnostics) and the analysis carries on
//! with a widened value. Only corruption between the program model and the
//! records attached to it stops an analysis.

use fxp_ir::{NodeId, ProgramError, TypeId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("record for {node} does not match its type shape: {reason}")]
    ShapeMismatch { node: NodeId, reason: String },

    #[error("composite {ty} has {expected} fields but its record has {found}")]
    ArityMismatch {
        ty: TypeId,
        expected: usize,
        found: usize,
    },

    #[error("seed attached to unknown node {0}")]
    UnknownNode(NodeId),

    #[error("malformed persisted record: {0}")]
    MalformedRecord(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Program(#[from] ProgramError),
}
