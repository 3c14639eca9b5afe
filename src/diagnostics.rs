//! Non-fatal findings produced while analyzing.
//!
//! Every precision loss (a widened loop, a recursion cut-off, a divisor that
//! may be zero) and every rejected fixed-point format is recorded here. The
//! analysis continues with a conservative value in all of these cases.

use std::collections::HashSet;
use std::fmt;

use fxp_ir::{FunctionId, NodeId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::fixed_point::TypeGenError;

// ═══════════════════════════════════════════════════════════════════════════
// Diagnostic
// ═══════════════════════════════════════════════════════════════════════════

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    /// Result is sound but imprecise
    Warning,
    /// The value could not be analyzed or converted
    Error,
    /// Informational note
    Hint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticKind {
    /// Loop bound exhausted without a fixpoint; loop values widened.
    LoopNotConverged,
    /// Call beyond the recursion limit treated as opaque.
    RecursionLimit,
    /// Indirect call or body-less callee without a known model.
    UnknownCallee,
    DivisorMayBeZero,
    /// Memory access through a pointer with unknown targets.
    UnresolvedPointer,
    /// The derived fixed-point format was rejected.
    TypeGeneration(TypeGenError),
    /// Comparison tolerance exceeds the configured threshold.
    ComparisonMayBeWrong,
}

impl DiagnosticKind {
    /// Kinds that make some computed value conservative.
    pub fn is_imprecision(&self) -> bool {
        !matches!(self, DiagnosticKind::TypeGeneration(_) | DiagnosticKind::ComparisonMayBeWrong)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub node: Option<NodeId>,
    pub function: Option<FunctionId>,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            node: None,
            function: None,
            message: message.into(),
        }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::warning(kind, message)
        }
    }

    pub fn hint(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Hint,
            ..Self::warning(kind, message)
        }
    }

    pub fn at_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn in_function(mut self, function: FunctionId) -> Self {
        self.function = Some(function);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{}: {}", node, self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sink
// ═══════════════════════════════════════════════════════════════════════════

/// Collects diagnostics, keeping one per (kind, node) pair.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    seen: HashSet<(DiagnosticKind, Option<NodeId>)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        if !self.seen.insert((diagnostic.kind, diagnostic.node)) {
            return;
        }
        match diagnostic.severity {
            Severity::Hint => debug!(kind = ?diagnostic.kind, "{}", diagnostic),
            Severity::Warning | Severity::Error => warn!(kind = ?diagnostic.kind, "{}", diagnostic),
        }
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        for diagnostic in other.items {
            self.push(diagnostic);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.kind == kind)
    }

    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    /// Whether any value was widened or cut off.
    pub fn is_imprecise(&self) -> bool {
        self.items.iter().any(|d| d.kind.is_imprecision())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplicates_per_node() {
        let mut sink = Diagnostics::new();
        sink.push(Diagnostic::warning(DiagnosticKind::DivisorMayBeZero, "x").at_node(NodeId(1)));
        sink.push(Diagnostic::warning(DiagnosticKind::DivisorMayBeZero, "x").at_node(NodeId(1)));
        sink.push(Diagnostic::warning(DiagnosticKind::DivisorMayBeZero, "y").at_node(NodeId(2)));
        assert_eq!(sink.len(), 2);
        assert!(sink.is_imprecise());
    }

    #[test]
    fn test_type_generation_is_not_imprecision() {
        let mut sink = Diagnostics::new();
        sink.push(Diagnostic::hint(
            DiagnosticKind::TypeGeneration(TypeGenError::UnboundedRange),
            "kept as float",
        ));
        assert!(!sink.is_imprecise());
        assert!(sink.has(DiagnosticKind::TypeGeneration(TypeGenError::UnboundedRange)));
        assert_eq!(sink.iter().next().unwrap().severity, Severity::Hint);
    }

    #[test]
    fn test_display_includes_node() {
        let d = Diagnostic::error(DiagnosticKind::UnknownCallee, "opaque call").at_node(NodeId(4));
        assert_eq!(d.to_string(), "%4: opaque call");
    }
}
