//! Affine error forms.
//!
//! An [`ErrorForm`] is `Σ cᵢ·εᵢ` with every noise symbol `εᵢ ∈ [-1, 1]`.
//! Symbols are tied to the sub-expression that introduced them, so errors of
//! correlated quantities cancel: `x - x` has no error. The worst-case
//! absolute error is `Σ |cᵢ|`.

use std::collections::BTreeMap;
use std::fmt;

use fxp_ir::NodeId;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum NoiseKind {
    /// Error carried by an input value.
    Input,
    /// Rounding into the destination format.
    Rounding,
    /// Non-linear part of a product or quotient.
    Product,
    /// Deviation introduced when merging two forms.
    Join,
    /// Library function approximation.
    Intrinsic,
    /// Raise to the largest operand bound.
    Floor,
}

/// One independent source of error.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NoiseSymbol {
    pub origin: NodeId,
    pub kind: NoiseKind,
    /// Field path for errors of memory contents.
    pub path: Vec<u32>,
}

impl NoiseSymbol {
    pub fn new(origin: NodeId, kind: NoiseKind) -> Self {
        Self {
            origin,
            kind,
            path: Vec::new(),
        }
    }

    pub fn at_path(origin: NodeId, kind: NoiseKind, path: &[u32]) -> Self {
        Self {
            origin,
            kind,
            path: path.to_vec(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErrorForm {
    terms: BTreeMap<NoiseSymbol, f64>,
    /// No finite bound is known.
    unbounded: bool,
}

impl ErrorForm {
    /// A value without error.
    pub fn constant() -> Self {
        Self::default()
    }

    pub fn unbounded() -> Self {
        Self {
            terms: BTreeMap::new(),
            unbounded: true,
        }
    }

    /// A single fresh error source of the given magnitude.
    pub fn input(symbol: NoiseSymbol, magnitude: f64) -> Self {
        Self::constant().with_term(symbol, magnitude)
    }

    pub fn is_unbounded(&self) -> bool {
        self.unbounded
    }

    pub fn is_exact(&self) -> bool {
        !self.unbounded && self.terms.is_empty()
    }

    /// Worst-case absolute error.
    pub fn bound(&self) -> f64 {
        if self.unbounded {
            return f64::INFINITY;
        }
        self.terms.values().map(|c| c.abs()).sum()
    }

    /// Add `magnitude` to the coefficient of `symbol`. Infinite or NaN
    /// magnitudes make the form unbounded.
    pub fn with_term(mut self, symbol: NoiseSymbol, magnitude: f64) -> Self {
        if self.unbounded || magnitude == 0.0 {
            return self;
        }
        if !magnitude.is_finite() {
            return Self::unbounded();
        }
        *self.terms.entry(symbol).or_insert(0.0) += magnitude.abs();
        self.prune();
        self
    }

    fn prune(&mut self) {
        self.terms.retain(|_, c| *c != 0.0);
    }

    /// `a·self + b·other`.
    pub fn combine(&self, a: f64, other: &ErrorForm, b: f64) -> ErrorForm {
        if self.unbounded || other.unbounded {
            return Self::unbounded();
        }
        let mut terms = BTreeMap::new();
        for (symbol, c) in &self.terms {
            *terms.entry(symbol.clone()).or_insert(0.0) += a * c;
        }
        for (symbol, c) in &other.terms {
            *terms.entry(symbol.clone()).or_insert(0.0) += b * c;
        }
        if terms.values().any(|c: &f64| !c.is_finite()) {
            return Self::unbounded();
        }
        let mut form = ErrorForm {
            terms,
            unbounded: false,
        };
        form.prune();
        form
    }

    pub fn add(&self, other: &ErrorForm) -> ErrorForm {
        self.combine(1.0, other, 1.0)
    }

    pub fn sub(&self, other: &ErrorForm) -> ErrorForm {
        self.combine(1.0, other, -1.0)
    }

    pub fn scale(&self, factor: f64) -> ErrorForm {
        self.combine(factor, &ErrorForm::constant(), 0.0)
    }

    pub fn neg(&self) -> ErrorForm {
        self.scale(-1.0)
    }

    /// A form covering both `self` and `other`: their midpoint plus a
    /// deviation term owned by `origin`. Equal forms come back unchanged.
    pub fn join(&self, other: &ErrorForm, origin: NodeId) -> ErrorForm {
        if self == other {
            return self.clone();
        }
        if self.unbounded || other.unbounded {
            return Self::unbounded();
        }
        let half_difference = self.combine(0.5, other, -0.5);
        let midpoint = self.combine(0.5, other, 0.5);
        midpoint.with_term(
            NoiseSymbol::new(origin, NoiseKind::Join),
            half_difference.bound(),
        )
    }

    /// Raise the bound to at least `floor` with a term owned by `origin`.
    pub fn at_least(self, floor: f64, origin: NodeId) -> ErrorForm {
        let bound = self.bound();
        if bound >= floor {
            return self;
        }
        self.with_term(NoiseSymbol::new(origin, NoiseKind::Floor), floor - bound)
    }
}

impl fmt::Display for ErrorForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unbounded {
            return f.write_str("±inf");
        }
        write!(f, "±{:e}", self.bound())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eps(node: u32) -> NoiseSymbol {
        NoiseSymbol::new(NodeId(node), NoiseKind::Input)
    }

    #[test]
    fn test_correlated_errors_cancel() {
        let x = ErrorForm::input(eps(0), 0.5);
        assert!(x.sub(&x).is_exact());
        assert_eq!(x.add(&x).bound(), 1.0);

        let y = ErrorForm::input(eps(1), 0.25);
        assert_eq!(x.sub(&y).bound(), 0.75);
        assert_eq!(x.scale(-4.0).bound(), 2.0);
    }

    #[test]
    fn test_join_covers_both() {
        let a = ErrorForm::input(eps(0), 1.0);
        let b = ErrorForm::input(eps(1), 3.0);
        let joined = a.join(&b, NodeId(9));
        assert!(joined.bound() >= a.bound().max(b.bound()));
        assert_eq!(a.join(&a, NodeId(9)), a);
    }

    #[test]
    fn test_unbounded_is_absorbing() {
        let a = ErrorForm::input(eps(0), 1.0);
        assert!(a.add(&ErrorForm::unbounded()).is_unbounded());
        assert!(a.clone().with_term(eps(2), f64::INFINITY).is_unbounded());
        assert_eq!(ErrorForm::unbounded().bound(), f64::INFINITY);
        assert_eq!(ErrorForm::unbounded().to_string(), "±inf");
    }

    #[test]
    fn test_at_least() {
        let a = ErrorForm::input(eps(0), 1.0);
        assert_eq!(a.clone().at_least(0.5, NodeId(3)), a);
        assert_eq!(a.at_least(2.0, NodeId(3)).bound(), 2.0);
    }
}
