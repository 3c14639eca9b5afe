//! Closed-form interval arithmetic.
//!
//! Every operation is sound: the result contains every value the concrete
//! operation can produce for operands drawn from the input ranges. Poisoned
//! inputs give poisoned outputs.

use fxp_ir::{BinaryOp, CmpPredicate, ValueType};

use crate::metadata::Range;

/// Result of an interval operation that may lose precision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluated {
    pub range: Range,
    /// The divisor may be zero; `range` is unbounded.
    pub divisor_may_be_zero: bool,
}

impl From<Range> for Evaluated {
    fn from(range: Range) -> Self {
        Self {
            range,
            divisor_may_be_zero: false,
        }
    }
}

/// `0 * inf` is 0 for interval purposes.
fn mul_corner(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

/// Hull of the candidate end-points; any undefined corner gives ⊤.
fn hull(corners: [f64; 4]) -> Range {
    if corners.iter().any(|c| c.is_nan()) {
        return Range::top();
    }
    let min = corners.iter().copied().fold(f64::INFINITY, f64::min);
    let max = corners.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Range::new(min, max)
}

fn shift_amounts(amount: &Range) -> (f64, f64) {
    (amount.min.max(0.0).floor(), amount.max.max(0.0).floor())
}

impl Range {
    pub fn add(&self, other: &Range) -> Range {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::poisoned();
        }
        let min = self.min + other.min;
        let max = self.max + other.max;
        // -inf + inf
        if min.is_nan() || max.is_nan() {
            return Range::top();
        }
        Range::new(min, max)
    }

    pub fn sub(&self, other: &Range) -> Range {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> Range {
        Range::new(-self.max, -self.min)
    }

    pub fn mul(&self, other: &Range) -> Range {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::poisoned();
        }
        hull([
            mul_corner(self.min, other.min),
            mul_corner(self.min, other.max),
            mul_corner(self.max, other.min),
            mul_corner(self.max, other.max),
        ])
    }

    /// Division; a divisor containing zero gives ⊤.
    pub fn div(&self, other: &Range) -> Evaluated {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::poisoned().into();
        }
        if other.contains_zero() {
            return Evaluated {
                range: Range::top(),
                divisor_may_be_zero: true,
            };
        }
        hull([
            self.min / other.min,
            self.min / other.max,
            self.max / other.min,
            self.max / other.max,
        ])
        .into()
    }

    /// Remainder with the sign of the dividend, bounded by the divisor
    /// magnitude.
    pub fn rem(&self, other: &Range) -> Range {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::poisoned();
        }
        if self.magnitude() < other.min_magnitude() {
            return *self;
        }
        let bound = other.magnitude();
        let min = if self.min < 0.0 { self.min.max(-bound) } else { 0.0 };
        let max = if self.max > 0.0 { self.max.min(bound) } else { 0.0 };
        Range::new(min, max)
    }

    pub fn shl(&self, amount: &Range) -> Range {
        if self.is_poisoned() || amount.is_poisoned() {
            return Range::poisoned();
        }
        let (lo, hi) = shift_amounts(amount);
        hull([
            mul_corner(self.min, lo.exp2()),
            mul_corner(self.min, hi.exp2()),
            mul_corner(self.max, lo.exp2()),
            mul_corner(self.max, hi.exp2()),
        ])
    }

    /// Arithmetic shift right: division by `2^k` rounding toward -∞.
    pub fn ashr(&self, amount: &Range) -> Range {
        if self.is_poisoned() || amount.is_poisoned() {
            return Range::poisoned();
        }
        let (lo, hi) = shift_amounts(amount);
        hull([
            (self.min / lo.exp2()).floor(),
            (self.min / hi.exp2()).floor(),
            (self.max / lo.exp2()).floor(),
            (self.max / hi.exp2()).floor(),
        ])
    }

    /// Bitwise operations are only bounded for non-negative operands.
    pub fn bitwise(&self, op: BinaryOp, other: &Range) -> Range {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::poisoned();
        }
        if self.min < 0.0 || other.min < 0.0 || self.is_unbounded() || other.is_unbounded() {
            return Range::top();
        }
        let widest = self.max.max(other.max);
        let all_ones = (widest + 1.0).log2().ceil().exp2() - 1.0;
        match op {
            BinaryOp::And => Range::new(0.0, self.max.min(other.max)),
            _ => Range::new(0.0, all_ones),
        }
    }

    /// Apply a two-operand operation.
    pub fn binary(&self, op: BinaryOp, other: &Range) -> Evaluated {
        match op {
            BinaryOp::Add => self.add(other).into(),
            BinaryOp::Sub => self.sub(other).into(),
            BinaryOp::Mul => self.mul(other).into(),
            BinaryOp::Div => self.div(other),
            BinaryOp::Rem => self.rem(other).into(),
            BinaryOp::Shl => self.shl(other).into(),
            BinaryOp::AShr => self.ashr(other).into(),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => self.bitwise(op, other).into(),
        }
    }

    /// Convert to the value set of `to`.
    pub fn cast(&self, to: &ValueType) -> Range {
        match to {
            ValueType::Int { width, signed } => {
                if *width == 1 {
                    return Range::boolean();
                }
                let (lo, hi) = int_bounds(*width, *signed);
                let truncated = Range::new(self.min.trunc(), self.max.trunc());
                if truncated.is_valid() && truncated.is_subset_of(&Range::new(lo, hi)) {
                    truncated
                } else {
                    // wraps around
                    Range::new(lo, hi)
                }
            }
            _ => *self,
        }
    }

    /// Range of a comparison result: `[1,1]` or `[0,0]` when decided.
    pub fn compare(&self, pred: CmpPredicate, other: &Range) -> Range {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::boolean();
        }
        let (always, never) = match pred {
            CmpPredicate::Lt => (self.max < other.min, self.min >= other.max),
            CmpPredicate::Le => (self.max <= other.min, self.min > other.max),
            CmpPredicate::Gt => (self.min > other.max, self.max <= other.min),
            CmpPredicate::Ge => (self.min >= other.max, self.max < other.min),
            CmpPredicate::Eq => (
                self.is_point() && other.is_point() && self.min == other.min,
                self.max < other.min || other.max < self.min,
            ),
            CmpPredicate::Ne => (
                self.max < other.min || other.max < self.min,
                self.is_point() && other.is_point() && self.min == other.min,
            ),
        };
        if always {
            Range::point(1.0)
        } else if never {
            Range::point(0.0)
        } else {
            Range::boolean()
        }
    }
}

fn int_bounds(width: u16, signed: bool) -> (f64, f64) {
    let width = width as f64;
    if signed {
        (-(width - 1.0).exp2(), (width - 1.0).exp2() - 1.0)
    } else {
        (0.0, width.exp2() - 1.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
