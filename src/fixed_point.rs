//! Fixed-point format derivation.
//!
//! [`derive`] maps a range to the narrowest format of the sizing policy that
//! holds every value of the range with enough fractional precision. It never
//! fails: a best-effort format comes back with a [`TypeGenError`] code and
//! the caller decides whether to keep the value floating-point.

use std::collections::HashMap;

use fxp_ir::{FloatStandard, NodeId, Program};
use serde::Serialize;
use tracing::debug;

use crate::config::SizingPolicy;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::metadata::{FixedPointFormat, FloatFormat, MdInfo, NumericType, Range};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum TypeGenError {
    NoError,
    /// The range contains NaN.
    InvalidRange,
    /// The range has an infinite end-point.
    UnboundedRange,
    NotEnoughFracBits,
    /// Even the widest format cannot hold the integer part.
    NotEnoughIntAndFracBits,
}

/// Fractional bits needed to represent `value` exactly.
fn exact_frac_bits(value: f64) -> i64 {
    if value == 0.0 || !value.is_finite() {
        return 0;
    }
    let bits = value.abs().to_bits();
    let raw_exponent = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exponent) = if raw_exponent == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), raw_exponent - 1075)
    };
    let lowest_bit = exponent + mantissa.trailing_zeros() as i64;
    (-lowest_bit).max(0)
}

/// Derive a fixed-point format for `range`.
pub fn derive(range: &Range, policy: &SizingPolicy) -> (FixedPointFormat, TypeGenError) {
    let base = policy.min_total_bits;
    if range.is_poisoned() {
        return (FixedPointFormat::new(base, 0, true), TypeGenError::InvalidRange);
    }
    let signed = range.min < 0.0;
    if range.is_unbounded() {
        return (FixedPointFormat::new(base, 0, signed), TypeGenError::UnboundedRange);
    }

    let magnitude = range.magnitude();
    let int_bits = (magnitude + 1.0).log2().ceil() as i64 + signed as i64;
    // Degenerate ranges never need more bits than their one value.
    let max_frac = if range.is_point() {
        exact_frac_bits(range.min)
    } else {
        i64::MAX
    };
    // Leading fractional bits that are always zero.
    let wasted = if magnitude > 0.0 {
        (-magnitude.log2()).ceil().max(0.0) as i64
    } else {
        0
    };
    let min_frac = policy.min_frac_bits as i64;
    let satisfied = |frac: i64| frac >= 0 && (frac == max_frac || frac - wasted >= min_frac);

    let mut total = base as i64;
    let mut frac = (total - int_bits).min(max_frac);
    while !satisfied(frac) && total < policy.max_total_bits as i64 {
        total = (total + policy.bit_increment as i64).min(policy.max_total_bits as i64);
        frac = (total - int_bits).min(max_frac);
    }

    let format = FixedPointFormat::new(total as u32, frac.max(0) as u32, signed);
    let outcome = if satisfied(frac) {
        TypeGenError::NoError
    } else if int_bits > total {
        TypeGenError::NotEnoughIntAndFracBits
    } else {
        TypeGenError::NotEnoughFracBits
    };
    (format, outcome)
}

// ═══════════════════════════════════════════════════════════════════════════
// Type assignment
// ═══════════════════════════════════════════════════════════════════════════

/// Assigns numeric types to analyzed values. Formats of constant ranges are
/// memoized per deriver.
pub struct TypeDeriver {
    policy: SizingPolicy,
    constants: HashMap<(u64, u64), (FixedPointFormat, TypeGenError)>,
}

impl TypeDeriver {
    pub fn new(policy: SizingPolicy) -> Self {
        Self {
            policy,
            constants: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &SizingPolicy {
        &self.policy
    }

    pub fn cached_constants(&self) -> usize {
        self.constants.len()
    }

    pub fn derive(&mut self, range: &Range) -> (FixedPointFormat, TypeGenError) {
        if !range.is_point() || range.is_poisoned() {
            return derive(range, &self.policy);
        }
        let key = (range.min.to_bits(), range.max.to_bits());
        let policy = self.policy;
        *self
            .constants
            .entry(key)
            .or_insert_with(|| derive(range, &policy))
    }

    /// Type every enabled slot that has a range but no seeded type. Rejected
    /// formats keep the slot floating-point.
    pub fn assign(
        &mut self,
        program: &Program,
        infos: &mut HashMap<NodeId, MdInfo>,
        diagnostics: &mut Diagnostics,
    ) {
        let mut nodes: Vec<NodeId> = infos.keys().copied().collect();
        nodes.sort();
        for node in nodes {
            let Some(info) = infos.get_mut(&node) else {
                continue;
            };
            let node_ty = &program.node(node).ty;
            let storage_ty = node_ty.pointee().unwrap_or(node_ty);
            info.for_each_leaf_mut(&mut |path, leaf| {
                if !leaf.enabled || leaf.numeric_type.is_some() {
                    return;
                }
                let Some(range) = leaf.range else {
                    return;
                };
                let (format, outcome) = self.derive(&range);
                if outcome == TypeGenError::NoError {
                    leaf.numeric_type = Some(NumericType::Fixed(format));
                    return;
                }
                let standard = program
                    .types
                    .field_type(storage_ty, path)
                    .and_then(|ty| ty.innermost().float_standard())
                    .unwrap_or(FloatStandard::Double);
                leaf.numeric_type = Some(NumericType::Float(FloatFormat::new(
                    standard,
                    finite_magnitude(&range),
                )));
                debug!(%node, ?outcome, %range, "keeping value in floating point");
                diagnostics.push(
                    Diagnostic::hint(
                        DiagnosticKind::TypeGeneration(outcome),
                        format!("no fixed-point format for {} ({:?}), kept as {}", range, outcome, standard),
                    )
                    .at_node(node),
                );
            });
        }
    }
}

fn finite_magnitude(range: &Range) -> f64 {
    let magnitude = range.magnitude();
    if magnitude.is_finite() {
        magnitude
    } else {
        f64::MAX
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
