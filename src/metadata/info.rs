//! Per-value analysis records.
//!
//! A [`ValueInfo`] is the scalar slot the three engines fill in: the range
//! from range propagation, the numeric type from the fixed-point deriver and
//! the seed error. [`MdInfo`] nests slots to mirror composite types.

use std::fmt;

use fxp_ir::{FloatStandard, ValueType};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Range
// ═══════════════════════════════════════════════════════════════════════════

/// Closed interval `[min, max]`. Infinite end-points mean unbounded, NaN
/// marks a poisoned range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn point(value: f64) -> Self {
        Self::new(value, value)
    }

    /// The unbounded range.
    pub fn top() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn poisoned() -> Self {
        Self::new(f64::NAN, f64::NAN)
    }

    pub fn boolean() -> Self {
        Self::new(0.0, 1.0)
    }

    pub fn is_top(&self) -> bool {
        self.min == f64::NEG_INFINITY && self.max == f64::INFINITY
    }

    pub fn is_poisoned(&self) -> bool {
        self.min.is_nan() || self.max.is_nan()
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_infinite() || self.max.is_infinite()
    }

    pub fn is_valid(&self) -> bool {
        !self.is_poisoned() && self.min <= self.max
    }

    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(0.0)
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Largest absolute value in the range.
    pub fn magnitude(&self) -> f64 {
        self.min.abs().max(self.max.abs())
    }

    /// Smallest absolute value in the range.
    pub fn min_magnitude(&self) -> f64 {
        if self.contains_zero() {
            0.0
        } else {
            self.min.abs().min(self.max.abs())
        }
    }

    /// Smallest range containing both. Poison is contagious.
    pub fn union(&self, other: &Range) -> Range {
        if self.is_poisoned() || other.is_poisoned() {
            return Range::poisoned();
        }
        Range::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn is_subset_of(&self, other: &Range) -> bool {
        other.min <= self.min && self.max <= other.max
    }

    /// Equality that treats two poisoned ranges as the same.
    pub fn same_as(&self, other: &Range) -> bool {
        (self.is_poisoned() && other.is_poisoned()) || self == other
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Numeric types
// ═══════════════════════════════════════════════════════════════════════════

/// Binary fixed-point format: a `width`-bit integer scaled by `2^-frac_bits`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedPointFormat {
    pub width: u32,
    pub frac_bits: u32,
    pub signed: bool,
}

impl FixedPointFormat {
    pub fn new(width: u32, frac_bits: u32, signed: bool) -> Self {
        Self {
            width,
            frac_bits,
            signed,
        }
    }

    /// Integer bits, sign bit included.
    pub fn int_bits(&self) -> u32 {
        self.width.saturating_sub(self.frac_bits)
    }

    fn scale(&self) -> f64 {
        (-(self.frac_bits as f64)).exp2()
    }

    /// Half of one unit in the last place.
    pub fn rounding_error(&self) -> f64 {
        self.scale() / 2.0
    }

    pub fn min_value(&self) -> f64 {
        if self.signed {
            -(self.int_bits() as f64 - 1.0).exp2()
        } else {
            0.0
        }
    }

    pub fn max_value(&self) -> f64 {
        let magnitude_bits = if self.signed {
            self.width - 1
        } else {
            self.width
        };
        ((magnitude_bits as f64).exp2() - 1.0) * self.scale()
    }

    /// Round to the nearest representable value, saturating at the bounds.
    pub fn quantize(&self, value: f64) -> f64 {
        let steps = (value / self.scale()).round();
        (steps * self.scale()).clamp(self.min_value(), self.max_value())
    }
}

impl fmt::Display for FixedPointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.signed { 's' } else { 'u' };
        write!(f, "{}{}_{}fixp", sign, self.int_bits(), self.frac_bits)
    }
}

/// A value kept in a binary floating-point format.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloatFormat {
    pub standard: FloatStandard,
    /// Largest magnitude the value reaches.
    pub greatest: f64,
}

impl FloatFormat {
    pub fn new(standard: FloatStandard, greatest: f64) -> Self {
        Self { standard, greatest }
    }

    /// Half ulp at the largest magnitude.
    pub fn rounding_error(&self) -> f64 {
        if self.greatest == 0.0 || !self.greatest.is_finite() {
            return 0.0;
        }
        let exponent = self.greatest.abs().log2().floor();
        (exponent - self.standard.precision() as f64).exp2()
    }
}

impl fmt::Display for FloatFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Float_{}_{}", self.standard, self.greatest)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum NumericType {
    Fixed(FixedPointFormat),
    Float(FloatFormat),
}

impl NumericType {
    pub fn rounding_error(&self) -> f64 {
        match self {
            NumericType::Fixed(fmt) => fmt.rounding_error(),
            NumericType::Float(fmt) => fmt.rounding_error(),
        }
    }

    pub fn as_fixed(&self) -> Option<&FixedPointFormat> {
        match self {
            NumericType::Fixed(fmt) => Some(fmt),
            NumericType::Float(_) => None,
        }
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericType::Fixed(fixed) => write!(f, "{}", fixed),
            NumericType::Float(float) => write!(f, "{}", float),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Scalar slots
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub numeric_type: Option<NumericType>,
    pub range: Option<Range>,
    pub initial_error: Option<f64>,
    /// Candidate for conversion to fixed point.
    pub enabled: bool,
    /// Seeded range is authoritative and never widened.
    pub is_final: bool,
}

impl ValueInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot for a value of type `ty` that carries no seed; only
    /// floating-point values are conversion candidates.
    pub fn fresh(ty: &ValueType) -> Self {
        Self {
            enabled: ty.innermost().is_float(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_type(mut self, numeric_type: NumericType) -> Self {
        self.numeric_type = Some(numeric_type);
        self
    }

    pub fn with_initial_error(mut self, error: f64) -> Self {
        self.initial_error = Some(error);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_final(mut self) -> Self {
        self.is_final = true;
        self
    }

    fn is_pinned(&self) -> bool {
        self.is_final && self.range.is_some()
    }

    /// Grow the range to include `range`. Returns whether it changed.
    pub fn absorb(&mut self, range: Range) -> bool {
        if self.is_pinned() {
            return false;
        }
        let joined = match self.range {
            Some(old) => old.union(&range),
            None => range,
        };
        let changed = !self.range.is_some_and(|old| old.same_as(&joined));
        self.range = Some(joined);
        changed
    }

    /// Replace the range by the unbounded range unless pinned.
    pub fn widen_to_top(&mut self) -> bool {
        if self.is_pinned() || self.range.is_some_and(|r| r.is_top()) {
            return false;
        }
        self.range = Some(Range::top());
        true
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Struct-aware records
// ═══════════════════════════════════════════════════════════════════════════

/// Analysis record of a value: one slot, or one entry per composite field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MdInfo {
    Scalar(ValueInfo),
    Aggregate(Vec<Option<MdInfo>>),
}

impl MdInfo {
    pub fn scalar(&self) -> Option<&ValueInfo> {
        match self {
            MdInfo::Scalar(info) => Some(info),
            MdInfo::Aggregate(_) => None,
        }
    }

    pub fn scalar_mut(&mut self) -> Option<&mut ValueInfo> {
        match self {
            MdInfo::Scalar(info) => Some(info),
            MdInfo::Aggregate(_) => None,
        }
    }

    pub fn range(&self) -> Option<Range> {
        self.scalar().and_then(|info| info.range)
    }

    /// Number of fields of an aggregate record.
    pub fn arity(&self) -> Option<usize> {
        match self {
            MdInfo::Scalar(_) => None,
            MdInfo::Aggregate(fields) => Some(fields.len()),
        }
    }

    /// Follow a field path. A scalar reached before the path ends summarizes
    /// everything below it and is returned as is.
    pub fn resolve(&self, path: &[u32]) -> Option<&MdInfo> {
        match (self, path.split_first()) {
            (_, None) | (MdInfo::Scalar(_), Some(_)) => Some(self),
            (MdInfo::Aggregate(fields), Some((head, rest))) => {
                fields.get(*head as usize)?.as_ref()?.resolve(rest)
            }
        }
    }

    pub fn resolve_mut(&mut self, path: &[u32]) -> Option<&mut MdInfo> {
        let Some((head, rest)) = path.split_first() else {
            return Some(self);
        };
        match self {
            scalar @ MdInfo::Scalar(_) => Some(scalar),
            MdInfo::Aggregate(fields) => fields.get_mut(*head as usize)?.as_mut()?.resolve_mut(rest),
        }
    }

    /// Leaf-wise union with `other`. Mismatched shapes are merged
    /// conservatively by folding the finer side into the coarser one.
    pub fn join(&mut self, other: &MdInfo) -> bool {
        match (self, other) {
            (MdInfo::Scalar(mine), MdInfo::Scalar(theirs)) => match theirs.range {
                Some(range) => mine.absorb(range),
                None => false,
            },
            (MdInfo::Aggregate(mine), MdInfo::Aggregate(theirs)) => {
                let mut changed = false;
                for (slot, incoming) in mine.iter_mut().zip(theirs) {
                    let Some(incoming) = incoming else {
                        continue;
                    };
                    match slot {
                        Some(existing) => changed |= existing.join(incoming),
                        None => {
                            *slot = Some(incoming.clone());
                            changed = true;
                        }
                    }
                }
                changed
            }
            (MdInfo::Scalar(mine), aggregate) => {
                let mut changed = false;
                for (_, leaf) in aggregate.leaves() {
                    if let Some(range) = leaf.range {
                        changed |= mine.absorb(range);
                    }
                }
                changed
            }
            (aggregate, MdInfo::Scalar(theirs)) => {
                let Some(range) = theirs.range else {
                    return false;
                };
                let mut changed = false;
                aggregate.for_each_leaf_mut(&mut |_, leaf| changed |= leaf.absorb(range));
                changed
            }
        }
    }

    /// Every scalar slot with its field path.
    pub fn leaves(&self) -> Vec<(Vec<u32>, &ValueInfo)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, path: &mut Vec<u32>, out: &mut Vec<(Vec<u32>, &'a ValueInfo)>) {
        match self {
            MdInfo::Scalar(info) => out.push((path.clone(), info)),
            MdInfo::Aggregate(fields) => {
                for (index, field) in fields.iter().enumerate() {
                    if let Some(field) = field {
                        path.push(index as u32);
                        field.collect_leaves(path, out);
                        path.pop();
                    }
                }
            }
        }
    }

    pub fn for_each_leaf_mut(&mut self, f: &mut dyn FnMut(&[u32], &mut ValueInfo)) {
        fn walk(info: &mut MdInfo, path: &mut Vec<u32>, f: &mut dyn FnMut(&[u32], &mut ValueInfo)) {
            match info {
                MdInfo::Scalar(slot) => f(path, slot),
                MdInfo::Aggregate(fields) => {
                    for (index, field) in fields.iter_mut().enumerate() {
                        if let Some(field) = field {
                            path.push(index as u32);
                            walk(field, path, f);
                            path.pop();
                        }
                    }
                }
            }
        }
        walk(self, &mut Vec::new(), f);
    }

    /// Widen every non-final leaf to the unbounded range.
    pub fn widen_to_top(&mut self) -> bool {
        let mut changed = false;
        self.for_each_leaf_mut(&mut |_, leaf| changed |= leaf.widen_to_top());
        changed
    }

    /// Whether any leaf is a conversion candidate.
    pub fn is_conversion_enabled(&self) -> bool {
        self.leaves().iter().any(|(_, leaf)| leaf.enabled)
    }

    /// Union of all leaf ranges, `None` if no leaf has one.
    pub fn summary_range(&self) -> Option<Range> {
        self.leaves()
            .into_iter()
            .filter_map(|(_, leaf)| leaf.range)
            .reduce(|a, b| a.union(&b))
    }
}

/// Outcome of error analysis for one comparison.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CmpErrorInfo {
    /// Sum of the operands' error bounds.
    pub tolerance: f64,
    pub may_be_wrong: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(min: f64, max: f64) -> MdInfo {
        MdInfo::Scalar(ValueInfo::new().with_range(Range::new(min, max)))
    }

    #[test]
    fn test_union_and_poison() {
        let a = Range::new(-1.0, 2.0);
        let b = Range::new(0.5, 10.0);
        assert_eq!(a.union(&b), Range::new(-1.0, 10.0));
        assert!(a.union(&Range::poisoned()).is_poisoned());
        assert!(Range::poisoned().same_as(&Range::poisoned()));
        assert!(!Range::poisoned().is_valid());
        assert!(!Range::new(2.0, 1.0).is_valid());
    }

    #[test]
    fn test_magnitudes() {
        let r = Range::new(-20.0, 10.0);
        assert_eq!(r.magnitude(), 20.0);
        assert_eq!(r.min_magnitude(), 0.0);
        assert_eq!(Range::new(-20.0, -10.0).min_magnitude(), 10.0);
        assert!(Range::top().is_top());
        assert!(Range::top().is_unbounded());
    }

    #[test]
    fn test_fixed_point_bounds() {
        let fmt = FixedPointFormat::new(32, 16, true);
        assert_eq!(fmt.int_bits(), 16);
        assert_eq!(fmt.min_value(), -32768.0);
        assert_eq!(fmt.max_value(), (2f64.powi(31) - 1.0) / 65536.0);
        assert_eq!(fmt.rounding_error(), 2f64.powi(-17));
        assert_eq!(fmt.to_string(), "s16_16fixp");
        assert_eq!(FixedPointFormat::new(8, 3, false).to_string(), "u5_3fixp");
        assert_eq!(fmt.quantize(1e9), fmt.max_value());
    }

    #[test]
    fn test_float_rounding_error() {
        let fmt = FloatFormat::new(FloatStandard::Float, 100.0);
        // floor(log2(100)) = 6
        assert_eq!(fmt.rounding_error(), 2f64.powi(6 - 24));
        assert_eq!(FloatFormat::new(FloatStandard::Double, 0.0).rounding_error(), 0.0);
    }

    #[test]
    fn test_final_slot_is_not_widened() {
        let mut info = ValueInfo::new().with_range(Range::new(0.0, 1.0)).with_final();
        assert!(!info.absorb(Range::new(-5.0, 5.0)));
        assert!(!info.widen_to_top());
        assert_eq!(info.range, Some(Range::new(0.0, 1.0)));

        // Final without a seed range still learns one.
        let mut open = ValueInfo::new().with_final();
        assert!(open.absorb(Range::new(1.0, 2.0)));
    }

    #[test]
    fn test_absorb_reports_change() {
        let mut info = ValueInfo::new();
        assert!(info.absorb(Range::new(1.0, 2.0)));
        assert!(!info.absorb(Range::new(1.5, 2.0)));
        assert!(info.absorb(Range::new(3.0, 3.0)));
        assert_eq!(info.range, Some(Range::new(1.0, 3.0)));
    }

    #[test]
    fn test_resolve_paths() {
        let info = MdInfo::Aggregate(vec![
            Some(slot(0.0, 1.0)),
            Some(MdInfo::Aggregate(vec![None, Some(slot(2.0, 3.0))])),
        ]);
        assert_eq!(info.resolve(&[0]).and_then(MdInfo::range), Some(Range::new(0.0, 1.0)));
        assert_eq!(info.resolve(&[1, 1]).and_then(MdInfo::range), Some(Range::new(2.0, 3.0)));
        assert!(info.resolve(&[1, 0]).is_none());
        assert!(info.resolve(&[2]).is_none());
        // Paths below a scalar collapse onto it.
        assert_eq!(info.resolve(&[0, 4]).and_then(MdInfo::range), Some(Range::new(0.0, 1.0)));
        assert_eq!(info.leaves().len(), 2);
        assert_eq!(info.arity(), Some(2));
    }

    #[test]
    fn test_join_aggregates() {
        let mut mine = MdInfo::Aggregate(vec![Some(slot(0.0, 1.0)), None]);
        let theirs = MdInfo::Aggregate(vec![Some(slot(-1.0, 0.5)), Some(slot(4.0, 4.0))]);
        assert!(mine.join(&theirs));
        assert_eq!(mine.resolve(&[0]).and_then(MdInfo::range), Some(Range::new(-1.0, 1.0)));
        assert_eq!(mine.resolve(&[1]).and_then(MdInfo::range), Some(Range::new(4.0, 4.0)));
        assert!(!mine.join(&theirs));
        assert_eq!(mine.summary_range(), Some(Range::new(-1.0, 4.0)));
    }

    #[test]
    fn test_conversion_enabled_if_any_leaf() {
        let disabled = MdInfo::Scalar(ValueInfo::new());
        let enabled = MdInfo::Scalar(ValueInfo::new().with_enabled(true));
        assert!(!MdInfo::Aggregate(vec![Some(disabled.clone()), None]).is_conversion_enabled());
        assert!(MdInfo::Aggregate(vec![Some(disabled), Some(enabled)]).is_conversion_enabled());
    }
}
