//! Library functions with a known numeric model.
//!
//! Calls to body-less functions are opaque unless the callee is one of
//! these. Single-precision variants (`sqrtf`, `fabsf`, ...) share the model
//! of their double-precision counterpart.

use crate::metadata::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Fabs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Floor,
    Ceil,
    Fmin,
    Fmax,
}

impl Intrinsic {
    pub fn from_name(name: &str) -> Option<Self> {
        Self::lookup(name).or_else(|| name.strip_suffix('f').and_then(Self::lookup))
    }

    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "fabs" => Intrinsic::Fabs,
            "sqrt" => Intrinsic::Sqrt,
            "exp" => Intrinsic::Exp,
            "log" => Intrinsic::Log,
            "sin" => Intrinsic::Sin,
            "cos" => Intrinsic::Cos,
            "floor" => Intrinsic::Floor,
            "ceil" => Intrinsic::Ceil,
            "fmin" => Intrinsic::Fmin,
            "fmax" => Intrinsic::Fmax,
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            Intrinsic::Fmin | Intrinsic::Fmax => 2,
            _ => 1,
        }
    }

    /// Output range for the given argument ranges.
    pub fn range(self, args: &[Range]) -> Option<Range> {
        if args.len() < self.arity() {
            return None;
        }
        let x = args[0];
        if x.is_poisoned() || args.iter().any(Range::is_poisoned) {
            return Some(Range::poisoned());
        }
        let range = match self {
            Intrinsic::Fabs => Range::new(x.min_magnitude(), x.magnitude()),
            Intrinsic::Sqrt => {
                if x.max < 0.0 {
                    return Some(Range::poisoned());
                }
                Range::new(x.min.max(0.0).sqrt(), x.max.sqrt())
            }
            Intrinsic::Exp => Range::new(x.min.exp(), x.max.exp()),
            Intrinsic::Log => {
                if x.max <= 0.0 {
                    return Some(Range::poisoned());
                }
                Range::new(x.min.max(0.0).ln(), x.max.ln())
            }
            Intrinsic::Sin | Intrinsic::Cos => Range::new(-1.0, 1.0),
            Intrinsic::Floor => Range::new(x.min.floor(), x.max.floor()),
            Intrinsic::Ceil => Range::new(x.min.ceil(), x.max.ceil()),
            Intrinsic::Fmin => Range::new(x.min.min(args[1].min), x.max.min(args[1].max)),
            Intrinsic::Fmax => Range::new(x.min.max(args[1].min), x.max.max(args[1].max)),
        };
        Some(range)
    }

    /// Output error bound for argument ranges and error bounds.
    pub fn error(self, args: &[Range], errors: &[f64]) -> Option<f64> {
        if args.len() < self.arity() || errors.len() < self.arity() {
            return None;
        }
        let (x, e) = (args[0], errors[0]);
        let bound = match self {
            Intrinsic::Fabs => e,
            // |sqrt(x+e) - sqrt(x)| <= min(e / 2sqrt(x), sqrt(e))
            Intrinsic::Sqrt => {
                let low = x.min.max(0.0);
                if low > 0.0 {
                    (e / (2.0 * low.sqrt())).min(e.sqrt())
                } else {
                    e.sqrt()
                }
            }
            // exact input, exact result
            Intrinsic::Exp if e == 0.0 => 0.0,
            Intrinsic::Exp if !x.max.is_finite() || !e.is_finite() => f64::INFINITY,
            Intrinsic::Exp => x.max.exp() * e.exp_m1(),
            Intrinsic::Log => {
                if x.min > e {
                    e / (x.min - e)
                } else {
                    f64::INFINITY
                }
            }
            Intrinsic::Sin | Intrinsic::Cos => e.min(2.0),
            Intrinsic::Floor | Intrinsic::Ceil => e + 1.0,
            Intrinsic::Fmin | Intrinsic::Fmax => e.max(errors[1]),
        };
        Some(if bound.is_nan() { f64::INFINITY } else { bound })
    }
}
