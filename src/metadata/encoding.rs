//! Persisted record layout.
//!
//! Records are stored as a small tree of tuples so that they can be attached
//! to the compiled program and read back by a later pass:
//!
//! ```text
//! scalar     = (type | null, (min, max) | null, (error) | null, i2 flags)
//! flags      = enabled | final << 1
//! fixed type = ("fixp", i32 width, i32 frac_bits)   width is negated when signed
//! float type = ("float", i32 standard, double greatest)
//! composite  = (field | null, ...)
//! arguments  = (i32 tag, record, ...)                tag 0 null, 1 scalar, 2 composite
//! comparison = (double tolerance)
//! error      = (double)
//! unroll     = "N N U ..."                           U marks an unknown count
//! ```
//!
//! `null` is the absent sentinel and is written as a boolean `false`
//! (`i1 0`, [`MdNode::NULL`]).

use fxp_ir::{FloatStandard, Function};
use serde::{Deserialize, Serialize};

use super::info::{CmpErrorInfo, FixedPointFormat, FloatFormat, MdInfo, NumericType, Range, ValueInfo};
use crate::error::AnalysisError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MdNode {
    Str(String),
    Int { bits: u32, value: i64 },
    Double(f64),
    Tuple(Vec<MdNode>),
}

impl MdNode {
    /// Absent sentinel.
    pub const NULL: MdNode = MdNode::Int { bits: 1, value: 0 };

    fn i32(value: i64) -> Self {
        MdNode::Int { bits: 32, value }
    }

    fn tuple(&self) -> Result<&[MdNode], AnalysisError> {
        match self {
            MdNode::Tuple(items) => Ok(items),
            other => Err(malformed(format!("expected tuple, found {:?}", other))),
        }
    }

    fn double(&self) -> Result<f64, AnalysisError> {
        match self {
            MdNode::Double(v) => Ok(*v),
            other => Err(malformed(format!("expected double, found {:?}", other))),
        }
    }

    fn int(&self) -> Result<i64, AnalysisError> {
        match self {
            MdNode::Int { value, .. } => Ok(*value),
            other => Err(malformed(format!("expected integer, found {:?}", other))),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, MdNode::Int { bits: 1, value: 0 })
    }

    /// Scalar records are the only 4-tuples ending in a 2-bit flag word.
    fn is_scalar_record(&self) -> bool {
        matches!(self, MdNode::Tuple(items)
            if items.len() == 4 && matches!(items[3], MdNode::Int { bits: 2, .. }))
    }
}

fn malformed(reason: String) -> AnalysisError {
    AnalysisError::MalformedRecord(reason)
}

fn optional<T>(value: Option<T>, encode: impl Fn(T) -> MdNode) -> MdNode {
    value.map(encode).unwrap_or(MdNode::NULL)
}

// ═══════════════════════════════════════════════════════════════════════════
// Components
// ═══════════════════════════════════════════════════════════════════════════

pub fn encode_type(ty: &NumericType) -> MdNode {
    match ty {
        NumericType::Fixed(fixed) => {
            let width = fixed.width as i64;
            MdNode::Tuple(vec![
                MdNode::Str("fixp".to_string()),
                MdNode::i32(if fixed.signed { -width } else { width }),
                MdNode::i32(fixed.frac_bits as i64),
            ])
        }
        NumericType::Float(float) => MdNode::Tuple(vec![
            MdNode::Str("float".to_string()),
            MdNode::i32(float.standard as i64),
            MdNode::Double(float.greatest),
        ]),
    }
}

pub fn decode_type(node: &MdNode) -> Result<NumericType, AnalysisError> {
    match node.tuple()? {
        [MdNode::Str(tag), width, frac] if tag == "fixp" => {
            let width = width.int()?;
            let frac = frac.int()?;
            if width == 0 || frac < 0 || frac > width.abs() {
                return Err(malformed(format!("fixed type width {} frac {}", width, frac)));
            }
            Ok(NumericType::Fixed(FixedPointFormat::new(
                width.unsigned_abs() as u32,
                frac as u32,
                width < 0,
            )))
        }
        [MdNode::Str(tag), standard, greatest] if tag == "float" => {
            let tag = standard.int()?;
            let standard = FloatStandard::from_tag(tag)
                .ok_or_else(|| malformed(format!("unknown float standard {}", tag)))?;
            Ok(NumericType::Float(FloatFormat::new(standard, greatest.double()?)))
        }
        _ => Err(malformed(format!("unknown type record {:?}", node))),
    }
}

pub fn encode_range(range: Range) -> MdNode {
    MdNode::Tuple(vec![MdNode::Double(range.min), MdNode::Double(range.max)])
}

pub fn decode_range(node: &MdNode) -> Result<Range, AnalysisError> {
    match node.tuple()? {
        [min, max] => Ok(Range::new(min.double()?, max.double()?)),
        other => Err(malformed(format!("range record with {} items", other.len()))),
    }
}

pub fn encode_error(error: f64) -> MdNode {
    MdNode::Tuple(vec![MdNode::Double(error)])
}

pub fn decode_error(node: &MdNode) -> Result<f64, AnalysisError> {
    match node.tuple()? {
        [value] => value.double(),
        other => Err(malformed(format!("error record with {} items", other.len()))),
    }
}

pub fn encode_value_info(info: &ValueInfo) -> MdNode {
    let flags = info.enabled as i64 | (info.is_final as i64) << 1;
    MdNode::Tuple(vec![
        optional(info.numeric_type.as_ref(), encode_type),
        optional(info.range, encode_range),
        optional(info.initial_error, encode_error),
        MdNode::Int {
            bits: 2,
            value: flags,
        },
    ])
}

pub fn decode_value_info(node: &MdNode) -> Result<ValueInfo, AnalysisError> {
    let [ty, range, error, flags] = node.tuple()? else {
        return Err(malformed("scalar record must have 4 items".to_string()));
    };
    let flags = flags.int()?;
    Ok(ValueInfo {
        numeric_type: (!ty.is_null()).then(|| decode_type(ty)).transpose()?,
        range: (!range.is_null()).then(|| decode_range(range)).transpose()?,
        initial_error: (!error.is_null()).then(|| decode_error(error)).transpose()?,
        enabled: flags & 1 != 0,
        is_final: flags & 2 != 0,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════

pub fn encode_info(info: &MdInfo) -> MdNode {
    match info {
        MdInfo::Scalar(slot) => encode_value_info(slot),
        MdInfo::Aggregate(fields) => MdNode::Tuple(
            fields
                .iter()
                .map(|field| optional(field.as_ref(), encode_info))
                .collect(),
        ),
    }
}

pub fn decode_info(node: &MdNode) -> Result<MdInfo, AnalysisError> {
    if node.is_scalar_record() {
        return decode_value_info(node).map(MdInfo::Scalar);
    }
    let fields = node
        .tuple()?
        .iter()
        .map(|field| (!field.is_null()).then(|| decode_info(field)).transpose())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MdInfo::Aggregate(fields))
}

/// Records of a function's formal parameters.
pub fn encode_arguments(args: &[Option<MdInfo>]) -> MdNode {
    let mut items = Vec::with_capacity(args.len() * 2);
    for arg in args {
        let tag = match arg {
            None => 0,
            Some(MdInfo::Scalar(_)) => 1,
            Some(MdInfo::Aggregate(_)) => 2,
        };
        items.push(MdNode::i32(tag));
        items.push(optional(arg.as_ref(), encode_info));
    }
    MdNode::Tuple(items)
}

pub fn decode_arguments(node: &MdNode) -> Result<Vec<Option<MdInfo>>, AnalysisError> {
    let items = node.tuple()?;
    if items.len() % 2 != 0 {
        return Err(malformed("argument list must hold tag/record pairs".to_string()));
    }
    items
        .chunks(2)
        .map(|pair| match pair[0].int()? {
            0 => Ok(None),
            1 => decode_value_info(&pair[1]).map(|v| Some(MdInfo::Scalar(v))),
            2 => decode_info(&pair[1]).map(Some),
            tag => Err(malformed(format!("unknown argument tag {}", tag))),
        })
        .collect()
}

pub fn encode_comparison(info: &CmpErrorInfo) -> MdNode {
    MdNode::Tuple(vec![MdNode::Double(info.tolerance)])
}

/// Only risky comparisons are persisted.
pub fn decode_comparison(node: &MdNode) -> Result<CmpErrorInfo, AnalysisError> {
    Ok(CmpErrorInfo {
        tolerance: decode_error(node)?,
        may_be_wrong: true,
    })
}

pub fn encode_unroll_counts(counts: &[Option<u32>]) -> MdNode {
    let text: String = counts
        .iter()
        .map(|c| match c {
            Some(n) => format!("{} ", n),
            None => "U ".to_string(),
        })
        .collect();
    MdNode::Tuple(vec![MdNode::Str(text)])
}

pub fn decode_unroll_counts(node: &MdNode) -> Result<Vec<Option<u32>>, AnalysisError> {
    let [MdNode::Str(text)] = node.tuple()? else {
        return Err(malformed("unroll record must hold one string".to_string()));
    };
    text.split_whitespace()
        .map(|word| match word {
            "U" => Ok(None),
            n => n
                .parse()
                .map(Some)
                .map_err(|_| malformed(format!("bad unroll count {:?}", n))),
        })
        .collect()
}

/// Loads an unroll record into the hints of `function`'s loops, in loop
/// order. `U` clears a hint.
pub fn apply_unroll_counts(function: &mut Function, node: &MdNode) -> Result<(), AnalysisError> {
    let counts = decode_unroll_counts(node)?;
    if counts.len() != function.loops.len() {
        return Err(malformed(format!(
            "{} unroll counts for {} loops of {}",
            counts.len(),
            function.loops.len(),
            function.name
        )));
    }
    for (construct, count) in function.loops.iter_mut().zip(counts) {
        construct.unroll_hint = count;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_type_layout() {
        let signed = NumericType::Fixed(FixedPointFormat::new(32, 12, true));
        assert_eq!(
            encode_type(&signed),
            MdNode::Tuple(vec![
                MdNode::Str("fixp".to_string()),
                MdNode::Int { bits: 32, value: -32 },
                MdNode::Int { bits: 32, value: 12 },
            ])
        );
        assert_eq!(decode_type(&encode_type(&signed)), Ok(signed));
    }

    #[test]
    fn test_scalar_flags() {
        let info = ValueInfo::new()
            .with_range(Range::new(-1.0, 1.0))
            .with_enabled(true)
            .with_final();
        let node = encode_value_info(&info);
        let MdNode::Tuple(items) = &node else {
            panic!("expected tuple");
        };
        assert_eq!(items[0], MdNode::Int { bits: 1, value: 0 });
        assert_eq!(items[2], MdNode::NULL);
        assert_eq!(items[3], MdNode::Int { bits: 2, value: 3 });
        assert_eq!(decode_value_info(&node), Ok(info));
    }

    #[test]
    fn test_composite_record() {
        let leaf = MdInfo::Scalar(
            ValueInfo::new()
                .with_range(Range::new(0.0, 8.0))
                .with_type(NumericType::Float(FloatFormat::new(FloatStandard::Float, 8.0)))
                .with_initial_error(1e-6),
        );
        let info = MdInfo::Aggregate(vec![
            Some(leaf.clone()),
            None,
            Some(MdInfo::Aggregate(vec![Some(leaf), None])),
        ]);
        let node = encode_info(&info);
        assert!(matches!(&node, MdNode::Tuple(items) if items[1] == MdNode::NULL));
        assert_eq!(decode_info(&node), Ok(info));
    }

    #[test]
    fn test_argument_tags() {
        let args = vec![
            None,
            Some(MdInfo::Scalar(ValueInfo::new().with_enabled(true))),
            Some(MdInfo::Aggregate(vec![None])),
        ];
        let node = encode_arguments(&args);
        let MdNode::Tuple(items) = &node else {
            panic!("expected tuple");
        };
        let tags: Vec<i64> = items.iter().step_by(2).map(|t| t.int().unwrap()).collect();
        assert_eq!(tags, vec![0, 1, 2]);
        assert_eq!(decode_arguments(&node), Ok(args));
    }

    #[test]
    fn test_unroll_counts() {
        let node = encode_unroll_counts(&[Some(4), None, Some(16)]);
        assert_eq!(node, MdNode::Tuple(vec![MdNode::Str("4 U 16 ".to_string())]));
        assert_eq!(decode_unroll_counts(&node), Ok(vec![Some(4), None, Some(16)]));
    }

    #[test]
    fn test_malformed_records() {
        assert!(decode_range(&MdNode::Double(1.0)).is_err());
        assert!(decode_type(&MdNode::Tuple(vec![
            MdNode::Str("fixp".to_string()),
            MdNode::Int { bits: 32, value: 8 },
            MdNode::Int { bits: 32, value: 9 },
        ]))
        .is_err());
        assert!(decode_arguments(&MdNode::Tuple(vec![MdNode::Int { bits: 32, value: 7 }, MdNode::NULL])).is_err());
        assert!(decode_unroll_counts(&MdNode::Tuple(vec![MdNode::Str("x".to_string())])).is_err());
        // only `false` is absent, `true` is not a record
        assert!(decode_info(&MdNode::Tuple(vec![MdNode::Int { bits: 1, value: 1 }])).is_err());
    }
}
