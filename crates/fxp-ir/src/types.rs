//! Value types and the composite type table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::TypeId;

// ═══════════════════════════════════════════════════════════════════════════
// Floating-point standards
// ═══════════════════════════════════════════════════════════════════════════

/// Binary floating-point formats known to the program model.
///
/// The discriminants are the persisted encoding of the standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatStandard {
    Half = 0,
    Float = 1,
    Double = 2,
    Fp128 = 3,
    X86Fp80 = 4,
    PpcFp128 = 5,
    BFloat = 6,
}

impl FloatStandard {
    pub const ALL: [FloatStandard; 7] = [
        FloatStandard::Half,
        FloatStandard::Float,
        FloatStandard::Double,
        FloatStandard::Fp128,
        FloatStandard::X86Fp80,
        FloatStandard::PpcFp128,
        FloatStandard::BFloat,
    ];

    /// Number of significand bits, including the implicit bit.
    pub fn precision(self) -> i32 {
        match self {
            FloatStandard::Half => 11,
            FloatStandard::Float => 24,
            FloatStandard::Double => 53,
            FloatStandard::Fp128 => 113,
            FloatStandard::X86Fp80 => 64,
            FloatStandard::PpcFp128 => 106,
            FloatStandard::BFloat => 8,
        }
    }

    /// Decode a persisted standard tag.
    pub fn from_tag(tag: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| *s as i64 == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            FloatStandard::Half => "half",
            FloatStandard::Float => "float",
            FloatStandard::Double => "double",
            FloatStandard::Fp128 => "fp128",
            FloatStandard::X86Fp80 => "x86_fp80",
            FloatStandard::PpcFp128 => "ppc_fp128",
            FloatStandard::BFloat => "bfloat",
        }
    }
}

impl fmt::Display for FloatStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Value types
// ═══════════════════════════════════════════════════════════════════════════

/// The type of the value produced by a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Void,
    Int { width: u16, signed: bool },
    Float(FloatStandard),
    Pointer(Box<ValueType>),
    Array(Box<ValueType>, u64),
    Struct(TypeId),
}

impl ValueType {
    pub fn double() -> Self {
        ValueType::Float(FloatStandard::Double)
    }

    pub fn float() -> Self {
        ValueType::Float(FloatStandard::Float)
    }

    pub fn i32() -> Self {
        ValueType::Int {
            width: 32,
            signed: true,
        }
    }

    pub fn bool() -> Self {
        ValueType::Int {
            width: 1,
            signed: false,
        }
    }

    pub fn pointer_to(pointee: ValueType) -> Self {
        ValueType::Pointer(Box::new(pointee))
    }

    pub fn array_of(element: ValueType, len: u64) -> Self {
        ValueType::Array(Box::new(element), len)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::Float(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, ValueType::Int { .. })
    }

    /// Scalars that carry a numeric range.
    pub fn is_numeric(&self) -> bool {
        self.is_float() || self.is_int()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, ValueType::Pointer(_))
    }

    pub fn float_standard(&self) -> Option<FloatStandard> {
        match self {
            ValueType::Float(s) => Some(*s),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&ValueType> {
        match self {
            ValueType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Strip pointer and array wrappers down to the innermost element.
    pub fn innermost(&self) -> &ValueType {
        match self {
            ValueType::Pointer(inner) | ValueType::Array(inner, _) => inner.innermost(),
            other => other,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Composite types
// ═══════════════════════════════════════════════════════════════════════════

/// A named composite type. Fields may refer back to the struct itself
/// through pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<ValueType>,
}

/// Table of composite types, indexed by [`TypeId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    structs: Vec<StructType>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a struct without fields so that self-referential definitions
    /// can name it before it is defined.
    pub fn declare(&mut self, name: impl Into<String>) -> TypeId {
        let id = TypeId::new(self.structs.len());
        self.structs.push(StructType {
            name: name.into(),
            fields: Vec::new(),
        });
        id
    }

    pub fn define(&mut self, id: TypeId, fields: Vec<ValueType>) {
        if let Some(ty) = self.structs.get_mut(id.index()) {
            ty.fields = fields;
        }
    }

    pub fn get(&self, id: TypeId) -> Option<&StructType> {
        self.structs.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.structs.len()).map(TypeId::new)
    }

    /// Resolve the type addressed by a field path rooted at `ty`.
    ///
    /// Pointer and array levels are unwrapped without consuming an index.
    pub fn field_type<'a>(&'a self, ty: &'a ValueType, path: &[u32]) -> Option<&'a ValueType> {
        let mut current = ty;
        for &index in path {
            current = match current.innermost() {
                ValueType::Struct(id) => self.get(*id)?.fields.get(index as usize)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_table() {
        assert_eq!(FloatStandard::Double.precision(), 53);
        assert_eq!(FloatStandard::Float.precision(), 24);
        assert_eq!(FloatStandard::BFloat.precision(), 8);
    }

    #[test]
    fn test_tag_round_trip() {
        for standard in FloatStandard::ALL {
            assert_eq!(FloatStandard::from_tag(standard as i64), Some(standard));
        }
        assert_eq!(FloatStandard::from_tag(42), None);
    }

    #[test]
    fn test_field_type_through_pointer() {
        let mut types = TypeTable::new();
        let inner = types.declare("inner");
        types.define(inner, vec![ValueType::double(), ValueType::i32()]);
        let outer = types.declare("outer");
        types.define(
            outer,
            vec![
                ValueType::float(),
                ValueType::pointer_to(ValueType::Struct(inner)),
            ],
        );

        let root = ValueType::Struct(outer);
        assert_eq!(types.field_type(&root, &[0]), Some(&ValueType::float()));
        assert_eq!(types.field_type(&root, &[1, 1]), Some(&ValueType::i32()));
        assert_eq!(types.field_type(&root, &[2]), None);
        assert_eq!(types.field_type(&root, &[0, 0]), None);
    }
}
