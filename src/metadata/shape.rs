//! Memoized composite-type shapes.
//!
//! Each distinct struct type is decomposed once into a [`Shape`] stored in an
//! arena. The memo entry is created before the fields are visited, so a
//! struct reaching itself through a pointer field terminates. Pointer and
//! array wrappers are unwrapped to their element: all elements of an array
//! share one summary.

use std::collections::HashMap;

use fxp_ir::{NodeId, Program, TypeId, TypeTable, ValueType};

use super::info::{MdInfo, ValueInfo};
use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum FieldShape {
    /// Numeric leaf of the given type.
    Scalar(ValueType),
    Composite(ShapeId),
    /// Field without numeric content.
    Opaque,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub type_id: TypeId,
    pub fields: Vec<FieldShape>,
}

#[derive(Debug, Default)]
pub struct ShapeCache {
    arena: Vec<Shape>,
    by_type: HashMap<TypeId, ShapeId>,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decompose every composite type of the program.
    pub fn for_program(program: &Program) -> Self {
        let mut cache = Self::new();
        for id in program.types.ids() {
            cache.struct_shape(&program.types, id);
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn shape(&self, id: ShapeId) -> &Shape {
        &self.arena[id.0]
    }

    /// Shape of `ty`, building it on first use.
    pub fn shape_of(&mut self, types: &TypeTable, ty: &ValueType) -> Option<ShapeId> {
        match ty.innermost() {
            ValueType::Struct(id) => Some(self.struct_shape(types, *id)),
            _ => None,
        }
    }

    /// Shape of `ty` if it was already built.
    pub fn lookup(&self, ty: &ValueType) -> Option<ShapeId> {
        match ty.innermost() {
            ValueType::Struct(id) => self.by_type.get(id).copied(),
            _ => None,
        }
    }

    fn struct_shape(&mut self, types: &TypeTable, id: TypeId) -> ShapeId {
        if let Some(shape) = self.by_type.get(&id) {
            return *shape;
        }
        let shape = ShapeId(self.arena.len());
        self.arena.push(Shape {
            type_id: id,
            fields: Vec::new(),
        });
        self.by_type.insert(id, shape);

        let field_types = types.get(id).map(|s| s.fields.clone()).unwrap_or_default();
        let fields = field_types
            .iter()
            .map(|field| match field.innermost() {
                ValueType::Struct(nested) => FieldShape::Composite(self.struct_shape(types, *nested)),
                leaf if leaf.is_numeric() => FieldShape::Scalar(leaf.clone()),
                _ => FieldShape::Opaque,
            })
            .collect();
        self.arena[shape.0].fields = fields;
        shape
    }

    /// Fresh record for a value of type `ty`, one `leaf` slot per numeric
    /// field. Recursive back-references and opaque fields are absent.
    pub fn instantiate(
        &self,
        ty: &ValueType,
        leaf: &dyn Fn(&ValueType) -> ValueInfo,
    ) -> Option<MdInfo> {
        let inner = ty.innermost();
        if inner.is_numeric() {
            return Some(MdInfo::Scalar(leaf(inner)));
        }
        let shape = self.lookup(inner)?;
        Some(self.instantiate_shape(shape, leaf, &mut Vec::new()))
    }

    fn instantiate_shape(
        &self,
        id: ShapeId,
        leaf: &dyn Fn(&ValueType) -> ValueInfo,
        visiting: &mut Vec<ShapeId>,
    ) -> MdInfo {
        visiting.push(id);
        let fields = self
            .shape(id)
            .fields
            .iter()
            .map(|field| match field {
                FieldShape::Scalar(ty) => Some(MdInfo::Scalar(leaf(ty))),
                FieldShape::Composite(nested) if !visiting.contains(nested) => {
                    Some(self.instantiate_shape(*nested, leaf, visiting))
                }
                FieldShape::Composite(_) | FieldShape::Opaque => None,
            })
            .collect();
        visiting.pop();
        MdInfo::Aggregate(fields)
    }

    /// Check that `info` mirrors the shape of `ty`.
    pub fn check_arity(&self, node: NodeId, ty: &ValueType, info: &MdInfo) -> Result<(), AnalysisError> {
        let inner = ty.innermost();
        match (inner, info) {
            (_, MdInfo::Scalar(_)) if inner.is_numeric() => Ok(()),
            (ValueType::Struct(_), MdInfo::Aggregate(_)) => match self.lookup(inner) {
                Some(shape) => self.check_shape(node, shape, info),
                None => Err(AnalysisError::ShapeMismatch {
                    node,
                    reason: "composite type has no shape".to_string(),
                }),
            },
            (ValueType::Struct(_), MdInfo::Scalar(_)) => Err(AnalysisError::ShapeMismatch {
                node,
                reason: "scalar record for a composite value".to_string(),
            }),
            (_, MdInfo::Aggregate(_)) => Err(AnalysisError::ShapeMismatch {
                node,
                reason: "composite record for a scalar value".to_string(),
            }),
            (_, MdInfo::Scalar(_)) => Err(AnalysisError::ShapeMismatch {
                node,
                reason: "record for a non-numeric value".to_string(),
            }),
        }
    }

    fn check_shape(&self, node: NodeId, id: ShapeId, info: &MdInfo) -> Result<(), AnalysisError> {
        let shape = self.shape(id);
        let MdInfo::Aggregate(fields) = info else {
            return Err(AnalysisError::ShapeMismatch {
                node,
                reason: format!("scalar record for composite {}", shape.type_id),
            });
        };
        if fields.len() != shape.fields.len() {
            return Err(AnalysisError::ArityMismatch {
                ty: shape.type_id,
                expected: shape.fields.len(),
                found: fields.len(),
            });
        }
        for (field_shape, field) in shape.fields.iter().zip(fields) {
            match (field_shape, field) {
                (_, None) => {}
                (FieldShape::Composite(nested), Some(nested_info)) => {
                    self.check_shape(node, *nested, nested_info)?
                }
                (FieldShape::Scalar(_), Some(MdInfo::Scalar(_))) => {}
                (FieldShape::Scalar(_), Some(MdInfo::Aggregate(_))) => {
                    return Err(AnalysisError::ShapeMismatch {
                        node,
                        reason: format!("composite record for a scalar field of {}", shape.type_id),
                    })
                }
                (FieldShape::Opaque, Some(_)) => {
                    return Err(AnalysisError::ShapeMismatch {
                        node,
                        reason: format!("record for a non-numeric field of {}", shape.type_id),
                    })
                }
            }
        }
        Ok(())
    }
}
