//! Seed records supplied with the program.

use std::collections::BTreeMap;

use fxp_ir::{NodeId, Program};

use super::info::MdInfo;
use super::shape::ShapeCache;
use crate::error::AnalysisError;

/// Records attached to nodes before analysis. Pre-set ranges, types and
/// flags in a seed are never overwritten by the engines.
///
/// For pointer-valued nodes (allocas, globals, pointer parameters) the record
/// describes the pointed-to storage.
#[derive(Debug, Clone, Default)]
pub struct SeedTable {
    records: BTreeMap<NodeId, MdInfo>,
}

impl SeedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, info: MdInfo) {
        self.records.insert(node, info);
    }

    pub fn get(&self, node: NodeId) -> Option<&MdInfo> {
        self.records.get(&node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &MdInfo)> {
        self.records.iter().map(|(id, info)| (*id, info))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check every record against the shape of the node it is attached to.
    pub fn validate(&self, program: &Program, shapes: &ShapeCache) -> Result<(), AnalysisError> {
        for (node, info) in self.iter() {
            let ty = &program
                .get_node(node)
                .ok_or(AnalysisError::UnknownNode(node))?
                .ty;
            shapes.check_arity(node, ty, info)?;
        }
        Ok(())
    }
}

impl FromIterator<(NodeId, MdInfo)> for SeedTable {
    fn from_iter<I: IntoIterator<Item = (NodeId, MdInfo)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::info::{Range, ValueInfo};
    use fxp_ir::{ProgramBuilder, ValueType};

    #[test]
    fn test_validate_detects_bad_seeds() {
        let mut pb = ProgramBuilder::new();
        let pair = pb.declare_struct("pair");
        pb.define_struct(pair, vec![ValueType::double(), ValueType::double()]);
        let g = pb.global("g", ValueType::Struct(pair));
        let program = pb.finish();
        let shapes = ShapeCache::for_program(&program);
        let leaf = || Some(MdInfo::Scalar(ValueInfo::new().with_range(Range::new(0.0, 1.0))));

        let good: SeedTable = [(g, MdInfo::Aggregate(vec![leaf(), leaf()]))].into_iter().collect();
        assert_eq!(good.validate(&program, &shapes), Ok(()));

        let bad: SeedTable = [(g, MdInfo::Aggregate(vec![leaf()]))].into_iter().collect();
        assert!(bad.validate(&program, &shapes).is_err());

        let dangling: SeedTable = [(NodeId(99), MdInfo::Aggregate(vec![]))].into_iter().collect();
        assert_eq!(
            dangling.validate(&program, &shapes),
            Err(AnalysisError::UnknownNode(NodeId(99)))
        );
    }
}
