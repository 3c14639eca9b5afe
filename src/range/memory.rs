//! Abstract memory locations.
//!
//! Memory is a set of cells (stack slots, globals and pointer parameters of
//! the entry function). A [`Location`] is a cell plus a field path into its
//! record. Array elements collapse onto their array, so an element address
//! has the location of the array itself.

use std::collections::BTreeSet;

use fxp_ir::NodeId;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Location {
    pub cell: NodeId,
    pub path: Vec<u32>,
}

impl Location {
    pub fn cell(cell: NodeId) -> Self {
        Self {
            cell,
            path: Vec::new(),
        }
    }

    pub fn field(&self, path: &[u32]) -> Self {
        let mut extended = self.path.clone();
        extended.extend_from_slice(path);
        Self {
            cell: self.cell,
            path: extended,
        }
    }

    /// Whether writing one location may change the other.
    pub fn overlaps(&self, other: &Location) -> bool {
        self.cell == other.cell
            && self
                .path
                .iter()
                .zip(&other.path)
                .all(|(a, b)| a == b)
    }
}

/// Targets a pointer may refer to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum PointsTo {
    Targets(BTreeSet<Location>),
    /// Anything, including memory the analysis does not model.
    Unknown,
}

impl Default for PointsTo {
    fn default() -> Self {
        PointsTo::Targets(BTreeSet::new())
    }
}

impl PointsTo {
    pub fn single(location: Location) -> Self {
        PointsTo::Targets(BTreeSet::from([location]))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PointsTo::Unknown)
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        let targets = match self {
            PointsTo::Targets(targets) => Some(targets),
            PointsTo::Unknown => None,
        };
        targets.into_iter().flatten()
    }

    /// Union with `other`. Returns whether the set grew.
    pub fn join(&mut self, other: &PointsTo) -> bool {
        match (&mut *self, other) {
            (PointsTo::Unknown, _) => false,
            (_, PointsTo::Unknown) => {
                *self = PointsTo::Unknown;
                true
            }
            (PointsTo::Targets(mine), PointsTo::Targets(theirs)) => {
                let before = mine.len();
                mine.extend(theirs.iter().cloned());
                mine.len() != before
            }
        }
    }

    /// Addresses of the nested field `path` of every target.
    pub fn project(&self, path: &[u32]) -> PointsTo {
        match self {
            PointsTo::Unknown => PointsTo::Unknown,
            PointsTo::Targets(targets) => {
                PointsTo::Targets(targets.iter().map(|loc| loc.field(path)).collect())
            }
        }
    }
}
