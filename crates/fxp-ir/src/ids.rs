//! Stable identifiers for program entities.
//!
//! Every entity of a [`Program`](crate::Program) lives in a flat arena and is
//! referred to by a small copyable index. Analysis results are keyed by these
//! identifiers so they can be attached back to the program afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// Create a new id from an arena index.
            pub fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// The arena index of this id.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of an operation node.
    NodeId,
    "%"
);
define_id!(
    /// Identifier of a control-flow block.
    BlockId,
    "bb"
);
define_id!(
    /// Identifier of a function.
    FunctionId,
    "@f"
);
define_id!(
    /// Identifier of a named composite type.
    TypeId,
    "%struct."
);
define_id!(
    /// Index of a loop construct within its function.
    LoopId,
    "loop"
);
