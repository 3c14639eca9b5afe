//! Program model for the fixed-point analysis engines.
//!
//! A [`Program`] is a flat arena of operation [`Node`]s grouped into
//! control-flow [`Block`]s and [`Function`]s, together with the loop
//! constructs of each function, the composite [`TypeTable`] and the named
//! reporting [`Target`]s. [`CallGraph`] and [`LoopForest`] derive the
//! interprocedural and loop-nesting structure the engines walk.

pub mod builder;
pub mod call_graph;
pub mod ids;
pub mod loops;
pub mod node;
pub mod program;
pub mod types;

pub use builder::{FunctionBuilder, ProgramBuilder};
pub use call_graph::{CallEdge, CallGraph, TopologicalNode};
pub use ids::{BlockId, FunctionId, LoopId, NodeId, TypeId};
pub use loops::{reverse_post_order, LoopForest};
pub use node::{BinaryOp, Callee, CmpPredicate, Node, Opcode};
pub use program::{Block, Function, LoopConstruct, Owner, Program, ProgramError, Target};
pub use types::{FloatStandard, StructType, TypeTable, ValueType};
