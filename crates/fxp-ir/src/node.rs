//! Operation nodes.

use serde::{Deserialize, Serialize};

use crate::ids::{BlockId, FunctionId, NodeId};
use crate::types::ValueType;

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    AShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Target of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    Direct(FunctionId),
    /// Indirect call the program model could not resolve.
    Unknown,
}

/// What a node computes. Operands live in [`Node::operands`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    /// Literal constant.
    Const(f64),
    /// Formal parameter of the enclosing function.
    Param(u32),
    /// `operands = [lhs, rhs]`
    Binary(BinaryOp),
    /// `operands = [value]`
    Neg,
    /// Conversion to the node's type. `operands = [value]`
    Cast,
    /// `operands = [lhs, rhs]`, produces a boolean.
    Cmp(CmpPredicate),
    /// `operands = [condition, if_true, if_false]`
    Select,
    /// One operand per entry of the incoming block list.
    Phi(Vec<BlockId>),
    /// Stack slot holding a value of the pointee type.
    Alloca,
    /// Module-level variable; lives outside any block.
    Global(String),
    /// Address of a nested struct field. `operands = [base]`
    FieldAddr(Vec<u32>),
    /// Address of an array element; all elements share one summary.
    /// `operands = [base, index]`
    ElementAddr,
    /// `operands = [pointer]`
    Load,
    /// `operands = [value, pointer]`
    Store,
    /// `operands` are the call arguments.
    Call(Callee),
    /// `operands = [value]` or empty.
    Ret,
    Br(BlockId),
    /// `operands = [condition]`
    CondBr(BlockId, BlockId),
}

/// An operation in the program graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub op: Opcode,
    pub operands: Vec<NodeId>,
    pub ty: ValueType,
    /// Enclosing block, `None` for globals.
    pub block: Option<BlockId>,
    pub function: Option<FunctionId>,
}

impl Node {
    pub fn operand(&self, index: usize) -> Option<NodeId> {
        self.operands.get(index).copied()
    }
}
