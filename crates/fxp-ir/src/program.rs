//! Blocks, functions and the whole-program container.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{BlockId, FunctionId, NodeId};
use crate::node::{Callee, Node, Opcode};
use crate::types::{TypeTable, ValueType};

// ═══════════════════════════════════════════════════════════════════════════
// Structure
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub function: FunctionId,
    /// Nodes in execution order.
    pub nodes: Vec<NodeId>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
}

/// A natural loop of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConstruct {
    pub header: BlockId,
    /// Every block of the loop, header included, nested loops included.
    pub blocks: Vec<BlockId>,
    /// Statically known number of body executions.
    pub trip_count: Option<u32>,
    /// Per-loop override of the default unroll bound.
    pub unroll_hint: Option<u32>,
}

impl LoopConstruct {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub params: Vec<NodeId>,
    pub return_type: ValueType,
    pub blocks: Vec<BlockId>,
    pub entry: Option<BlockId>,
    pub loops: Vec<LoopConstruct>,
    /// Per-function override of the maximum recursion depth.
    pub max_recursion: Option<u32>,
    pub starting_point: bool,
}

impl Function {
    /// Body-less functions are external declarations.
    pub fn is_declaration(&self) -> bool {
        self.entry.is_none()
    }
}

/// A named set of nodes whose worst-case error is reported together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub members: Vec<NodeId>,
}

/// The whole compilation unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub nodes: Vec<Node>,
    pub blocks: Vec<Block>,
    pub functions: Vec<Function>,
    pub globals: Vec<NodeId>,
    pub types: TypeTable,
    pub targets: Vec<Target>,
}

impl Program {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn starting_points(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| f.starting_point)
    }

    /// Nodes of a function in block order.
    pub fn function_nodes(&self, id: FunctionId) -> impl Iterator<Item = NodeId> + '_ {
        self.function(id)
            .blocks
            .iter()
            .flat_map(move |b| self.block(*b).nodes.iter().copied())
    }

    /// The `Ret` nodes of a function.
    pub fn return_nodes(&self, id: FunctionId) -> Vec<NodeId> {
        self.function_nodes(id)
            .filter(|n| matches!(self.node(*n).op, Opcode::Ret))
            .collect()
    }

    /// Check that every id a node, block, function, loop or target refers to
    /// exists, so that lookups by id cannot go out of bounds.
    pub fn validate(&self) -> Result<(), ProgramError> {
        for node in &self.nodes {
            self.validate_node(node)?;
        }
        for block in &self.blocks {
            let owner = || Owner::Block(block.id);
            self.check_function(block.function)?;
            for &node in &block.nodes {
                self.check_node(owner(), node)?;
            }
            for &edge in block.successors.iter().chain(&block.predecessors) {
                self.check_block(owner(), edge)?;
            }
        }
        for function in &self.functions {
            self.validate_function(function)?;
        }
        for &global in &self.globals {
            self.check_node(Owner::Globals, global)?;
        }
        for target in &self.targets {
            for &member in &target.members {
                self.check_node(Owner::Target(target.name.clone()), member)?;
            }
        }
        Ok(())
    }

    fn validate_node(&self, node: &Node) -> Result<(), ProgramError> {
        for operand in &node.operands {
            if self.get_node(*operand).is_none() {
                return Err(ProgramError::DanglingOperand {
                    node: node.id,
                    operand: *operand,
                });
            }
        }
        if let Some(block) = node.block {
            self.check_block(Owner::Node(node.id), block)?;
        }
        if let Some(function) = node.function {
            self.check_function(function)?;
        }
        match &node.op {
            Opcode::Phi(incoming) => {
                if incoming.len() != node.operands.len() {
                    return Err(ProgramError::PhiArity {
                        node: node.id,
                        blocks: incoming.len(),
                        values: node.operands.len(),
                    });
                }
                for &block in incoming {
                    self.check_block(Owner::Node(node.id), block)?;
                }
            }
            Opcode::Call(Callee::Direct(callee)) => self.check_function(*callee)?,
            Opcode::Br(target) => self.check_block(Owner::Node(node.id), *target)?,
            Opcode::CondBr(then, otherwise) => {
                self.check_block(Owner::Node(node.id), *then)?;
                self.check_block(Owner::Node(node.id), *otherwise)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn validate_function(&self, function: &Function) -> Result<(), ProgramError> {
        let owner = || Owner::Function(function.id);
        for &param in &function.params {
            self.check_node(owner(), param)?;
        }
        for &block in &function.blocks {
            self.check_block(owner(), block)?;
        }
        if let Some(entry) = function.entry {
            if !function.blocks.contains(&entry) {
                return Err(ProgramError::EntryOutsideFunction {
                    function: function.id,
                    entry,
                });
            }
        }
        for lp in &function.loops {
            for &block in &lp.blocks {
                self.check_block(owner(), block)?;
            }
            if !lp.contains(lp.header) {
                return Err(ProgramError::HeaderOutsideLoop {
                    function: function.id,
                    header: lp.header,
                });
            }
        }
        Ok(())
    }

    fn check_node(&self, owner: Owner, node: NodeId) -> Result<(), ProgramError> {
        match self.get_node(node) {
            Some(_) => Ok(()),
            None => Err(ProgramError::DanglingNode { owner, node }),
        }
    }

    fn check_block(&self, owner: Owner, block: BlockId) -> Result<(), ProgramError> {
        if block.index() < self.blocks.len() {
            Ok(())
        } else {
            Err(ProgramError::DanglingBlock { owner, block })
        }
    }

    fn check_function(&self, function: FunctionId) -> Result<(), ProgramError> {
        if function.index() < self.functions.len() {
            Ok(())
        } else {
            Err(ProgramError::UnknownFunction(function))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════

/// What holds a dangling reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Node(NodeId),
    Block(BlockId),
    Function(FunctionId),
    Globals,
    Target(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Node(id) => write!(f, "node {}", id),
            Owner::Block(id) => write!(f, "block {}", id),
            Owner::Function(id) => write!(f, "function {}", id),
            Owner::Globals => f.write_str("the global list"),
            Owner::Target(name) => write!(f, "target `{}`", name),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProgramError {
    #[error("node {node} refers to missing operand {operand}")]
    DanglingOperand { node: NodeId, operand: NodeId },

    #[error("{owner} refers to missing node {node}")]
    DanglingNode { owner: Owner, node: NodeId },

    #[error("{owner} refers to missing block {block}")]
    DanglingBlock { owner: Owner, block: BlockId },

    #[error("phi {node} lists {blocks} incoming blocks but {values} values")]
    PhiArity {
        node: NodeId,
        blocks: usize,
        values: usize,
    },

    #[error("reference to unknown function {0}")]
    UnknownFunction(FunctionId),

    #[error("entry block {entry} of {function} is not one of its blocks")]
    EntryOutsideFunction { function: FunctionId, entry: BlockId },

    #[error("loop header {header} of {function} is not part of the loop")]
    HeaderOutsideLoop {
        function: FunctionId,
        header: BlockId,
    },
}
