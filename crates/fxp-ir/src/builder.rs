//! Incremental construction of a [`Program`].

use crate::ids::{BlockId, FunctionId, LoopId, NodeId, TypeId};
use crate::node::{BinaryOp, Callee, CmpPredicate, Node, Opcode};
use crate::program::{Block, Function, LoopConstruct, Program, Target};
use crate::types::{TypeTable, ValueType};

/// Builds a program one function at a time.
#[derive(Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn types_mut(&mut self) -> &mut TypeTable {
        &mut self.program.types
    }

    pub fn declare_struct(&mut self, name: &str) -> TypeId {
        self.program.types.declare(name)
    }

    pub fn define_struct(&mut self, id: TypeId, fields: Vec<ValueType>) {
        self.program.types.define(id, fields);
    }

    /// Add a module-level variable holding a value of type `ty`.
    pub fn global(&mut self, name: &str, ty: ValueType) -> NodeId {
        let id = NodeId::new(self.program.nodes.len());
        self.program.nodes.push(Node {
            id,
            op: Opcode::Global(name.to_string()),
            operands: Vec::new(),
            ty: ValueType::pointer_to(ty),
            block: None,
            function: None,
        });
        self.program.globals.push(id);
        id
    }

    /// Declare a function signature. Without a later [`define`](Self::define)
    /// it stays an external declaration.
    pub fn declare_function(
        &mut self,
        name: &str,
        params: Vec<ValueType>,
        return_type: ValueType,
    ) -> FunctionId {
        let id = FunctionId::new(self.program.functions.len());
        let params = params
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                let node = NodeId::new(self.program.nodes.len());
                self.program.nodes.push(Node {
                    id: node,
                    op: Opcode::Param(index as u32),
                    operands: Vec::new(),
                    ty,
                    block: None,
                    function: Some(id),
                });
                node
            })
            .collect();
        self.program.functions.push(Function {
            id,
            name: name.to_string(),
            params,
            return_type,
            blocks: Vec::new(),
            entry: None,
            loops: Vec::new(),
            max_recursion: None,
            starting_point: false,
        });
        id
    }

    /// Declare and start defining a function.
    pub fn function(
        &mut self,
        name: &str,
        params: Vec<ValueType>,
        return_type: ValueType,
    ) -> FunctionBuilder<'_> {
        let id = self.declare_function(name, params, return_type);
        self.define(id)
    }

    /// Start (or continue) defining the body of a declared function.
    pub fn define(&mut self, id: FunctionId) -> FunctionBuilder<'_> {
        FunctionBuilder { pb: self, id }
    }

    pub fn target(&mut self, name: &str, members: Vec<NodeId>) {
        self.program.targets.push(Target {
            name: name.to_string(),
            members,
        });
    }

    pub fn node_type(&self, id: NodeId) -> &ValueType {
        &self.program.node(id).ty
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

/// Appends blocks and nodes to one function.
pub struct FunctionBuilder<'a> {
    pb: &'a mut ProgramBuilder,
    id: FunctionId,
}

impl FunctionBuilder<'_> {
    pub fn id(&self) -> FunctionId {
        self.id
    }

    fn function_mut(&mut self) -> &mut Function {
        &mut self.pb.program.functions[self.id.index()]
    }

    pub fn param(&self, index: usize) -> NodeId {
        self.pb.program.function(self.id).params[index]
    }

    /// Append a block. The first block becomes the entry.
    pub fn block(&mut self) -> BlockId {
        let id = BlockId::new(self.pb.program.blocks.len());
        self.pb.program.blocks.push(Block {
            id,
            function: self.id,
            nodes: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
        });
        let function = self.function_mut();
        function.blocks.push(id);
        function.entry.get_or_insert(id);
        id
    }

    fn push(&mut self, block: BlockId, op: Opcode, operands: Vec<NodeId>, ty: ValueType) -> NodeId {
        let id = NodeId::new(self.pb.program.nodes.len());
        self.pb.program.nodes.push(Node {
            id,
            op,
            operands,
            ty,
            block: Some(block),
            function: Some(self.id),
        });
        self.pb.program.blocks[block.index()].nodes.push(id);
        id
    }

    fn type_of(&self, node: NodeId) -> ValueType {
        self.pb.program.node(node).ty.clone()
    }

    pub fn constant(&mut self, block: BlockId, value: f64, ty: ValueType) -> NodeId {
        self.push(block, Opcode::Const(value), Vec::new(), ty)
    }

    pub fn binary(&mut self, block: BlockId, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let ty = self.type_of(lhs);
        self.push(block, Opcode::Binary(op), vec![lhs, rhs], ty)
    }

    pub fn add(&mut self, block: BlockId, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(block, BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, block: BlockId, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(block, BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, block: BlockId, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(block, BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, block: BlockId, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.binary(block, BinaryOp::Div, lhs, rhs)
    }

    pub fn neg(&mut self, block: BlockId, value: NodeId) -> NodeId {
        let ty = self.type_of(value);
        self.push(block, Opcode::Neg, vec![value], ty)
    }

    pub fn cast(&mut self, block: BlockId, value: NodeId, ty: ValueType) -> NodeId {
        self.push(block, Opcode::Cast, vec![value], ty)
    }

    pub fn cmp(&mut self, block: BlockId, pred: CmpPredicate, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.push(block, Opcode::Cmp(pred), vec![lhs, rhs], ValueType::bool())
    }

    pub fn select(&mut self, block: BlockId, cond: NodeId, a: NodeId, b: NodeId) -> NodeId {
        let ty = self.type_of(a);
        self.push(block, Opcode::Select, vec![cond, a, b], ty)
    }

    /// Create an empty phi; fill it with [`add_incoming`](Self::add_incoming)
    /// once the incoming values exist.
    pub fn phi(&mut self, block: BlockId, ty: ValueType) -> NodeId {
        self.push(block, Opcode::Phi(Vec::new()), Vec::new(), ty)
    }

    pub fn add_incoming(&mut self, phi: NodeId, value: NodeId, from: BlockId) {
        let node = &mut self.pb.program.nodes[phi.index()];
        if let Opcode::Phi(incoming) = &mut node.op {
            incoming.push(from);
            node.operands.push(value);
        }
    }

    /// Stack slot holding a value of type `ty`.
    pub fn alloca(&mut self, block: BlockId, ty: ValueType) -> NodeId {
        self.push(block, Opcode::Alloca, Vec::new(), ValueType::pointer_to(ty))
    }

    pub fn field_addr(&mut self, block: BlockId, base: NodeId, path: Vec<u32>) -> NodeId {
        let base_ty = self.type_of(base);
        let field = base_ty
            .pointee()
            .and_then(|pointee| self.pb.program.types.field_type(pointee, &path))
            .cloned()
            .unwrap_or(ValueType::Void);
        self.push(
            block,
            Opcode::FieldAddr(path),
            vec![base],
            ValueType::pointer_to(field),
        )
    }

    pub fn element_addr(&mut self, block: BlockId, base: NodeId, index: NodeId) -> NodeId {
        let ty = match self.type_of(base) {
            ValueType::Pointer(inner) => match *inner {
                ValueType::Array(element, _) => ValueType::Pointer(element),
                other => ValueType::pointer_to(other),
            },
            other => other,
        };
        self.push(block, Opcode::ElementAddr, vec![base, index], ty)
    }

    pub fn load(&mut self, block: BlockId, pointer: NodeId) -> NodeId {
        let ty = self.type_of(pointer).pointee().cloned().unwrap_or(ValueType::Void);
        self.push(block, Opcode::Load, vec![pointer], ty)
    }

    pub fn store(&mut self, block: BlockId, value: NodeId, pointer: NodeId) -> NodeId {
        self.push(block, Opcode::Store, vec![value, pointer], ValueType::Void)
    }

    pub fn call(
        &mut self,
        block: BlockId,
        callee: Callee,
        args: Vec<NodeId>,
        ty: ValueType,
    ) -> NodeId {
        self.push(block, Opcode::Call(callee), args, ty)
    }

    pub fn ret(&mut self, block: BlockId, value: Option<NodeId>) -> NodeId {
        let operands = value.into_iter().collect();
        self.push(block, Opcode::Ret, operands, ValueType::Void)
    }

    fn link(&mut self, from: BlockId, to: BlockId) {
        let blocks = &mut self.pb.program.blocks;
        if !blocks[from.index()].successors.contains(&to) {
            blocks[from.index()].successors.push(to);
            blocks[to.index()].predecessors.push(from);
        }
    }

    /// Record a control-flow edge. Adds a `Br` node only for the first edge
    /// out of `from`; later calls just add successors.
    pub fn br(&mut self, from: BlockId, to: BlockId) {
        if self.pb.program.blocks[from.index()].successors.is_empty() {
            self.push(from, Opcode::Br(to), Vec::new(), ValueType::Void);
        }
        self.link(from, to);
    }

    pub fn cond_br(&mut self, from: BlockId, cond: NodeId, if_true: BlockId, if_false: BlockId) {
        self.push(
            from,
            Opcode::CondBr(if_true, if_false),
            vec![cond],
            ValueType::Void,
        );
        self.link(from, if_true);
        self.link(from, if_false);
    }

    pub fn add_loop(
        &mut self,
        header: BlockId,
        blocks: Vec<BlockId>,
        trip_count: Option<u32>,
    ) -> LoopId {
        let loops = &mut self.function_mut().loops;
        loops.push(LoopConstruct {
            header,
            blocks,
            trip_count,
            unroll_hint: None,
        });
        LoopId::new(loops.len() - 1)
    }

    pub fn set_unroll_hint(&mut self, id: LoopId, count: u32) {
        if let Some(lp) = self.function_mut().loops.get_mut(id.index()) {
            lp.unroll_hint = Some(count);
        }
    }

    pub fn set_max_recursion(&mut self, depth: u32) {
        self.function_mut().max_recursion = Some(depth);
    }

    pub fn set_starting_point(&mut self) {
        self.function_mut().starting_point = true;
    }

    pub fn finish(self) -> FunctionId {
        self.id
    }
}
