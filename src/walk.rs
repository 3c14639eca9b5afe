//! Structured traversal shared by the range and error engines.
//!
//! Functions are walked block by block in reverse post order. A loop is
//! walked as a unit when its header is reached:
//!
//! - with a known trip count within the unroll cap, the body is evaluated
//!   exactly that many times and the header once more for the exit;
//! - otherwise the body is re-evaluated until nothing changes, up to the
//!   unroll bound. A loop still changing after one more verification pass
//!   has its values widened to ⊤ and is reported.
//!
//! Calls to defined functions are walked in place with the caller's
//! arguments, bounded by a per-function recursion limit.

use std::collections::HashMap;
use std::rc::Rc;

use fxp_ir::{
    reverse_post_order, BlockId, Callee, Function, FunctionId, LoopForest, LoopId, Node, Opcode,
    Program,
};
use tracing::{debug, trace};

use crate::config::AnalysisConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};

// ═══════════════════════════════════════════════════════════════════════════
// Domain interface
// ═══════════════════════════════════════════════════════════════════════════

/// An abstract domain driven by [`Walker`]. Every method returns whether
/// some tracked value changed.
pub trait FlowDomain {
    /// Evaluate a node that is not a call.
    fn transfer(&mut self, node: &Node, diagnostics: &mut Diagnostics) -> bool;

    /// Model of a body-less callee, `None` if it has none.
    fn intrinsic(&mut self, call: &Node, callee: &Function, diagnostics: &mut Diagnostics) -> Option<bool>;

    /// Flow call arguments into the callee's parameters.
    fn bind_arguments(&mut self, call: &Node, callee: &Function) -> bool;

    /// Flow the callee's returned values into the call result.
    fn bind_return(&mut self, call: &Node, callee: &Function) -> bool;

    /// A call whose effect is unknown.
    fn opaque_call(&mut self, call: &Node, diagnostics: &mut Diagnostics) -> bool;

    /// Give up on precision for a node of a non-converging loop.
    fn widen(&mut self, node: &Node) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════
// Loop plan
// ═══════════════════════════════════════════════════════════════════════════

/// How many times a loop body is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPlan {
    /// Known trip count: exactly this many passes.
    Exactly(u32),
    /// Iterate to a fixpoint, at most this many passes.
    Bounded(u32),
}

#[derive(Clone, Copy, Debug)]
pub struct WalkLimits {
    pub default_unroll: u32,
    pub max_unroll: u32,
    pub max_recursion: u32,
}

impl WalkLimits {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            default_unroll: config.default_unroll,
            max_unroll: config.max_unroll,
            max_recursion: config.max_recursion,
        }
    }

    pub fn plan(&self, trip_count: Option<u32>, unroll_hint: Option<u32>) -> LoopPlan {
        match trip_count {
            Some(n) if n <= self.max_unroll => LoopPlan::Exactly(n),
            Some(_) => LoopPlan::Bounded(self.max_unroll),
            None => LoopPlan::Bounded(
                unroll_hint
                    .unwrap_or(self.default_unroll)
                    .min(self.max_unroll)
                    .max(1),
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Walker
// ═══════════════════════════════════════════════════════════════════════════

struct Layout {
    order: Vec<BlockId>,
    forest: LoopForest,
}

pub struct Walker<'p, D> {
    program: &'p Program,
    limits: WalkLimits,
    layouts: HashMap<FunctionId, Rc<Layout>>,
    stack: Vec<FunctionId>,
    domain: D,
    diagnostics: Diagnostics,
}

impl<'p, D: FlowDomain> Walker<'p, D> {
    pub fn new(program: &'p Program, limits: WalkLimits, domain: D) -> Self {
        Self {
            program,
            limits,
            layouts: HashMap::new(),
            stack: Vec::new(),
            domain,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Walk `entry` and everything it calls once. Returns whether any value
    /// changed.
    pub fn run(&mut self, entry: FunctionId) -> bool {
        debug!(function = %self.program.function(entry).name, "walking entry");
        self.walk_function(entry)
    }

    pub fn into_parts(self) -> (D, Diagnostics) {
        (self.domain, self.diagnostics)
    }

    fn layout(&mut self, function: FunctionId) -> Rc<Layout> {
        let program = self.program;
        self.layouts
            .entry(function)
            .or_insert_with(|| {
                Rc::new(Layout {
                    order: reverse_post_order(program, function),
                    forest: LoopForest::build(program, function),
                })
            })
            .clone()
    }

    fn walk_function(&mut self, function: FunctionId) -> bool {
        self.stack.push(function);
        let changed = self.walk_region(function, None);
        self.stack.pop();
        changed
    }

    /// Walk the blocks of `region` (the function body when `None`). Nested
    /// loops are walked as a unit from their header.
    fn walk_region(&mut self, function: FunctionId, region: Option<LoopId>) -> bool {
        let layout = self.layout(function);
        let program = self.program;
        let loops = &program.function(function).loops;
        let mut changed = false;
        for &block in &layout.order {
            let innermost = layout.forest.innermost(block);
            if innermost == region {
                changed |= self.walk_block(block);
            } else if let Some(child) = layout.forest.child_towards(region, block) {
                if loops[child.index()].header == block {
                    changed |= self.walk_loop(function, child, &layout.forest);
                }
            }
        }
        changed
    }

    fn walk_loop(&mut self, function: FunctionId, id: LoopId, forest: &LoopForest) -> bool {
        let program = self.program;
        let construct = &program.function(function).loops[id.index()];
        let plan = self.limits.plan(construct.trip_count, construct.unroll_hint);
        trace!(%function, %id, ?plan, "entering loop");

        let mut changed = false;
        match plan {
            LoopPlan::Exactly(passes) => {
                for _ in 0..passes {
                    changed |= self.walk_region(function, Some(id));
                }
                // exit test after the last iteration
                changed |= self.walk_block(construct.header);
            }
            LoopPlan::Bounded(passes) => {
                let mut stable = false;
                for _ in 0..passes {
                    if !self.walk_region(function, Some(id)) {
                        stable = true;
                        break;
                    }
                    changed = true;
                }
                if !stable && self.walk_region(function, Some(id)) {
                    self.widen_loop(function, id, forest);
                    // re-evaluate so that callees see the widened values
                    self.walk_region(function, Some(id));
                    changed = true;
                }
            }
        }
        changed
    }

    fn widen_loop(&mut self, function: FunctionId, id: LoopId, forest: &LoopForest) {
        let program = self.program;
        let construct = &program.function(function).loops[id.index()];
        debug!(%function, %id, depth = forest.depth(id), "loop did not converge, widening");
        for &block in &construct.blocks {
            for &node in &program.block(block).nodes {
                self.domain.widen(program.node(node));
            }
        }
        let mut diagnostic = Diagnostic::warning(
            DiagnosticKind::LoopNotConverged,
            format!(
                "loop {} of {} did not converge; its values were widened",
                id,
                program.function(function).name
            ),
        )
        .in_function(function);
        if let Some(first) = program.block(construct.header).nodes.first() {
            diagnostic = diagnostic.at_node(*first);
        }
        self.diagnostics.push(diagnostic);
    }

    fn walk_block(&mut self, block: BlockId) -> bool {
        let program = self.program;
        let mut changed = false;
        for &id in &program.block(block).nodes {
            let node = program.node(id);
            changed |= match &node.op {
                Opcode::Call(callee) => self.walk_call(node, *callee),
                _ => self.domain.transfer(node, &mut self.diagnostics),
            };
        }
        changed
    }

    fn walk_call(&mut self, node: &Node, callee: Callee) -> bool {
        let program = self.program;
        let Callee::Direct(target) = callee else {
            self.push_unknown_callee(node, "indirect call treated as opaque".to_string());
            return self.domain.opaque_call(node, &mut self.diagnostics);
        };
        let function = program.function(target);

        if function.is_declaration() {
            if let Some(changed) = self.domain.intrinsic(node, function, &mut self.diagnostics) {
                return changed;
            }
            self.push_unknown_callee(node, format!("call to external {} treated as opaque", function.name));
            return self.domain.opaque_call(node, &mut self.diagnostics);
        }

        let limit = function.max_recursion.unwrap_or(self.limits.max_recursion) as usize;
        let active = self.stack.iter().filter(|f| **f == target).count();
        if active > limit {
            let mut diagnostic = Diagnostic::warning(
                DiagnosticKind::RecursionLimit,
                format!("recursion into {} deeper than {} treated as opaque", function.name, limit),
            )
            .at_node(node.id);
            if let Some(caller) = node.function {
                diagnostic = diagnostic.in_function(caller);
            }
            self.diagnostics.push(diagnostic);
            return self.domain.opaque_call(node, &mut self.diagnostics);
        }

        let mut changed = self.domain.bind_arguments(node, function);
        changed |= self.walk_function(target);
        changed |= self.domain.bind_return(node, function);
        changed
    }

    fn push_unknown_callee(&mut self, node: &Node, message: String) {
        let mut diagnostic = Diagnostic::warning(DiagnosticKind::UnknownCallee, message).at_node(node.id);
        if let Some(caller) = node.function {
            diagnostic = diagnostic.in_function(caller);
        }
        self.diagnostics.push(diagnostic);
    }
}
