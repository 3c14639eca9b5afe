//! Range propagation over whole programs.
//!
//! [`RangeEngine::propagate`] walks an entry function and everything it
//! calls, computing for every reached numeric value a sound interval. Memory
//! is tracked per abstract [`Location`]: stores join into every location the
//! pointer may refer to, loads join over them.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use fxp_ir::{BinaryOp, Function, FunctionId, Node, NodeId, Opcode, Program, ValueType};
use tracing::{debug, info};

use super::memory::{Location, PointsTo};
use crate::config::AnalysisConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::intrinsics::Intrinsic;
use crate::metadata::{MdInfo, Range, SeedTable, ShapeCache, ValueInfo};
use crate::walk::{FlowDomain, WalkLimits, Walker};

// ═══════════════════════════════════════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════════════════════════════════════

/// Ranges and pointer targets computed for one or more entries.
#[derive(Debug, Clone, Default)]
pub struct RangeOutcome {
    /// Record per value. Cells (stack slots, globals, pointer parameters of
    /// the entry) carry the record of their storage.
    pub values: HashMap<NodeId, MdInfo>,
    pub pointers: HashMap<NodeId, PointsTo>,
    /// Pointers written to memory, by the location holding them.
    pub stored_pointers: BTreeMap<Location, PointsTo>,
    pub diagnostics: Diagnostics,
}

impl RangeOutcome {
    pub fn info(&self, node: NodeId) -> Option<&MdInfo> {
        self.values.get(&node)
    }

    pub fn range(&self, node: NodeId) -> Option<Range> {
        self.values.get(&node).and_then(MdInfo::range)
    }

    pub fn points_to(&self, node: NodeId) -> Option<&PointsTo> {
        self.pointers.get(&node)
    }

    /// Whether some value was widened or cut off.
    pub fn is_imprecise(&self) -> bool {
        self.diagnostics.is_imprecise()
    }

    /// Join the outcome of another entry into this one.
    pub fn merge(&mut self, other: RangeOutcome) {
        for (node, info) in other.values {
            match self.values.entry(node) {
                Entry::Occupied(mut slot) => {
                    slot.get_mut().join(&info);
                }
                Entry::Vacant(slot) => {
                    slot.insert(info);
                }
            }
        }
        for (node, targets) in other.pointers {
            self.pointers.entry(node).or_default().join(&targets);
        }
        for (location, targets) in other.stored_pointers {
            self.stored_pointers.entry(location).or_default().join(&targets);
        }
        self.diagnostics.extend(other.diagnostics);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

pub struct RangeEngine<'a> {
    program: &'a Program,
    shapes: &'a ShapeCache,
    limits: WalkLimits,
}

impl<'a> RangeEngine<'a> {
    pub fn new(program: &'a Program, shapes: &'a ShapeCache, config: &AnalysisConfig) -> Self {
        Self {
            program,
            shapes,
            limits: WalkLimits::from_config(config),
        }
    }

    /// Propagate ranges from `entry`, starting from the seed records.
    pub fn propagate(&self, entry: FunctionId, seeds: &SeedTable) -> RangeOutcome {
        let values = seeds.iter().map(|(node, info)| (node, info.clone())).collect();
        let domain = RangeDomain::new(self.program, self.shapes, values);
        self.run(entry, domain, Diagnostics::new())
    }

    /// Propagate again starting from a previous outcome. A converged outcome
    /// comes back unchanged.
    pub fn propagate_from(&self, entry: FunctionId, previous: RangeOutcome) -> RangeOutcome {
        let mut domain = RangeDomain::new(self.program, self.shapes, previous.values);
        domain.pointers = previous.pointers;
        domain.stored_pointers = previous.stored_pointers;
        self.run(entry, domain, previous.diagnostics)
    }

    fn run(&self, entry: FunctionId, mut domain: RangeDomain<'a>, mut diagnostics: Diagnostics) -> RangeOutcome {
        domain.enter(entry);
        let mut walker = Walker::new(self.program, self.limits, domain);
        walker.run(entry);
        let (domain, found) = walker.into_parts();
        diagnostics.extend(found);
        info!(
            function = %self.program.function(entry).name,
            values = domain.values.len(),
            diagnostics = diagnostics.len(),
            "range propagation finished"
        );
        RangeOutcome {
            values: domain.values,
            pointers: domain.pointers,
            stored_pointers: domain.stored_pointers,
            diagnostics,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Domain
// ═══════════════════════════════════════════════════════════════════════════

struct RangeDomain<'a> {
    program: &'a Program,
    shapes: &'a ShapeCache,
    values: HashMap<NodeId, MdInfo>,
    pointers: HashMap<NodeId, PointsTo>,
    stored_pointers: BTreeMap<Location, PointsTo>,
    cells: BTreeSet<NodeId>,
    /// Cells whose initial content comes from outside the analyzed code.
    external: BTreeSet<NodeId>,
}

impl<'a> RangeDomain<'a> {
    fn new(program: &'a Program, shapes: &'a ShapeCache, values: HashMap<NodeId, MdInfo>) -> Self {
        Self {
            program,
            shapes,
            values,
            pointers: HashMap::new(),
            stored_pointers: BTreeMap::new(),
            cells: BTreeSet::new(),
            external: BTreeSet::new(),
        }
    }

    /// Set up globals and the storage behind the entry's pointer parameters.
    fn enter(&mut self, entry: FunctionId) {
        let program = self.program;
        let external = program
            .globals
            .iter()
            .chain(&program.function(entry).params)
            .map(|id| program.node(*id))
            .filter(|node| node.ty.is_pointer());
        for node in external {
            self.ensure_cell(node);
            self.external.insert(node.id);
        }
    }

    fn skeleton(&self, ty: &ValueType) -> MdInfo {
        self.shapes
            .instantiate(ty, &ValueInfo::fresh)
            .unwrap_or_else(|| MdInfo::Scalar(ValueInfo::fresh(ty)))
    }

    fn top_of(&self, ty: &ValueType) -> MdInfo {
        let mut info = self.skeleton(ty);
        info.widen_to_top();
        info
    }

    fn range_of(&self, node: NodeId) -> Option<Range> {
        self.values.get(&node).and_then(MdInfo::range)
    }

    /// Register `node` as a memory cell holding a value of its pointee type.
    fn ensure_cell(&mut self, node: &Node) -> bool {
        if !self.cells.insert(node.id) {
            return false;
        }
        let storage = node.ty.pointee().unwrap_or(&node.ty);
        let skeleton = self.skeleton(storage);
        let mut changed = match self.values.get_mut(&node.id) {
            // fill the fields a partial seed leaves out
            Some(seeded) => seeded.join(&skeleton),
            None => {
                self.values.insert(node.id, skeleton);
                true
            }
        };
        changed |= self.update_pointer(node.id, &PointsTo::single(Location::cell(node.id)));
        changed
    }

    fn update_info(&mut self, node: &Node, incoming: &MdInfo) -> bool {
        if let Some(existing) = self.values.get_mut(&node.id) {
            return existing.join(incoming);
        }
        let mut info = self.skeleton(&node.ty);
        info.join(incoming);
        self.values.insert(node.id, info);
        true
    }

    fn update_range(&mut self, node: &Node, range: Range) -> bool {
        self.update_info(node, &MdInfo::Scalar(ValueInfo::new().with_range(range)))
    }

    fn update_pointer(&mut self, node: NodeId, targets: &PointsTo) -> bool {
        match self.pointers.entry(node) {
            Entry::Occupied(mut slot) => slot.get_mut().join(targets),
            Entry::Vacant(slot) => {
                slot.insert(targets.clone());
                true
            }
        }
    }

    /// Copy the value of `from` into `to`, as a pointer or as a record.
    fn flow(&mut self, from: NodeId, to: &Node) -> bool {
        if to.ty.is_pointer() {
            match self.pointers.get(&from).cloned() {
                Some(targets) => self.update_pointer(to.id, &targets),
                None => false,
            }
        } else {
            match self.values.get(&from).cloned() {
                Some(info) => self.update_info(to, &info),
                None => false,
            }
        }
    }

    fn unresolved(&self, node: &Node, diagnostics: &mut Diagnostics, what: &str) {
        let mut diagnostic = Diagnostic::warning(
            DiagnosticKind::UnresolvedPointer,
            format!("{} through a pointer with unknown targets", what),
        )
        .at_node(node.id);
        if let Some(function) = node.function {
            diagnostic = diagnostic.in_function(function);
        }
        diagnostics.push(diagnostic);
    }

    fn binary(&mut self, node: &Node, op: BinaryOp, diagnostics: &mut Diagnostics) -> bool {
        let (Some(lhs), Some(rhs)) = (
            node.operand(0).and_then(|id| self.range_of(id)),
            node.operand(1).and_then(|id| self.range_of(id)),
        ) else {
            return false;
        };
        let evaluated = lhs.binary(op, &rhs);
        if evaluated.divisor_may_be_zero {
            let mut diagnostic = Diagnostic::warning(
                DiagnosticKind::DivisorMayBeZero,
                format!("divisor {} may be zero, result is unbounded", rhs),
            )
            .at_node(node.id);
            if let Some(function) = node.function {
                diagnostic = diagnostic.in_function(function);
            }
            diagnostics.push(diagnostic);
        }
        let range = if node.ty.is_int() {
            evaluated.range.cast(&node.ty)
        } else {
            evaluated.range
        };
        self.update_range(node, range)
    }

    fn select(&mut self, node: &Node) -> bool {
        let [cond, if_true, if_false] = node.operands[..] else {
            return false;
        };
        let picks = match self.range_of(cond) {
            Some(r) if r.same_as(&Range::point(1.0)) => vec![if_true],
            Some(r) if r.same_as(&Range::point(0.0)) => vec![if_false],
            _ => vec![if_true, if_false],
        };
        let mut changed = false;
        for pick in picks {
            changed |= self.flow(pick, node);
        }
        changed
    }

    fn load(&mut self, node: &Node, diagnostics: &mut Diagnostics) -> bool {
        let Some(targets) = node.operand(0).and_then(|ptr| self.pointers.get(&ptr)).cloned() else {
            return false;
        };
        if node.ty.is_pointer() {
            let loaded = self.load_pointer(&targets);
            return self.update_pointer(node.id, &loaded);
        }
        let PointsTo::Targets(locations) = targets else {
            self.unresolved(node, diagnostics, "load");
            let top = self.top_of(&node.ty);
            return self.update_info(node, &top);
        };
        let mut changed = false;
        for location in &locations {
            let content = self
                .values
                .get(&location.cell)
                .and_then(|cell| cell.resolve(&location.path))
                .cloned();
            match content {
                Some(content) => changed |= self.update_info(node, &content),
                None => {
                    self.unresolved(node, diagnostics, "load");
                    let top = self.top_of(&node.ty);
                    changed |= self.update_info(node, &top);
                }
            }
        }
        changed
    }

    /// Targets of a pointer read from memory. Pointers held by external
    /// cells refer to storage summarized in place.
    fn load_pointer(&self, targets: &PointsTo) -> PointsTo {
        let PointsTo::Targets(locations) = targets else {
            return PointsTo::Unknown;
        };
        let mut loaded = PointsTo::default();
        for location in locations {
            for (held_at, stored) in &self.stored_pointers {
                if held_at.overlaps(location) {
                    loaded.join(stored);
                }
            }
            if self.external.contains(&location.cell) {
                loaded.join(&PointsTo::single(location.clone()));
            }
        }
        loaded
    }

    fn store(&mut self, node: &Node, diagnostics: &mut Diagnostics) -> bool {
        let [value, ptr] = node.operands[..] else {
            return false;
        };
        let Some(targets) = self.pointers.get(&ptr).cloned() else {
            return false;
        };
        if self.program.node(value).ty.is_pointer() {
            let Some(stored) = self.pointers.get(&value).cloned() else {
                return false;
            };
            let mut changed = false;
            match targets {
                PointsTo::Unknown => self.unresolved(node, diagnostics, "pointer store"),
                PointsTo::Targets(locations) => {
                    for location in locations {
                        changed |= self.stored_pointers.entry(location).or_default().join(&stored);
                    }
                }
            }
            return changed;
        }

        let Some(incoming) = self.values.get(&value).cloned() else {
            return false;
        };
        let mut changed = false;
        match targets {
            PointsTo::Unknown => {
                self.unresolved(node, diagnostics, "store");
                for cell in &self.cells {
                    if let Some(record) = self.values.get_mut(cell) {
                        changed |= record.join(&incoming);
                    }
                }
            }
            PointsTo::Targets(locations) => {
                for location in locations {
                    let slot = self
                        .values
                        .get_mut(&location.cell)
                        .and_then(|cell| cell.resolve_mut(&location.path));
                    if let Some(slot) = slot {
                        changed |= slot.join(&incoming);
                    }
                }
            }
        }
        changed
    }

    fn widen_targets(&mut self, pointer: NodeId) -> bool {
        let Some(PointsTo::Targets(locations)) = self.pointers.get(&pointer).cloned() else {
            return false;
        };
        let mut changed = false;
        for location in locations {
            let slot = self
                .values
                .get_mut(&location.cell)
                .and_then(|cell| cell.resolve_mut(&location.path));
            if let Some(slot) = slot {
                changed |= slot.widen_to_top();
            }
        }
        changed
    }
}

impl FlowDomain for RangeDomain<'_> {
    fn transfer(&mut self, node: &Node, diagnostics: &mut Diagnostics) -> bool {
        match &node.op {
            Opcode::Const(_) if node.ty.is_pointer() => self.update_pointer(node.id, &PointsTo::default()),
            Opcode::Const(value) => self.update_range(node, Range::point(*value)),
            Opcode::Binary(op) => self.binary(node, *op, diagnostics),
            Opcode::Neg => match node.operand(0).and_then(|id| self.range_of(id)) {
                Some(range) => self.update_range(node, range.neg()),
                None => false,
            },
            Opcode::Cast if node.ty.is_pointer() => match node.operand(0) {
                Some(from) => self.flow(from, node),
                None => false,
            },
            Opcode::Cast => {
                let Some(from) = node.operand(0) else {
                    return false;
                };
                let range = if self.program.node(from).ty.is_pointer() {
                    Some(Range::top())
                } else {
                    self.range_of(from)
                };
                match range {
                    Some(range) => self.update_range(node, range.cast(&node.ty)),
                    None => false,
                }
            }
            Opcode::Cmp(pred) => {
                let (Some(lhs), Some(rhs)) = (
                    node.operand(0).and_then(|id| self.range_of(id)),
                    node.operand(1).and_then(|id| self.range_of(id)),
                ) else {
                    return false;
                };
                self.update_range(node, lhs.compare(*pred, &rhs))
            }
            Opcode::Select => self.select(node),
            Opcode::Phi(_) => {
                let mut changed = false;
                for &incoming in &node.operands {
                    changed |= self.flow(incoming, node);
                }
                changed
            }
            Opcode::Alloca | Opcode::Global(_) => self.ensure_cell(node),
            Opcode::FieldAddr(path) => {
                let Some(base) = node.operand(0).and_then(|id| self.pointers.get(&id)) else {
                    return false;
                };
                let projected = base.project(path);
                self.update_pointer(node.id, &projected)
            }
            Opcode::ElementAddr => match node.operand(0) {
                Some(base) => self.flow(base, node),
                None => false,
            },
            Opcode::Load => self.load(node, diagnostics),
            Opcode::Store => self.store(node, diagnostics),
            Opcode::Param(_) | Opcode::Call(_) | Opcode::Ret | Opcode::Br(_) | Opcode::CondBr(..) => false,
        }
    }

    fn intrinsic(&mut self, call: &Node, callee: &Function, _: &mut Diagnostics) -> Option<bool> {
        let intrinsic = Intrinsic::from_name(&callee.name)?;
        let args: Option<Vec<Range>> = call.operands.iter().map(|id| self.range_of(*id)).collect();
        let Some(range) = args.and_then(|args| intrinsic.range(&args)) else {
            return Some(false);
        };
        Some(self.update_range(call, range))
    }

    fn bind_arguments(&mut self, call: &Node, callee: &Function) -> bool {
        let program = self.program;
        let mut changed = false;
        for (param, arg) in callee.params.iter().zip(&call.operands) {
            changed |= self.flow(*arg, program.node(*param));
        }
        changed
    }

    fn bind_return(&mut self, call: &Node, callee: &Function) -> bool {
        let program = self.program;
        let mut changed = false;
        for ret in program.return_nodes(callee.id) {
            if let Some(value) = program.node(ret).operand(0) {
                changed |= self.flow(value, call);
            }
        }
        changed
    }

    fn opaque_call(&mut self, call: &Node, _: &mut Diagnostics) -> bool {
        let mut changed = if call.ty.is_pointer() {
            self.update_pointer(call.id, &PointsTo::Unknown)
        } else if call.ty == ValueType::Void {
            false
        } else {
            let top = self.top_of(&call.ty);
            self.update_info(call, &top)
        };
        // the callee may write anything through its pointer arguments
        for &arg in &call.operands {
            changed |= self.widen_targets(arg);
        }
        debug!(call = %call.id, "opaque call");
        changed
    }

    fn widen(&mut self, node: &Node) -> bool {
        match &node.op {
            Opcode::Const(_) | Opcode::Cmp(_) | Opcode::Param(_) | Opcode::Alloca | Opcode::Global(_) => false,
            Opcode::Store => match node.operand(1) {
                Some(ptr) => self.widen_targets(ptr),
                None => false,
            },
            _ => self
                .values
                .get_mut(&node.id)
                .is_some_and(MdInfo::widen_to_top),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use fxp_ir::{CmpPredicate, ProgramBuilder};

    fn seed(range: Range) -> MdInfo {
        MdInfo::Scalar(ValueInfo::fresh(&ValueType::double()).with_range(range))
    }

    #[test]
    fn test_straight_line() {
        let mut pb = ProgramBuilder::new();
        let mut f = pb.function("f", vec![ValueType::double()], ValueType::double());
        let b = f.block();
        let x = f.param(0);
        let two = f.constant(b, 2.0, ValueType::double());
        let doubled = f.mul(b, x, two);
        let shifted = f.sub(b, doubled, two);
        f.ret(b, Some(shifted));
        let id = f.finish();
        let program = pb.finish();
        let shapes = ShapeCache::for_program(&program);

        let seeds: SeedTable = [(x, seed(Range::new(-1.0, 3.0)))].into_iter().collect();
        let engine = RangeEngine::new(&program, &shapes, &AnalysisConfig::default());
        let outcome = engine.propagate(id, &seeds);
        assert_eq!(outcome.range(doubled), Some(Range::new(-2.0, 6.0)));
        assert_eq!(outcome.range(shifted), Some(Range::new(-4.0, 4.0)));
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_select_on_decided_condition() {
        let mut pb = ProgramBuilder::new();
        let mut f = pb.function("f", vec![], ValueType::double());
        let b = f.block();
        let one = f.constant(b, 1.0, ValueType::double());
        let ten = f.constant(b, 10.0, ValueType::double());
        let cond = f.cmp(b, CmpPredicate::Lt, one, ten);
        let picked = f.select(b, cond, one, ten);
        f.ret(b, Some(picked));
        let id = f.finish();
        let program = pb.finish();
        let shapes = ShapeCache::for_program(&program);

        let outcome = RangeEngine::new(&program, &shapes, &AnalysisConfig::default())
            .propagate(id, &SeedTable::new());
        assert_eq!(outcome.range(cond), Some(Range::point(1.0)));
        assert_eq!(outcome.range(picked), Some(Range::point(1.0)));
    }

    #[test]
    fn test_unseeded_input_stays_unanalyzed() {
        let mut pb = ProgramBuilder::new();
        let mut f = pb.function("f", vec![ValueType::double()], ValueType::double());
        let b = f.block();
        let x = f.param(0);
        let y = f.add(b, x, x);
        f.ret(b, Some(y));
        let id = f.finish();
        let program = pb.finish();
        let shapes = ShapeCache::for_program(&program);

        let outcome = RangeEngine::new(&program, &shapes, &AnalysisConfig::default())
            .propagate(id, &SeedTable::new());
        assert_eq!(outcome.range(y), None);
    }

    #[test]
    fn test_store_then_load_through_stack_slot() {
        let mut pb = ProgramBuilder::new();
        let mut f = pb.function("f", vec![ValueType::double()], ValueType::double());
        let b = f.block();
        let x = f.param(0);
        let slot = f.alloca(b, ValueType::double());
        f.store(b, x, slot);
        let loaded = f.load(b, slot);
        f.ret(b, Some(loaded));
        let id = f.finish();
        let program = pb.finish();
        let shapes = ShapeCache::for_program(&program);

        let seeds: SeedTable = [(x, seed(Range::new(0.0, 5.0)))].into_iter().collect();
        let outcome = RangeEngine::new(&program, &shapes, &AnalysisConfig::default()).propagate(id, &seeds);
        assert_eq!(outcome.range(loaded), Some(Range::new(0.0, 5.0)));
        assert_eq!(outcome.range(slot), Some(Range::new(0.0, 5.0)));
    }
}
