//! Forward propagation of worst-case absolute errors.
//!
//! Runs over the same structured walk as range propagation, after numeric
//! types have been assigned. Every value gets an [`ErrorForm`]; composed
//! operations never report less error than their operands.

use std::collections::hash_map::Entry;
use std::collections::{btree_map, BTreeMap, HashMap};

use fxp_ir::{BinaryOp, Function, FunctionId, Node, NodeId, Opcode, Program};
use tracing::{debug, info};

use super::affine::{ErrorForm, NoiseKind, NoiseSymbol};
use crate::config::AnalysisConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::intrinsics::Intrinsic;
use crate::metadata::{CmpErrorInfo, FloatFormat, MdInfo, Range, ValueInfo};
use crate::range::{Location, PointsTo, RangeOutcome};
use crate::walk::{FlowDomain, WalkLimits, Walker};

// ═══════════════════════════════════════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct ErrorOutcome {
    pub forms: HashMap<NodeId, ErrorForm>,
    /// Errors of the values held in memory.
    pub memory: BTreeMap<Location, ErrorForm>,
    /// One record per evaluated comparison.
    pub comparisons: BTreeMap<NodeId, CmpErrorInfo>,
    pub diagnostics: Diagnostics,
}

impl ErrorOutcome {
    pub fn bound(&self, node: NodeId) -> Option<f64> {
        self.forms.get(&node).map(ErrorForm::bound)
    }

    /// Worst-case absolute error of every analyzed value.
    pub fn errors(&self) -> BTreeMap<NodeId, f64> {
        self.forms.iter().map(|(node, form)| (*node, form.bound())).collect()
    }

    /// Largest error of anything stored in `cell`.
    pub fn cell_bound(&self, cell: NodeId) -> Option<f64> {
        self.memory
            .iter()
            .filter(|(location, _)| location.cell == cell)
            .map(|(_, form)| form.bound())
            .reduce(f64::max)
    }

    /// Keep the larger error of each value.
    pub fn merge(&mut self, other: ErrorOutcome) {
        for (node, form) in other.forms {
            match self.forms.entry(node) {
                Entry::Occupied(mut slot) => {
                    if form.bound() > slot.get().bound() {
                        slot.insert(form);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(form);
                }
            }
        }
        for (location, form) in other.memory {
            match self.memory.entry(location) {
                btree_map::Entry::Occupied(mut slot) => {
                    if form.bound() > slot.get().bound() {
                        slot.insert(form);
                    }
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(form);
                }
            }
        }
        for (node, record) in other.comparisons {
            self.comparisons
                .entry(node)
                .and_modify(|mine| *mine = worse(*mine, record))
                .or_insert(record);
        }
        self.diagnostics.extend(other.diagnostics);
    }
}

fn worse(a: CmpErrorInfo, b: CmpErrorInfo) -> CmpErrorInfo {
    CmpErrorInfo {
        tolerance: a.tolerance.max(b.tolerance),
        may_be_wrong: a.may_be_wrong || b.may_be_wrong,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

pub struct ErrorEngine<'a> {
    program: &'a Program,
    ranges: &'a RangeOutcome,
    config: &'a AnalysisConfig,
}

impl<'a> ErrorEngine<'a> {
    /// `ranges` must carry the assigned numeric types.
    pub fn new(program: &'a Program, ranges: &'a RangeOutcome, config: &'a AnalysisConfig) -> Self {
        Self {
            program,
            ranges,
            config,
        }
    }

    pub fn propagate(&self, entry: FunctionId) -> ErrorOutcome {
        let mut domain = ErrorDomain {
            program: self.program,
            ranges: self.ranges,
            config: self.config,
            forms: HashMap::new(),
            memory: BTreeMap::new(),
            wild: None,
            comparisons: BTreeMap::new(),
        };
        domain.enter(entry);
        let mut walker = Walker::new(self.program, WalkLimits::from_config(self.config), domain);
        walker.run(entry);
        let (domain, diagnostics) = walker.into_parts();
        info!(
            function = %self.program.function(entry).name,
            values = domain.forms.len(),
            comparisons = domain.comparisons.len(),
            "error propagation finished"
        );
        ErrorOutcome {
            forms: domain.forms,
            memory: domain.memory,
            comparisons: domain.comparisons,
            diagnostics,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Domain
// ═══════════════════════════════════════════════════════════════════════════

struct ErrorDomain<'a> {
    program: &'a Program,
    ranges: &'a RangeOutcome,
    config: &'a AnalysisConfig,
    forms: HashMap<NodeId, ErrorForm>,
    /// Errors of values written to memory.
    memory: BTreeMap<Location, ErrorForm>,
    /// Errors written through pointers with unknown targets.
    wild: Option<ErrorForm>,
    comparisons: BTreeMap<NodeId, CmpErrorInfo>,
}

/// Error a value carries on entry: its seed error, or the rounding into its
/// numeric type.
fn input_error(info: &ValueInfo) -> f64 {
    info.initial_error
        .unwrap_or_else(|| info.numeric_type.map_or(0.0, |ty| ty.rounding_error()))
}

/// `a·b` where a zero factor wins over an infinite one.
fn scaled_bound(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

impl ErrorDomain<'_> {
    fn enter(&mut self, entry: FunctionId) {
        let program = self.program;
        for &param in &program.function(entry).params {
            if !program.node(param).ty.is_numeric() {
                continue;
            }
            if let Some(info) = self.info(param) {
                let form = ErrorForm::input(NoiseSymbol::new(param, NoiseKind::Input), input_error(info));
                self.update(param, form);
            }
        }
    }

    fn info(&self, node: NodeId) -> Option<&ValueInfo> {
        self.ranges.values.get(&node).and_then(MdInfo::scalar)
    }

    fn range(&self, node: NodeId) -> Option<Range> {
        self.ranges.range(node)
    }

    fn magnitude(&self, node: NodeId) -> f64 {
        self.range(node).map_or(f64::INFINITY, |r| r.magnitude())
    }

    fn form(&self, node: NodeId) -> Option<&ErrorForm> {
        self.forms.get(&node)
    }

    /// Rounding into the numeric type chosen for `node`.
    fn rounding(&self, node: NodeId) -> f64 {
        self.info(node)
            .and_then(|info| info.numeric_type)
            .map_or(0.0, |ty| ty.rounding_error())
    }

    fn rounded(&self, node: NodeId, form: ErrorForm) -> ErrorForm {
        form.with_term(NoiseSymbol::new(node, NoiseKind::Rounding), self.rounding(node))
    }

    /// Join `form` into the error of `node`. Returns whether it changed.
    fn update(&mut self, node: NodeId, form: ErrorForm) -> bool {
        match self.forms.entry(node) {
            Entry::Occupied(mut slot) => {
                let joined = slot.get().join(&form, node);
                if &joined == slot.get() {
                    false
                } else {
                    slot.insert(joined);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(form);
                true
            }
        }
    }

    fn operand_forms(&self, node: &Node) -> Option<Vec<ErrorForm>> {
        node.operands.iter().map(|id| self.form(*id).cloned()).collect()
    }

    fn largest_bound(forms: &[ErrorForm]) -> f64 {
        forms.iter().map(ErrorForm::bound).fold(0.0, f64::max)
    }

    fn push(&self, diagnostics: &mut Diagnostics, kind: DiagnosticKind, node: &Node, message: String) {
        let mut diagnostic = Diagnostic::warning(kind, message).at_node(node.id);
        if let Some(function) = node.function {
            diagnostic = diagnostic.in_function(function);
        }
        diagnostics.push(diagnostic);
    }

    fn constant(&mut self, node: &Node, value: f64) -> bool {
        let error = if self.config.exact_constants {
            0.0
        } else {
            match self.info(node.id).and_then(|info| info.numeric_type) {
                Some(ty) => match ty.as_fixed() {
                    Some(fixed) => (fixed.quantize(value) - value).abs(),
                    None => ty.rounding_error(),
                },
                None => 0.0,
            }
        };
        let form = ErrorForm::input(NoiseSymbol::new(node.id, NoiseKind::Rounding), error);
        self.update(node.id, form)
    }

    fn binary(&mut self, node: &Node, op: BinaryOp, diagnostics: &mut Diagnostics) -> bool {
        let Some(forms) = self.operand_forms(node) else {
            return false;
        };
        let [a, b] = &forms[..] else {
            return false;
        };
        let (lhs, rhs) = (node.operands[0], node.operands[1]);
        let form = match op {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => self.product(node.id, (lhs, a), (rhs, b)),
            BinaryOp::Div => self.quotient(node, (lhs, a), (rhs, b), diagnostics),
            BinaryOp::Rem => {
                if a.is_exact() && b.is_exact() {
                    ErrorForm::constant()
                } else {
                    // the quotient may flip, moving the result by up to |b|
                    let jump = self.magnitude(rhs) + b.bound();
                    ErrorForm::input(NoiseSymbol::new(node.id, NoiseKind::Product), jump)
                }
            }
            BinaryOp::Shl | BinaryOp::AShr => {
                let amount = self.range(rhs).filter(|r| r.is_point());
                match amount {
                    _ if a.is_exact() && b.is_exact() => ErrorForm::constant(),
                    Some(k) if b.is_exact() => {
                        let factor = if op == BinaryOp::Shl { k.min.exp2() } else { (-k.min).exp2() };
                        let scaled = a.scale(factor);
                        if op == BinaryOp::AShr {
                            scaled.with_term(NoiseSymbol::new(node.id, NoiseKind::Product), 1.0)
                        } else {
                            scaled
                        }
                    }
                    _ => ErrorForm::unbounded(),
                }
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                if a.is_exact() && b.is_exact() {
                    ErrorForm::constant()
                } else {
                    ErrorForm::unbounded()
                }
            }
        };
        let form = self.rounded(node.id, form).at_least(Self::largest_bound(&forms), node.id);
        self.update(node.id, form)
    }

    fn product(&self, node: NodeId, (lhs, a): (NodeId, &ErrorForm), (rhs, b): (NodeId, &ErrorForm)) -> ErrorForm {
        let exact_point = |id: NodeId, form: &ErrorForm| {
            self.range(id).filter(|r| r.is_point() && form.is_exact()).map(|r| r.min)
        };
        if let Some(c) = exact_point(lhs, a) {
            return b.scale(c);
        }
        if let Some(c) = exact_point(rhs, b) {
            return a.scale(c);
        }
        let (ea, eb) = (a.bound(), b.bound());
        let magnitude = scaled_bound(self.magnitude(lhs), eb) + scaled_bound(self.magnitude(rhs), ea) + ea * eb;
        ErrorForm::input(NoiseSymbol::new(node, NoiseKind::Product), magnitude)
    }

    fn quotient(
        &self,
        node: &Node,
        (lhs, a): (NodeId, &ErrorForm),
        (rhs, b): (NodeId, &ErrorForm),
        diagnostics: &mut Diagnostics,
    ) -> ErrorForm {
        let Some(divisor) = self.range(rhs) else {
            return ErrorForm::unbounded();
        };
        let (smallest, eb) = (divisor.min_magnitude(), b.bound());
        if divisor.contains_zero() || smallest <= eb {
            self.push(
                diagnostics,
                DiagnosticKind::DivisorMayBeZero,
                node,
                format!("divisor {} is within its error {:e} of zero", divisor, eb),
            );
            return ErrorForm::unbounded();
        }
        if divisor.is_point() && b.is_exact() {
            return a.scale(1.0 / divisor.min);
        }
        // |1/(y+e) - 1/y| <= e / (m(m-e)) for |y| >= m > e
        let reciprocal = eb / (smallest * (smallest - eb));
        let ea = a.bound();
        let magnitude = scaled_bound(self.magnitude(lhs), reciprocal) + ea / smallest + ea * reciprocal;
        ErrorForm::input(NoiseSymbol::new(node.id, NoiseKind::Product), magnitude)
    }

    fn cast(&mut self, node: &Node) -> bool {
        let Some(source) = node.operand(0).and_then(|id| self.form(id)).cloned() else {
            return false;
        };
        let destination = if node.ty.is_int() {
            // truncation may move an inexact value across an integer
            if source.is_exact() {
                0.0
            } else {
                1.0
            }
        } else if let Some(ty) = self.info(node.id).and_then(|info| info.numeric_type) {
            ty.rounding_error()
        } else if let Some(standard) = node.ty.float_standard() {
            FloatFormat::new(standard, self.magnitude(node.id)).rounding_error()
        } else {
            0.0
        };
        let floor = source.bound();
        let form = source
            .with_term(NoiseSymbol::new(node.id, NoiseKind::Rounding), destination)
            .at_least(floor, node.id);
        self.update(node.id, form)
    }

    fn compare(&mut self, node: &Node, diagnostics: &mut Diagnostics) -> bool {
        let Some(forms) = self.operand_forms(node) else {
            return false;
        };
        let [a, b] = &forms[..] else {
            return false;
        };
        let tolerance = a.bound() + b.bound();
        let width = node
            .operands
            .iter()
            .map(|id| self.range(*id).map(|r| r.width()).filter(|w| w.is_finite()))
            .try_fold(0.0, |widest: f64, width| width.map(|w| widest.max(w)));
        // an operand of unknown extent gives no room for error
        let threshold = match width {
            Some(width) => self.config.cmp_threshold_percent / 100.0 * width,
            None => 0.0,
        };
        let may_be_wrong = tolerance > 0.0 && tolerance >= threshold;
        let record = CmpErrorInfo {
            tolerance,
            may_be_wrong,
        };
        self.comparisons
            .entry(node.id)
            .and_modify(|mine| *mine = worse(*mine, record))
            .or_insert(record);

        if may_be_wrong {
            self.push(
                diagnostics,
                DiagnosticKind::ComparisonMayBeWrong,
                node,
                format!("comparison may flip: operand error up to {:e}", tolerance),
            );
        }
        // a flipped comparison is off by one
        let form = if may_be_wrong {
            ErrorForm::input(NoiseSymbol::new(node.id, NoiseKind::Rounding), 1.0)
        } else {
            ErrorForm::constant()
        };
        self.update(node.id, form)
    }

    fn select(&mut self, node: &Node) -> bool {
        let [cond, if_true, if_false] = node.operands[..] else {
            return false;
        };
        let uncertain = self.form(cond).is_some_and(|f| !f.is_exact());
        let picks = match self.range(cond) {
            Some(r) if !uncertain && r.same_as(&Range::point(1.0)) => vec![if_true],
            Some(r) if !uncertain && r.same_as(&Range::point(0.0)) => vec![if_false],
            _ => vec![if_true, if_false],
        };
        let Some(mut form) = self.join_all(node.id, &picks) else {
            return false;
        };
        if uncertain {
            let spread = match (self.range(if_true), self.range(if_false)) {
                (Some(a), Some(b)) => a.union(&b).width(),
                _ => f64::INFINITY,
            };
            form = form.with_term(NoiseSymbol::new(node.id, NoiseKind::Join), spread);
        }
        self.update(node.id, form)
    }

    /// Join of the available forms of `nodes`.
    fn join_all(&self, origin: NodeId, nodes: &[NodeId]) -> Option<ErrorForm> {
        nodes
            .iter()
            .filter_map(|id| self.form(*id))
            .fold(None, |acc: Option<ErrorForm>, form| match acc {
                Some(acc) => Some(acc.join(form, origin)),
                None => Some(form.clone()),
            })
    }

    /// Error of the value stored at `location`. Stack slots start out
    /// without error, other cells with the error of their contents.
    fn location_form(&self, location: &Location) -> ErrorForm {
        let mut forms: Vec<ErrorForm> = self
            .memory
            .iter()
            .filter(|(held_at, _)| held_at.overlaps(location))
            .map(|(_, form)| form.clone())
            .collect();
        forms.extend(self.wild.clone());

        let on_stack = matches!(self.program.node(location.cell).op, Opcode::Alloca);
        if !on_stack || forms.is_empty() {
            let error = if on_stack {
                0.0
            } else {
                self.ranges
                    .values
                    .get(&location.cell)
                    .and_then(|record| record.resolve(&location.path))
                    .and_then(MdInfo::scalar)
                    .map_or(0.0, input_error)
            };
            forms.push(ErrorForm::input(
                NoiseSymbol::at_path(location.cell, NoiseKind::Input, &location.path),
                error,
            ));
        }

        let mut iter = forms.into_iter();
        let first = iter.next().unwrap_or_default();
        iter.fold(first, |acc, form| acc.join(&form, location.cell))
    }

    fn load(&mut self, node: &Node) -> bool {
        if !node.ty.is_numeric() {
            return false;
        }
        let ranges = self.ranges;
        let Some(targets) = node.operand(0).and_then(|ptr| ranges.points_to(ptr)) else {
            return false;
        };
        let form = match targets {
            PointsTo::Unknown => ErrorForm::unbounded(),
            PointsTo::Targets(locations) => {
                let mut iter = locations.iter().map(|loc| self.location_form(loc));
                let Some(first) = iter.next() else {
                    return false;
                };
                iter.fold(first, |acc, form| acc.join(&form, node.id))
            }
        };
        self.update(node.id, form)
    }

    fn store(&mut self, node: &Node) -> bool {
        let [value, ptr] = node.operands[..] else {
            return false;
        };
        let ranges = self.ranges;
        let (Some(form), Some(targets)) = (self.form(value).cloned(), ranges.points_to(ptr)) else {
            return false;
        };
        match targets {
            PointsTo::Unknown => {
                let joined = match &self.wild {
                    Some(wild) => wild.join(&form, node.id),
                    None => form,
                };
                let changed = self.wild.as_ref() != Some(&joined);
                self.wild = Some(joined);
                changed
            }
            PointsTo::Targets(locations) => {
                let mut changed = false;
                for location in locations {
                    changed |= write(&mut self.memory, location.clone(), &form, node.id);
                }
                changed
            }
        }
    }

    fn clobber(&mut self, pointer: NodeId) -> bool {
        let ranges = self.ranges;
        let Some(PointsTo::Targets(locations)) = ranges.points_to(pointer) else {
            return false;
        };
        let mut changed = false;
        for location in locations {
            changed |= write(&mut self.memory, location.clone(), &ErrorForm::unbounded(), pointer);
        }
        changed
    }

    /// Error forced by a `final` seed that carries its own error.
    fn reseeded(&self, node: NodeId) -> Option<ErrorForm> {
        let info = self.info(node)?;
        let error = info.initial_error.filter(|_| info.is_final)?;
        Some(ErrorForm::input(NoiseSymbol::new(node, NoiseKind::Input), error))
    }
}

/// Weak update of a memory location.
fn write(memory: &mut BTreeMap<Location, ErrorForm>, location: Location, form: &ErrorForm, origin: NodeId) -> bool {
    match memory.entry(location) {
        btree_map::Entry::Occupied(mut slot) => {
            let joined = slot.get().join(form, origin);
            let changed = &joined != slot.get();
            slot.insert(joined);
            changed
        }
        btree_map::Entry::Vacant(slot) => {
            slot.insert(form.clone());
            true
        }
    }
}

impl FlowDomain for ErrorDomain<'_> {
    fn transfer(&mut self, node: &Node, diagnostics: &mut Diagnostics) -> bool {
        if !matches!(node.op, Opcode::Param(_)) {
            if let Some(form) = self.reseeded(node.id) {
                return self.update(node.id, form);
            }
        }
        match &node.op {
            Opcode::Const(_) if !node.ty.is_numeric() => false,
            Opcode::Const(value) => self.constant(node, *value),
            Opcode::Binary(op) => self.binary(node, *op, diagnostics),
            Opcode::Neg => match node.operand(0).and_then(|id| self.form(id)).cloned() {
                Some(form) => self.update(node.id, form.neg()),
                None => false,
            },
            Opcode::Cast => self.cast(node),
            Opcode::Cmp(_) => self.compare(node, diagnostics),
            Opcode::Select => self.select(node),
            Opcode::Phi(_) => match self.join_all(node.id, &node.operands) {
                Some(form) => self.update(node.id, form),
                None => false,
            },
            Opcode::Load => self.load(node),
            Opcode::Store => self.store(node),
            Opcode::Param(_)
            | Opcode::Alloca
            | Opcode::Global(_)
            | Opcode::FieldAddr(_)
            | Opcode::ElementAddr
            | Opcode::Call(_)
            | Opcode::Ret
            | Opcode::Br(_)
            | Opcode::CondBr(..) => false,
        }
    }

    fn intrinsic(&mut self, call: &Node, callee: &Function, _: &mut Diagnostics) -> Option<bool> {
        let intrinsic = Intrinsic::from_name(&callee.name)?;
        let ranges: Option<Vec<Range>> = call.operands.iter().map(|id| self.range(*id)).collect();
        let (Some(ranges), Some(forms)) = (ranges, self.operand_forms(call)) else {
            return Some(false);
        };
        let bounds: Vec<f64> = forms.iter().map(ErrorForm::bound).collect();
        let Some(error) = intrinsic.error(&ranges, &bounds) else {
            return Some(false);
        };
        let form = ErrorForm::input(NoiseSymbol::new(call.id, NoiseKind::Intrinsic), error);
        let form = self.rounded(call.id, form).at_least(Self::largest_bound(&forms), call.id);
        Some(self.update(call.id, form))
    }

    fn bind_arguments(&mut self, call: &Node, callee: &Function) -> bool {
        let mut changed = false;
        for (param, arg) in callee.params.iter().zip(&call.operands) {
            if let Some(form) = self.form(*arg).cloned() {
                changed |= self.update(*param, form);
            }
        }
        changed
    }

    fn bind_return(&mut self, call: &Node, callee: &Function) -> bool {
        let program = self.program;
        let mut changed = false;
        for ret in program.return_nodes(callee.id) {
            let value = program.node(ret).operand(0);
            if let Some(form) = value.and_then(|id| self.form(id)).cloned() {
                changed |= self.update(call.id, form);
            }
        }
        changed
    }

    fn opaque_call(&mut self, call: &Node, _: &mut Diagnostics) -> bool {
        let mut changed = false;
        if call.ty.is_numeric() {
            changed |= self.update(call.id, ErrorForm::unbounded());
        }
        for &arg in &call.operands {
            changed |= self.clobber(arg);
        }
        debug!(call = %call.id, "opaque call, error unbounded");
        changed
    }

    fn widen(&mut self, node: &Node) -> bool {
        match &node.op {
            Opcode::Const(_) | Opcode::Cmp(_) | Opcode::Param(_) | Opcode::Alloca | Opcode::Global(_) => false,
            Opcode::Store => match node.operand(1) {
                Some(ptr) => self.clobber(ptr),
                None => false,
            },
            _ => match self.forms.get_mut(&node.id) {
                Some(form) if !form.is_unbounded() => {
                    *form = ErrorForm::unbounded();
                    true
                }
                _ => false,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
