//! Small programs shared by the integration tests.

#![allow(dead_code)]

use fxp_analysis::{MdInfo, Range, ValueInfo};
use fxp_ir::{Callee, CmpPredicate, FunctionId, NodeId, Program, ProgramBuilder, ValueType};

/// Seed record of a double input.
pub fn input(range: Range) -> MdInfo {
    MdInfo::Scalar(ValueInfo::fresh(&ValueType::double()).with_range(range))
}

pub fn input_with_error(range: Range, error: f64) -> MdInfo {
    MdInfo::Scalar(
        ValueInfo::fresh(&ValueType::double())
            .with_range(range)
            .with_initial_error(error),
    )
}

pub fn pinned(range: Range) -> MdInfo {
    MdInfo::Scalar(ValueInfo::fresh(&ValueType::double()).with_range(range).with_final())
}

// ═══════════════════════════════════════════════════════════════════════════
// Straight-line code
// ═══════════════════════════════════════════════════════════════════════════

/// `scale(x) = x * 2`, reported as target `out`.
pub struct Scale {
    pub program: Program,
    pub entry: FunctionId,
    pub x: NodeId,
    pub doubled: NodeId,
}

pub fn scale() -> Scale {
    let mut pb = ProgramBuilder::new();
    let mut f = pb.function("scale", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let two = f.constant(b, 2.0, ValueType::double());
    let doubled = f.mul(b, x, two);
    f.ret(b, Some(doubled));
    f.set_starting_point();
    let entry = f.finish();
    pb.target("out", vec![doubled]);
    Scale {
        program: pb.finish(),
        entry,
        x,
        doubled,
    }
}

/// `ratio(x, y) = x / y`.
pub struct Ratio {
    pub program: Program,
    pub entry: FunctionId,
    pub x: NodeId,
    pub y: NodeId,
    pub quotient: NodeId,
}

pub fn ratio() -> Ratio {
    let mut pb = ProgramBuilder::new();
    let mut f = pb.function(
        "ratio",
        vec![ValueType::double(), ValueType::double()],
        ValueType::double(),
    );
    let b = f.block();
    let (x, y) = (f.param(0), f.param(1));
    let quotient = f.div(b, x, y);
    f.ret(b, Some(quotient));
    f.set_starting_point();
    let entry = f.finish();
    Ratio {
        program: pb.finish(),
        entry,
        x,
        y,
        quotient,
    }
}

/// `threshold(x) = x < 5 ? x : 5`.
pub struct Threshold {
    pub program: Program,
    pub entry: FunctionId,
    pub x: NodeId,
    pub cmp: NodeId,
    pub picked: NodeId,
}

pub fn threshold() -> Threshold {
    let mut pb = ProgramBuilder::new();
    let mut f = pb.function("threshold", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let five = f.constant(b, 5.0, ValueType::double());
    let cmp = f.cmp(b, CmpPredicate::Lt, x, five);
    let picked = f.select(b, cmp, x, five);
    f.ret(b, Some(picked));
    f.set_starting_point();
    let entry = f.finish();
    pb.target("clamped", vec![picked]);
    Threshold {
        program: pb.finish(),
        entry,
        x,
        cmp,
        picked,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Loops
// ═══════════════════════════════════════════════════════════════════════════

/// ```text
/// counter = 0; acc = 0
/// while counter < 10 { counter += 1; acc += x }
/// return acc
/// ```
pub struct Accumulate {
    pub program: Program,
    pub entry: FunctionId,
    pub x: NodeId,
    pub counter: NodeId,
    pub acc: NodeId,
    pub step: NodeId,
    pub next: NodeId,
    pub cond: NodeId,
}

pub fn accumulate(trip_count: Option<u32>, unroll_hint: Option<u32>) -> Accumulate {
    let mut pb = ProgramBuilder::new();
    let mut f = pb.function("accumulate", vec![ValueType::double()], ValueType::double());
    let entry = f.block();
    let header = f.block();
    let body = f.block();
    let exit = f.block();
    let x = f.param(0);

    let zero = f.constant(entry, 0.0, ValueType::double());
    let one = f.constant(entry, 1.0, ValueType::double());
    let limit = f.constant(entry, 10.0, ValueType::double());
    f.br(entry, header);

    let counter = f.phi(header, ValueType::double());
    let acc = f.phi(header, ValueType::double());
    let cond = f.cmp(header, CmpPredicate::Lt, counter, limit);
    f.cond_br(header, cond, body, exit);

    let step = f.add(body, counter, one);
    let next = f.add(body, acc, x);
    f.br(body, header);

    f.add_incoming(counter, zero, entry);
    f.add_incoming(counter, step, body);
    f.add_incoming(acc, zero, entry);
    f.add_incoming(acc, next, body);
    f.ret(exit, Some(acc));

    let lp = f.add_loop(header, vec![header, body], trip_count);
    if let Some(hint) = unroll_hint {
        f.set_unroll_hint(lp, hint);
    }
    f.set_starting_point();
    let id = f.finish();
    pb.target("sum", vec![acc]);
    Accumulate {
        program: pb.finish(),
        entry: id,
        x,
        counter,
        acc,
        step,
        next,
        cond,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Calls
// ═══════════════════════════════════════════════════════════════════════════

/// `main(x) = twice(twice(x))` with `twice(v) = v * 2`.
pub struct Calls {
    pub program: Program,
    pub main: FunctionId,
    pub twice: FunctionId,
    pub x: NodeId,
    pub first: NodeId,
    pub second: NodeId,
    pub product: NodeId,
}

pub fn calls() -> Calls {
    let mut pb = ProgramBuilder::new();
    let mut g = pb.function("twice", vec![ValueType::double()], ValueType::double());
    let b = g.block();
    let v = g.param(0);
    let two = g.constant(b, 2.0, ValueType::double());
    let product = g.mul(b, v, two);
    g.ret(b, Some(product));
    let twice = g.finish();

    let mut f = pb.function("main", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let first = f.call(b, Callee::Direct(twice), vec![x], ValueType::double());
    let second = f.call(b, Callee::Direct(twice), vec![first], ValueType::double());
    f.ret(b, Some(second));
    f.set_starting_point();
    let main = f.finish();
    Calls {
        program: pb.finish(),
        main,
        twice,
        x,
        first,
        second,
        product,
    }
}

/// `main(x) = spin(x)` with `spin(v) = spin(v) + v`.
pub struct Recursive {
    pub program: Program,
    pub main: FunctionId,
    pub x: NodeId,
    pub inner: NodeId,
    pub result: NodeId,
}

pub fn recursive(max_recursion: Option<u32>) -> Recursive {
    let mut pb = ProgramBuilder::new();
    let spin = pb.declare_function("spin", vec![ValueType::double()], ValueType::double());
    let mut g = pb.define(spin);
    let b = g.block();
    let v = g.param(0);
    let inner = g.call(b, Callee::Direct(spin), vec![v], ValueType::double());
    let sum = g.add(b, inner, v);
    g.ret(b, Some(sum));
    if let Some(depth) = max_recursion {
        g.set_max_recursion(depth);
    }
    g.finish();

    let mut f = pb.function("main", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let result = f.call(b, Callee::Direct(spin), vec![x], ValueType::double());
    f.ret(b, Some(result));
    f.set_starting_point();
    let main = f.finish();
    Recursive {
        program: pb.finish(),
        main,
        x,
        inner,
        result,
    }
}

/// Calls to a library function and to an unknown external one.
pub struct Externals {
    pub program: Program,
    pub entry: FunctionId,
    pub x: NodeId,
    pub root: NodeId,
    pub unknown: NodeId,
}

pub fn externals() -> Externals {
    let mut pb = ProgramBuilder::new();
    let sqrt = pb.declare_function("sqrt", vec![ValueType::double()], ValueType::double());
    let mystery = pb.declare_function("mystery", vec![ValueType::double()], ValueType::double());
    let mut f = pb.function("externals", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let root = f.call(b, Callee::Direct(sqrt), vec![x], ValueType::double());
    let unknown = f.call(b, Callee::Direct(mystery), vec![x], ValueType::double());
    f.ret(b, Some(root));
    f.set_starting_point();
    let entry = f.finish();
    Externals {
        program: pb.finish(),
        entry,
        x,
        root,
        unknown,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Memory
// ═══════════════════════════════════════════════════════════════════════════

/// A stack `point {double, double}` written field by field, and a global
/// `point` read back.
pub struct Points {
    pub program: Program,
    pub entry: FunctionId,
    pub x: NodeId,
    pub slot: NodeId,
    pub slot_x: NodeId,
    pub slot_y: NodeId,
    pub global: NodeId,
    pub global_x: NodeId,
    pub global_y: NodeId,
}

pub fn points() -> Points {
    let mut pb = ProgramBuilder::new();
    let point = pb.declare_struct("point");
    pb.define_struct(point, vec![ValueType::double(), ValueType::double()]);
    let global = pb.global("origin", ValueType::Struct(point));

    let mut f = pb.function("points", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let slot = f.alloca(b, ValueType::Struct(point));
    let first = f.field_addr(b, slot, vec![0]);
    let second = f.field_addr(b, slot, vec![1]);
    let five = f.constant(b, 5.0, ValueType::double());
    f.store(b, five, first);
    f.store(b, x, second);
    let slot_x = f.load(b, first);
    let slot_y = f.load(b, second);

    let origin_x = f.field_addr(b, global, vec![0]);
    let origin_y = f.field_addr(b, global, vec![1]);
    let global_x = f.load(b, origin_x);
    let global_y = f.load(b, origin_y);
    f.ret(b, Some(slot_y));
    f.set_starting_point();
    let entry = f.finish();
    pb.target("point", vec![slot]);
    Points {
        program: pb.finish(),
        entry,
        x,
        slot,
        slot_x,
        slot_y,
        global,
        global_x,
        global_y,
    }
}
