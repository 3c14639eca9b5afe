//! Criterion benchmarks for the analysis pipeline.
//!
//! Programs are generated: chains of counted loops, and functions that copy
//! values through many struct fields.
//!
//! Run with: `cargo bench --bench propagation`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fxp_analysis::{Analysis, AnalysisConfig, MdInfo, Range, SeedTable, ValueInfo};
use fxp_ir::{CmpPredicate, NodeId, Program, ProgramBuilder, ValueType};

fn seed(range: Range) -> MdInfo {
    MdInfo::Scalar(ValueInfo::fresh(&ValueType::double()).with_range(range))
}

/// `loops` consecutive loops of `trips` iterations, each adding the input to
/// the running value.
fn loop_chain(loops: usize, trips: u32) -> (Program, NodeId) {
    let mut pb = ProgramBuilder::new();
    let mut f = pb.function("chain", vec![ValueType::double()], ValueType::double());
    let x = f.param(0);
    let mut current = f.block();
    let zero = f.constant(current, 0.0, ValueType::double());
    let one = f.constant(current, 1.0, ValueType::double());
    let limit = f.constant(current, trips as f64, ValueType::double());
    let mut value = zero;

    for _ in 0..loops {
        let header = f.block();
        let body = f.block();
        let exit = f.block();
        f.br(current, header);
        let counter = f.phi(header, ValueType::double());
        let acc = f.phi(header, ValueType::double());
        let cond = f.cmp(header, CmpPredicate::Lt, counter, limit);
        f.cond_br(header, cond, body, exit);
        let step = f.add(body, counter, one);
        let next = f.add(body, acc, x);
        f.br(body, header);
        f.add_incoming(counter, zero, current);
        f.add_incoming(counter, step, body);
        f.add_incoming(acc, value, current);
        f.add_incoming(acc, next, body);
        f.add_loop(header, vec![header, body], Some(trips));
        current = exit;
        value = acc;
    }
    f.ret(current, Some(value));
    f.set_starting_point();
    f.finish();
    (pb.finish(), x)
}

/// Writes the input scaled into every field of a `fields`-wide struct, then
/// sums the fields back up.
fn wide_struct(fields: usize) -> (Program, NodeId) {
    let mut pb = ProgramBuilder::new();
    let record = pb.declare_struct("record");
    pb.define_struct(record, vec![ValueType::double(); fields]);
    let mut f = pb.function("fill", vec![ValueType::double()], ValueType::double());
    let b = f.block();
    let x = f.param(0);
    let slot = f.alloca(b, ValueType::Struct(record));
    let mut total = f.constant(b, 0.0, ValueType::double());
    for index in 0..fields {
        let factor = f.constant(b, (index + 1) as f64, ValueType::double());
        let scaled = f.mul(b, x, factor);
        let field = f.field_addr(b, slot, vec![index as u32]);
        f.store(b, scaled, field);
        let loaded = f.load(b, field);
        total = f.add(b, total, loaded);
    }
    f.ret(b, Some(total));
    f.set_starting_point();
    f.finish();
    (pb.finish(), x)
}

fn bench_loop_chains(c: &mut Criterion) {
    let mut group = c.benchmark_group("loop_chain");
    let analysis = Analysis::new(AnalysisConfig::default());

    for loops in [1usize, 8, 32] {
        let (program, x) = loop_chain(loops, 16);
        let seeds: SeedTable = [(x, seed(Range::new(0.0, 1.0)))].into_iter().collect();
        group.throughput(Throughput::Elements(program.nodes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(loops), &(), |b, _| {
            b.iter(|| analysis.run(&program, &seeds))
        });
    }

    group.finish();
}

fn bench_wide_structs(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide_struct");
    let analysis = Analysis::new(AnalysisConfig::default());

    for fields in [4usize, 64, 256] {
        let (program, x) = wide_struct(fields);
        let seeds: SeedTable = [(x, seed(Range::new(-1.0, 1.0)))].into_iter().collect();
        group.throughput(Throughput::Elements(program.nodes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &(), |b, _| {
            b.iter(|| analysis.run(&program, &seeds))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_loop_chains, bench_wide_structs);

criterion_main!(benches);
