//! Range propagation over loops, calls and memory.

mod common;

use common::fixtures::{accumulate, calls, externals, input, pinned, points, recursive};
use common::harness::ranges;
use fxp_analysis::{AnalysisConfig, DiagnosticKind, MdInfo, Range, RangeEngine, SeedTable, ShapeCache, ValueInfo};
use fxp_ir::{ProgramBuilder, ValueType};

fn unit_input(node: fxp_ir::NodeId) -> SeedTable {
    [(node, input(Range::new(0.0, 1.0)))].into_iter().collect()
}

#[test]
fn test_exact_trip_count_bounds_accumulator() {
    let fx = accumulate(Some(10), None);
    let outcome = ranges(&fx.program, fx.entry, &unit_input(fx.x), &AnalysisConfig::default());

    assert_eq!(outcome.range(fx.acc), Some(Range::new(0.0, 10.0)));
    assert_eq!(outcome.range(fx.counter), Some(Range::new(0.0, 10.0)));
    assert_eq!(outcome.range(fx.step), Some(Range::new(1.0, 10.0)));
    // the exit test sees both outcomes
    assert_eq!(outcome.range(fx.cond), Some(Range::boolean()));
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_unknown_trip_count_is_widened() {
    let fx = accumulate(None, None);
    let outcome = ranges(&fx.program, fx.entry, &unit_input(fx.x), &AnalysisConfig::default());

    assert!(outcome.range(fx.acc).is_some_and(|r| r.is_top()));
    assert!(outcome.range(fx.counter).is_some_and(|r| r.is_top()));
    assert!(outcome.diagnostics.has(DiagnosticKind::LoopNotConverged));
    assert!(outcome.is_imprecise());
}

#[test]
fn test_trip_count_above_unroll_cap_is_widened() {
    let fx = accumulate(Some(10), None);
    let config = AnalysisConfig::builder().max_unroll(4).build();
    let outcome = ranges(&fx.program, fx.entry, &unit_input(fx.x), &config);

    assert!(outcome.range(fx.acc).is_some_and(|r| r.is_top()));
    assert!(outcome.diagnostics.has(DiagnosticKind::LoopNotConverged));
}

#[test]
fn test_final_seeds_let_loop_converge() {
    let fx = accumulate(None, Some(4));
    let seeds: SeedTable = [
        (fx.x, input(Range::new(0.0, 1.0))),
        (fx.counter, pinned(Range::new(0.0, 10.0))),
        (fx.acc, pinned(Range::new(0.0, 10.0))),
    ]
    .into_iter()
    .collect();
    let outcome = ranges(&fx.program, fx.entry, &seeds, &AnalysisConfig::default());

    assert_eq!(outcome.range(fx.acc), Some(Range::new(0.0, 10.0)));
    assert_eq!(outcome.range(fx.next), Some(Range::new(0.0, 11.0)));
    assert_eq!(outcome.range(fx.step), Some(Range::new(1.0, 11.0)));
    assert!(!outcome.diagnostics.has(DiagnosticKind::LoopNotConverged));
}

#[test]
fn test_resuming_a_converged_outcome_changes_nothing() {
    let fx = accumulate(None, Some(4));
    let seeds: SeedTable = [
        (fx.x, input(Range::new(0.0, 1.0))),
        (fx.counter, pinned(Range::new(0.0, 10.0))),
        (fx.acc, pinned(Range::new(0.0, 10.0))),
    ]
    .into_iter()
    .collect();
    let config = AnalysisConfig::default();
    let first = ranges(&fx.program, fx.entry, &seeds, &config);

    let shapes = ShapeCache::for_program(&fx.program);
    let again = RangeEngine::new(&fx.program, &shapes, &config).propagate_from(fx.entry, first.clone());
    assert_eq!(again.values, first.values);
    assert_eq!(again.pointers, first.pointers);
    assert_eq!(again.diagnostics.len(), first.diagnostics.len());
}

#[test]
fn test_call_binds_arguments_and_return() {
    let fx = calls();
    let outcome = ranges(&fx.program, fx.main, &unit_input(fx.x), &AnalysisConfig::default());

    assert_eq!(outcome.range(fx.first), Some(Range::new(0.0, 2.0)));
    assert_eq!(outcome.range(fx.second), Some(Range::new(0.0, 4.0)));
    // one summary per callee value, covering both call sites
    assert_eq!(outcome.range(fx.product), Some(Range::new(0.0, 4.0)));
    assert!(outcome.diagnostics.is_empty());
}

#[test]
fn test_recursion_beyond_limit_is_opaque() {
    let fx = recursive(None);
    let outcome = ranges(&fx.program, fx.main, &unit_input(fx.x), &AnalysisConfig::default());

    assert!(outcome.range(fx.inner).is_some_and(|r| r.is_top()));
    assert!(outcome.range(fx.result).is_some_and(|r| r.is_top()));
    assert!(outcome.diagnostics.has(DiagnosticKind::RecursionLimit));
}

#[test]
fn test_function_recursion_annotation_still_terminates() {
    let fx = recursive(Some(3));
    let outcome = ranges(&fx.program, fx.main, &unit_input(fx.x), &AnalysisConfig::default());

    assert!(outcome.range(fx.result).is_some_and(|r| r.is_top()));
    assert_eq!(outcome.diagnostics.of_kind(DiagnosticKind::RecursionLimit).count(), 1);
}

#[test]
fn test_library_and_unknown_externals() {
    let fx = externals();
    let seeds: SeedTable = [(fx.x, input(Range::new(4.0, 9.0)))].into_iter().collect();
    let outcome = ranges(&fx.program, fx.entry, &seeds, &AnalysisConfig::default());

    assert_eq!(outcome.range(fx.root), Some(Range::new(2.0, 3.0)));
    assert!(outcome.range(fx.unknown).is_some_and(|r| r.is_top()));
    assert!(outcome.diagnostics.has(DiagnosticKind::UnknownCallee));
}

#[test]
fn test_struct_fields_are_tracked_separately() {
    let fx = points();
    let outcome = ranges(&fx.program, fx.entry, &unit_input(fx.x), &AnalysisConfig::default());

    assert_eq!(outcome.range(fx.slot_x), Some(Range::point(5.0)));
    assert_eq!(outcome.range(fx.slot_y), Some(Range::new(0.0, 1.0)));

    let record = outcome.info(fx.slot).unwrap();
    assert_eq!(record.arity(), Some(2));
    assert_eq!(record.resolve(&[0]).and_then(MdInfo::range), Some(Range::point(5.0)));
    assert_eq!(record.resolve(&[1]).and_then(MdInfo::range), Some(Range::new(0.0, 1.0)));
}

#[test]
fn test_partial_global_seed_is_completed() {
    let fx = points();
    let origin = MdInfo::Aggregate(vec![Some(input(Range::new(-1.0, 1.0))), None]);
    let seeds: SeedTable = [(fx.x, input(Range::new(0.0, 1.0))), (fx.global, origin)]
        .into_iter()
        .collect();
    let outcome = ranges(&fx.program, fx.entry, &seeds, &AnalysisConfig::default());

    assert_eq!(outcome.range(fx.global_x), Some(Range::new(-1.0, 1.0)));
    // the missing field got a slot but no range
    assert_eq!(outcome.range(fx.global_y), None);
    let record = outcome.info(fx.global).unwrap();
    assert!(record.resolve(&[1]).is_some());
}

#[test]
fn test_integer_casts_truncate_or_wrap() {
    let mut pb = ProgramBuilder::new();
    let mut f = pb.function("casts", vec![ValueType::double(), ValueType::double()], ValueType::Void);
    let b = f.block();
    let (small, large) = (f.param(0), f.param(1));
    let truncated = f.cast(b, small, ValueType::i32());
    let wrapped = f.cast(
        b,
        large,
        ValueType::Int {
            width: 8,
            signed: true,
        },
    );
    f.ret(b, None);
    let entry = f.finish();
    let program = pb.finish();

    let seeds: SeedTable = [
        (small, input(Range::new(0.5, 3.7))),
        (large, input(Range::new(0.0, 300.0))),
    ]
    .into_iter()
    .collect();
    let outcome = ranges(&program, entry, &seeds, &AnalysisConfig::default());
    assert_eq!(outcome.range(truncated), Some(Range::new(0.0, 3.0)));
    assert_eq!(outcome.range(wrapped), Some(Range::new(-128.0, 127.0)));
    // integers are not conversion candidates
    let slot = outcome.info(truncated).and_then(MdInfo::scalar).cloned().unwrap_or_default();
    assert!(!slot.enabled);
    assert_eq!(slot, ValueInfo { range: slot.range, ..ValueInfo::new() });
}
