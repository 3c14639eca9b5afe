//! Helpers to run the engines the way the pipeline does.

#![allow(dead_code)]

use fxp_analysis::{AnalysisConfig, ErrorEngine, ErrorOutcome, RangeEngine, RangeOutcome, SeedTable, ShapeCache, TypeDeriver};
use fxp_ir::{FunctionId, Program};

/// Route engine logs to the test output. Set `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ranges(program: &Program, entry: FunctionId, seeds: &SeedTable, config: &AnalysisConfig) -> RangeOutcome {
    init_tracing();
    let shapes = ShapeCache::for_program(program);
    RangeEngine::new(program, &shapes, config).propagate(entry, seeds)
}

/// Ranges with derived types, then errors.
pub fn errors(
    program: &Program,
    entry: FunctionId,
    seeds: &SeedTable,
    config: &AnalysisConfig,
) -> (RangeOutcome, ErrorOutcome) {
    let mut ranges = ranges(program, entry, seeds, config);
    let mut diagnostics = std::mem::take(&mut ranges.diagnostics);
    TypeDeriver::new(config.sizing).assign(program, &mut ranges.values, &mut diagnostics);
    ranges.diagnostics = diagnostics;
    let errors = ErrorEngine::new(program, &ranges, config).propagate(entry);
    (ranges, errors)
}
