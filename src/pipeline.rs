//! End-to-end analysis: ranges, fixed-point types, errors and the report.
//!
//! [`Analysis::run`] analyzes every entry function on its own and joins the
//! results before types are derived, so a value reached from two entries
//! gets one format covering both. [`Analysis::run_with_feedback`] repeats the
//! whole pipeline while a [`SizingFeedback`] keeps adjusting the bit budget.

use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::time::{Duration, Instant};

use fxp_ir::{CallGraph, FunctionId, NodeId, Program};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, SizingPolicy};
use crate::diagnostics::Diagnostics;
use crate::error::AnalysisError;
use crate::error_propagation::{ErrorEngine, ErrorOutcome};
use crate::fixed_point::TypeDeriver;
use crate::metadata::encoding::{self, MdNode};
use crate::metadata::{MdInfo, NumericType, Range, SeedTable, ShapeCache};
use crate::range::{RangeEngine, RangeOutcome};
use crate::report::ErrorReport;

// ═══════════════════════════════════════════════════════════════════════════
// Feedback
// ═══════════════════════════════════════════════════════════════════════════

/// Adjusts the sizing policy between analysis rounds.
pub trait SizingFeedback {
    /// Return a new policy to run another round, `None` to stop.
    fn adjust(&mut self, report: &ErrorReport, timing: Duration) -> Option<SizingPolicy>;
}

impl<F> SizingFeedback for F
where
    F: FnMut(&ErrorReport, Duration) -> Option<SizingPolicy>,
{
    fn adjust(&mut self, report: &ErrorReport, timing: Duration) -> Option<SizingPolicy> {
        self(report, timing)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Result
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Ranges with their assigned numeric types.
    pub ranges: RangeOutcome,
    pub errors: ErrorOutcome,
    pub report: ErrorReport,
    pub diagnostics: Diagnostics,
}

/// Analysis results in their persisted record layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersistedRecords {
    pub infos: BTreeMap<NodeId, MdNode>,
    pub arguments: BTreeMap<FunctionId, MdNode>,
    pub errors: BTreeMap<NodeId, MdNode>,
    /// Only comparisons that may be wrong.
    pub comparisons: BTreeMap<NodeId, MdNode>,
    /// Unroll hints of every function with loops.
    pub unroll_counts: BTreeMap<FunctionId, MdNode>,
}

impl AnalysisResult {
    pub fn info(&self, node: NodeId) -> Option<&MdInfo> {
        self.ranges.info(node)
    }

    pub fn range(&self, node: NodeId) -> Option<Range> {
        self.ranges.range(node)
    }

    pub fn numeric_type(&self, node: NodeId) -> Option<NumericType> {
        self.info(node)
            .and_then(MdInfo::scalar)
            .and_then(|info| info.numeric_type)
    }

    /// Worst-case absolute error of a value.
    pub fn error(&self, node: NodeId) -> Option<f64> {
        self.errors.bound(node)
    }

    pub fn errors(&self) -> BTreeMap<NodeId, f64> {
        self.errors.errors()
    }

    pub fn is_imprecise(&self) -> bool {
        self.diagnostics.is_imprecise()
    }

    pub fn records(&self, program: &Program) -> PersistedRecords {
        let infos = self
            .ranges
            .values
            .iter()
            .map(|(node, info)| (*node, encoding::encode_info(info)))
            .collect();
        let arguments = program
            .functions
            .iter()
            .filter(|f| !f.params.is_empty() && f.params.iter().any(|p| self.info(*p).is_some()))
            .map(|f| {
                let params: Vec<Option<MdInfo>> = f.params.iter().map(|p| self.info(*p).cloned()).collect();
                (f.id, encoding::encode_arguments(&params))
            })
            .collect();
        let errors = self
            .errors
            .errors()
            .into_iter()
            .map(|(node, error)| (node, encoding::encode_error(error)))
            .collect();
        let comparisons = self
            .errors
            .comparisons
            .iter()
            .filter(|(_, record)| record.may_be_wrong)
            .map(|(node, record)| (*node, encoding::encode_comparison(record)))
            .collect();
        let unroll_counts = program
            .functions
            .iter()
            .filter(|f| !f.loops.is_empty())
            .map(|f| {
                let hints: Vec<Option<u32>> = f.loops.iter().map(|l| l.unroll_hint).collect();
                (f.id, encoding::encode_unroll_counts(&hints))
            })
            .collect();
        PersistedRecords {
            infos,
            arguments,
            errors,
            comparisons,
            unroll_counts,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Analysis
// ═══════════════════════════════════════════════════════════════════════════

pub struct Analysis {
    config: AnalysisConfig,
}

impl Analysis {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn run(&self, program: &Program, seeds: &SeedTable) -> Result<AnalysisResult, AnalysisError> {
        self.config.validate()?;
        program.validate()?;
        let shapes = ShapeCache::for_program(program);
        seeds.validate(program, &shapes)?;

        let entries = self.entries(program);
        info!(entries = entries.len(), seeds = seeds.len(), "starting analysis");

        let engine = RangeEngine::new(program, &shapes, &self.config);
        let mut ranges = RangeOutcome::default();
        for &entry in &entries {
            ranges.merge(engine.propagate(entry, seeds));
        }

        let mut diagnostics = mem::take(&mut ranges.diagnostics);
        let mut deriver = TypeDeriver::new(self.config.sizing);
        deriver.assign(program, &mut ranges.values, &mut diagnostics);
        debug!(cached = deriver.cached_constants(), "numeric types assigned");

        let error_engine = ErrorEngine::new(program, &ranges, &self.config);
        let mut errors = ErrorOutcome::default();
        for &entry in &entries {
            errors.merge(error_engine.propagate(entry));
        }
        diagnostics.extend(mem::take(&mut errors.diagnostics));

        let report = ErrorReport::build(program, &ranges, &errors, self.config.relative_error);
        info!(
            targets = report.targets.len(),
            flagged = report.comparisons.len(),
            diagnostics = diagnostics.len(),
            "analysis finished"
        );
        Ok(AnalysisResult {
            ranges,
            errors,
            report,
            diagnostics,
        })
    }

    /// Run rounds until `feedback` stops adjusting the sizing policy or
    /// `max_rounds` rounds have run. Returns the last round's result.
    pub fn run_with_feedback(
        &mut self,
        program: &Program,
        seeds: &SeedTable,
        feedback: &mut dyn SizingFeedback,
        max_rounds: usize,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut round = 1;
        loop {
            let started = Instant::now();
            let result = self.run(program, seeds)?;
            let timing = started.elapsed();
            info!(round, max_error = result.report.max_error(), ?timing, "analysis round finished");
            if round >= max_rounds {
                return Ok(result);
            }
            match feedback.adjust(&result.report, timing) {
                Some(policy) if policy != self.config.sizing => {
                    debug!(?policy, "sizing policy adjusted");
                    self.config.sizing = policy;
                    round += 1;
                }
                _ => return Ok(result),
            }
        }
    }

    /// Functions to start walking from. Without marked starting points, or
    /// in propagate-all mode, every root of the call graph plus one member of
    /// each cycle nothing else calls.
    fn entries(&self, program: &Program) -> Vec<FunctionId> {
        if !self.config.propagate_all {
            let starting: Vec<FunctionId> = program
                .starting_points()
                .filter(|f| !f.is_declaration())
                .map(|f| f.id)
                .collect();
            if !starting.is_empty() {
                return starting;
            }
            warn!("no starting point marked, analyzing the whole call graph");
        }

        let graph = CallGraph::build(program);
        let mut entries = graph.roots();
        let mut reached = HashSet::new();
        for &root in &entries {
            mark_reachable(&graph, root, &mut reached);
        }
        // callers come last in topological order
        for node in graph.topological_order().into_iter().rev() {
            let functions = node.functions();
            if functions.iter().any(|f| reached.contains(f)) {
                continue;
            }
            if let Some(&first) = functions.first() {
                entries.push(first);
                mark_reachable(&graph, first, &mut reached);
            }
        }
        entries
    }
}

fn mark_reachable(graph: &CallGraph, from: FunctionId, reached: &mut HashSet<FunctionId>) {
    let mut stack = vec![from];
    while let Some(function) = stack.pop() {
        if reached.insert(function) {
            stack.extend(graph.callees(function).iter().copied());
        }
    }
}
