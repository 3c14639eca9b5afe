//! Final error report.
//!
//! The report names every target with the largest error of its members and
//! lists the comparisons whose outcome may flip under the accumulated error.
//! An error that cannot be bounded is infinite and stays infinite through
//! every fold, in JSON it is written as the string `"inf"`.

use std::collections::BTreeMap;
use std::fmt;

use fxp_ir::{NodeId, Program};
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error_propagation::ErrorOutcome;
use crate::range::RangeOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FlaggedComparison {
    pub node: NodeId,
    #[serde(serialize_with = "serialize_error")]
    pub tolerance: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ErrorReport {
    /// Target name to maximum error.
    #[serde(serialize_with = "serialize_errors")]
    pub targets: BTreeMap<String, f64>,
    pub comparisons: Vec<FlaggedComparison>,
    /// Errors are divided by the largest magnitude of their value.
    pub relative: bool,
}

impl ErrorReport {
    pub fn build(program: &Program, ranges: &RangeOutcome, errors: &ErrorOutcome, relative: bool) -> Self {
        let mut targets = BTreeMap::new();
        for target in &program.targets {
            let worst = target
                .members
                .iter()
                .filter_map(|&member| member_error(ranges, errors, member, relative))
                .reduce(worst);
            match worst {
                Some(error) => {
                    targets.insert(target.name.clone(), error);
                }
                None => debug!(target_name = %target.name, "no analyzed member, omitted from report"),
            }
        }

        let comparisons = errors
            .comparisons
            .iter()
            .filter(|(_, record)| record.may_be_wrong)
            .map(|(node, record)| FlaggedComparison {
                node: *node,
                tolerance: record.tolerance,
            })
            .collect();

        Self {
            targets,
            comparisons,
            relative,
        }
    }

    /// Largest error over all targets, zero without targets.
    pub fn max_error(&self) -> f64 {
        self.targets.values().copied().fold(0.0, worst)
    }

    pub fn error_of(&self, target: &str) -> Option<f64> {
        self.targets.get(target).copied()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Error of one target member: the value itself, or for a memory cell the
/// worst of its contents.
fn member_error(ranges: &RangeOutcome, errors: &ErrorOutcome, member: NodeId, relative: bool) -> Option<f64> {
    let error = errors.bound(member).or_else(|| errors.cell_bound(member))?;
    if !error.is_finite() {
        return Some(f64::INFINITY);
    }
    if !relative || error == 0.0 {
        return Some(error);
    }
    let magnitude = ranges
        .info(member)
        .and_then(|info| info.summary_range())
        .map(|range| range.magnitude());
    Some(match magnitude {
        Some(m) if m > 0.0 && m.is_finite() => error / m,
        // zero, unbounded or unknown magnitude
        _ => f64::INFINITY,
    })
}

/// `f64::max` that treats NaN as unbounded instead of dropping it.
fn worst(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::INFINITY
    } else {
        a.max(b)
    }
}

fn serialize_error<S: Serializer>(error: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if error.is_finite() {
        serializer.serialize_f64(*error)
    } else {
        serializer.serialize_str("inf")
    }
}

fn serialize_errors<S: Serializer>(errors: &BTreeMap<String, f64>, serializer: S) -> Result<S::Ok, S::Error> {
    struct Bound(f64);

    impl Serialize for Bound {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serialize_error(&self.0, serializer)
        }
    }

    serializer.collect_map(errors.iter().map(|(name, error)| (name, Bound(*error))))
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.relative { "relative" } else { "absolute" };
        writeln!(f, "maximum {} error per target:", kind)?;
        for (name, error) in &self.targets {
            writeln!(f, "  {}: {:e}", name, error)?;
        }
        if !self.comparisons.is_empty() {
            writeln!(f, "comparisons that may be wrong:")?;
            for flagged in &self.comparisons {
                writeln!(f, "  {}: tolerance {:e}", flagged.node, flagged.tolerance)?;
            }
        }
        Ok(())
    }
}
