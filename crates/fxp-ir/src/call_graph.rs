//! Call graph construction and topological ordering of functions.
//!
//! Direct call sites become edges between functions; indirect sites that the
//! program model could not resolve keep an [`Callee::Unknown`] target. Edges
//! inside a strongly connected component are marked recursive.
//!
//! # Algorithm
//!
//! Uses Tarjan's algorithm for strongly connected component (SCC) detection,
//! which naturally produces a reverse topological order (callees first).

use std::collections::{HashMap, HashSet};

use crate::ids::{FunctionId, NodeId};
use crate::node::{Callee, Opcode};
use crate::program::Program;

// ═══════════════════════════════════════════════════════════════════════════
// Call Graph
// ═══════════════════════════════════════════════════════════════════════════

/// One call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEdge {
    pub caller: FunctionId,
    pub callee: Callee,
    pub site: NodeId,
    /// The callee can reach the caller again.
    pub recursive: bool,
}

#[derive(Debug, Default)]
pub struct CallGraph {
    edges: Vec<CallEdge>,
    /// Adjacency list over direct edges.
    calls: HashMap<FunctionId, Vec<FunctionId>>,
    functions: Vec<FunctionId>,
}

impl CallGraph {
    /// Build the call graph of every function with a body.
    pub fn build(program: &Program) -> Self {
        let functions: Vec<FunctionId> = program
            .functions
            .iter()
            .filter(|f| !f.is_declaration())
            .map(|f| f.id)
            .collect();
        let defined: HashSet<FunctionId> = functions.iter().copied().collect();

        let mut edges = Vec::new();
        let mut calls: HashMap<FunctionId, Vec<FunctionId>> = HashMap::new();
        for &caller in &functions {
            let callees = calls.entry(caller).or_default();
            for site in program.function_nodes(caller) {
                let Opcode::Call(callee) = program.node(site).op else {
                    continue;
                };
                if let Callee::Direct(target) = callee {
                    if defined.contains(&target) && !callees.contains(&target) {
                        callees.push(target);
                    }
                }
                edges.push(CallEdge {
                    caller,
                    callee,
                    site,
                    recursive: false,
                });
            }
        }

        let mut graph = Self {
            edges,
            calls,
            functions,
        };
        graph.mark_recursive_edges();
        graph
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    pub fn callees(&self, function: FunctionId) -> &[FunctionId] {
        self.calls.get(&function).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn functions(&self) -> &[FunctionId] {
        &self.functions
    }

    /// Functions with a body that no other function calls.
    pub fn roots(&self) -> Vec<FunctionId> {
        let called: HashSet<FunctionId> = self
            .calls
            .iter()
            .flat_map(|(caller, callees)| callees.iter().filter(move |c| *c != caller))
            .copied()
            .collect();
        self.functions
            .iter()
            .copied()
            .filter(|f| !called.contains(f))
            .collect()
    }

    fn mark_recursive_edges(&mut self) {
        let mut component: HashMap<FunctionId, usize> = HashMap::new();
        let mut cyclic: HashSet<usize> = HashSet::new();
        for (index, node) in self.topological_order().iter().enumerate() {
            if node.is_cycle() {
                cyclic.insert(index);
            }
            for f in node.functions() {
                component.insert(f, index);
            }
        }
        for edge in &mut self.edges {
            if let Callee::Direct(target) = edge.callee {
                let (Some(a), Some(b)) = (component.get(&edge.caller), component.get(&target))
                else {
                    continue;
                };
                edge.recursive = a == b && cyclic.contains(a);
            }
        }
    }

    /// Compute topological order with SCC detection using Tarjan's algorithm.
    ///
    /// For any function P that calls Q, Q's node appears before P's node
    /// unless they share an SCC.
    pub fn topological_order(&self) -> Vec<TopologicalNode> {
        let mut state = TarjanState::new(self.functions.len());

        for f in &self.functions {
            if !state.indices.contains_key(f) {
                self.tarjan_visit(*f, &mut state);
            }
        }

        state.result
    }

    fn tarjan_visit(&self, v: FunctionId, state: &mut TarjanState) {
        let index = state.index;
        state.indices.insert(v, index);
        state.low_links.insert(v, index);
        state.index += 1;
        state.stack.push(v);
        state.on_stack.insert(v);

        for &w in self.callees(v) {
            if !state.indices.contains_key(&w) {
                self.tarjan_visit(w, state);
                let low = state.low(v).min(state.low(w));
                state.low_links.insert(v, low);
            } else if state.on_stack.contains(&w) {
                let low = state.low(v).min(state.indices[&w]);
                state.low_links.insert(v, low);
            }
        }

        if state.low(v) != state.indices[&v] {
            return;
        }

        let mut scc = Vec::new();
        while let Some(w) = state.stack.pop() {
            state.on_stack.remove(&w);
            scc.push(w);
            if w == v {
                break;
            }
        }

        let node = match scc.as_slice() {
            [single] if !self.callees(*single).contains(single) => TopologicalNode::Single(*single),
            _ => TopologicalNode::Cycle(scc),
        };
        state.result.push(node);
    }
}

struct TarjanState {
    index: usize,
    indices: HashMap<FunctionId, usize>,
    low_links: HashMap<FunctionId, usize>,
    on_stack: HashSet<FunctionId>,
    stack: Vec<FunctionId>,
    result: Vec<TopologicalNode>,
}

impl TarjanState {
    fn new(capacity: usize) -> Self {
        Self {
            index: 0,
            indices: HashMap::with_capacity(capacity),
            low_links: HashMap::with_capacity(capacity),
            on_stack: HashSet::with_capacity(capacity),
            stack: Vec::with_capacity(capacity),
            result: Vec::with_capacity(capacity),
        }
    }

    fn low(&self, f: FunctionId) -> usize {
        self.low_links.get(&f).copied().unwrap_or(usize::MAX)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Topological Node
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologicalNode {
    /// A function not involved in any cycle.
    Single(FunctionId),
    /// Mutually recursive functions, or one self-recursive function.
    Cycle(Vec<FunctionId>),
}

impl TopologicalNode {
    pub fn functions(&self) -> Vec<FunctionId> {
        match self {
            TopologicalNode::Single(f) => vec![*f],
            TopologicalNode::Cycle(fs) => fs.clone(),
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, TopologicalNode::Cycle(_))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::types::ValueType;

    /// Build a program where each named function calls the listed ones.
    fn make_program(edges: &[(&str, &[&str])]) -> (Program, HashMap<String, FunctionId>) {
        let mut pb = ProgramBuilder::new();
        let mut ids: HashMap<String, FunctionId> = HashMap::new();
        for (name, _) in edges {
            let id = pb.declare_function(name, vec![], ValueType::Void);
            ids.insert(name.to_string(), id);
        }
        for (name, callees) in edges {
            let mut f = pb.define(ids[*name]);
            let entry = f.block();
            for callee in *callees {
                f.call(entry, Callee::Direct(ids[*callee]), vec![], ValueType::Void);
            }
            f.ret(entry, None);
            f.finish();
        }
        (pb.finish(), ids)
    }

    #[test]
    fn test_linear_chain() {
        let (program, ids) = make_program(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let order = CallGraph::build(&program).topological_order();

        assert_eq!(
            order,
            vec![
                TopologicalNode::Single(ids["c"]),
                TopologicalNode::Single(ids["b"]),
                TopologicalNode::Single(ids["a"]),
            ]
        );
    }

    #[test]
    fn test_diamond() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let (program, ids) = make_program(&[
            ("a", &["b", "c"]),
            ("b", &["d"]),
            ("c", &["d"]),
            ("d", &[]),
        ]);
        let order = CallGraph::build(&program).topological_order();
        let pos = |name: &str| {
            order
                .iter()
                .position(|n| *n == TopologicalNode::Single(ids[name]))
                .unwrap()
        };

        assert_eq!(order.len(), 4);
        assert!(pos("d") < pos("b"));
        assert!(pos("d") < pos("c"));
        assert!(pos("b") < pos("a"));
        assert!(pos("c") < pos("a"));
    }

    #[test]
    fn test_mutual_recursion_marks_edges() {
        let (program, ids) = make_program(&[("entry", &["a"]), ("a", &["b"]), ("b", &["a"])]);
        let graph = CallGraph::build(&program);
        let order = graph.topological_order();

        assert_eq!(order.len(), 2);
        assert!(order[0].is_cycle());
        assert_eq!(order[1], TopologicalNode::Single(ids["entry"]));

        let recursive: Vec<bool> = graph.edges().iter().map(|e| e.recursive).collect();
        assert_eq!(recursive, vec![false, true, true]);
        assert_eq!(graph.roots(), vec![ids["entry"]]);
    }

    #[test]
    fn test_self_recursion() {
        let (program, _) = make_program(&[("a", &["a"])]);
        let graph = CallGraph::build(&program);

        assert!(graph.topological_order()[0].is_cycle());
        assert!(graph.edges()[0].recursive);
        // A self-recursive function is still a root.
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn test_unknown_callee_edge() {
        let mut pb = ProgramBuilder::new();
        let mut f = pb.function("main", vec![], ValueType::Void);
        let entry = f.block();
        f.call(entry, Callee::Unknown, vec![], ValueType::Void);
        f.ret(entry, None);
        f.finish();
        let graph = CallGraph::build(&pb.finish());

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].callee, Callee::Unknown);
        assert!(!graph.edges()[0].recursive);
    }
}
