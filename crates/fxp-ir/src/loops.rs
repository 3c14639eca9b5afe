//! Loop nesting and block ordering.

use std::collections::{HashMap, HashSet};

use crate::ids::{BlockId, FunctionId, LoopId};
use crate::program::Program;

// ═══════════════════════════════════════════════════════════════════════════
// Loop forest
// ═══════════════════════════════════════════════════════════════════════════

/// Nesting relation between the loops of one function.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    /// Smallest loop strictly enclosing each loop.
    parent: Vec<Option<LoopId>>,
    /// Smallest loop containing each block; blocks outside loops are absent.
    innermost: HashMap<BlockId, LoopId>,
}

impl LoopForest {
    pub fn build(program: &Program, function: FunctionId) -> Self {
        let loops = &program.function(function).loops;
        let sets: Vec<HashSet<BlockId>> = loops
            .iter()
            .map(|lp| lp.blocks.iter().copied().collect())
            .collect();

        // A loop encloses another when its block set is a strict superset;
        // the parent is the enclosing loop with the fewest blocks.
        let enclosing = |inner: usize| -> Option<LoopId> {
            (0..sets.len())
                .filter(|&outer| {
                    outer != inner
                        && sets[outer].len() > sets[inner].len()
                        && sets[inner].is_subset(&sets[outer])
                })
                .min_by_key(|&outer| sets[outer].len())
                .map(LoopId::new)
        };
        let parent = (0..sets.len()).map(enclosing).collect();

        let mut innermost: HashMap<BlockId, LoopId> = HashMap::new();
        for (index, set) in sets.iter().enumerate() {
            for block in set {
                let replace = match innermost.get(block) {
                    Some(current) => set.len() < sets[current.index()].len(),
                    None => true,
                };
                if replace {
                    innermost.insert(*block, LoopId::new(index));
                }
            }
        }

        Self { parent, innermost }
    }

    pub fn parent(&self, id: LoopId) -> Option<LoopId> {
        self.parent.get(id.index()).copied().flatten()
    }

    pub fn innermost(&self, block: BlockId) -> Option<LoopId> {
        self.innermost.get(&block).copied()
    }

    /// The loop directly nested in `region` (or a top-level loop when
    /// `region` is `None`) that contains `block`, if any.
    pub fn child_towards(&self, region: Option<LoopId>, block: BlockId) -> Option<LoopId> {
        let mut current = self.innermost(block)?;
        loop {
            let parent = self.parent(current);
            if parent == region {
                return Some(current);
            }
            current = parent?;
        }
    }

    /// Depth of nesting, 1 for top-level loops.
    pub fn depth(&self, id: LoopId) -> usize {
        let mut depth = 1;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Block ordering
// ═══════════════════════════════════════════════════════════════════════════

/// Blocks reachable from the entry in reverse post order.
pub fn reverse_post_order(program: &Program, function: FunctionId) -> Vec<BlockId> {
    let Some(entry) = program.function(function).entry else {
        return Vec::new();
    };

    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut post_order = Vec::new();
    // (block, index of the next successor to visit)
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited.insert(entry);

    while let Some((block, next)) = stack.pop() {
        let successors = &program.block(block).successors;
        if let Some(&succ) = successors.get(next) {
            stack.push((block, next + 1));
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            post_order.push(block);
        }
    }

    post_order.reverse();
    post_order
}
