//! Linearization of the intermediate graph.
//!
//! Produces a total execution order in which every node runs after all of
//! its predecessors. The traversal is deterministic: roots and edges are
//! visited in index order, so the same graph always schedules the same
//! way. Dependency cycles are tolerated by dropping the edge that closes
//! the cycle and reporting it once through the diagnostic callback.

use arclight_core::ids::IdIndexedVec;
use arclight_core::pool::Poolable;

use crate::intermediate::{Graph, NodeIndex};

/// Execution order of one scheduled graph.
///
/// Maps every node to its position in the linear order and back. Pooled
/// by the runtime and recomputed in place.
#[derive(Debug, Default)]
pub struct NodePermutation {
    positions: IdIndexedVec<NodeIndex, usize>,
    order: Vec<NodeIndex>,
}

impl NodePermutation {
    /// Execution position of a node.
    pub fn position(&self, node: NodeIndex) -> usize {
        self.positions[node]
    }

    /// Nodes in execution order.
    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    /// Number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Poolable for NodePermutation {
    fn reset(&mut self) {
        self.positions.clear();
        self.order.clear();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Compute a topological execution order into `permutation`.
///
/// `on_cycle` is invoked once per dropped cycle-closing edge with the
/// `(from, to)` nodes of that edge.
pub fn schedule_into(
    graph: &Graph,
    permutation: &mut NodePermutation,
    mut on_cycle: impl FnMut(NodeIndex, NodeIndex),
) {
    permutation.reset();

    let mut marks: IdIndexedVec<NodeIndex, Mark> = IdIndexedVec::new();
    marks.resize(graph.nodes.len(), Mark::White);

    // Iterative DFS over predecessor edges; a node enters the order after
    // all of its predecessors, giving a reverse-postorder linearization.
    let mut stack: Vec<(NodeIndex, usize)> = Vec::new();
    for root in graph.nodes.ids() {
        if marks[root] != Mark::White {
            continue;
        }
        marks[root] = Mark::Gray;
        stack.push((root, 0));
        while !stack.is_empty() {
            let top = stack.len() - 1;
            let (node, edge) = stack[top];
            let preds = &graph.nodes[node].predecessors;
            if edge < preds.len() {
                stack[top].1 += 1;
                let pred = preds[edge];
                match marks[pred] {
                    Mark::White => {
                        marks[pred] = Mark::Gray;
                        stack.push((pred, 0));
                    }
                    // A gray predecessor is still on the stack, so this
                    // edge closes a cycle. Drop it and keep going.
                    Mark::Gray => on_cycle(pred, node),
                    Mark::Black => {}
                }
            } else {
                marks[node] = Mark::Black;
                permutation.order.push(node);
                stack.pop();
            }
        }
    }

    permutation
        .positions
        .resize(graph.nodes.len(), usize::MAX);
    for (position, &node) in permutation.order.iter().enumerate() {
        permutation.positions[node] = position;
    }
}
