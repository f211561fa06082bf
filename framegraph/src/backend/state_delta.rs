//! Resource state transitions between consecutive uses.
//!
//! Walks the scheduled order once and records, for every node, which of
//! its resources change state relative to their previous use in the same
//! frame. The resource scheduler turns these deltas into barrier events.

use arclight_core::ids::IdIndexedVec;
use arclight_core::pool::Poolable;

use crate::intermediate::{Graph, ResourceIndex};
use crate::types::{ResourceUsage, StateTransition};

use super::node_scheduler::NodePermutation;

/// The barrier that makes `next` safe after `prev`, if one is needed.
///
/// The very first use of a resource needs no barrier (activation leaves
/// it in a defined state), and consecutive reads of the same kind can
/// share a state.
pub fn barrier_for_transition(
    prev: Option<ResourceUsage>,
    next: ResourceUsage,
) -> Option<StateTransition> {
    let Some(prev) = prev else {
        return None;
    };
    let both_read = !prev.is_write() && !next.is_write();
    if both_read && prev.kind == next.kind {
        return None;
    }
    Some(StateTransition {
        from: Some(prev),
        to: next,
    })
}

/// State transitions one node performs before executing.
#[derive(Debug, Default, Clone)]
pub struct NodeStateDelta {
    pub transitions: Vec<(ResourceIndex, StateTransition)>,
}

/// Per-position state deltas for one scheduled graph.
#[derive(Debug, Default)]
pub struct StateDeltas {
    per_position: Vec<NodeStateDelta>,
}

impl StateDeltas {
    /// Transitions to apply right before the node at `position` runs.
    pub fn at(&self, position: usize) -> &NodeStateDelta {
        &self.per_position[position]
    }

    pub fn len(&self) -> usize {
        self.per_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_position.is_empty()
    }
}

impl Poolable for StateDeltas {
    fn reset(&mut self) {
        self.per_position.clear();
    }
}

/// Recompute all deltas for a scheduled graph.
///
/// History requests are skipped: they read last frame's storage, whose
/// state is settled when that frame ends.
pub fn calculate_into(graph: &Graph, permutation: &NodePermutation, deltas: &mut StateDeltas) {
    deltas.reset();
    deltas
        .per_position
        .resize_with(permutation.len(), NodeStateDelta::default);

    let mut last_usage: IdIndexedVec<ResourceIndex, Option<ResourceUsage>> = IdIndexedVec::new();
    last_usage.resize(graph.resources.len(), None);

    for (position, &node) in permutation.order().iter().enumerate() {
        for request in &graph.nodes[node].requests {
            if request.last_frame {
                continue;
            }
            let prev = last_usage[request.resource];
            if let Some(transition) = barrier_for_transition(prev, request.usage) {
                deltas.per_position[position]
                    .transitions
                    .push((request.resource, transition));
            }
            last_usage[request.resource] = Some(request.usage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_core::ids::TypedId;
    use crate::backend::node_scheduler::schedule_into;
    use crate::frontend::multiplexing::MultiplexingIndex;
    use crate::frontend::registry::{NodeNameId, ResNameId};
    use crate::intermediate::{Node, Request, Resource};
    use crate::types::{
        BufferDescription, History, ResourceDescription, StageFlags, UsageKind,
    };

    fn read() -> ResourceUsage {
        ResourceUsage::read(UsageKind::ShaderResource, StageFlags::COMPUTE)
    }

    fn write() -> ResourceUsage {
        ResourceUsage::write(UsageKind::Storage, StageFlags::COMPUTE)
    }

    fn two_node_graph(first: ResourceUsage, second: ResourceUsage) -> (Graph, StateDeltas) {
        let mut graph = Graph::default();
        let res = graph.resources.push(Resource {
            frontend_resource: ResNameId::from_index(0),
            multiplexing_index: MultiplexingIndex::from_index(0),
            description: ResourceDescription::Buffer(BufferDescription::new(64)),
            history: History::No,
            resolution: None,
            history_of: None,
        });
        let producer = graph.nodes.push(Node {
            frontend_node: NodeNameId::from_index(0),
            multiplexing_index: MultiplexingIndex::from_index(0),
            predecessors: vec![],
            requests: vec![Request {
                resource: res,
                usage: first,
                last_frame: false,
            }],
        });
        graph.nodes.push(Node {
            frontend_node: NodeNameId::from_index(1),
            multiplexing_index: MultiplexingIndex::from_index(0),
            predecessors: vec![producer],
            requests: vec![Request {
                resource: res,
                usage: second,
                last_frame: false,
            }],
        });

        let mut permutation = NodePermutation::default();
        schedule_into(&graph, &mut permutation, |_, _| {});
        let mut deltas = StateDeltas::default();
        calculate_into(&graph, &permutation, &mut deltas);
        (graph, deltas)
    }

    #[test]
    fn test_first_use_needs_no_barrier() {
        assert!(barrier_for_transition(None, write()).is_none());
    }

    #[test]
    fn test_read_after_read_same_kind_merges() {
        assert!(barrier_for_transition(Some(read()), read()).is_none());
    }

    #[test]
    fn test_read_after_write_gets_barrier() {
        let transition = barrier_for_transition(Some(write()), read()).unwrap();
        assert_eq!(transition.from, Some(write()));
        assert_eq!(transition.to, read());
    }

    #[test]
    fn test_write_after_write_gets_barrier() {
        assert!(barrier_for_transition(Some(write()), write()).is_some());
    }

    #[test]
    fn test_producer_consumer_has_exactly_one_transition() {
        let (_, deltas) = two_node_graph(write(), read());
        assert_eq!(deltas.len(), 2);
        assert!(deltas.at(0).transitions.is_empty());
        assert_eq!(deltas.at(1).transitions.len(), 1);
    }

    #[test]
    fn test_history_requests_are_skipped() {
        let mut graph = Graph::default();
        let main = graph.resources.push(Resource {
            frontend_resource: ResNameId::from_index(0),
            multiplexing_index: MultiplexingIndex::from_index(0),
            description: ResourceDescription::Buffer(BufferDescription::new(64)),
            history: History::DiscardOnFirstFrame,
            resolution: None,
            history_of: None,
        });
        let twin = graph.resources.push(Resource {
            history_of: Some(main),
            ..graph.resources[main].clone()
        });
        graph.nodes.push(Node {
            frontend_node: NodeNameId::from_index(0),
            multiplexing_index: MultiplexingIndex::from_index(0),
            predecessors: vec![],
            requests: vec![
                Request {
                    resource: main,
                    usage: write(),
                    last_frame: false,
                },
                Request {
                    resource: twin,
                    usage: read(),
                    last_frame: true,
                },
            ],
        });

        let mut permutation = NodePermutation::default();
        schedule_into(&graph, &mut permutation, |_, _| {});
        let mut deltas = StateDeltas::default();
        calculate_into(&graph, &permutation, &mut deltas);
        assert!(deltas.at(0).transitions.is_empty());
    }
}
