//! Intermediate representation of the frame graph.
//!
//! The IR is a plain dependency graph: nodes index their predecessors,
//! resources carry fully merged properties, and every declared node or
//! resource appears once per multiplexing index. History reads get a twin
//! resource linked through `history_of`, backed by the previous frame's
//! storage. All ids are dense indices local to one build; nothing here
//! refers back to frontend arenas except by the stored name ids.

pub mod builder;

use std::collections::HashMap;

use arclight_core::define_typed_id;
use arclight_core::pool::Poolable;

use crate::frontend::multiplexing::MultiplexingIndex;
use crate::frontend::registry::{AutoResolutionRequest, NodeNameId, ResNameId};
use crate::types::{History, ResourceDescription, ResourceUsage};

define_typed_id!(
    /// Dense index of a node in one built graph.
    NodeIndex
);
define_typed_id!(
    /// Dense index of a resource in one built graph.
    ResourceIndex
);

/// One resource use by one IR node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    pub resource: ResourceIndex,
    pub usage: ResourceUsage,
    /// Set when the request targets the previous frame's contents; such
    /// requests point at the history twin.
    pub last_frame: bool,
}

/// One multiplexed copy of a declared node.
#[derive(Debug, Default, Clone)]
pub struct Node {
    pub frontend_node: NodeNameId,
    pub multiplexing_index: MultiplexingIndex,
    /// Nodes that must execute before this one.
    pub predecessors: Vec<NodeIndex>,
    pub requests: Vec<Request>,
}

/// One multiplexed copy of a canonical resource.
#[derive(Debug, Clone)]
pub struct Resource {
    pub frontend_resource: ResNameId,
    pub multiplexing_index: MultiplexingIndex,
    pub description: ResourceDescription,
    pub history: History,
    pub resolution: Option<AutoResolutionRequest>,
    /// Set on history twins: the current-frame resource this one mirrors.
    pub history_of: Option<ResourceIndex>,
}

/// A fully built intermediate graph.
///
/// Pooled by the runtime and rebuilt in place on recompilation.
#[derive(Debug, Default)]
pub struct Graph {
    pub nodes: arclight_core::ids::IdIndexedVec<NodeIndex, Node>,
    pub resources: arclight_core::ids::IdIndexedVec<ResourceIndex, Resource>,
}

impl Poolable for Graph {
    fn reset(&mut self) {
        self.nodes.clear();
        self.resources.clear();
    }
}

/// Lookup tables from frontend names to IR indices.
///
/// Rebuilt after every graph build; used by execution callbacks to find
/// their resources and by debug output.
#[derive(Debug, Default)]
pub struct Mapping {
    nodes: HashMap<(NodeNameId, MultiplexingIndex), NodeIndex>,
    resources: HashMap<(ResNameId, MultiplexingIndex, bool), ResourceIndex>,
}

impl Mapping {
    pub fn node(&self, name: NodeNameId, index: MultiplexingIndex) -> Option<NodeIndex> {
        self.nodes.get(&(name, index)).copied()
    }

    /// IR index of a canonical resource; `history` selects the twin.
    pub fn resource(
        &self,
        name: ResNameId,
        index: MultiplexingIndex,
        history: bool,
    ) -> Option<ResourceIndex> {
        self.resources.get(&(name, index, history)).copied()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.resources.clear();
    }
}

impl Graph {
    /// Rebuild the name-to-index mapping for this graph.
    pub fn calculate_mapping(&self, mapping: &mut Mapping) {
        mapping.clear();
        for id in self.nodes.ids() {
            let node = &self.nodes[id];
            mapping
                .nodes
                .insert((node.frontend_node, node.multiplexing_index), id);
        }
        for id in self.resources.ids() {
            let res = &self.resources[id];
            mapping.resources.insert(
                (
                    res.frontend_resource,
                    res.multiplexing_index,
                    res.history_of.is_some(),
                ),
                id,
            );
        }
    }

    /// Check structural invariants. Panics on violation; a malformed IR
    /// graph means a bug in the builder, not bad user declarations.
    pub fn validate(&self) {
        use arclight_core::ids::TypedId;
        for id in self.nodes.ids() {
            let node = &self.nodes[id];
            for &pred in &node.predecessors {
                assert!(pred.index() < self.nodes.len(), "edge out of range");
                assert_ne!(pred, id, "node depends on itself");
            }
            for request in &node.requests {
                assert!(request.resource.index() < self.resources.len());
                let res = &self.resources[request.resource];
                assert_eq!(
                    request.last_frame,
                    res.history_of.is_some(),
                    "history request must target a history twin"
                );
            }
        }
        for id in self.resources.ids() {
            if let Some(main) = self.resources[id].history_of {
                let res = &self.resources[id];
                let main = &self.resources[main];
                assert_eq!(res.frontend_resource, main.frontend_resource);
                assert_eq!(res.multiplexing_index, main.multiplexing_index);
                assert!(main.history_of.is_none(), "history twin of a twin");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_core::ids::TypedId;
    use crate::types::{BufferDescription, StageFlags, UsageKind};

    fn graph_with_twin() -> Graph {
        let mut graph = Graph::default();
        let main = graph.resources.push(Resource {
            frontend_resource: ResNameId::from_index(0),
            multiplexing_index: MultiplexingIndex::from_index(0),
            description: ResourceDescription::Buffer(BufferDescription::new(16)),
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
            requests: vec![Request {
                resource: twin,
                usage: ResourceUsage::read(UsageKind::ShaderResource, StageFlags::COMPUTE),
                last_frame: true,
            }],
        });
        graph
    }

    #[test]
    fn test_mapping_distinguishes_history_twin() {
        let graph = graph_with_twin();
        let mut mapping = Mapping::default();
        graph.calculate_mapping(&mut mapping);

        let name = ResNameId::from_index(0);
        let m = MultiplexingIndex::from_index(0);
        let main = mapping.resource(name, m, false).unwrap();
        let twin = mapping.resource(name, m, true).unwrap();
        assert_ne!(main, twin);
        assert_eq!(graph.resources[twin].history_of, Some(main));
    }

    #[test]
    fn test_validate_accepts_well_formed_graph() {
        let graph = graph_with_twin();
        graph.validate();
    }

    #[test]
    #[should_panic(expected = "history request")]
    fn test_validate_rejects_history_request_on_main_resource() {
        let mut graph = graph_with_twin();
        let main = ResourceIndex::from_index(0);
        graph.nodes[NodeIndex::from_index(0)].requests[0].resource = main;
        graph.validate();
    }

    #[test]
    fn test_reset_clears_graph() {
        let mut graph = graph_with_twin();
        graph.reset();
        assert!(graph.nodes.is_empty());
        assert!(graph.resources.is_empty());
    }
}
