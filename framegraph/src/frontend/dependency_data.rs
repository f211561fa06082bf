//! Dependency data derived from node declarations.
//!
//! After name resolution this stage flattens every declaration into two
//! tables: per-name usage timelines (who produces, modifies and reads each
//! logical name) and per-canonical-resource merged properties (description,
//! history policy, resolution binding, and the full rename chain). The
//! intermediate graph builder consumes both to derive edges.

use arclight_core::ids::{IdIndexedVec, TypedId};

use crate::frontend::name_resolver::NameResolver;
use crate::frontend::registry::{
    AutoResolutionRequest, NodeNameId, Registry, ResNameId,
};
use crate::types::{History, ResourceDescription};

/// Usage timeline of one logical resource name.
#[derive(Debug, Default, Clone)]
pub struct NameUses {
    /// Node that publishes this name: its creator, or the node renaming a
    /// previous name into it.
    pub producer: Option<NodeNameId>,
    /// Nodes that write the name in place, in node-id order.
    pub modifiers: Vec<NodeNameId>,
    /// Nodes that read the name's current-frame contents.
    pub readers: Vec<NodeNameId>,
    /// Nodes that read the name's previous-frame contents.
    pub history_readers: Vec<NodeNameId>,
}

/// Merged properties of one canonical resource.
#[derive(Debug, Default, Clone)]
pub struct ResolvedResource {
    /// Description taken from the chain's creating declaration.
    pub description: Option<ResourceDescription>,
    /// History policy, taken from the first link declaring one.
    pub history: History,
    /// Automatic-resolution binding, taken from the first link declaring one.
    pub resolution: Option<AutoResolutionRequest>,
    /// The rename chain from the created root name to the canonical name.
    pub chain: Vec<ResNameId>,
}

/// Flattened declaration data, recomputed from scratch on every update.
#[derive(Debug, Default)]
pub struct DependencyData {
    /// Per-name usage timelines, indexed by declared name.
    pub uses: IdIndexedVec<ResNameId, NameUses>,
    /// Merged resource properties, populated at canonical ids only.
    pub resolved: IdIndexedVec<ResNameId, Option<ResolvedResource>>,
}

impl DependencyData {
    /// Merged properties of a canonical resource, if it has a producer.
    pub fn resolved_resource(&self, canonical: ResNameId) -> Option<&ResolvedResource> {
        self.resolved[canonical].as_ref()
    }
}

/// Recomputes [`DependencyData`] after declarations change.
#[derive(Debug, Default)]
pub struct DependencyDataCalculator {
    data: DependencyData,
}

impl DependencyDataCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently calculated data.
    pub fn data(&self) -> &DependencyData {
        &self.data
    }

    /// Throw away previous results and recompute everything.
    ///
    /// The computation is a pure function of the registry and resolver, so
    /// running it twice in a row yields identical data.
    pub fn recalculate(&mut self, registry: &Registry, resolver: &NameResolver) {
        let data = &mut self.data;
        data.uses.clear();
        data.uses.resize_with(registry.resources.len(), NameUses::default);
        data.resolved.clear();
        data.resolved.resize_with(registry.resources.len(), || None);

        for node_id in registry.nodes.ids() {
            let node = &registry.nodes[node_id];
            if !node.declared {
                continue;
            }
            for &created in &node.creates {
                Self::set_producer(registry, data, created, node_id);
            }
            for &(_, to) in &node.renames {
                Self::set_producer(registry, data, to, node_id);
            }
            for request in &node.requests {
                let uses = &mut data.uses[request.resource];
                if request.last_frame {
                    uses.history_readers.push(node_id);
                } else if !request.usage.is_write() {
                    uses.readers.push(node_id);
                } else if uses.producer != Some(node_id) {
                    // A write request that is neither a create nor a rename
                    // output is an in-place modification.
                    uses.modifiers.push(node_id);
                }
            }
        }

        // Renaming a name consumes it after all in-place writes; the renamer
        // must not appear as a modifier of the old name.
        for node_id in registry.nodes.ids() {
            let node = &registry.nodes[node_id];
            for &(from, _) in &node.renames {
                data.uses[from].modifiers.retain(|&m| m != node_id);
            }
        }

        // Merge chain properties into the canonical slot.
        for id in registry.resources.ids() {
            let canonical = resolver.resolve(id);
            if id != canonical && registry.resources[id].renamed_to.is_none() {
                continue;
            }
            let res = &registry.resources[id];
            if res.description.is_none() && res.renamed_to.is_none() {
                continue;
            }
            let slot = data.resolved[canonical].get_or_insert_with(ResolvedResource::default);
            if let Some(desc) = res.description {
                if slot.description.is_some() {
                    log::error!(
                        "rename chain of '{}' carries more than one description",
                        registry.resource_name(canonical)
                    );
                } else {
                    slot.description = Some(desc);
                }
            }
            if res.history != History::No && slot.history == History::No {
                slot.history = res.history;
            }
            if slot.resolution.is_none() {
                slot.resolution = res.resolution;
            }
        }

        // Record each chain in root-to-canonical order.
        for id in registry.resources.ids() {
            let res = &registry.resources[id];
            // Chain roots are created names that nothing renames into.
            if res.description.is_none() {
                continue;
            }
            let canonical = resolver.resolve(id);
            let Some(slot) = data.resolved[canonical].as_mut() else {
                continue;
            };
            if !slot.chain.is_empty() {
                continue;
            }
            let mut cursor = id;
            loop {
                slot.chain.push(cursor);
                match registry.resources[cursor].renamed_to {
                    Some(next) if resolver.resolve(cursor) == canonical => cursor = next,
                    _ => break,
                }
            }
        }
    }

    fn set_producer(
        registry: &Registry,
        data: &mut DependencyData,
        name: ResNameId,
        node: NodeNameId,
    ) {
        let uses = &mut data.uses[name];
        match uses.producer {
            None => uses.producer = Some(node),
            Some(existing) if existing != node => {
                log::error!(
                    "resource '{}' is produced by both '{}' and '{}'; keeping the first",
                    registry.resource_name(name),
                    registry.node_name(existing),
                    registry.node_name(node)
                );
            }
            Some(_) => {}
        }
    }
}
