//! Construction of the intermediate graph from frontend data.
//!
//! Building proceeds in four passes: validity analysis drops nodes with
//! unsatisfiable requests, discrete expansion clones the declared graph
//! once per multiplexing index, edge derivation turns usage timelines and
//! ordering hints into predecessor lists, and sink pruning culls every
//! node that cannot reach a sink write. Dropped nodes are diagnosed with
//! an error log; a bad declaration never aborts the frame.

use std::collections::HashMap;

use arclight_core::ids::IdIndexedVec;
use arclight_core::pool::Poolable;

use crate::frontend::dependency_data::DependencyData;
use crate::frontend::multiplexing::{Extents, MultiplexingIndex};
use crate::frontend::name_resolver::NameResolver;
use crate::frontend::registry::{NodeNameId, Registry, ResNameId};
use crate::types::History;

use super::{Graph, Node, NodeIndex, Request, Resource, ResourceIndex};

/// Builds the IR graph from current frontend state.
pub struct IrGraphBuilder<'a> {
    registry: &'a Registry,
    resolver: &'a NameResolver,
    dependency_data: &'a DependencyData,
}

impl<'a> IrGraphBuilder<'a> {
    pub fn new(
        registry: &'a Registry,
        resolver: &'a NameResolver,
        dependency_data: &'a DependencyData,
    ) -> Self {
        Self {
            registry,
            resolver,
            dependency_data,
        }
    }

    /// Build the graph in place, replacing `graph`'s previous contents.
    pub fn build_into(&self, extents: Extents, graph: &mut Graph) {
        graph.reset();

        let valid = self.validity_analysis();
        let mut full = Graph::default();
        let node_index = self.expand(&valid, extents, &mut full);
        self.derive_edges(&valid, extents, &node_index, &mut full);
        for id in full.nodes.ids().collect::<Vec<_>>() {
            let preds = &mut full.nodes[id].predecessors;
            preds.sort_unstable();
            preds.dedup();
        }
        self.prune_to_sinks(&full, graph);
        debug_assert!({
            graph.validate();
            true
        });
        log::debug!(
            "built intermediate graph: {} nodes, {} resources (x{} multiplexed)",
            graph.nodes.len(),
            graph.resources.len(),
            extents.total()
        );
    }

    /// A node is valid when it is declared and every request can be
    /// satisfied by a valid producer. Dropping a node can orphan its
    /// consumers, so this runs to a fixed point.
    fn validity_analysis(&self) -> IdIndexedVec<NodeNameId, bool> {
        let registry = self.registry;
        let dep = self.dependency_data;
        let mut valid: IdIndexedVec<NodeNameId, bool> = registry
            .nodes
            .iter()
            .map(|node| node.declared)
            .collect();

        loop {
            let mut changed = false;
            for node_id in registry.nodes.ids() {
                if !valid[node_id] {
                    continue;
                }
                let node = &registry.nodes[node_id];
                let mut failure: Option<(ResNameId, &'static str)> = None;
                for request in &node.requests {
                    let canonical = self.resolver.resolve(request.resource);
                    let Some(resolved) = dep.resolved_resource(canonical) else {
                        failure = Some((request.resource, "is never produced"));
                        break;
                    };
                    if resolved.description.is_none() {
                        failure = Some((request.resource, "has no creating declaration"));
                        break;
                    }
                    if request.last_frame && resolved.history == History::No {
                        failure = Some((request.resource, "has no history policy"));
                        break;
                    }
                    if !request.last_frame {
                        match dep.uses[request.resource].producer {
                            Some(p) if p == node_id || valid[p] => {}
                            _ => {
                                failure = Some((request.resource, "is never produced"));
                                break;
                            }
                        }
                    }
                }
                if let Some((resource, reason)) = failure {
                    log::error!(
                        "dropping node '{}': resource '{}' {}",
                        registry.node_name(node_id),
                        registry.resource_name(resource),
                        reason
                    );
                    valid[node_id] = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        valid
    }

    /// Clone valid nodes and their resources once per multiplexing index.
    /// History twins are created only for resources some valid node reads
    /// through `read_history`.
    fn expand(
        &self,
        valid: &IdIndexedVec<NodeNameId, bool>,
        extents: Extents,
        graph: &mut Graph,
    ) -> HashMap<(NodeNameId, MultiplexingIndex), NodeIndex> {
        let registry = self.registry;
        let dep = self.dependency_data;

        let mut used: IdIndexedVec<ResNameId, bool> = IdIndexedVec::new();
        used.resize(registry.resources.len(), false);
        let mut history_used = used.clone();
        for node_id in registry.nodes.ids() {
            if !valid[node_id] {
                continue;
            }
            for request in &registry.nodes[node_id].requests {
                let canonical = self.resolver.resolve(request.resource);
                used[canonical] = true;
                if request.last_frame {
                    history_used[canonical] = true;
                }
            }
        }

        let mut res_index = HashMap::new();
        for m in extents.indices() {
            for canonical in registry.resources.ids() {
                if !used[canonical] {
                    continue;
                }
                let Some(resolved) = dep.resolved_resource(canonical) else {
                    continue;
                };
                let Some(description) = resolved.description else {
                    continue;
                };
                let main = graph.resources.push(Resource {
                    frontend_resource: canonical,
                    multiplexing_index: m,
                    description,
                    history: resolved.history,
                    resolution: resolved.resolution,
                    history_of: None,
                });
                res_index.insert((canonical, m, false), main);
                if resolved.history != History::No && history_used[canonical] {
                    let twin = graph.resources.push(Resource {
                        history_of: Some(main),
                        ..graph.resources[main].clone()
                    });
                    res_index.insert((canonical, m, true), twin);
                }
            }
        }

        let mut node_index = HashMap::new();
        for m in extents.indices() {
            for node_id in registry.nodes.ids() {
                if !valid[node_id] {
                    continue;
                }
                let mut requests = Vec::new();
                for request in &registry.nodes[node_id].requests {
                    let canonical = self.resolver.resolve(request.resource);
                    if let Some(&resource) = res_index.get(&(canonical, m, request.last_frame)) {
                        requests.push(Request {
                            resource,
                            usage: request.usage,
                            last_frame: request.last_frame,
                        });
                    }
                }
                let index = graph.nodes.push(Node {
                    frontend_node: node_id,
                    multiplexing_index: m,
                    predecessors: Vec::new(),
                    requests,
                });
                node_index.insert((node_id, m), index);
            }
        }
        node_index
    }

    /// Turn usage timelines and ordering hints into edges.
    ///
    /// For every rename chain, writers of each name run in sequence,
    /// readers run after the last writer, and the next link's renamer runs
    /// after everything that touched the previous name.
    fn derive_edges(
        &self,
        valid: &IdIndexedVec<NodeNameId, bool>,
        extents: Extents,
        node_index: &HashMap<(NodeNameId, MultiplexingIndex), NodeIndex>,
        graph: &mut Graph,
    ) {
        let registry = self.registry;
        let dep = self.dependency_data;

        let add_edge = |graph: &mut Graph, m, from: NodeNameId, to: NodeNameId| {
            if from == to {
                return;
            }
            let (Some(&from), Some(&to)) = (node_index.get(&(from, m)), node_index.get(&(to, m)))
            else {
                return;
            };
            graph.nodes[to].predecessors.push(from);
        };

        for m in extents.indices() {
            for canonical in registry.resources.ids() {
                let Some(resolved) = dep.resolved_resource(canonical) else {
                    continue;
                };
                let mut prev_tail: Vec<NodeNameId> = Vec::new();
                for &name in &resolved.chain {
                    let uses = &dep.uses[name];
                    let writers: Vec<NodeNameId> = uses
                        .producer
                        .iter()
                        .chain(uses.modifiers.iter())
                        .copied()
                        .filter(|&n| valid[n])
                        .collect();
                    let readers: Vec<NodeNameId> = uses
                        .readers
                        .iter()
                        .copied()
                        .filter(|&n| valid[n])
                        .collect();

                    if let Some(&first) = writers.first() {
                        for &t in &prev_tail {
                            add_edge(graph, m, t, first);
                        }
                    }
                    for pair in writers.windows(2) {
                        add_edge(graph, m, pair[0], pair[1]);
                    }
                    if let Some(&last) = writers.last() {
                        for &r in &readers {
                            add_edge(graph, m, last, r);
                        }
                    }

                    prev_tail.clear();
                    prev_tail.extend(writers.last().copied());
                    prev_tail.extend(readers);
                }
            }

            for node_id in registry.nodes.ids() {
                if !valid[node_id] {
                    continue;
                }
                let node = &registry.nodes[node_id];
                for &before in &node.follows {
                    if valid.get(before).copied().unwrap_or(false) {
                        add_edge(graph, m, before, node_id);
                    }
                }
                for &after in &node.precedes {
                    if valid.get(after).copied().unwrap_or(false) {
                        add_edge(graph, m, node_id, after);
                    }
                }
            }
        }
    }

    /// Keep only nodes from which a sink write is forward-reachable,
    /// then compact indices. With no sinks declared everything is kept.
    fn prune_to_sinks(&self, full: &Graph, graph: &mut Graph) {
        let registry = self.registry;
        let mut keep: IdIndexedVec<NodeIndex, bool> = IdIndexedVec::new();
        keep.resize(full.nodes.len(), false);

        let sinks: Vec<ResNameId> = registry
            .sinks()
            .iter()
            .map(|&s| self.resolver.resolve(s))
            .collect();
        if sinks.is_empty() {
            log::debug!("no sink resources declared; retaining all nodes");
            for id in keep.ids().collect::<Vec<_>>() {
                keep[id] = true;
            }
        } else {
            let mut stack: Vec<NodeIndex> = Vec::new();
            for id in full.nodes.ids() {
                let writes_sink = full.nodes[id].requests.iter().any(|r| {
                    r.usage.is_write()
                        && sinks.contains(&full.resources[r.resource].frontend_resource)
                });
                if writes_sink {
                    keep[id] = true;
                    stack.push(id);
                }
            }
            while let Some(id) = stack.pop() {
                for &pred in &full.nodes[id].predecessors {
                    if !keep[pred] {
                        keep[pred] = true;
                        stack.push(pred);
                    }
                }
            }
            let culled = full.nodes.len() - keep.iter().filter(|&&k| k).count();
            if culled > 0 {
                log::debug!("culled {} nodes unreachable from sinks", culled);
            }
        }

        // Compact nodes.
        let mut node_remap: IdIndexedVec<NodeIndex, Option<NodeIndex>> = IdIndexedVec::new();
        node_remap.resize(full.nodes.len(), None);
        for id in full.nodes.ids() {
            if keep[id] {
                let new = graph.nodes.push(Node {
                    frontend_node: full.nodes[id].frontend_node,
                    multiplexing_index: full.nodes[id].multiplexing_index,
                    predecessors: Vec::new(),
                    requests: full.nodes[id].requests.clone(),
                });
                node_remap[id] = Some(new);
            }
        }

        // Compact resources referenced by kept nodes, pulling in the main
        // resource behind every kept history twin.
        let mut res_used: IdIndexedVec<ResourceIndex, bool> = IdIndexedVec::new();
        res_used.resize(full.resources.len(), false);
        for id in full.nodes.ids() {
            if !keep[id] {
                continue;
            }
            for request in &full.nodes[id].requests {
                res_used[request.resource] = true;
                if let Some(main) = full.resources[request.resource].history_of {
                    res_used[main] = true;
                }
            }
        }
        let mut res_remap: IdIndexedVec<ResourceIndex, Option<ResourceIndex>> = IdIndexedVec::new();
        res_remap.resize(full.resources.len(), None);
        for id in full.resources.ids() {
            if res_used[id] {
                let new = graph.resources.push(full.resources[id].clone());
                res_remap[id] = Some(new);
            }
        }

        // Rewrite indices.
        for id in full.nodes.ids() {
            let Some(new) = node_remap[id] else { continue };
            for &pred in &full.nodes[id].predecessors {
                if let Some(p) = node_remap[pred] {
                    graph.nodes[new].predecessors.push(p);
                }
            }
            for request in &mut graph.nodes[new].requests {
                // Kept nodes only reference kept resources.
                request.resource = res_remap[request.resource]
                    .unwrap_or_else(|| unreachable!("kept node references dropped resource"));
            }
        }
        for id in graph.resources.ids().collect::<Vec<_>>() {
            if let Some(main) = graph.resources[id].history_of {
                graph.resources[id].history_of = res_remap[main];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::declaration::NodeDeclaration;
    use crate::frontend::dependency_data::DependencyDataCalculator;
    use crate::types::{
        ResourceUsage, StageFlags, TextureDescription, TextureFormat, UsageKind,
    };
    use arclight_core::ids::TypedId;

    fn write_usage() -> ResourceUsage {
        ResourceUsage::write(UsageKind::RenderTarget, StageFlags::POST_RASTER)
    }

    fn read_usage() -> ResourceUsage {
        ResourceUsage::read(UsageKind::ShaderResource, StageFlags::POST_RASTER)
    }

    fn declare(registry: &mut Registry, name: &str, fill: impl FnOnce(&mut NodeDeclaration<'_>)) {
        let node = registry.intern_node(name);
        registry.nodes[node].declared = true;
        let mut decl = NodeDeclaration::new(registry, node);
        fill(&mut decl);
    }

    fn build(registry: &Registry, extents: Extents) -> Graph {
        let mut resolver = NameResolver::new();
        resolver.update(registry);
        let mut calc = DependencyDataCalculator::new();
        calc.recalculate(registry, &resolver);
        let mut graph = Graph::default();
        IrGraphBuilder::new(registry, &resolver, calc.data()).build_into(extents, &mut graph);
        graph
    }

    fn ir_node(graph: &Graph, registry: &Registry, name: &str) -> Option<NodeIndex> {
        let id = registry.find_node(name)?;
        graph.nodes.ids().find(|&n| graph.nodes[n].frontend_node == id)
    }

    fn producer_consumer_registry() -> Registry {
        let mut registry = Registry::new();
        declare(&mut registry, "producer", |d| {
            d.create_texture(
                "color",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
        });
        declare(&mut registry, "consumer", |d| {
            d.read("color", read_usage());
        });
        registry
    }

    #[test]
    fn test_reader_depends_on_producer() {
        let registry = producer_consumer_registry();
        let graph = build(&registry, Extents::default());
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.resources.len(), 1);

        let producer = ir_node(&graph, &registry, "producer").unwrap();
        let consumer = ir_node(&graph, &registry, "consumer").unwrap();
        assert_eq!(graph.nodes[consumer].predecessors, vec![producer]);
        assert!(graph.nodes[producer].predecessors.is_empty());
    }

    #[test]
    fn test_orphan_reader_is_dropped() {
        let mut registry = producer_consumer_registry();
        declare(&mut registry, "orphan", |d| {
            d.read("does_not_exist", read_usage());
        });
        let graph = build(&registry, Extents::default());
        assert_eq!(graph.nodes.len(), 2);
        assert!(ir_node(&graph, &registry, "orphan").is_none());
    }

    #[test]
    fn test_dropping_a_producer_cascades() {
        let mut registry = Registry::new();
        declare(&mut registry, "broken", |d| {
            d.read("missing", read_usage());
            d.create_texture(
                "derived",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
        });
        declare(&mut registry, "downstream", |d| {
            d.read("derived", read_usage());
        });
        let graph = build(&registry, Extents::default());
        assert_eq!(graph.nodes.len(), 0);
    }

    #[test]
    fn test_rename_chain_orders_writers_and_readers() {
        let mut registry = Registry::new();
        declare(&mut registry, "producer", |d| {
            d.create_texture(
                "color",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
        });
        declare(&mut registry, "debug_view", |d| {
            d.read("color", read_usage());
        });
        declare(&mut registry, "blur", |d| {
            d.rename("color", "color_blurred", write_usage());
        });
        declare(&mut registry, "present", |d| {
            d.read("color_blurred", read_usage());
        });

        let registry = registry;
        let graph = build(&registry, Extents::default());
        // The whole chain collapses to one resource.
        assert_eq!(graph.resources.len(), 1);

        let producer = ir_node(&graph, &registry, "producer").unwrap();
        let debug_view = ir_node(&graph, &registry, "debug_view").unwrap();
        let blur = ir_node(&graph, &registry, "blur").unwrap();
        let present = ir_node(&graph, &registry, "present").unwrap();

        assert!(graph.nodes[debug_view].predecessors.contains(&producer));
        // The renamer waits for the old name's readers.
        assert!(graph.nodes[blur].predecessors.contains(&debug_view));
        assert!(graph.nodes[blur].predecessors.contains(&producer));
        assert!(graph.nodes[present].predecessors.contains(&blur));
    }

    #[test]
    fn test_sink_pruning_culls_dead_branch() {
        let mut registry = producer_consumer_registry();
        declare(&mut registry, "present", |d| {
            d.read("color", read_usage());
            d.create_texture(
                "backbuffer",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
        });
        declare(&mut registry, "unused_pass", |d| {
            d.create_texture(
                "unused_target",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
        });
        let backbuffer = registry.find_resource("backbuffer").unwrap();
        registry.mark_sink(backbuffer);

        let graph = build(&registry, Extents::default());
        assert!(ir_node(&graph, &registry, "producer").is_some());
        assert!(ir_node(&graph, &registry, "present").is_some());
        // "consumer" reads color but nothing downstream of it writes a sink.
        assert!(ir_node(&graph, &registry, "consumer").is_none());
        assert!(ir_node(&graph, &registry, "unused_pass").is_none());
        // The unused target's resource is compacted away.
        assert_eq!(graph.resources.len(), 2);
    }

    #[test]
    fn test_multiplexing_expands_nodes_and_resources() {
        let registry = producer_consumer_registry();
        let extents = Extents {
            viewports: 2,
            super_samples: 1,
        };
        let graph = build(&registry, extents);
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.resources.len(), 2);
        // Edges never cross multiplexing indices.
        for id in graph.nodes.ids() {
            for &pred in &graph.nodes[id].predecessors {
                assert_eq!(
                    graph.nodes[pred].multiplexing_index,
                    graph.nodes[id].multiplexing_index
                );
            }
        }
    }

    #[test]
    fn test_history_read_gets_twin_resource() {
        let mut registry = Registry::new();
        declare(&mut registry, "taa", |d| {
            d.create_texture(
                "taa_target",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
            d.history("taa_target", crate::types::History::DiscardOnFirstFrame);
            d.read_history("taa_target", read_usage());
        });
        let graph = build(&registry, Extents::default());
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.resources.len(), 2);
        let twin = graph
            .resources
            .ids()
            .find(|&r| graph.resources[r].history_of.is_some())
            .unwrap();
        let node = NodeIndex::from_index(0);
        let history_request = graph.nodes[node]
            .requests
            .iter()
            .find(|r| r.last_frame)
            .unwrap();
        assert_eq!(history_request.resource, twin);
    }

    #[test]
    fn test_history_read_without_policy_drops_node() {
        let mut registry = Registry::new();
        declare(&mut registry, "producer", |d| {
            d.create_texture(
                "color",
                TextureDescription::new_2d(8, 8, TextureFormat::Rgba8Unorm),
                write_usage(),
            );
        });
        declare(&mut registry, "bad_history_reader", |d| {
            d.read_history("color", read_usage());
        });
        let graph = build(&registry, Extents::default());
        assert_eq!(graph.nodes.len(), 1);
        assert!(ir_node(&graph, &registry, "bad_history_reader").is_none());
    }

    #[test]
    fn test_ordering_hints_add_edges() {
        let mut registry = producer_consumer_registry();
        declare(&mut registry, "late_pass", |d| {
            d.order_after("consumer");
            d.read("color", read_usage());
        });
        let graph = build(&registry, Extents::default());
        let consumer = ir_node(&graph, &registry, "consumer").unwrap();
        let late = ir_node(&graph, &registry, "late_pass").unwrap();
        assert!(graph.nodes[late].predecessors.contains(&consumer));
    }
}
