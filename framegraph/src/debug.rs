//! Debug output for compiled graphs.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use arclight_core::ids::TypedId;

use crate::backend::node_scheduler::NodePermutation;
use crate::error::FrameGraphError;
use crate::frontend::registry::Registry;
use crate::intermediate::Graph;

/// Callback invoked after every graph recompilation, e.g. to feed an
/// in-engine graph visualizer.
pub type VisualizationHook = Box<dyn FnMut(&Registry, &Graph, &NodePermutation)>;

/// Write the compiled graph as Graphviz DOT.
///
/// Nodes are annotated with their execution position and multiplexing
/// index; edges point from a node to its dependents.
pub fn dump_graph(
    registry: &Registry,
    graph: &Graph,
    permutation: &NodePermutation,
    path: &Path,
) -> Result<(), FrameGraphError> {
    let mut dot = String::from("digraph framegraph {\n  rankdir=LR;\n");
    for id in graph.nodes.ids() {
        let node = &graph.nodes[id];
        let _ = writeln!(
            dot,
            "  n{} [label=\"{} [{}] #{}\"];",
            id.index(),
            registry.node_name(node.frontend_node),
            node.multiplexing_index.index(),
            permutation.position(id)
        );
    }
    for id in graph.nodes.ids() {
        for &pred in &graph.nodes[id].predecessors {
            let _ = writeln!(dot, "  n{} -> n{};", pred.index(), id.index());
        }
    }
    dot.push_str("}\n");
    fs::write(path, dot)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::node_scheduler::schedule_into;
    use crate::frontend::declaration::NodeDeclaration;
    use crate::frontend::dependency_data::DependencyDataCalculator;
    use crate::frontend::multiplexing::Extents;
    use crate::frontend::name_resolver::NameResolver;
    use crate::intermediate::builder::IrGraphBuilder;
    use crate::types::{ResourceUsage, StageFlags, TextureDescription, TextureFormat, UsageKind};

    #[test]
    fn test_dump_contains_nodes_and_edges() {
        let mut registry = Registry::new();
        let producer = registry.intern_node("producer");
        registry.nodes[producer].declared = true;
        NodeDeclaration::new(&mut registry, producer).create_texture(
            "color",
            TextureDescription::new_2d(4, 4, TextureFormat::Rgba8Unorm),
            ResourceUsage::write(UsageKind::RenderTarget, StageFlags::POST_RASTER),
        );
        let consumer = registry.intern_node("consumer");
        registry.nodes[consumer].declared = true;
        NodeDeclaration::new(&mut registry, consumer).read(
            "color",
            ResourceUsage::read(UsageKind::ShaderResource, StageFlags::POST_RASTER),
        );

        let mut resolver = NameResolver::new();
        resolver.update(&registry);
        let mut calc = DependencyDataCalculator::new();
        calc.recalculate(&registry, &resolver);
        let mut graph = Graph::default();
        IrGraphBuilder::new(&registry, &resolver, calc.data())
            .build_into(Extents::default(), &mut graph);
        let mut permutation = NodePermutation::default();
        schedule_into(&graph, &mut permutation, |_, _| {});

        let dir = std::env::temp_dir().join("arclight_framegraph_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dump.dot");
        dump_graph(&registry, &graph, &permutation, &path).unwrap();
        let dot = fs::read_to_string(&path).unwrap();
        assert!(dot.contains("producer"));
        assert!(dot.contains("->"));
        fs::remove_file(&path).unwrap();
    }
}
