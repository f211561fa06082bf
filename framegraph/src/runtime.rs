//! The frame graph runtime.
//!
//! Owns every compilation stage and the per-frame execution loop. The
//! pipeline is incremental: each mutation marks the earliest stage it
//! invalidates, and `run_nodes` re-runs only the dirty suffix of the
//! pipeline before executing the frame. Stages always run in order and
//! each outstanding stage runs exactly once per frame.

use std::sync::Arc;

use arclight_core::pool::Pooled;

use crate::backend::executor::execute_frame;
use crate::backend::node_scheduler::{schedule_into, NodePermutation};
use crate::backend::resource_scheduler::{
    NativeHeapScheduler, PoolScheduler, ResourceEvent, ResourceScheduler, SCHEDULE_FRAME_WINDOW,
};
use crate::backend::state_delta::{calculate_into, StateDeltas};
use crate::debug::VisualizationHook;
use crate::device::Device;
use crate::error::FrameGraphError;
use crate::frontend::declaration::{ExecuteCallback, NodeDeclaration};
use crate::frontend::dependency_data::DependencyDataCalculator;
use crate::frontend::multiplexing::Extents;
use crate::frontend::name_resolver::NameResolver;
use crate::frontend::node_tracker::{ContextId, NodeTracker};
use crate::frontend::registry::{NodeNameId, Registry};
use crate::intermediate::builder::IrGraphBuilder;
use crate::intermediate::{Graph, Mapping, ResourceIndex};
use crate::types::{activation_from_history, ResourceDescription};

/// How much of the pipeline must re-run before the next frame.
///
/// Ordered from earliest to latest stage; marking a stage dirty also
/// re-runs everything after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompilationStage {
    RequiresNodeDeclarationUpdate,
    RequiresNameResolution,
    RequiresDependencyDataRecalculation,
    RequiresIrGraphRebuild,
    RequiresNodeScheduling,
    RequiresStateDeltaRecalculation,
    RequiresResourceScheduling,
    RequiresHistoryInitialization,
    UpToDate,
}

/// Handle returned by node registration.
///
/// Carries the registration generation, so unregistering with a handle
/// that was superseded by a newer registration of the same name is a
/// no-op instead of tearing down the newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    node: NodeNameId,
    generation: u32,
}

/// The frame graph runtime and compiler pipeline.
pub struct Runtime {
    device: Arc<dyn Device>,
    registry: Registry,
    resolver: NameResolver,
    dependency_data: DependencyDataCalculator,
    tracker: Arc<NodeTracker>,
    graph: Pooled<Graph>,
    mapping: Mapping,
    permutation: Pooled<NodePermutation>,
    deltas: Pooled<StateDeltas>,
    scheduler: Box<dyn ResourceScheduler>,
    events: Vec<Vec<ResourceEvent>>,
    stage: CompilationStage,
    frame_index: u64,
    extents: Extents,
    force_recompilation: bool,
    visualization_hook: Option<VisualizationHook>,
}

impl Runtime {
    /// Create a runtime driving the given device.
    ///
    /// The resource scheduling strategy is chosen here, once: devices
    /// with heap support get placed resources with memory aliasing,
    /// everything else gets pooled standalone allocations.
    pub fn new(device: Arc<dyn Device>) -> Self {
        let scheduler: Box<dyn ResourceScheduler> = if device.supports_heaps() {
            log::info!("frame graph: using native heap resource scheduler");
            Box::new(NativeHeapScheduler::new(device.clone()))
        } else {
            log::info!("frame graph: using pooled resource scheduler");
            Box::new(PoolScheduler::new(device.clone()))
        };
        Self {
            device,
            registry: Registry::new(),
            resolver: NameResolver::new(),
            dependency_data: DependencyDataCalculator::new(),
            tracker: Arc::new(NodeTracker::new()),
            graph: Pooled::default(),
            mapping: Mapping::default(),
            permutation: Pooled::default(),
            deltas: Pooled::default(),
            scheduler,
            events: vec![Vec::new(); SCHEDULE_FRAME_WINDOW],
            stage: CompilationStage::RequiresNodeDeclarationUpdate,
            frame_index: 0,
            extents: Extents::default(),
            force_recompilation: false,
            visualization_hook: None,
        }
    }

    /// Allocate a registration context for one subsystem.
    pub fn create_context(&self) -> ContextId {
        self.tracker.create_context()
    }

    /// Register (or re-register) a node under `name`.
    ///
    /// The declaration callback runs during the next recompilation and
    /// every time declarations change afterwards.
    pub fn register_node(
        &mut self,
        context: ContextId,
        name: &str,
        declare: impl FnMut(&mut NodeDeclaration<'_>) -> ExecuteCallback + 'static,
    ) -> NodeHandle {
        let id = self.registry.intern_node(name);
        let node = &mut self.registry.nodes[id];
        node.generation = node.generation.wrapping_add(1);
        node.declare = Some(Box::new(declare));
        node.clear_declaration();
        let generation = node.generation;
        self.tracker.register_node(id, context);
        log::debug!("registered node '{}'", name);
        NodeHandle {
            node: id,
            generation,
        }
    }

    /// Unregister a node. Stale handles (superseded by a newer
    /// registration of the same name) are ignored.
    pub fn unregister_node(&mut self, context: ContextId, handle: NodeHandle) {
        if self.registry.nodes[handle.node].generation != handle.generation {
            log::debug!(
                "ignoring stale unregister of node '{}'",
                self.registry.node_name(handle.node)
            );
            return;
        }
        if self.tracker.unregister_node(handle.node, context) {
            let node = &mut self.registry.nodes[handle.node];
            node.declare = None;
            node.clear_declaration();
            log::debug!(
                "unregistered node '{}'",
                self.registry.node_name(handle.node)
            );
        }
    }

    /// Unregister every node a context owns, e.g. on subsystem unload.
    pub fn wipe_context_nodes(&mut self, context: ContextId) {
        for id in self.tracker.take_context_nodes(context) {
            let node = &mut self.registry.nodes[id];
            node.declare = None;
            node.clear_declaration();
        }
    }

    /// Change how many times the graph is multiplexed.
    pub fn set_multiplexing_extents(&mut self, extents: Extents) {
        if self.extents != extents {
            self.extents = extents;
            self.mark_stage_dirty(CompilationStage::RequiresIrGraphRebuild);
        }
    }

    /// Set the scheduled (maximum) resolution of an auto-resolution type.
    /// Triggers resource rescheduling.
    pub fn set_resolution(&mut self, auto_res: &str, width: u32, height: u32) {
        let id = self.registry.intern_auto_res(auto_res);
        let entry = &mut self.registry.auto_res_types[id];
        entry.static_resolution = (width, height);
        entry.dynamic_resolution = (width, height);
        entry.dynamic_resolution_countdown = 0;
        self.mark_stage_dirty(CompilationStage::RequiresResourceScheduling);
    }

    /// Change an auto-resolution type's resolution without rescheduling.
    ///
    /// Applied to each frame slot over the next few frames; requires a
    /// device with heap support. The dynamic resolution can only shrink
    /// below the scheduled maximum.
    pub fn set_dynamic_resolution(&mut self, auto_res: &str, width: u32, height: u32) {
        let id = self.registry.intern_auto_res(auto_res);
        let entry = &mut self.registry.auto_res_types[id];
        let (max_w, max_h) = entry.static_resolution;
        if width > max_w || height > max_h {
            log::error!(
                "dynamic resolution {}x{} for '{}' exceeds the scheduled {}x{}, clamping",
                width,
                height,
                self.registry.auto_res_name(id),
                max_w,
                max_h
            );
        }
        let entry = &mut self.registry.auto_res_types[id];
        entry.dynamic_resolution = (width.min(max_w), height.min(max_h));
        entry.dynamic_resolution_countdown = SCHEDULE_FRAME_WINDOW as u32;
    }

    /// Mark a resource as a sink. Sinks root the dead-node cull.
    pub fn mark_resource_sink(&mut self, name: &str) {
        let id = self.registry.intern_resource(name);
        self.registry.mark_sink(id);
        self.mark_stage_dirty(CompilationStage::RequiresIrGraphRebuild);
    }

    /// Remove a sink marking.
    pub fn unmark_resource_sink(&mut self, name: &str) {
        if let Some(id) = self.registry.find_resource(name) {
            self.registry.unmark_sink(id);
            self.mark_stage_dirty(CompilationStage::RequiresIrGraphRebuild);
        }
    }

    /// Force a full recompilation on every frame. Debug aid.
    pub fn set_force_recompilation(&mut self, force: bool) {
        self.force_recompilation = force;
    }

    /// Install a callback invoked after every recompilation.
    pub fn set_visualization_hook(&mut self, hook: Option<VisualizationHook>) {
        self.visualization_hook = hook;
    }

    /// Throw away all compiled state and rebuild from declarations.
    pub fn request_complete_graph_recompilation(&mut self) {
        self.mark_stage_dirty(CompilationStage::RequiresNodeDeclarationUpdate);
    }

    /// Destroy all scheduled resources and schedule them from scratch.
    /// History contents are lost.
    pub fn request_complete_resource_rescheduling(&mut self) {
        for slot in 0..SCHEDULE_FRAME_WINDOW {
            self.scheduler.shutdown(slot);
            self.events[slot].clear();
        }
        self.mark_stage_dirty(CompilationStage::RequiresResourceScheduling);
    }

    /// Release all device resources before a device reset. The next
    /// `run_nodes` schedules everything anew.
    pub fn before_device_reset(&mut self) {
        log::info!("frame graph: releasing resources for device reset");
        self.request_complete_resource_rescheduling();
    }

    /// Move the pipeline back to (at most) `stage`.
    pub fn mark_stage_dirty(&mut self, stage: CompilationStage) {
        if stage < self.stage {
            log::trace!("compilation stage {:?} -> {:?}", self.stage, stage);
            self.stage = stage;
        }
    }

    /// Current pipeline stage.
    pub fn stage(&self) -> CompilationStage {
        self.stage
    }

    /// Number of frames executed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Description of a declared resource, following rename links.
    pub fn resource_description(
        &self,
        name: &str,
    ) -> Result<ResourceDescription, FrameGraphError> {
        let unknown = || FrameGraphError::UnknownResource(name.to_owned());
        let mut id = self.registry.find_resource(name).ok_or_else(unknown)?;
        for _ in 0..self.registry.resources.len() {
            if let Some(description) = self.registry.resources[id].description {
                return Ok(description);
            }
            match self.registry.resources[id].renamed_to {
                Some(next) => id = next,
                None => break,
            }
        }
        Err(unknown())
    }

    /// Write the compiled graph as Graphviz DOT.
    pub fn dump_graph(&self, path: &std::path::Path) -> Result<(), FrameGraphError> {
        let (Some(graph), Some(permutation)) = (self.graph.get(), self.permutation.get()) else {
            log::warn!("dump_graph called before the first compilation");
            return Ok(());
        };
        crate::debug::dump_graph(&self.registry, graph, permutation, path)
    }

    /// Recompile whatever is dirty, then execute one frame.
    ///
    /// Must be called from one thread at a time and never from inside a
    /// node callback; both are usage bugs and panic.
    pub fn run_nodes(&mut self) {
        let tracker = Arc::clone(&self.tracker);
        let _guard = tracker.lock_frame();

        if tracker.acquire_nodes_changed() || self.force_recompilation {
            self.mark_stage_dirty(CompilationStage::RequiresNodeDeclarationUpdate);
        }

        let recompiled = self.stage != CompilationStage::UpToDate;
        while self.stage != CompilationStage::UpToDate {
            match self.stage {
                CompilationStage::RequiresNodeDeclarationUpdate => {
                    self.update_node_declarations()
                }
                CompilationStage::RequiresNameResolution => self.update_name_resolution(),
                CompilationStage::RequiresDependencyDataRecalculation => {
                    self.recalculate_dependency_data()
                }
                CompilationStage::RequiresIrGraphRebuild => self.rebuild_ir_graph(),
                CompilationStage::RequiresNodeScheduling => self.schedule_nodes(),
                CompilationStage::RequiresStateDeltaRecalculation => {
                    self.recalculate_state_deltas()
                }
                CompilationStage::RequiresResourceScheduling => self.reschedule_resources(),
                CompilationStage::RequiresHistoryInitialization => {
                    self.initialize_history_resources()
                }
                CompilationStage::UpToDate => {}
            }
        }
        if recompiled {
            if let Some(mut hook) = self.visualization_hook.take() {
                if let (Some(graph), Some(permutation)) =
                    (self.graph.get(), self.permutation.get())
                {
                    hook(&self.registry, graph, permutation);
                }
                self.visualization_hook = Some(hook);
            }
        }

        let prev_slot = (self.frame_index as usize) % SCHEDULE_FRAME_WINDOW;
        self.frame_index += 1;
        let curr_slot = (self.frame_index as usize) % SCHEDULE_FRAME_WINDOW;

        self.apply_dynamic_resolutions(curr_slot);

        let (Some(graph), Some(permutation)) = (self.graph.get(), self.permutation.get()) else {
            log::error!("frame graph executed before compilation, skipping frame");
            return;
        };
        execute_frame(
            self.device.as_ref(),
            &mut self.registry,
            &self.resolver,
            graph,
            &self.mapping,
            permutation,
            &self.events[curr_slot],
            self.scheduler.as_mut(),
            curr_slot,
            prev_slot,
        );
    }

    /// Destroy all scheduled device resources.
    pub fn shutdown(&mut self) {
        for slot in 0..SCHEDULE_FRAME_WINDOW {
            self.scheduler.shutdown(slot);
            self.events[slot].clear();
        }
        self.mark_stage_dirty(CompilationStage::RequiresResourceScheduling);
    }

    fn update_node_declarations(&mut self) {
        log::debug!("re-running node declarations");
        self.registry.clear_resource_declarations();
        let ids: Vec<NodeNameId> = self.registry.nodes.ids().collect();
        for &id in &ids {
            self.registry.nodes[id].clear_declaration();
        }
        for &id in &ids {
            let Some(mut declare) = self.registry.nodes[id].declare.take() else {
                continue;
            };
            let mut declaration = NodeDeclaration::new(&mut self.registry, id);
            let execute = declare(&mut declaration);
            let node = &mut self.registry.nodes[id];
            node.execute = Some(execute);
            node.declared = true;
            node.declare = Some(declare);
        }
        self.stage = CompilationStage::RequiresNameResolution;
    }

    fn update_name_resolution(&mut self) {
        self.resolver.update(&self.registry);
        self.stage = CompilationStage::RequiresDependencyDataRecalculation;
    }

    fn recalculate_dependency_data(&mut self) {
        self.dependency_data.recalculate(&self.registry, &self.resolver);
        self.stage = CompilationStage::RequiresIrGraphRebuild;
    }

    fn rebuild_ir_graph(&mut self) {
        let graph = self.graph.activate();
        IrGraphBuilder::new(&self.registry, &self.resolver, self.dependency_data.data())
            .build_into(self.extents, graph);
        graph.calculate_mapping(&mut self.mapping);
        self.stage = CompilationStage::RequiresNodeScheduling;
    }

    fn schedule_nodes(&mut self) {
        let Some(graph) = self.graph.get() else {
            panic!("intermediate graph missing during node scheduling");
        };
        let registry = &self.registry;
        schedule_into(graph, self.permutation.activate(), |from, to| {
            log::error!(
                "dependency cycle between '{}' and '{}'; dropping the closing edge",
                registry.node_name(graph.nodes[from].frontend_node),
                registry.node_name(graph.nodes[to].frontend_node)
            );
        });
        self.stage = CompilationStage::RequiresStateDeltaRecalculation;
    }

    fn recalculate_state_deltas(&mut self) {
        let (Some(graph), Some(permutation)) = (self.graph.get(), self.permutation.get()) else {
            panic!("graph missing during state delta recalculation");
        };
        calculate_into(graph, permutation, self.deltas.activate());
        self.stage = CompilationStage::RequiresResourceScheduling;
    }

    fn reschedule_resources(&mut self) {
        // Apply auto-resolution sizes to the scheduled descriptions.
        if let Some(graph) = self.graph.get_mut() {
            for id in graph.resources.ids().collect::<Vec<_>>() {
                let Some(resolution) = graph.resources[id].resolution else {
                    continue;
                };
                let entry = &self.registry.auto_res_types[resolution.auto_res];
                if entry.static_resolution == (0, 0) {
                    continue;
                }
                if let ResourceDescription::Texture(desc) = &mut graph.resources[id].description {
                    desc.width = scaled(entry.static_resolution.0, resolution.multiplier);
                    desc.height = scaled(entry.static_resolution.1, resolution.multiplier);
                }
            }
        }

        let (Some(graph), Some(permutation), Some(deltas)) =
            (self.graph.get(), self.permutation.get(), self.deltas.get())
        else {
            panic!("graph missing during resource scheduling");
        };
        for slot in 0..SCHEDULE_FRAME_WINDOW {
            match self
                .scheduler
                .schedule_resources(slot, graph, permutation, deltas)
            {
                Ok(events) => self.events[slot] = events,
                Err(err) => {
                    // Keep running without the slot's resources rather
                    // than aborting the frame loop.
                    log::error!("resource scheduling failed for slot {}: {}", slot, err);
                    self.scheduler.shutdown(slot);
                    self.events[slot].clear();
                }
            }
        }

        // Rescheduling recreates textures at the scheduled maximum, so a
        // still-active dynamic resolution must be applied anew to every
        // slot over the next frame window.
        for entry in self.registry.auto_res_types.iter_mut() {
            if entry.dynamic_resolution != entry.static_resolution {
                entry.dynamic_resolution_countdown = SCHEDULE_FRAME_WINDOW as u32;
            }
        }
        self.stage = CompilationStage::RequiresHistoryInitialization;
    }

    /// Bring newly scheduled history resources into their first-frame
    /// state. Preserved resources keep their contents.
    fn initialize_history_resources(&mut self) {
        let Some(graph) = self.graph.get() else {
            panic!("graph missing during history initialization");
        };
        for id in graph.resources.ids() {
            let res = &graph.resources[id];
            if res.history_of.is_some() {
                continue;
            }
            let Some(activation) = activation_from_history(res.history) else {
                continue;
            };
            for slot in 0..SCHEDULE_FRAME_WINDOW {
                if self.scheduler.is_resource_preserved(slot, id) {
                    continue;
                }
                match res.description {
                    ResourceDescription::Texture(_) => {
                        if let Some(handle) = self.scheduler.get_texture(slot, id) {
                            self.device.activate_texture(handle, activation);
                        }
                    }
                    ResourceDescription::Buffer(_) => {
                        if let Some(handle) = self.scheduler.get_buffer(slot, id) {
                            self.device.activate_buffer(handle, activation);
                        }
                    }
                    ResourceDescription::Blob(_) => {
                        self.scheduler.activate_blob(slot, id, activation);
                    }
                }
            }
        }
        self.stage = CompilationStage::UpToDate;
    }

    /// Apply pending dynamic resolution changes to the slot about to
    /// execute.
    fn apply_dynamic_resolutions(&mut self, slot: usize) {
        let Some(graph) = self.graph.get() else {
            return;
        };
        let mut resizes: Vec<(ResourceIndex, (u32, u32))> = Vec::new();
        let mut any_pending = false;
        for type_id in self.registry.auto_res_types.ids() {
            let entry = &self.registry.auto_res_types[type_id];
            if entry.dynamic_resolution_countdown == 0 {
                continue;
            }
            any_pending = true;
            if !self.device.supports_heaps() {
                log::error!(
                    "dynamic resolution for '{}' requires a device with heap support",
                    self.registry.auto_res_name(type_id)
                );
                continue;
            }
            for id in graph.resources.ids() {
                let res = &graph.resources[id];
                if res.history_of.is_some() {
                    continue;
                }
                let Some(resolution) = res.resolution else {
                    continue;
                };
                if resolution.auto_res != type_id
                    || !matches!(res.description, ResourceDescription::Texture(_))
                {
                    continue;
                }
                resizes.push((
                    id,
                    (
                        scaled(entry.dynamic_resolution.0, resolution.multiplier),
                        scaled(entry.dynamic_resolution.1, resolution.multiplier),
                    ),
                ));
            }
        }
        if !any_pending {
            return;
        }
        let supports_heaps = self.device.supports_heaps();
        for entry in self.registry.auto_res_types.iter_mut() {
            if !supports_heaps {
                entry.dynamic_resolution_countdown = 0;
            } else if entry.dynamic_resolution_countdown > 0 {
                entry.dynamic_resolution_countdown -= 1;
            }
        }
        if !resizes.is_empty() {
            self.scheduler.resize_textures(slot, &resizes);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for slot in 0..SCHEDULE_FRAME_WINDOW {
            self.scheduler.shutdown(slot);
        }
    }
}

/// Auto-resolution size with a multiplier applied, never below one pixel.
fn scaled(size: u32, multiplier: f32) -> u32 {
    ((size as f32 * multiplier) as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use rstest::rstest;

    use crate::device::NullDevice;
    use crate::types::{
        BlobDescription, History, ResourceUsage, StageFlags, TextureDescription, TextureFormat,
        UsageKind,
    };

    fn runtime(supports_heaps: bool) -> (Runtime, Arc<NullDevice>) {
        let device = Arc::new(NullDevice::new(supports_heaps));
        (Runtime::new(device.clone()), device)
    }

    fn write_usage() -> ResourceUsage {
        ResourceUsage::write(UsageKind::RenderTarget, StageFlags::POST_RASTER)
    }

    fn read_usage() -> ResourceUsage {
        ResourceUsage::read(UsageKind::ShaderResource, StageFlags::POST_RASTER)
    }

    fn color_desc() -> TextureDescription {
        TextureDescription::new_2d(16, 16, TextureFormat::Rgba8Unorm)
    }

    /// Registers a producer/consumer pair recording execution order.
    fn register_pair(runtime: &mut Runtime, order: &Arc<Mutex<Vec<&'static str>>>) {
        let context = runtime.create_context();
        let log = order.clone();
        runtime.register_node(context, "producer", move |decl| {
            decl.create_texture("color", color_desc(), write_usage());
            let log = log.clone();
            Box::new(move |_| log.lock().unwrap().push("producer"))
        });
        let log = order.clone();
        runtime.register_node(context, "consumer", move |decl| {
            decl.read("color", read_usage());
            let log = log.clone();
            Box::new(move |_| log.lock().unwrap().push("consumer"))
        });
    }

    #[rstest]
    #[case::heaps(true)]
    #[case::pooled(false)]
    fn test_producer_runs_before_consumer(#[case] supports_heaps: bool) {
        let (mut runtime, device) = runtime(supports_heaps);
        let order = Arc::new(Mutex::new(Vec::new()));
        register_pair(&mut runtime, &order);

        runtime.run_nodes();
        assert_eq!(runtime.stage(), CompilationStage::UpToDate);
        assert_eq!(*order.lock().unwrap(), vec!["producer", "consumer"]);

        // Steady state: one barrier per frame, no recompilation.
        device.clear_calls();
        runtime.run_nodes();
        assert_eq!(device.barrier_count(), 1);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["producer", "consumer", "producer", "consumer"]
        );
    }

    #[test]
    fn test_orphan_node_is_culled_not_fatal() {
        let (mut runtime, _) = runtime(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        register_pair(&mut runtime, &order);

        let context = runtime.create_context();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        runtime.register_node(context, "orphan", move |decl| {
            decl.read("never_produced", read_usage());
            let flag = flag.clone();
            Box::new(move |_| *flag.lock().unwrap() = true)
        });

        runtime.run_nodes();
        assert!(!*ran.lock().unwrap());
        assert_eq!(*order.lock().unwrap(), vec!["producer", "consumer"]);
    }

    #[test]
    fn test_sink_culls_unreferenced_branch() {
        let (mut runtime, _) = runtime(false);
        let context = runtime.create_context();
        let executed = Arc::new(Mutex::new(Vec::new()));

        let log = executed.clone();
        runtime.register_node(context, "present", move |decl| {
            decl.create_texture("backbuffer", color_desc(), write_usage());
            let log = log.clone();
            Box::new(move |_| log.lock().unwrap().push("present"))
        });
        let log = executed.clone();
        runtime.register_node(context, "debug_overlay", move |decl| {
            decl.create_texture("overlay", color_desc(), write_usage());
            let log = log.clone();
            Box::new(move |_| log.lock().unwrap().push("debug_overlay"))
        });
        runtime.mark_resource_sink("backbuffer");

        runtime.run_nodes();
        assert_eq!(*executed.lock().unwrap(), vec!["present"]);
    }

    #[test]
    fn test_cycle_is_broken_and_both_nodes_run() {
        let (mut runtime, _) = runtime(false);
        let context = runtime.create_context();
        let executed = Arc::new(Mutex::new(0));

        let counter = executed.clone();
        runtime.register_node(context, "a", move |decl| {
            decl.create_texture("tex_a", color_desc(), write_usage());
            decl.order_after("b");
            let counter = counter.clone();
            Box::new(move |_| *counter.lock().unwrap() += 1)
        });
        let counter = executed.clone();
        runtime.register_node(context, "b", move |decl| {
            decl.create_texture("tex_b", color_desc(), write_usage());
            decl.order_after("a");
            let counter = counter.clone();
            Box::new(move |_| *counter.lock().unwrap() += 1)
        });

        runtime.run_nodes();
        assert_eq!(*executed.lock().unwrap(), 2);
    }

    #[rstest]
    #[case::heaps(true)]
    #[case::pooled(false)]
    fn test_history_blob_carries_last_frame_value(#[case] supports_heaps: bool) {
        let (mut runtime, _) = runtime(supports_heaps);
        let context = runtime.create_context();
        let written = Arc::new(Mutex::new(Vec::new()));

        let log = written.clone();
        runtime.register_node(context, "accumulator", move |decl| {
            decl.create_blob(
                "counter",
                BlobDescription::new(8, 8),
                ResourceUsage::write(UsageKind::Host, StageFlags::HOST),
            );
            decl.history("counter", History::ClearZeroOnFirstFrame);
            decl.read_history(
                "counter",
                ResourceUsage::read(UsageKind::Host, StageFlags::HOST),
            );
            let log = log.clone();
            Box::new(move |ctx| {
                let previous = u64::from_le_bytes(
                    ctx.history_blob("counter").unwrap().try_into().unwrap(),
                );
                let next = previous + 1;
                ctx.blob_mut("counter")
                    .unwrap()
                    .copy_from_slice(&next.to_le_bytes());
                log.lock().unwrap().push(next);
            })
        });

        runtime.run_nodes();
        runtime.run_nodes();
        runtime.run_nodes();
        assert_eq!(*written.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unregister_removes_node() {
        let (mut runtime, _) = runtime(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        register_pair(&mut runtime, &order);
        let context = runtime.create_context();
        let ran = Arc::new(Mutex::new(0));
        let counter = ran.clone();
        let handle = runtime.register_node(context, "extra", move |decl| {
            decl.create_texture("extra_target", color_desc(), write_usage());
            let counter = counter.clone();
            Box::new(move |_| *counter.lock().unwrap() += 1)
        });

        runtime.run_nodes();
        assert_eq!(*ran.lock().unwrap(), 1);

        runtime.unregister_node(context, handle);
        runtime.run_nodes();
        assert_eq!(*ran.lock().unwrap(), 1);
    }

    #[test]
    fn test_stale_unregister_is_ignored() {
        let (mut runtime, _) = runtime(false);
        let context = runtime.create_context();
        let ran = Arc::new(Mutex::new(0));

        let counter = ran.clone();
        let stale = runtime.register_node(context, "pass", move |decl| {
            decl.create_texture("target", color_desc(), write_usage());
            let counter = counter.clone();
            Box::new(move |_| *counter.lock().unwrap() += 1)
        });
        // Re-registration supersedes the first handle.
        let counter = ran.clone();
        runtime.register_node(context, "pass", move |decl| {
            decl.create_texture("target", color_desc(), write_usage());
            let counter = counter.clone();
            Box::new(move |_| *counter.lock().unwrap() += 1)
        });

        runtime.unregister_node(context, stale);
        runtime.run_nodes();
        assert_eq!(*ran.lock().unwrap(), 1);
    }

    #[test]
    fn test_multiplexing_runs_each_copy() {
        let (mut runtime, _) = runtime(false);
        let context = runtime.create_context();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        runtime.register_node(context, "pass", move |decl| {
            decl.create_texture("target", color_desc(), write_usage());
            let log = log.clone();
            Box::new(move |ctx| log.lock().unwrap().push(ctx.multiplexing_index()))
        });
        runtime.set_multiplexing_extents(Extents {
            viewports: 2,
            super_samples: 1,
        });

        runtime.run_nodes();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[test]
    fn test_stage_moves_backward_only() {
        let (mut runtime, _) = runtime(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        register_pair(&mut runtime, &order);
        runtime.run_nodes();
        assert_eq!(runtime.stage(), CompilationStage::UpToDate);

        runtime.mark_stage_dirty(CompilationStage::RequiresResourceScheduling);
        assert_eq!(
            runtime.stage(),
            CompilationStage::RequiresResourceScheduling
        );
        // Marking a later stage dirty does not advance the pipeline.
        runtime.mark_stage_dirty(CompilationStage::RequiresHistoryInitialization);
        assert_eq!(
            runtime.stage(),
            CompilationStage::RequiresResourceScheduling
        );
    }

    #[test]
    fn test_device_reset_reschedules_resources() {
        let (mut runtime, device) = runtime(true);
        let order = Arc::new(Mutex::new(Vec::new()));
        register_pair(&mut runtime, &order);
        runtime.run_nodes();
        assert!(device.live_heap_count() > 0);

        runtime.before_device_reset();
        assert_eq!(device.live_heap_count(), 0);

        runtime.run_nodes();
        assert!(device.live_heap_count() > 0);
        assert_eq!(runtime.stage(), CompilationStage::UpToDate);
    }

    #[test]
    fn test_resource_description_follows_renames() {
        let (mut runtime, _) = runtime(false);
        let context = runtime.create_context();
        runtime.register_node(context, "producer", |decl| {
            decl.create_texture("color", color_desc(), write_usage());
            Box::new(|_| {})
        });
        runtime.register_node(context, "blur", |decl| {
            decl.rename(
                "color",
                "color_blurred",
                ResourceUsage::write(UsageKind::Storage, StageFlags::COMPUTE),
            );
            Box::new(|_| {})
        });
        runtime.run_nodes();

        let desc = runtime.resource_description("color").unwrap();
        assert_eq!(desc, ResourceDescription::Texture(color_desc()));
        assert!(matches!(
            runtime.resource_description("missing"),
            Err(FrameGraphError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_dynamic_resolution_applies_over_window() {
        let (mut runtime, _) = runtime(true);
        let context = runtime.create_context();
        runtime.register_node(context, "pass", |decl| {
            decl.create_texture("target", color_desc(), write_usage());
            decl.auto_resolution("target", "main_view", 1.0);
            Box::new(|_| {})
        });
        runtime.set_resolution("main_view", 64, 64);
        runtime.run_nodes();

        runtime.set_dynamic_resolution("main_view", 32, 32);
        runtime.run_nodes();
        runtime.run_nodes();
        let id = runtime.registry.auto_res_names.id("main_view").unwrap();
        assert_eq!(
            runtime.registry.auto_res_types[id].dynamic_resolution_countdown,
            0
        );
        assert_eq!(runtime.stage(), CompilationStage::UpToDate);
    }

    #[test]
    fn test_reschedule_rearms_dynamic_resolution() {
        let (mut runtime, _) = runtime(true);
        let context = runtime.create_context();
        runtime.register_node(context, "pass", |decl| {
            decl.create_texture("target", color_desc(), write_usage());
            decl.auto_resolution("target", "main_view", 1.0);
            Box::new(|_| {})
        });
        runtime.set_resolution("main_view", 64, 64);
        runtime.run_nodes();

        runtime.set_dynamic_resolution("main_view", 32, 32);
        runtime.run_nodes();
        runtime.run_nodes();
        let id = runtime.registry.auto_res_names.id("main_view").unwrap();
        assert_eq!(
            runtime.registry.auto_res_types[id].dynamic_resolution_countdown,
            0
        );

        // The rescheduled textures come back at 64x64, so the still-active
        // 32x32 request must be re-applied over the next frame window.
        runtime.request_complete_resource_rescheduling();
        runtime.run_nodes();
        assert_eq!(
            runtime.registry.auto_res_types[id].dynamic_resolution_countdown,
            SCHEDULE_FRAME_WINDOW as u32 - 1
        );
        runtime.run_nodes();
        assert_eq!(
            runtime.registry.auto_res_types[id].dynamic_resolution_countdown,
            0
        );
    }
}
