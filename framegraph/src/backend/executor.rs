//! Frame execution: replaying events and invoking node callbacks.
//!
//! Walks the scheduled order once per frame. Before each node runs, the
//! pending resource events for its position are applied to the device;
//! the node's execution callback then receives an [`ExecutionContext`] to
//! look up its resources by declared name.

use crate::backend::node_scheduler::NodePermutation;
use crate::backend::resource_scheduler::{ResourceEvent, ResourceEventKind, ResourceScheduler};
use crate::device::{BufferHandle, Device, RawResource, TextureHandle};
use crate::frontend::multiplexing::MultiplexingIndex;
use crate::frontend::name_resolver::NameResolver;
use crate::frontend::registry::Registry;
use crate::intermediate::{Graph, Mapping, ResourceIndex};
use crate::types::ResourceDescription;

/// Resource access handed to execution callbacks.
///
/// Lookups go by declared name; renamed names resolve to the same
/// storage. `history_*` accessors return the previous frame's contents
/// and require the resource to be declared with a history policy.
pub struct ExecutionContext<'a> {
    registry: &'a Registry,
    resolver: &'a NameResolver,
    mapping: &'a Mapping,
    graph: &'a Graph,
    scheduler: &'a mut dyn ResourceScheduler,
    multiplexing_index: MultiplexingIndex,
    curr_slot: usize,
    prev_slot: usize,
}

impl<'a> ExecutionContext<'a> {
    /// Resolve a declared name to a scheduled resource and the slot whose
    /// storage backs it. History lookups land in the previous slot.
    fn lookup(&self, name: &str, history: bool) -> Option<(ResourceIndex, usize)> {
        let id = self.registry.find_resource(name)?;
        let canonical = self.resolver.resolve(id);
        let index = self
            .mapping
            .resource(canonical, self.multiplexing_index, history)?;
        if history {
            let main = self.graph.resources[index].history_of?;
            Some((main, self.prev_slot))
        } else {
            Some((index, self.curr_slot))
        }
    }

    /// Which multiplexed copy of the node is executing.
    pub fn multiplexing_index(&self) -> MultiplexingIndex {
        self.multiplexing_index
    }

    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        let (resource, slot) = self.lookup(name, false)?;
        self.scheduler.get_texture(slot, resource)
    }

    /// Last frame's contents of a history texture.
    pub fn history_texture(&self, name: &str) -> Option<TextureHandle> {
        let (resource, slot) = self.lookup(name, true)?;
        self.scheduler.get_texture(slot, resource)
    }

    pub fn buffer(&self, name: &str) -> Option<BufferHandle> {
        let (resource, slot) = self.lookup(name, false)?;
        self.scheduler.get_buffer(slot, resource)
    }

    /// Last frame's contents of a history buffer.
    pub fn history_buffer(&self, name: &str) -> Option<BufferHandle> {
        let (resource, slot) = self.lookup(name, true)?;
        self.scheduler.get_buffer(slot, resource)
    }

    pub fn blob(&self, name: &str) -> Option<&[u8]> {
        let (resource, slot) = self.lookup(name, false)?;
        self.scheduler.get_blob(slot, resource)
    }

    pub fn blob_mut(&mut self, name: &str) -> Option<&mut [u8]> {
        let (resource, slot) = self.lookup(name, false)?;
        self.scheduler.get_blob_mut(slot, resource)
    }

    /// Last frame's contents of a history blob.
    pub fn history_blob(&self, name: &str) -> Option<&[u8]> {
        let (resource, slot) = self.lookup(name, true)?;
        self.scheduler.get_blob(slot, resource)
    }
}

fn apply_event(
    device: &dyn Device,
    graph: &Graph,
    scheduler: &mut dyn ResourceScheduler,
    slot: usize,
    event: &ResourceEvent,
) {
    let description = &graph.resources[event.resource].description;
    match (event.kind, description) {
        (ResourceEventKind::Activate(activation), ResourceDescription::Texture(_)) => {
            if let Some(handle) = scheduler.get_texture(slot, event.resource) {
                device.activate_texture(handle, activation);
            }
        }
        (ResourceEventKind::Activate(activation), ResourceDescription::Buffer(_)) => {
            if let Some(handle) = scheduler.get_buffer(slot, event.resource) {
                device.activate_buffer(handle, activation);
            }
        }
        (ResourceEventKind::Activate(activation), ResourceDescription::Blob(_)) => {
            scheduler.activate_blob(slot, event.resource, activation);
        }
        (ResourceEventKind::Barrier(transition), ResourceDescription::Texture(_)) => {
            if let Some(handle) = scheduler.get_texture(slot, event.resource) {
                device.resource_barrier(RawResource::Texture(handle), &transition);
            }
        }
        (ResourceEventKind::Barrier(transition), ResourceDescription::Buffer(_)) => {
            if let Some(handle) = scheduler.get_buffer(slot, event.resource) {
                device.resource_barrier(RawResource::Buffer(handle), &transition);
            }
        }
        (ResourceEventKind::Barrier(_), ResourceDescription::Blob(_)) => {}
        (ResourceEventKind::Deactivate, ResourceDescription::Texture(_)) => {
            if let Some(handle) = scheduler.get_texture(slot, event.resource) {
                device.deactivate_texture(handle);
            }
        }
        (ResourceEventKind::Deactivate, ResourceDescription::Buffer(_)) => {
            if let Some(handle) = scheduler.get_buffer(slot, event.resource) {
                device.deactivate_buffer(handle);
            }
        }
        (ResourceEventKind::Deactivate, ResourceDescription::Blob(_)) => {}
    }
}

/// Execute one frame: apply events in position order and run every node
/// callback in the scheduled order.
#[allow(clippy::too_many_arguments)]
pub fn execute_frame(
    device: &dyn Device,
    registry: &mut Registry,
    resolver: &NameResolver,
    graph: &Graph,
    mapping: &Mapping,
    permutation: &NodePermutation,
    events: &[ResourceEvent],
    scheduler: &mut dyn ResourceScheduler,
    curr_slot: usize,
    prev_slot: usize,
) {
    let mut next_event = 0;
    for position in 0..=permutation.len() {
        while next_event < events.len() && events[next_event].position == position {
            apply_event(device, graph, scheduler, curr_slot, &events[next_event]);
            next_event += 1;
        }
        if position == permutation.len() {
            break;
        }

        let node = permutation.order()[position];
        let frontend_node = graph.nodes[node].frontend_node;
        let Some(mut callback) = registry.nodes[frontend_node].execute.take() else {
            log::error!(
                "node '{}' has no execution callback",
                registry.node_name(frontend_node)
            );
            continue;
        };
        let mut context = ExecutionContext {
            registry,
            resolver,
            mapping,
            graph,
            scheduler,
            multiplexing_index: graph.nodes[node].multiplexing_index,
            curr_slot,
            prev_slot,
        };
        callback(&mut context);
        registry.nodes[frontend_node].execute = Some(callback);
    }
}
