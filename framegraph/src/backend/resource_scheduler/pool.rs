//! Pooled resource scheduler for devices without heap support.
//!
//! Every resource is a standalone device allocation. Transient resources
//! with disjoint lifetimes reuse pooled allocations of the same
//! description; history resources get exclusive allocations that are
//! carried across reschedules whenever the description still matches, so
//! their contents survive graph recompilation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::node_scheduler::NodePermutation;
use crate::backend::state_delta::StateDeltas;
use crate::device::{BufferHandle, Device, DeviceError, TextureHandle};
use crate::frontend::multiplexing::MultiplexingIndex;
use crate::frontend::registry::ResNameId;
use crate::intermediate::{Graph, ResourceIndex};
use crate::types::{
    Activation, BufferDescription, History, ResourceDescription, TextureDescription,
};

use super::{
    compute_events, resource_lifetimes, BlobArena, ResourceEvent, ResourceScheduler,
    SCHEDULE_FRAME_WINDOW,
};

type ResourceKey = (ResNameId, MultiplexingIndex);

#[derive(Default)]
struct SlotState {
    textures: HashMap<ResourceIndex, TextureHandle>,
    buffers: HashMap<ResourceIndex, BufferHandle>,
    texture_descs: HashMap<ResourceIndex, TextureDescription>,
    kept_textures: HashMap<ResourceKey, (TextureDescription, TextureHandle)>,
    kept_buffers: HashMap<ResourceKey, (BufferDescription, BufferHandle)>,
    transient_textures: Vec<TextureHandle>,
    transient_buffers: Vec<BufferHandle>,
    preserved: HashSet<ResourceIndex>,
    blobs: BlobArena,
}

/// Scheduler strategy built on standalone pooled allocations.
pub struct PoolScheduler {
    device: Arc<dyn Device>,
    slots: Vec<SlotState>,
}

impl PoolScheduler {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            slots: (0..SCHEDULE_FRAME_WINDOW)
                .map(|_| SlotState::default())
                .collect(),
        }
    }

    fn destroy_transients(&mut self, slot: usize) {
        let state = &mut self.slots[slot];
        for handle in state.transient_textures.drain(..) {
            self.device.destroy_texture(handle);
        }
        for handle in state.transient_buffers.drain(..) {
            self.device.destroy_buffer(handle);
        }
        state.textures.clear();
        state.buffers.clear();
        state.texture_descs.clear();
        state.preserved.clear();
    }
}

impl ResourceScheduler for PoolScheduler {
    fn schedule_resources(
        &mut self,
        slot: usize,
        graph: &Graph,
        permutation: &NodePermutation,
        deltas: &StateDeltas,
    ) -> Result<Vec<ResourceEvent>, DeviceError> {
        self.destroy_transients(slot);
        let mut old_kept_textures = std::mem::take(&mut self.slots[slot].kept_textures);
        let mut old_kept_buffers = std::mem::take(&mut self.slots[slot].kept_buffers);

        let lifetimes = resource_lifetimes(graph, permutation);
        let mut entries: Vec<ResourceIndex> = graph
            .resources
            .ids()
            .filter(|&id| {
                lifetimes[id].is_some()
                    && !matches!(graph.resources[id].description, ResourceDescription::Blob(_))
            })
            .collect();
        entries.sort_by_key(|&id| (lifetimes[id].map(|l| l.first).unwrap_or(0), id));

        // Pools of transient allocations, keyed by description and tagged
        // with the position after which they become free again.
        let mut texture_pool: HashMap<TextureDescription, Vec<(usize, TextureHandle)>> =
            HashMap::new();
        let mut buffer_pool: HashMap<BufferDescription, Vec<(usize, BufferHandle)>> =
            HashMap::new();

        for id in entries {
            let res = &graph.resources[id];
            let Some(lifetime) = lifetimes[id] else {
                continue;
            };
            let key = (res.frontend_resource, res.multiplexing_index);
            match res.description {
                ResourceDescription::Texture(desc) => {
                    let handle = if res.history != History::No {
                        match old_kept_textures.remove(&key) {
                            Some((old_desc, handle)) if old_desc == desc => {
                                self.slots[slot].preserved.insert(id);
                                handle
                            }
                            stale => {
                                if let Some((_, handle)) = stale {
                                    self.device.destroy_texture(handle);
                                }
                                self.device.create_texture(&desc)?
                            }
                        }
                    } else {
                        let pool = texture_pool.entry(desc).or_default();
                        match pool.iter_mut().find(|(free_after, _)| *free_after <= lifetime.first) {
                            Some(entry) => {
                                entry.0 = lifetime.last + 1;
                                entry.1
                            }
                            None => {
                                let handle = self.device.create_texture(&desc)?;
                                pool.push((lifetime.last + 1, handle));
                                self.slots[slot].transient_textures.push(handle);
                                handle
                            }
                        }
                    };
                    let state = &mut self.slots[slot];
                    state.textures.insert(id, handle);
                    state.texture_descs.insert(id, desc);
                    if res.history != History::No {
                        state.kept_textures.insert(key, (desc, handle));
                    }
                }
                ResourceDescription::Buffer(desc) => {
                    let handle = if res.history != History::No {
                        match old_kept_buffers.remove(&key) {
                            Some((old_desc, handle)) if old_desc == desc => {
                                self.slots[slot].preserved.insert(id);
                                handle
                            }
                            stale => {
                                if let Some((_, handle)) = stale {
                                    self.device.destroy_buffer(handle);
                                }
                                self.device.create_buffer(&desc)?
                            }
                        }
                    } else {
                        let pool = buffer_pool.entry(desc).or_default();
                        match pool.iter_mut().find(|(free_after, _)| *free_after <= lifetime.first) {
                            Some(entry) => {
                                entry.0 = lifetime.last + 1;
                                entry.1
                            }
                            None => {
                                let handle = self.device.create_buffer(&desc)?;
                                pool.push((lifetime.last + 1, handle));
                                self.slots[slot].transient_buffers.push(handle);
                                handle
                            }
                        }
                    };
                    let state = &mut self.slots[slot];
                    state.buffers.insert(id, handle);
                    if res.history != History::No {
                        state.kept_buffers.insert(key, (desc, handle));
                    }
                }
                ResourceDescription::Blob(_) => {}
            }
        }

        // History resources that disappeared from the graph.
        for (_, (_, handle)) in old_kept_textures.drain() {
            self.device.destroy_texture(handle);
        }
        for (_, (_, handle)) in old_kept_buffers.drain() {
            self.device.destroy_buffer(handle);
        }

        let preserved_blobs = self.slots[slot].blobs.schedule(graph, true);
        self.slots[slot].preserved.extend(preserved_blobs);

        log::debug!(
            "slot {}: pooled {} textures, {} buffers ({} preserved)",
            slot,
            self.slots[slot].textures.len(),
            self.slots[slot].buffers.len(),
            self.slots[slot].preserved.len()
        );
        Ok(compute_events(graph, permutation, deltas))
    }

    fn is_resource_preserved(&self, slot: usize, resource: ResourceIndex) -> bool {
        self.slots[slot].preserved.contains(&resource)
    }

    fn get_texture(&self, slot: usize, resource: ResourceIndex) -> Option<TextureHandle> {
        self.slots[slot].textures.get(&resource).copied()
    }

    fn get_buffer(&self, slot: usize, resource: ResourceIndex) -> Option<BufferHandle> {
        self.slots[slot].buffers.get(&resource).copied()
    }

    fn get_blob(&self, slot: usize, resource: ResourceIndex) -> Option<&[u8]> {
        self.slots[slot].blobs.get(resource)
    }

    fn get_blob_mut(&mut self, slot: usize, resource: ResourceIndex) -> Option<&mut [u8]> {
        self.slots[slot].blobs.get_mut(resource)
    }

    fn activate_blob(&mut self, slot: usize, resource: ResourceIndex, activation: Activation) {
        if activation == Activation::ClearToZero {
            self.slots[slot].blobs.zero(resource);
        }
    }

    fn resize_textures(&mut self, slot: usize, resizes: &[(ResourceIndex, (u32, u32))]) {
        for &(resource, (width, height)) in resizes {
            let Some(&desc) = self.slots[slot].texture_descs.get(&resource) else {
                continue;
            };
            let mut resized = desc;
            resized.width = width;
            resized.height = height;
            match self.device.create_texture(&resized) {
                Ok(handle) => {
                    // The previous allocation stays in the transient list
                    // and is destroyed on the next reschedule.
                    let state = &mut self.slots[slot];
                    state.textures.insert(resource, handle);
                    state.transient_textures.push(handle);
                }
                Err(err) => log::error!("failed to create resized texture: {}", err),
            }
        }
    }

    fn shutdown(&mut self, slot: usize) {
        self.destroy_transients(slot);
        let state = &mut self.slots[slot];
        for (_, (_, handle)) in state.kept_textures.drain() {
            self.device.destroy_texture(handle);
        }
        for (_, (_, handle)) in state.kept_buffers.drain() {
            self.device.destroy_buffer(handle);
        }
        state.blobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arclight_core::ids::TypedId;
    use crate::backend::node_scheduler::schedule_into;
    use crate::backend::state_delta::calculate_into;
    use crate::device::NullDevice;
    use crate::frontend::registry::NodeNameId;
    use crate::intermediate::{Node, NodeIndex, Request, Resource};
    use crate::types::{ResourceUsage, StageFlags, TextureFormat, UsageKind};

    fn texture(index: usize, history: History) -> Resource {
        Resource {
            frontend_resource: ResNameId::from_index(index),
            multiplexing_index: MultiplexingIndex::from_index(0),
            description: ResourceDescription::Texture(TextureDescription::new_2d(
                8,
                8,
                TextureFormat::Rgba8Unorm,
            )),
            history,
            resolution: None,
            history_of: None,
        }
    }

    fn node(index: usize, predecessors: Vec<NodeIndex>, requests: Vec<Request>) -> Node {
        Node {
            frontend_node: NodeNameId::from_index(index),
            multiplexing_index: MultiplexingIndex::from_index(0),
            predecessors,
            requests,
        }
    }

    fn write_request(resource: ResourceIndex) -> Request {
        Request {
            resource,
            usage: ResourceUsage::write(UsageKind::RenderTarget, StageFlags::POST_RASTER),
            last_frame: false,
        }
    }

    fn schedule(scheduler: &mut PoolScheduler, graph: &Graph) {
        let mut permutation = NodePermutation::default();
        schedule_into(graph, &mut permutation, |_, _| {});
        let mut deltas = StateDeltas::default();
        calculate_into(graph, &permutation, &mut deltas);
        scheduler
            .schedule_resources(0, graph, &permutation, &deltas)
            .unwrap();
    }

    #[test]
    fn test_disjoint_transients_share_pooled_texture() {
        let mut graph = Graph::default();
        let a = graph.resources.push(texture(0, History::No));
        let b = graph.resources.push(texture(1, History::No));
        let first = graph.nodes.push(node(0, vec![], vec![write_request(a)]));
        graph.nodes.push(node(1, vec![first], vec![write_request(b)]));

        let device = Arc::new(NullDevice::new(false));
        let mut scheduler = PoolScheduler::new(device.clone());
        schedule(&mut scheduler, &graph);

        assert_eq!(device.live_texture_count(), 1);
        assert_eq!(
            scheduler.get_texture(0, a).unwrap(),
            scheduler.get_texture(0, b).unwrap()
        );
    }

    #[test]
    fn test_history_texture_survives_reschedule() {
        let mut graph = Graph::default();
        let a = graph
            .resources
            .push(texture(0, History::DiscardOnFirstFrame));
        graph.nodes.push(node(0, vec![], vec![write_request(a)]));

        let device = Arc::new(NullDevice::new(false));
        let mut scheduler = PoolScheduler::new(device);
        schedule(&mut scheduler, &graph);
        let before = scheduler.get_texture(0, a).unwrap();
        assert!(!scheduler.is_resource_preserved(0, a));

        schedule(&mut scheduler, &graph);
        assert_eq!(scheduler.get_texture(0, a).unwrap(), before);
        assert!(scheduler.is_resource_preserved(0, a));
    }

    #[test]
    fn test_history_texture_not_shared_with_transients() {
        let mut graph = Graph::default();
        let a = graph
            .resources
            .push(texture(0, History::DiscardOnFirstFrame));
        let b = graph.resources.push(texture(1, History::No));
        let first = graph.nodes.push(node(0, vec![], vec![write_request(a)]));
        graph.nodes.push(node(1, vec![first], vec![write_request(b)]));

        let device = Arc::new(NullDevice::new(false));
        let mut scheduler = PoolScheduler::new(device);
        schedule(&mut scheduler, &graph);
        assert_ne!(
            scheduler.get_texture(0, a).unwrap(),
            scheduler.get_texture(0, b).unwrap()
        );
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let mut graph = Graph::default();
        let a = graph
            .resources
            .push(texture(0, History::DiscardOnFirstFrame));
        let b = graph.resources.push(texture(1, History::No));
        graph
            .nodes
            .push(node(0, vec![], vec![write_request(a), write_request(b)]));

        let device = Arc::new(NullDevice::new(false));
        let mut scheduler = PoolScheduler::new(device.clone());
        schedule(&mut scheduler, &graph);
        assert_eq!(device.live_texture_count(), 2);
        scheduler.shutdown(0);
        assert_eq!(device.live_texture_count(), 0);
    }
}
