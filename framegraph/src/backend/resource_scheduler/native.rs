//! Heap-based resource scheduler with memory aliasing.
//!
//! Packs all GPU resources of one frame slot into a single device heap.
//! Resources whose scheduled lifetimes do not overlap share the same byte
//! range; the activation/deactivation events emitted by the shared event
//! computation keep aliased usage safe. Rescheduling replaces the heap
//! contents wholesale, so nothing is ever preserved across a reschedule.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::node_scheduler::NodePermutation;
use crate::backend::state_delta::StateDeltas;
use crate::device::{BufferHandle, Device, DeviceError, HeapHandle, TextureHandle};
use crate::intermediate::{Graph, ResourceIndex};
use crate::types::{Activation, ResourceDescription, TextureDescription};

use super::{
    compute_events, resource_lifetimes, BlobArena, Lifetime, ResourceEvent, ResourceScheduler,
    SCHEDULE_FRAME_WINDOW,
};

/// Placement alignment inside a heap.
const PLACEMENT_ALIGNMENT: u64 = 256;

#[derive(Default)]
struct SlotState {
    heap: Option<(HeapHandle, u64)>,
    textures: HashMap<ResourceIndex, TextureHandle>,
    buffers: HashMap<ResourceIndex, BufferHandle>,
    offsets: HashMap<ResourceIndex, u64>,
    texture_descs: HashMap<ResourceIndex, TextureDescription>,
    blobs: BlobArena,
}

/// Scheduler strategy for devices with heap support.
pub struct NativeHeapScheduler {
    device: Arc<dyn Device>,
    slots: Vec<SlotState>,
}

impl NativeHeapScheduler {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            slots: (0..SCHEDULE_FRAME_WINDOW)
                .map(|_| SlotState::default())
                .collect(),
        }
    }

    fn destroy_placed(&mut self, slot: usize) {
        let state = &mut self.slots[slot];
        for (_, handle) in state.textures.drain() {
            self.device.destroy_texture(handle);
        }
        for (_, handle) in state.buffers.drain() {
            self.device.destroy_buffer(handle);
        }
        state.offsets.clear();
        state.texture_descs.clear();
        state.blobs.clear();
    }

    /// First-fit packing: each resource takes the lowest aligned offset
    /// that no lifetime-overlapping resource occupies.
    fn pack(entries: &[(ResourceIndex, Lifetime, u64)]) -> (Vec<(ResourceIndex, u64)>, u64) {
        struct Region {
            offset: u64,
            size: u64,
            lifetime: Lifetime,
        }
        let mut regions: Vec<Region> = Vec::new();
        let mut assignments = Vec::with_capacity(entries.len());
        let mut heap_size = 0u64;

        for &(id, lifetime, size) in entries {
            let mut conflicts: Vec<&Region> = regions
                .iter()
                .filter(|r| r.lifetime.overlaps(&lifetime))
                .collect();
            conflicts.sort_by_key(|r| r.offset);

            let mut offset = 0u64;
            for conflict in conflicts {
                if offset + size <= conflict.offset {
                    break;
                }
                offset = offset.max(conflict.offset + conflict.size);
                offset = offset.div_ceil(PLACEMENT_ALIGNMENT) * PLACEMENT_ALIGNMENT;
            }
            regions.push(Region {
                offset,
                size,
                lifetime,
            });
            assignments.push((id, offset));
            heap_size = heap_size.max(offset + size);
        }
        (assignments, heap_size)
    }
}

impl ResourceScheduler for NativeHeapScheduler {
    fn schedule_resources(
        &mut self,
        slot: usize,
        graph: &Graph,
        permutation: &NodePermutation,
        deltas: &StateDeltas,
    ) -> Result<Vec<ResourceEvent>, DeviceError> {
        self.destroy_placed(slot);

        let lifetimes = resource_lifetimes(graph, permutation);
        let mut entries: Vec<(ResourceIndex, Lifetime, u64)> = Vec::new();
        for id in graph.resources.ids() {
            let Some(lifetime) = lifetimes[id] else {
                continue;
            };
            let description = &graph.resources[id].description;
            if matches!(description, ResourceDescription::Blob(_)) {
                continue;
            }
            let size = description
                .byte_size()
                .div_ceil(PLACEMENT_ALIGNMENT)
                * PLACEMENT_ALIGNMENT;
            entries.push((id, lifetime, size));
        }
        entries.sort_by_key(|&(id, lifetime, _)| (lifetime.first, id));
        let (assignments, heap_size) = Self::pack(&entries);

        // Grow the heap when needed; a big enough heap is kept as is.
        let heap = match self.slots[slot].heap {
            Some((heap, size)) if size >= heap_size => heap,
            previous => {
                if let Some((old, _)) = previous {
                    self.device.destroy_heap(old);
                    self.slots[slot].heap = None;
                }
                let heap = self.device.create_heap(heap_size.max(1))?;
                self.slots[slot].heap = Some((heap, heap_size.max(1)));
                heap
            }
        };

        for (id, offset) in assignments {
            match graph.resources[id].description {
                ResourceDescription::Texture(desc) => {
                    let handle = self.device.place_texture(heap, offset, &desc)?;
                    let state = &mut self.slots[slot];
                    state.textures.insert(id, handle);
                    state.texture_descs.insert(id, desc);
                    state.offsets.insert(id, offset);
                }
                ResourceDescription::Buffer(desc) => {
                    let handle = self.device.place_buffer(heap, offset, &desc)?;
                    let state = &mut self.slots[slot];
                    state.buffers.insert(id, handle);
                    state.offsets.insert(id, offset);
                }
                ResourceDescription::Blob(_) => {}
            }
        }
        self.slots[slot].blobs.schedule(graph, false);

        log::debug!(
            "slot {}: placed {} resources into a {}B heap",
            slot,
            self.slots[slot].offsets.len(),
            heap_size
        );
        Ok(compute_events(graph, permutation, deltas))
    }

    fn is_resource_preserved(&self, _slot: usize, _resource: ResourceIndex) -> bool {
        // Rescheduling rebuilds the whole heap layout.
        false
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
            let state = &self.slots[slot];
            let (Some(&old_handle), Some(&desc), Some(&offset), Some(&(heap, _))) = (
                state.textures.get(&resource),
                state.texture_descs.get(&resource),
                state.offsets.get(&resource),
                state.heap.as_ref(),
            ) else {
                continue;
            };
            let mut resized = desc;
            resized.width = width;
            resized.height = height;
            // A dynamic resolution only ever shrinks below the scheduled
            // maximum, so the new texture fits the old placement.
            if resized.byte_size() > desc.byte_size() {
                log::error!(
                    "dynamic resolution {}x{} exceeds the scheduled extent, skipping",
                    width,
                    height
                );
                continue;
            }
            self.device.destroy_texture(old_handle);
            match self.device.place_texture(heap, offset, &resized) {
                Ok(handle) => {
                    self.slots[slot].textures.insert(resource, handle);
                }
                Err(err) => {
                    log::error!("failed to re-place resized texture: {}", err);
                    self.slots[slot].textures.remove(&resource);
                }
            }
        }
    }

    fn shutdown(&mut self, slot: usize) {
        self.destroy_placed(slot);
        if let Some((heap, _)) = self.slots[slot].heap.take() {
            self.device.destroy_heap(heap);
        }
    }
}
