//! Physical resource scheduling.
//!
//! Assigns device storage to every IR resource and emits the event stream
//! the executor replays each frame: activations before a resource's first
//! use, barriers between state changes, deactivations after the last use.
//!
//! Resources are scheduled separately for each slot of a fixed frame
//! window so that history reads can target the previous slot's storage
//! while the current slot is being overwritten.
//!
//! Two strategies implement the same trait: [`NativeHeapScheduler`] packs
//! resources into device memory heaps with lifetime-based aliasing, and
//! [`PoolScheduler`] hands out pooled standalone resources for devices
//! without heap support. The strategy is picked once at runtime startup
//! and never changes.

pub mod native;
pub mod pool;

pub use native::NativeHeapScheduler;
pub use pool::PoolScheduler;

use std::collections::{HashMap, HashSet};
use std::mem;

use arclight_core::ids::IdIndexedVec;
use static_assertions::const_assert;

use crate::backend::node_scheduler::NodePermutation;
use crate::backend::state_delta::StateDeltas;
use crate::device::{BufferHandle, DeviceError, TextureHandle};
use crate::frontend::multiplexing::MultiplexingIndex;
use crate::frontend::registry::ResNameId;
use crate::intermediate::{Graph, ResourceIndex};
use crate::types::{Activation, History, ResourceDescription, StateTransition};

/// Number of frame slots resources are scheduled for. Slot `frame % 2`
/// holds the current frame's storage while the other slot still holds
/// last frame's, which is what history reads consume.
pub const SCHEDULE_FRAME_WINDOW: usize = 2;
const_assert!(SCHEDULE_FRAME_WINDOW >= 2);

/// What happens to a resource at one point of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResourceEventKind {
    /// Bring the storage into a defined state.
    Activate(Activation),
    /// Transition between two usages.
    Barrier(StateTransition),
    /// The scheduled lifetime ended; aliased storage may be reused.
    Deactivate,
}

impl ResourceEventKind {
    /// Replay order within one position: deactivations free aliased
    /// storage before activations claim it, barriers run last.
    fn rank(&self) -> u8 {
        match self {
            Self::Deactivate => 0,
            Self::Activate(_) => 1,
            Self::Barrier(_) => 2,
        }
    }
}

/// One entry of the per-frame event stream.
///
/// The event fires before the node at `position` executes; events at
/// position `order.len()` fire after the last node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceEvent {
    pub position: usize,
    pub resource: ResourceIndex,
    pub kind: ResourceEventKind,
}

/// Assigns storage and produces events for one frame slot.
pub trait ResourceScheduler {
    /// Reschedule every resource of `graph` for `slot` and build the
    /// event stream replayed on frames executing that slot.
    fn schedule_resources(
        &mut self,
        slot: usize,
        graph: &Graph,
        permutation: &NodePermutation,
        deltas: &StateDeltas,
    ) -> Result<Vec<ResourceEvent>, DeviceError>;

    /// Whether the storage and contents of `resource` survived the most
    /// recent rescheduling of `slot`. Preserved history resources skip
    /// re-initialization.
    fn is_resource_preserved(&self, slot: usize, resource: ResourceIndex) -> bool;

    /// Device texture backing a scheduled resource.
    fn get_texture(&self, slot: usize, resource: ResourceIndex) -> Option<TextureHandle>;

    /// Device buffer backing a scheduled resource.
    fn get_buffer(&self, slot: usize, resource: ResourceIndex) -> Option<BufferHandle>;

    /// CPU blob backing a scheduled resource.
    fn get_blob(&self, slot: usize, resource: ResourceIndex) -> Option<&[u8]>;

    /// Mutable CPU blob backing a scheduled resource.
    fn get_blob_mut(&mut self, slot: usize, resource: ResourceIndex) -> Option<&mut [u8]>;

    /// Activation for CPU blobs: zero the storage when requested.
    fn activate_blob(&mut self, slot: usize, resource: ResourceIndex, activation: Activation);

    /// Apply new sizes to auto-resolution textures in place, without a
    /// full reschedule.
    fn resize_textures(&mut self, slot: usize, resizes: &[(ResourceIndex, (u32, u32))]);

    /// Destroy all storage scheduled for `slot`.
    fn shutdown(&mut self, slot: usize);
}

/// First and last execution positions touching a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lifetime {
    pub first: usize,
    pub last: usize,
}

impl Lifetime {
    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// Scheduled lifetimes of all non-history-twin resources.
///
/// Resources with a history policy live for the whole frame and keep
/// their contents afterwards, so they never alias with anything.
pub(crate) fn resource_lifetimes(
    graph: &Graph,
    permutation: &NodePermutation,
) -> IdIndexedVec<ResourceIndex, Option<Lifetime>> {
    let mut lifetimes: IdIndexedVec<ResourceIndex, Option<Lifetime>> = IdIndexedVec::new();
    lifetimes.resize(graph.resources.len(), None);

    for &node in permutation.order() {
        let position = permutation.position(node);
        for request in &graph.nodes[node].requests {
            if request.last_frame {
                continue;
            }
            let slot = &mut lifetimes[request.resource];
            match slot {
                None => {
                    *slot = Some(Lifetime {
                        first: position,
                        last: position,
                    })
                }
                Some(lifetime) => {
                    lifetime.first = lifetime.first.min(position);
                    lifetime.last = lifetime.last.max(position);
                }
            }
        }
    }

    for id in graph.resources.ids() {
        if graph.resources[id].history_of.is_some() {
            continue;
        }
        if graph.resources[id].history != History::No {
            if let Some(lifetime) = &mut lifetimes[id] {
                lifetime.first = 0;
                lifetime.last = permutation.len();
            }
        }
    }
    lifetimes
}

/// Build the slot's event stream from lifetimes and state deltas.
///
/// History resources get no per-frame activation or deactivation; their
/// storage is initialized once and then carried from frame to frame.
pub(crate) fn compute_events(
    graph: &Graph,
    permutation: &NodePermutation,
    deltas: &StateDeltas,
) -> Vec<ResourceEvent> {
    let lifetimes = resource_lifetimes(graph, permutation);
    let mut events = Vec::new();

    for id in graph.resources.ids() {
        let Some(lifetime) = lifetimes[id] else {
            continue;
        };
        if graph.resources[id].history != History::No {
            continue;
        }
        events.push(ResourceEvent {
            position: lifetime.first,
            resource: id,
            kind: ResourceEventKind::Activate(Activation::Discard),
        });
        events.push(ResourceEvent {
            position: lifetime.last + 1,
            resource: id,
            kind: ResourceEventKind::Deactivate,
        });
    }

    for position in 0..deltas.len() {
        for &(resource, transition) in &deltas.at(position).transitions {
            events.push(ResourceEvent {
                position,
                resource,
                kind: ResourceEventKind::Barrier(transition),
            });
        }
    }

    events.sort_by_key(|e| (e.position, e.kind.rank()));
    events
}

/// Linear arena backing CPU blob resources of one frame slot.
#[derive(Debug, Default)]
pub(crate) struct BlobArena {
    data: Vec<u8>,
    ranges: HashMap<ResourceIndex, (usize, usize)>,
    keyed: HashMap<(ResNameId, MultiplexingIndex), (usize, usize)>,
}

impl BlobArena {
    /// Lay out all blob resources of `graph`. When `preserve_history` is
    /// set, contents of history blobs that also existed in the previous
    /// layout are carried over; the returned set holds their indices.
    pub fn schedule(
        &mut self,
        graph: &Graph,
        preserve_history: bool,
    ) -> HashSet<ResourceIndex> {
        let old_data = mem::take(&mut self.data);
        let old_keyed = mem::take(&mut self.keyed);
        self.ranges.clear();

        let mut cursor = 0usize;
        let mut history_blobs = Vec::new();
        for id in graph.resources.ids() {
            let res = &graph.resources[id];
            if res.history_of.is_some() {
                continue;
            }
            let ResourceDescription::Blob(desc) = res.description else {
                continue;
            };
            let align = desc.align.max(1);
            cursor = cursor.div_ceil(align) * align;
            let range = (cursor, desc.size);
            cursor += desc.size;
            self.ranges.insert(id, range);
            let key = (res.frontend_resource, res.multiplexing_index);
            self.keyed.insert(key, range);
            if res.history != History::No {
                history_blobs.push((id, key, range));
            }
        }
        self.data = vec![0; cursor];

        let mut preserved = HashSet::new();
        if preserve_history {
            for (id, key, (offset, size)) in history_blobs {
                let Some(&(old_offset, old_size)) = old_keyed.get(&key) else {
                    continue;
                };
                if old_size != size {
                    continue;
                }
                self.data[offset..offset + size]
                    .copy_from_slice(&old_data[old_offset..old_offset + old_size]);
                preserved.insert(id);
            }
        }
        preserved
    }

    pub fn get(&self, resource: ResourceIndex) -> Option<&[u8]> {
        let &(offset, size) = self.ranges.get(&resource)?;
        Some(&self.data[offset..offset + size])
    }

    pub fn get_mut(&mut self, resource: ResourceIndex) -> Option<&mut [u8]> {
        let &(offset, size) = self.ranges.get(&resource)?;
        Some(&mut self.data[offset..offset + size])
    }

    pub fn zero(&mut self, resource: ResourceIndex) {
        if let Some(blob) = self.get_mut(resource) {
            blob.fill(0);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.ranges.clear();
        self.keyed.clear();
    }
}
