//! Null device for testing and development.
//!
//! Performs no GPU work but tracks live handles and records every call,
//! so tests can assert on the exact barrier/activation traffic the frame
//! graph produces.

use parking_lot::Mutex;

use crate::types::{Activation, BufferDescription, StateTransition, TextureDescription};

use super::{BufferHandle, Device, DeviceError, HeapHandle, RawResource, TextureHandle};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// `create_texture` or `place_texture`.
    CreateTexture(TextureHandle),
    /// `create_buffer` or `place_buffer`.
    CreateBuffer(BufferHandle),
    /// `destroy_texture`.
    DestroyTexture(TextureHandle),
    /// `destroy_buffer`.
    DestroyBuffer(BufferHandle),
    /// `create_heap` with the heap size.
    CreateHeap(HeapHandle, u64),
    /// `destroy_heap`.
    DestroyHeap(HeapHandle),
    /// `activate_texture`.
    ActivateTexture(TextureHandle, Activation),
    /// `activate_buffer`.
    ActivateBuffer(BufferHandle, Activation),
    /// `deactivate_texture`.
    DeactivateTexture(TextureHandle),
    /// `deactivate_buffer`.
    DeactivateBuffer(BufferHandle),
    /// `resource_barrier`.
    Barrier(RawResource, StateTransition),
}

#[derive(Debug, Default)]
struct NullDeviceState {
    next_handle: u64,
    live_textures: Vec<TextureHandle>,
    live_buffers: Vec<BufferHandle>,
    live_heaps: Vec<(HeapHandle, u64)>,
    calls: Vec<DeviceCall>,
}

impl NullDeviceState {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Device implementation that records calls instead of executing them.
#[derive(Debug)]
pub struct NullDevice {
    supports_heaps: bool,
    state: Mutex<NullDeviceState>,
}

impl NullDevice {
    /// Create a null device. `supports_heaps` selects which resource
    /// scheduler strategy the runtime will pick.
    pub fn new(supports_heaps: bool) -> Self {
        Self {
            supports_heaps,
            state: Mutex::new(NullDeviceState::default()),
        }
    }

    /// Snapshot of all recorded calls, in order.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Drop the recorded call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of recorded barrier calls.
    pub fn barrier_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, DeviceCall::Barrier(..)))
            .count()
    }

    /// Number of currently live (created, not destroyed) textures.
    pub fn live_texture_count(&self) -> usize {
        self.state.lock().live_textures.len()
    }

    /// Number of currently live heaps.
    pub fn live_heap_count(&self) -> usize {
        self.state.lock().live_heaps.len()
    }
}

impl Device for NullDevice {
    fn supports_heaps(&self) -> bool {
        self.supports_heaps
    }

    fn create_texture(&self, desc: &TextureDescription) -> Result<TextureHandle, DeviceError> {
        let mut state = self.state.lock();
        let handle = TextureHandle(state.next());
        log::trace!(
            "NullDevice: create_texture {}x{} -> {:?}",
            desc.width,
            desc.height,
            handle
        );
        state.live_textures.push(handle);
        state.calls.push(DeviceCall::CreateTexture(handle));
        Ok(handle)
    }

    fn create_buffer(&self, desc: &BufferDescription) -> Result<BufferHandle, DeviceError> {
        let mut state = self.state.lock();
        let handle = BufferHandle(state.next());
        log::trace!("NullDevice: create_buffer {}B -> {:?}", desc.size, handle);
        state.live_buffers.push(handle);
        state.calls.push(DeviceCall::CreateBuffer(handle));
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.lock();
        state.live_textures.retain(|&t| t != texture);
        state.calls.push(DeviceCall::DestroyTexture(texture));
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.live_buffers.retain(|&b| b != buffer);
        state.calls.push(DeviceCall::DestroyBuffer(buffer));
    }

    fn create_heap(&self, size: u64) -> Result<HeapHandle, DeviceError> {
        let mut state = self.state.lock();
        let handle = HeapHandle(state.next());
        log::trace!("NullDevice: create_heap {}B -> {:?}", size, handle);
        state.live_heaps.push((handle, size));
        state.calls.push(DeviceCall::CreateHeap(handle, size));
        Ok(handle)
    }

    fn destroy_heap(&self, heap: HeapHandle) {
        let mut state = self.state.lock();
        state.live_heaps.retain(|&(h, _)| h != heap);
        state.calls.push(DeviceCall::DestroyHeap(heap));
    }

    fn place_texture(
        &self,
        heap: HeapHandle,
        offset: u64,
        desc: &TextureDescription,
    ) -> Result<TextureHandle, DeviceError> {
        let mut state = self.state.lock();
        let capacity = state
            .live_heaps
            .iter()
            .find(|&&(h, _)| h == heap)
            .map(|&(_, size)| size)
            .ok_or(DeviceError::UnknownHandle)?;
        let size = desc.byte_size();
        if offset + size > capacity {
            return Err(DeviceError::PlacementOutOfBounds {
                offset,
                size,
                capacity,
            });
        }
        let handle = TextureHandle(state.next());
        state.live_textures.push(handle);
        state.calls.push(DeviceCall::CreateTexture(handle));
        Ok(handle)
    }

    fn place_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        desc: &BufferDescription,
    ) -> Result<BufferHandle, DeviceError> {
        let mut state = self.state.lock();
        let capacity = state
            .live_heaps
            .iter()
            .find(|&&(h, _)| h == heap)
            .map(|&(_, size)| size)
            .ok_or(DeviceError::UnknownHandle)?;
        if offset + desc.size > capacity {
            return Err(DeviceError::PlacementOutOfBounds {
                offset,
                size: desc.size,
                capacity,
            });
        }
        let handle = BufferHandle(state.next());
        state.live_buffers.push(handle);
        state.calls.push(DeviceCall::CreateBuffer(handle));
        Ok(handle)
    }

    fn activate_texture(&self, texture: TextureHandle, activation: Activation) {
        self.state
            .lock()
            .calls
            .push(DeviceCall::ActivateTexture(texture, activation));
    }

    fn activate_buffer(&self, buffer: BufferHandle, activation: Activation) {
        self.state
            .lock()
            .calls
            .push(DeviceCall::ActivateBuffer(buffer, activation));
    }

    fn deactivate_texture(&self, texture: TextureHandle) {
        self.state
            .lock()
            .calls
            .push(DeviceCall::DeactivateTexture(texture));
    }

    fn deactivate_buffer(&self, buffer: BufferHandle) {
        self.state
            .lock()
            .calls
            .push(DeviceCall::DeactivateBuffer(buffer));
    }

    fn resource_barrier(&self, resource: RawResource, transition: &StateTransition) {
        self.state
            .lock()
            .calls
            .push(DeviceCall::Barrier(resource, *transition));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureFormat;

    #[test]
    fn test_handles_are_unique() {
        let device = NullDevice::new(false);
        let a = device
            .create_texture(&TextureDescription::new_2d(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let b = device
            .create_texture(&TextureDescription::new_2d(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(device.live_texture_count(), 2);
    }

    #[test]
    fn test_destroy_removes_live_handle() {
        let device = NullDevice::new(false);
        let tex = device
            .create_texture(&TextureDescription::new_2d(4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        device.destroy_texture(tex);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_placement_out_of_bounds() {
        let device = NullDevice::new(true);
        let heap = device.create_heap(64).unwrap();
        let desc = TextureDescription::new_2d(16, 16, TextureFormat::Rgba8Unorm);
        let err = device.place_texture(heap, 0, &desc).unwrap_err();
        assert!(matches!(err, DeviceError::PlacementOutOfBounds { .. }));
    }

    #[test]
    fn test_call_log_records_barriers() {
        use crate::types::{ResourceUsage, StageFlags, StateTransition, UsageKind};

        let device = NullDevice::new(false);
        let buf = device.create_buffer(&BufferDescription::new(16)).unwrap();
        device.resource_barrier(
            RawResource::Buffer(buf),
            &StateTransition {
                from: None,
                to: ResourceUsage::read(UsageKind::ShaderResource, StageFlags::COMPUTE),
            },
        );
        assert_eq!(device.barrier_count(), 1);
    }
}
