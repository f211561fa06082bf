//! Graphics device contract consumed by the frame graph.
//!
//! The frame graph never talks to a GPU directly. It calls the primitives
//! declared here: resource creation (standalone or placed into a memory
//! heap), activation/deactivation, and state-transition barriers. Real
//! backends implement [`Device`] over their native API; [`NullDevice`]
//! records calls without touching hardware and backs the test suite.

mod null;

pub use null::{DeviceCall, NullDevice};

use thiserror::Error;

use crate::types::{Activation, BufferDescription, StateTransition, TextureDescription};

/// Opaque handle to a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Opaque handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Opaque handle to a device memory heap for placed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle(pub u64);

/// A device resource a barrier can apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawResource {
    /// A texture handle.
    Texture(TextureHandle),
    /// A buffer handle.
    Buffer(BufferHandle),
}

/// Errors reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The device could not satisfy an allocation.
    #[error("out of device memory")]
    OutOfMemory,
    /// A placed resource did not fit inside its heap.
    #[error("heap placement out of bounds: offset {offset} + size {size} > capacity {capacity}")]
    PlacementOutOfBounds {
        /// Requested byte offset.
        offset: u64,
        /// Requested resource size.
        size: u64,
        /// Heap capacity.
        capacity: u64,
    },
    /// An operation referenced a handle the device does not know.
    #[error("unknown resource handle")]
    UnknownHandle,
}

/// The device abstraction the frame graph schedules against.
///
/// All methods take `&self`; implementations use interior mutability where
/// they need it, matching how command recording works on real devices.
pub trait Device {
    /// Whether the device supports placed resources in memory heaps.
    ///
    /// Decides the resource-scheduler strategy once at startup: native
    /// heaps with aliasing when `true`, pooled standalone resources
    /// otherwise.
    fn supports_heaps(&self) -> bool;

    /// Create a standalone texture.
    fn create_texture(&self, desc: &TextureDescription) -> Result<TextureHandle, DeviceError>;

    /// Create a standalone buffer.
    fn create_buffer(&self, desc: &BufferDescription) -> Result<BufferHandle, DeviceError>;

    /// Destroy a texture.
    fn destroy_texture(&self, texture: TextureHandle);

    /// Destroy a buffer.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create a memory heap of `size` bytes for placed resources.
    fn create_heap(&self, size: u64) -> Result<HeapHandle, DeviceError>;

    /// Destroy a heap and every resource placed in it.
    fn destroy_heap(&self, heap: HeapHandle);

    /// Place a texture at a byte offset inside a heap.
    ///
    /// Placed resources may alias each other; the caller guarantees that
    /// aliased ranges are never live at the same time.
    fn place_texture(
        &self,
        heap: HeapHandle,
        offset: u64,
        desc: &TextureDescription,
    ) -> Result<TextureHandle, DeviceError>;

    /// Place a buffer at a byte offset inside a heap.
    fn place_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        desc: &BufferDescription,
    ) -> Result<BufferHandle, DeviceError>;

    /// Bring a texture into a defined state before its first use.
    fn activate_texture(&self, texture: TextureHandle, activation: Activation);

    /// Bring a buffer into a defined state before its first use.
    fn activate_buffer(&self, buffer: BufferHandle, activation: Activation);

    /// Retire a texture whose scheduled lifetime has ended.
    fn deactivate_texture(&self, texture: TextureHandle);

    /// Retire a buffer whose scheduled lifetime has ended.
    fn deactivate_buffer(&self, buffer: BufferHandle);

    /// Issue a state-transition barrier on a resource.
    fn resource_barrier(&self, resource: RawResource, transition: &StateTransition);
}
