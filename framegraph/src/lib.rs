//! # Arclight Frame Graph
//!
//! Declarative frame graph for Arclight Engine: subsystems register
//! nodes that declare the resources they create, read, write or rename,
//! and the runtime compiles those declarations into an executable frame.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Runtime`] - Staged incremental compiler and per-frame executor
//! - [`NodeDeclaration`] - Builder nodes use to declare resource usage
//! - [`Device`] - Trait for GPU backend implementations, with a
//!   [`NullDevice`] for testing
//! - Automatic node ordering, barrier placement, dead-node culling,
//!   resource aliasing and previous-frame (history) resources
//!
//! ## Example
//!
//! ```ignore
//! use arclight_framegraph::Runtime;
//!
//! let mut runtime = Runtime::new(device);
//! let ctx = runtime.create_context();
//! runtime.register_node(ctx, "tonemap", |decl| {
//!     decl.read("hdr_color", read_usage());
//!     decl.create_texture("ldr_color", desc(), write_usage());
//!     Box::new(|exec| { /* record draw calls */ })
//! });
//! runtime.mark_resource_sink("ldr_color");
//! loop {
//!     runtime.run_nodes();
//! }
//! ```

pub mod backend;
pub mod debug;
pub mod device;
pub mod error;
pub mod frontend;
pub mod intermediate;
pub mod runtime;
pub mod types;

// Re-export main types for convenience
pub use backend::resource_scheduler::{ResourceScheduler, SCHEDULE_FRAME_WINDOW};
pub use debug::VisualizationHook;
pub use device::{
    BufferHandle, Device, DeviceError, HeapHandle, NullDevice, RawResource, TextureHandle,
};
pub use error::FrameGraphError;
pub use frontend::declaration::{DeclareCallback, ExecuteCallback, NodeDeclaration};
pub use frontend::multiplexing::{Extents, MultiplexingIndex};
pub use frontend::node_tracker::ContextId;
pub use runtime::{CompilationStage, NodeHandle, Runtime};
pub use types::{
    Access, Activation, BlobDescription, BufferDescription, History, ResourceDescription,
    ResourceUsage, StageFlags, StateTransition, TextureDescription, TextureFormat, UsageKind,
};

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the frame graph subsystem.
pub fn init() {
    log::info!("Arclight Frame Graph v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
