//! Node declaration API.
//!
//! External subsystems (renderer, physics, UI) describe their per-frame
//! work by registering nodes. A node's declaration callback receives a
//! [`NodeDeclaration`] to state which resources it creates, reads, writes
//! or renames, plus optional ordering hints, and returns the execution
//! callback invoked every frame with resolved resource views.
//!
//! # Example
//!
//! ```ignore
//! runtime.register_node(ctx, "tonemap", |decl| {
//!     decl.read("hdr_color", ResourceUsage::read(UsageKind::ShaderResource, StageFlags::POST_RASTER));
//!     decl.create_texture(
//!         "ldr_color",
//!         TextureDescription::new_2d(1920, 1080, TextureFormat::Rgba8Unorm),
//!         ResourceUsage::write(UsageKind::RenderTarget, StageFlags::POST_RASTER),
//!     );
//!     Box::new(|exec| {
//!         let _target = exec.texture("ldr_color");
//!         // record draw calls...
//!     })
//! });
//! ```

use crate::backend::executor::ExecutionContext;
use crate::frontend::registry::{
    AutoResolutionRequest, NodeNameId, Registry, ResNameId, ResourceRequest,
};
use crate::types::{
    Access, BlobDescription, BufferDescription, History, ResourceDescription, ResourceUsage,
    TextureDescription,
};

/// Per-frame execution callback, invoked with resolved resource views.
pub type ExecuteCallback = Box<dyn FnMut(&mut ExecutionContext<'_>)>;

/// Declaration callback: fills in a [`NodeDeclaration`] and returns the
/// node's execution callback. Re-run whenever node declarations change.
pub type DeclareCallback = Box<dyn FnMut(&mut NodeDeclaration<'_>) -> ExecuteCallback>;

/// Builder handed to a node's declaration callback.
///
/// All resource names are interned on first use. Declaring a read of a
/// resource no node produces is not an error here; the graph compiler
/// drops such nodes with a diagnostic instead.
pub struct NodeDeclaration<'a> {
    registry: &'a mut Registry,
    node: NodeNameId,
}

impl<'a> NodeDeclaration<'a> {
    pub(crate) fn new(registry: &'a mut Registry, node: NodeNameId) -> Self {
        Self { registry, node }
    }

    /// The node being declared.
    pub fn node_id(&self) -> NodeNameId {
        self.node
    }

    /// Declare a new texture produced by this node.
    pub fn create_texture(
        &mut self,
        name: &str,
        desc: TextureDescription,
        usage: ResourceUsage,
    ) -> ResNameId {
        self.create(name, ResourceDescription::Texture(desc), usage)
    }

    /// Declare a new buffer produced by this node.
    pub fn create_buffer(
        &mut self,
        name: &str,
        desc: BufferDescription,
        usage: ResourceUsage,
    ) -> ResNameId {
        self.create(name, ResourceDescription::Buffer(desc), usage)
    }

    /// Declare a new CPU blob produced by this node.
    pub fn create_blob(
        &mut self,
        name: &str,
        desc: BlobDescription,
        usage: ResourceUsage,
    ) -> ResNameId {
        self.create(name, ResourceDescription::Blob(desc), usage)
    }

    fn create(
        &mut self,
        name: &str,
        desc: ResourceDescription,
        mut usage: ResourceUsage,
    ) -> ResNameId {
        let res = self.registry.intern_resource(name);
        let data = &mut self.registry.resources[res];
        if data.description.is_some() {
            log::error!(
                "node '{}' re-creates resource '{}'; keeping the original description",
                self.registry.node_names.name(self.node),
                name
            );
        } else {
            data.description = Some(desc);
        }
        // Creating a resource is always a write.
        usage.access = Access::ReadWrite;
        let node = &mut self.registry.nodes[self.node];
        node.creates.push(res);
        node.requests.push(ResourceRequest {
            resource: res,
            usage,
            last_frame: false,
        });
        res
    }

    /// Set the history policy of a resource this node created.
    pub fn history(&mut self, name: &str, history: History) {
        let res = self.registry.intern_resource(name);
        self.registry.resources[res].history = history;
    }

    /// Tie a texture's size to an automatic-resolution class.
    pub fn auto_resolution(&mut self, name: &str, auto_res: &str, multiplier: f32) {
        let res = self.registry.intern_resource(name);
        let auto_res = self.registry.intern_auto_res(auto_res);
        self.registry.resources[res].resolution = Some(AutoResolutionRequest {
            auto_res,
            multiplier,
        });
    }

    /// Declare a read of a resource produced elsewhere.
    pub fn read(&mut self, name: &str, mut usage: ResourceUsage) -> ResNameId {
        usage.access = Access::ReadOnly;
        self.request(name, usage, false)
    }

    /// Declare a read of a resource's previous-frame contents.
    ///
    /// The resource must be declared with a [`History`] policy other than
    /// [`History::No`] by its creator.
    pub fn read_history(&mut self, name: &str, mut usage: ResourceUsage) -> ResNameId {
        usage.access = Access::ReadOnly;
        self.request(name, usage, true)
    }

    /// Declare an in-place modification of a resource.
    pub fn modify(&mut self, name: &str, mut usage: ResourceUsage) -> ResNameId {
        usage.access = Access::ReadWrite;
        self.request(name, usage, false)
    }

    fn request(&mut self, name: &str, usage: ResourceUsage, last_frame: bool) -> ResNameId {
        let res = self.registry.intern_resource(name);
        self.registry.nodes[self.node].requests.push(ResourceRequest {
            resource: res,
            usage,
            last_frame,
        });
        res
    }

    /// Declare that this node consumes `from` and republishes the same
    /// storage under the new logical name `to`.
    pub fn rename(&mut self, from: &str, to: &str, mut usage: ResourceUsage) -> ResNameId {
        let from_id = self.registry.intern_resource(from);
        let to_id = self.registry.intern_resource(to);
        let from_data = &mut self.registry.resources[from_id];
        if let Some(prev) = from_data.renamed_to {
            if prev != to_id {
                log::error!(
                    "resource '{}' is renamed twice (to '{}' and '{}'); keeping the first",
                    from,
                    self.registry.res_names.name(prev),
                    to
                );
                return to_id;
            }
        }
        from_data.renamed_to = Some(to_id);
        usage.access = Access::ReadWrite;
        let node = &mut self.registry.nodes[self.node];
        node.renames.push((from_id, to_id));
        node.requests.push(ResourceRequest {
            resource: to_id,
            usage,
            last_frame: false,
        });
        to_id
    }

    /// Hint that this node must execute after the named node.
    ///
    /// Not declaring any ordering hint means "no constraint".
    pub fn order_after(&mut self, node: &str) {
        let other = self.registry.intern_node(node);
        self.registry.nodes[self.node].follows.push(other);
    }

    /// Hint that this node must execute before the named node.
    pub fn order_before(&mut self, node: &str) {
        let other = self.registry.intern_node(node);
        self.registry.nodes[self.node].precedes.push(other);
    }
}
