//! The registry: process-wide arena of declared nodes and resources.
//!
//! Everything the frontend knows lives here as plain data keyed by small
//! integer ids. Names are interned once and never released; a node or
//! resource id therefore stays stable across re-registration, which is
//! what lets the rest of the pipeline hold ids instead of owning
//! references. Other compilation stages keep non-owning views into this
//! arena.

use std::collections::HashMap;

use arclight_core::define_typed_id;
use arclight_core::ids::{IdIndexedVec, TypedId};

use crate::frontend::declaration::{DeclareCallback, ExecuteCallback};
use crate::types::{History, ResourceDescription, ResourceUsage};

define_typed_id!(
    /// Id of an interned node name.
    NodeNameId
);
define_typed_id!(
    /// Id of an interned resource name.
    ResNameId
);
define_typed_id!(
    /// Id of an interned automatic-resolution type name.
    AutoResTypeNameId
);

/// Interned name table mapping strings to typed ids and back.
#[derive(Debug, Default)]
pub struct NameTable<I: TypedId> {
    names: IdIndexedVec<I, String>,
    lookup: HashMap<String, I>,
}

impl<I: TypedId> NameTable<I> {
    /// Get the id for `name`, interning it if unseen.
    pub fn intern(&mut self, name: &str) -> I {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = self.names.push(name.to_owned());
        self.lookup.insert(name.to_owned(), id);
        id
    }

    /// Look up an already-interned name.
    pub fn id(&self, name: &str) -> Option<I> {
        self.lookup.get(name).copied()
    }

    /// Get the name behind an id.
    pub fn name(&self, id: I) -> &str {
        &self.names[id]
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no names have been interned yet.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A declared use of one resource by one node.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRequest {
    /// The requested resource, by declared (possibly renamed) name.
    pub resource: ResNameId,
    /// How the node binds the resource.
    pub usage: ResourceUsage,
    /// When set, the node reads the resource's previous-frame contents.
    pub last_frame: bool,
}

/// Per-node declaration data.
#[derive(Default)]
pub(crate) struct NodeData {
    /// Whether the declaration callback has produced current data.
    pub declared: bool,
    /// Bumped on every (re)registration; stale unregisters are ignored.
    pub generation: u32,
    /// Declaration callback, run during the node-declaration-update stage.
    pub declare: Option<DeclareCallback>,
    /// Execution callback produced by the declaration.
    pub execute: Option<ExecuteCallback>,
    /// All resource requests this node declared.
    pub requests: Vec<ResourceRequest>,
    /// Resources this node introduces.
    pub creates: Vec<ResNameId>,
    /// Renames this node performs, as `(from, to)` pairs.
    pub renames: Vec<(ResNameId, ResNameId)>,
    /// Ordering hints: this node runs after the named nodes.
    pub follows: Vec<NodeNameId>,
    /// Ordering hints: this node runs before the named nodes.
    pub precedes: Vec<NodeNameId>,
}

impl NodeData {
    /// Drop everything the declaration callback fills in.
    pub fn clear_declaration(&mut self) {
        self.declared = false;
        self.execute = None;
        self.requests.clear();
        self.creates.clear();
        self.renames.clear();
        self.follows.clear();
        self.precedes.clear();
    }
}

impl std::fmt::Debug for NodeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeData")
            .field("declared", &self.declared)
            .field("generation", &self.generation)
            .field("requests", &self.requests)
            .field("creates", &self.creates)
            .field("renames", &self.renames)
            .finish_non_exhaustive()
    }
}

/// Binding of a texture's size to an automatic-resolution type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoResolutionRequest {
    /// The resolution class the texture follows.
    pub auto_res: AutoResTypeNameId,
    /// Multiplier applied to the class resolution.
    pub multiplier: f32,
}

/// Per-resource declaration data.
#[derive(Debug, Default, Clone)]
pub(crate) struct ResourceData {
    /// Static description, if the resource is created by some node.
    pub description: Option<ResourceDescription>,
    /// History policy.
    pub history: History,
    /// Automatic-resolution binding for textures.
    pub resolution: Option<AutoResolutionRequest>,
    /// Set when a node renames this resource to a new logical name.
    pub renamed_to: Option<ResNameId>,
}

impl ResourceData {
    /// Drop everything node declarations fill in.
    pub fn clear_declaration(&mut self) {
        self.description = None;
        self.history = History::No;
        self.resolution = None;
        self.renamed_to = None;
    }
}

/// A runtime-adjustable resolution class textures can bind to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AutoResType {
    /// Resolution used for scheduling (maximum extent).
    pub static_resolution: (u32, u32),
    /// Resolution applied dynamically without rescheduling.
    pub dynamic_resolution: (u32, u32),
    /// Frame slots left to propagate a dynamic resolution change into.
    pub dynamic_resolution_countdown: u32,
}

/// Arena of all declared graph data.
///
/// Mutated only through declaration calls; every compilation stage reads
/// it through shared references.
#[derive(Default)]
pub struct Registry {
    pub(crate) node_names: NameTable<NodeNameId>,
    pub(crate) res_names: NameTable<ResNameId>,
    pub(crate) auto_res_names: NameTable<AutoResTypeNameId>,
    pub(crate) nodes: IdIndexedVec<NodeNameId, NodeData>,
    pub(crate) resources: IdIndexedVec<ResNameId, ResourceData>,
    pub(crate) auto_res_types: IdIndexedVec<AutoResTypeNameId, AutoResType>,
    pub(crate) sinks: Vec<ResNameId>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a node name, allocating its data slot on first sight.
    pub fn intern_node(&mut self, name: &str) -> NodeNameId {
        let id = self.node_names.intern(name);
        if id.index() >= self.nodes.len() {
            self.nodes.resize_with(id.index() + 1, NodeData::default);
        }
        id
    }

    /// Intern a resource name, allocating its data slot on first sight.
    pub fn intern_resource(&mut self, name: &str) -> ResNameId {
        let id = self.res_names.intern(name);
        if id.index() >= self.resources.len() {
            self.resources
                .resize_with(id.index() + 1, ResourceData::default);
        }
        id
    }

    /// Intern an auto-resolution type name.
    pub fn intern_auto_res(&mut self, name: &str) -> AutoResTypeNameId {
        let id = self.auto_res_names.intern(name);
        if id.index() >= self.auto_res_types.len() {
            self.auto_res_types
                .resize_with(id.index() + 1, AutoResType::default);
        }
        id
    }

    /// Look up a node by name without interning.
    pub fn find_node(&self, name: &str) -> Option<NodeNameId> {
        self.node_names.id(name)
    }

    /// Look up a resource by name without interning.
    pub fn find_resource(&self, name: &str) -> Option<ResNameId> {
        self.res_names.id(name)
    }

    /// Name of a node id.
    pub fn node_name(&self, id: NodeNameId) -> &str {
        self.node_names.name(id)
    }

    /// Name of a resource id.
    pub fn resource_name(&self, id: ResNameId) -> &str {
        self.res_names.name(id)
    }

    /// Name of an auto-resolution type id.
    pub fn auto_res_name(&self, id: AutoResTypeNameId) -> &str {
        self.auto_res_names.name(id)
    }

    /// Mark a resource as a sink: it must be produced every frame and
    /// roots the backward-reachability cull.
    pub fn mark_sink(&mut self, res: ResNameId) {
        if !self.sinks.contains(&res) {
            self.sinks.push(res);
        }
    }

    /// Remove a sink marking.
    pub fn unmark_sink(&mut self, res: ResNameId) {
        self.sinks.retain(|&s| s != res);
    }

    /// All declared sink resources.
    pub fn sinks(&self) -> &[ResNameId] {
        &self.sinks
    }

    /// Reset all declaration-derived resource data before re-running node
    /// declarations.
    pub(crate) fn clear_resource_declarations(&mut self) {
        for res in self.resources.iter_mut() {
            res.clear_declaration();
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("nodes", &self.nodes.len())
            .field("resources", &self.resources.len())
            .field("sinks", &self.sinks)
            .finish_non_exhaustive()
    }
}
