//! Frontend: declarations and the stages that normalize them.
//!
//! The frontend owns everything that happens before graph construction:
//! the declaration arena ([`registry`]), the declaration builder API
//! ([`declaration`]), rename resolution ([`name_resolver`]), flattened
//! usage data ([`dependency_data`]), registration tracking
//! ([`node_tracker`]) and multiplexing extents ([`multiplexing`]).

pub mod declaration;
pub mod dependency_data;
pub mod multiplexing;
pub mod name_resolver;
pub mod node_tracker;
pub mod registry;

pub use declaration::{DeclareCallback, ExecuteCallback, NodeDeclaration};
pub use dependency_data::{DependencyData, DependencyDataCalculator, NameUses, ResolvedResource};
pub use multiplexing::{Extents, MultiplexingIndex};
pub use name_resolver::NameResolver;
pub use node_tracker::{ContextId, FrameGuard, NodeTracker};
pub use registry::{AutoResTypeNameId, NodeNameId, Registry, ResNameId, ResourceRequest};
