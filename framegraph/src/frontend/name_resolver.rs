//! Resolution of renamed resource names to canonical ids.
//!
//! A rename chain `a -> b -> c` describes one physical resource published
//! under three logical names. The canonical id of every link is the
//! terminal name of its chain (`c` here); all later stages key their data
//! by canonical ids so the chain collapses to a single resource.

use arclight_core::ids::{IdIndexedVec, TypedId};

use crate::frontend::registry::{Registry, ResNameId};

/// Maps every declared resource name to the canonical id of its chain.
#[derive(Debug, Default)]
pub struct NameResolver {
    resolved: IdIndexedVec<ResNameId, ResNameId>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the resolution table from current declarations.
    ///
    /// A cycle in rename links is a declaration error; every name on the
    /// cycle resolves to itself and an error is logged once per cycle.
    pub fn update(&mut self, registry: &Registry) {
        self.resolved.clear();
        self.resolved
            .resize_with(registry.resources.len(), || ResNameId::INVALID);

        for id in self.resolved.ids().collect::<Vec<_>>() {
            if self.resolved[id].is_valid() {
                continue;
            }
            // Follow the chain, bounded by the resource count so a rename
            // cycle cannot loop forever.
            let mut terminal = id;
            let mut steps = 0usize;
            let cycle = loop {
                match registry.resources[terminal].renamed_to {
                    Some(next) => {
                        terminal = next;
                        steps += 1;
                        if steps > registry.resources.len() {
                            break true;
                        }
                    }
                    None => break false,
                }
            };
            if cycle {
                log::error!(
                    "rename cycle through resource '{}'; names on the cycle resolve to themselves",
                    registry.resource_name(id)
                );
            }
            // Write the result back along the whole chain.
            let mut cursor = id;
            loop {
                self.resolved[cursor] = if cycle { cursor } else { terminal };
                match registry.resources[cursor].renamed_to {
                    Some(next) if !self.resolved[next].is_valid() => cursor = next,
                    _ => break,
                }
            }
        }
    }

    /// Canonical id for a declared name.
    pub fn resolve(&self, id: ResNameId) -> ResNameId {
        self.resolved[id]
    }

    /// Whether `id` is the canonical name of its chain.
    pub fn is_canonical(&self, id: ResNameId) -> bool {
        self.resolved[id] == id
    }

    /// Number of names the table covers.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
