//! Tracking of node registrations across subsystems and threads.
//!
//! Subsystems register nodes from arbitrary threads; the tracker records
//! which context owns which node and raises a changed flag the runtime
//! consumes at the start of the next frame. It also guards frame execution
//! so node callbacks cannot re-enter the runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::frontend::registry::NodeNameId;

/// Opaque token identifying one registration context (a subsystem or a
/// dynamically loaded module). Used to bulk-wipe nodes on unload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

#[derive(Debug, Default)]
struct TrackerState {
    next_context: u32,
    node_owner: HashMap<NodeNameId, ContextId>,
}

/// Thread-safe record of node ownership and declaration changes.
#[derive(Debug, Default)]
pub struct NodeTracker {
    state: Mutex<TrackerState>,
    nodes_changed: AtomicBool,
    frame_owner: Mutex<Option<ThreadId>>,
}

impl NodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh registration context.
    pub fn create_context(&self) -> ContextId {
        let mut state = self.state.lock();
        let id = ContextId(state.next_context);
        state.next_context += 1;
        id
    }

    /// Record that `context` now owns `node` and flag a declaration change.
    pub fn register_node(&self, node: NodeNameId, context: ContextId) {
        self.state.lock().node_owner.insert(node, context);
        self.mark_nodes_changed();
    }

    /// Release ownership of `node`. Returns `false` when the node is not
    /// currently owned by `context`, in which case nothing changes.
    pub fn unregister_node(&self, node: NodeNameId, context: ContextId) -> bool {
        let mut state = self.state.lock();
        if state.node_owner.get(&node) != Some(&context) {
            return false;
        }
        state.node_owner.remove(&node);
        drop(state);
        self.mark_nodes_changed();
        true
    }

    /// All nodes currently owned by `context`, released as a batch.
    pub fn take_context_nodes(&self, context: ContextId) -> Vec<NodeNameId> {
        let mut state = self.state.lock();
        let nodes: Vec<NodeNameId> = state
            .node_owner
            .iter()
            .filter(|&(_, &owner)| owner == context)
            .map(|(&node, _)| node)
            .collect();
        for node in &nodes {
            state.node_owner.remove(node);
        }
        drop(state);
        if !nodes.is_empty() {
            self.mark_nodes_changed();
        }
        nodes
    }

    /// Raise the declaration-changed flag.
    pub fn mark_nodes_changed(&self) {
        self.nodes_changed.store(true, Ordering::Release);
    }

    /// Consume the declaration-changed flag.
    pub fn acquire_nodes_changed(&self) -> bool {
        self.nodes_changed.swap(false, Ordering::AcqRel)
    }

    /// Lock the graph for frame execution.
    ///
    /// Panics when called while a frame is already executing; calling
    /// `run_nodes` from inside a node callback is a fatal usage error.
    pub fn lock_frame(&self) -> FrameGuard<'_> {
        let mut owner = self.frame_owner.lock();
        let me = thread::current().id();
        if let Some(current) = *owner {
            if current == me {
                panic!("frame execution re-entered from within a node callback");
            }
            panic!("frame execution started from two threads at once");
        }
        *owner = Some(me);
        FrameGuard { tracker: self }
    }
}

/// Guard marking a frame as executing; released on drop.
pub struct FrameGuard<'a> {
    tracker: &'a NodeTracker,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        *self.tracker.frame_owner.lock() = None;
    }
}
