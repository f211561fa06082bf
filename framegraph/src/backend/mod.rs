//! Backend: scheduling and execution of built graphs.
//!
//! The backend consumes the intermediate graph: [`node_scheduler`] picks a
//! linear execution order, [`state_delta`] derives the barrier work between
//! consecutive resource uses, [`resource_scheduler`] assigns device storage
//! and emits per-frame resource events, and [`executor`] replays it all.

pub mod executor;
pub mod node_scheduler;
pub mod resource_scheduler;
pub mod state_delta;
