//! # Arclight Engine Core
//!
//! Core crate for Arclight Engine basic utilities: typed small-integer
//! ids with id-indexed storage, and allocation-preserving pooling.

pub mod ids;
pub mod pool;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the core subsystem.
pub fn init() {
    log::info!("Arclight Core v{} initialized", VERSION);
}
