//! Allocation-preserving pooling for frame-rebuilt structures.
//!
//! Structures like compiled graphs and state-delta tables are rebuilt on
//! every recompilation. Dropping and reallocating them each time wastes
//! work, since their shape barely changes frame to frame. [`Pooled<T>`]
//! keeps the value alive in a cleared state instead, so `Vec` capacities
//! survive between rebuilds.
//!
//! # Example
//!
//! ```
//! use arclight_core::pool::{Poolable, Pooled};
//!
//! #[derive(Debug, Default)]
//! struct Scratch {
//!     data: Vec<u8>,
//! }
//!
//! impl Poolable for Scratch {
//!     fn reset(&mut self) {
//!         self.data.clear();
//!     }
//! }
//!
//! let mut pooled = Pooled::<Scratch>::default();
//! pooled.activate().data.extend_from_slice(&[1, 2, 3]);
//! assert!(pooled.get().is_some());
//!
//! pooled.release();
//! assert!(pooled.get().is_none());
//! // Capacity survives the release.
//! assert!(pooled.activate().data.capacity() >= 3);
//! ```

/// Trait for types whose contents can be cleared without deallocating.
///
/// `reset` must leave the value logically empty while preserving allocated
/// capacity, e.g. `Vec::clear` rather than `*v = Vec::new()`.
pub trait Poolable {
    /// Clear the value, keeping its allocations.
    fn reset(&mut self);
}

/// Container holding a value that alternates between "active" (holds valid
/// data) and "released" (cleared, allocation retained).
#[derive(Debug, Default)]
pub struct Pooled<T: Poolable + Default> {
    value: T,
    active: bool,
}

impl<T: Poolable + Default> Pooled<T> {
    /// Wrap a value in active state.
    pub fn new(value: T) -> Self {
        Self {
            value,
            active: true,
        }
    }

    /// Get the value if it is active.
    pub fn get(&self) -> Option<&T> {
        self.active.then_some(&self.value)
    }

    /// Get the value mutably if it is active.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.active.then_some(&mut self.value)
    }

    /// Mark the value active and return it for filling in.
    ///
    /// If the value was released, it comes back cleared but with its
    /// previous allocations intact.
    pub fn activate(&mut self) -> &mut T {
        self.active = true;
        &mut self.value
    }

    /// Clear the value and mark it released. No-op when already released.
    pub fn release(&mut self) {
        if self.active {
            self.value.reset();
            self.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        hits: Vec<u32>,
    }

    impl Poolable for Counter {
        fn reset(&mut self) {
            self.hits.clear();
        }
    }

    #[test]
    fn test_starts_released() {
        let pooled = Pooled::<Counter>::default();
        assert!(pooled.get().is_none());
    }

    #[test]
    fn test_activate_release_cycle() {
        let mut pooled = Pooled::<Counter>::default();
        pooled.activate().hits.push(7);
        assert_eq!(pooled.get().unwrap().hits, vec![7]);

        pooled.release();
        assert!(pooled.get().is_none());

        // Reactivation yields a cleared value.
        assert!(pooled.activate().hits.is_empty());
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut pooled = Pooled::<Counter>::default();
        pooled.activate();
        pooled.release();
        pooled.release();
        assert!(pooled.get().is_none());
    }
}
