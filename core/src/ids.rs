//! Typed small-integer ids and id-indexed storage.
//!
//! Systems that manage many small objects (nodes, resources, passes) keep
//! them in flat arenas and refer to them by index. Raw `usize` indices are
//! easy to mix up between arenas, so this module provides newtype ids and
//! a vector keyed by them.
//!
//! # Example
//!
//! ```
//! use arclight_core::ids::IdIndexedVec;
//! use arclight_core::define_typed_id;
//!
//! define_typed_id!(ThingId);
//!
//! let mut things: IdIndexedVec<ThingId, String> = IdIndexedVec::new();
//! let id = things.push("hello".to_string());
//! assert_eq!(things[id], "hello");
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed index into an [`IdIndexedVec`].
///
/// Implemented by the newtypes generated with [`define_typed_id!`](crate::define_typed_id).
pub trait TypedId: Copy + Eq {
    /// Construct an id from a raw index.
    fn from_index(index: usize) -> Self;

    /// Get the raw index back.
    fn index(self) -> usize;
}

/// Define a `u32`-backed id newtype implementing [`TypedId`].
///
/// The generated type is `Copy`, hashable and ordered, and reserves
/// `u32::MAX` as the invalid sentinel, which is also the `Default`.
#[macro_export]
macro_rules! define_typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel value for "no id".
            pub const INVALID: Self = Self(u32::MAX);

            /// Check that this id is not the invalid sentinel.
            pub fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl $crate::ids::TypedId for $name {
            fn from_index(index: usize) -> Self {
                debug_assert!(index < u32::MAX as usize);
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

/// A `Vec` indexed by a typed id instead of `usize`.
///
/// Pushing returns the id of the new element. Indexing with an id from a
/// different arena is a type error rather than a silent bug.
#[derive(Clone, PartialEq, Eq)]
pub struct IdIndexedVec<I: TypedId, T> {
    items: Vec<T>,
    _marker: PhantomData<I>,
}

impl<I: TypedId, T> IdIndexedVec<I, T> {
    /// Create an empty id-indexed vector.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an element, returning its id.
    pub fn push(&mut self, value: T) -> I {
        let id = I::from_index(self.items.len());
        self.items.push(value);
        id
    }

    /// Get an element by id, if in range.
    pub fn get(&self, id: I) -> Option<&T> {
        self.items.get(id.index())
    }

    /// Get a mutable element by id, if in range.
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.items.get_mut(id.index())
    }

    /// Iterate over elements in id order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Iterate mutably over elements in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Iterate over all valid ids.
    pub fn ids(&self) -> impl Iterator<Item = I> {
        (0..self.items.len()).map(I::from_index)
    }

    /// Iterate over `(id, &element)` pairs.
    pub fn enumerate(&self) -> impl Iterator<Item = (I, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, t)| (I::from_index(i), t))
    }

    /// Iterate over `(id, &mut element)` pairs.
    pub fn enumerate_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, t)| (I::from_index(i), t))
    }

    /// Grow the vector to `len` elements, filling with `f`.
    pub fn resize_with(&mut self, len: usize, f: impl FnMut() -> T) {
        self.items.resize_with(len, f);
    }

    /// Remove all elements, keeping the allocation.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<I: TypedId, T: Clone> IdIndexedVec<I, T> {
    /// Grow or shrink the vector to `len` elements, cloning `value` to fill.
    pub fn resize(&mut self, len: usize, value: T) {
        self.items.resize(len, value);
    }
}

impl<I: TypedId, T> Default for IdIndexedVec<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: TypedId, T> Index<I> for IdIndexedVec<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        &self.items[id.index()]
    }
}

impl<I: TypedId, T> IndexMut<I> for IdIndexedVec<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        &mut self.items[id.index()]
    }
}

impl<I: TypedId, T: fmt::Debug> fmt::Debug for IdIndexedVec<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<I: TypedId, T> FromIterator<T> for IdIndexedVec<I, T> {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self {
            items: Vec::from_iter(iter),
            _marker: PhantomData,
        }
    }
}
