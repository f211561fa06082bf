//! Multiplexing extents and indices.
//!
//! One declared node can expand into several intermediate nodes, e.g. one
//! per stereo viewport or per supersampling pass. The [`Extents`] describe
//! how many copies exist; each copy is identified by a [`MultiplexingIndex`].

use arclight_core::define_typed_id;
use arclight_core::ids::TypedId;

define_typed_id!(
    /// Index of one multiplexed copy of a node or resource.
    MultiplexingIndex
);

/// How many times the declared graph is multiplexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extents {
    /// Viewport count, e.g. 2 for stereo rendering.
    pub viewports: u32,
    /// Supersampling pass count.
    pub super_samples: u32,
}

impl Extents {
    /// Total number of multiplexed copies. Never zero.
    pub fn total(&self) -> u32 {
        self.viewports.max(1) * self.super_samples.max(1)
    }

    /// Iterate over all multiplexing indices in order.
    pub fn indices(&self) -> impl Iterator<Item = MultiplexingIndex> {
        (0..self.total() as usize).map(MultiplexingIndex::from_index)
    }
}

impl Default for Extents {
    fn default() -> Self {
        Self {
            viewports: 1,
            super_samples: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single() {
        assert_eq!(Extents::default().total(), 1);
    }

    #[test]
    fn test_total_is_product() {
        let extents = Extents {
            viewports: 2,
            super_samples: 3,
        };
        assert_eq!(extents.total(), 6);
        assert_eq!(extents.indices().count(), 6);
    }

    #[test]
    fn test_zero_extents_clamp_to_one() {
        let extents = Extents {
            viewports: 0,
            super_samples: 0,
        };
        assert_eq!(extents.total(), 1);
    }
}
