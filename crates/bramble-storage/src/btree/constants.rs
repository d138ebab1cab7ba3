//! B+ tree layout constants and fan-out configuration.

use bramble_common::page::{RecordId, PAGE_SIZE};

/// Length of the string key prefix indexed by the tree. Keys are compared
/// byte-wise over all KEY_SIZE bytes, embedded NULs included.
pub const KEY_SIZE: usize = 10;

/// On-disk size of the leaf page header (num_keys + right sibling + pad).
pub(crate) const LEAF_HEADER_SIZE: usize = 8;

/// On-disk size of one leaf entry: key + RecordId.
pub(crate) const LEAF_ENTRY_SIZE: usize = KEY_SIZE + RecordId::DISK_SIZE;

/// On-disk size of the internal page header (num_keys + pad + level).
pub(crate) const INTERNAL_HEADER_SIZE: usize = 8;

/// On-disk size of one child page pointer.
pub(crate) const CHILD_PTR_SIZE: usize = 4;

/// On-disk size of one internal entry: separator key + right child pointer.
pub(crate) const INTERNAL_ENTRY_SIZE: usize = KEY_SIZE + CHILD_PTR_SIZE;

/// Maximum (key, rid) pairs per leaf page: 511 at 8 KiB pages.
pub const LEAF_CAPACITY: usize = (PAGE_SIZE - LEAF_HEADER_SIZE) / LEAF_ENTRY_SIZE;

/// Maximum separator keys per internal page: 584 at 8 KiB pages.
pub const INTERNAL_CAPACITY: usize =
    (PAGE_SIZE - INTERNAL_HEADER_SIZE - CHILD_PTR_SIZE) / INTERNAL_ENTRY_SIZE;

/// Runtime fan-out of a tree instance.
///
/// The on-disk packing is identical for every fan-out; the fan-out only
/// bounds how many entries a node may hold before it splits. Tests use small
/// values to force frequent splits; production uses the page-filling
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fanout {
    /// Maximum (key, rid) pairs per leaf.
    pub leaf: usize,
    /// Maximum separator keys per internal node.
    pub internal: usize,
}

impl Fanout {
    /// Creates a fan-out, clamped to what a page can hold. Panics if either
    /// bound is below 2, the minimum a split can operate on.
    pub fn new(leaf: usize, internal: usize) -> Self {
        assert!(leaf >= 2, "leaf fan-out must be at least 2");
        assert!(internal >= 2, "internal fan-out must be at least 2");
        Self {
            leaf: leaf.min(LEAF_CAPACITY),
            internal: internal.min(INTERNAL_CAPACITY),
        }
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self {
            leaf: LEAF_CAPACITY,
            internal: INTERNAL_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_formulas() {
        // (pageSize - sibling ptr) / (key + rid), on 8 KiB pages
        assert_eq!(LEAF_CAPACITY, 511);
        // (pageSize - level - extra ptr) / (key + page ptr)
        assert_eq!(INTERNAL_CAPACITY, 584);
    }

    #[test]
    fn test_nodes_fit_in_a_page() {
        assert!(LEAF_HEADER_SIZE + LEAF_CAPACITY * LEAF_ENTRY_SIZE <= PAGE_SIZE);
        assert!(
            INTERNAL_HEADER_SIZE
                + CHILD_PTR_SIZE
                + INTERNAL_CAPACITY * INTERNAL_ENTRY_SIZE
                <= PAGE_SIZE
        );
    }

    #[test]
    fn test_fanout_default() {
        let fanout = Fanout::default();
        assert_eq!(fanout.leaf, LEAF_CAPACITY);
        assert_eq!(fanout.internal, INTERNAL_CAPACITY);
    }

    #[test]
    fn test_fanout_debug_sizes() {
        let fanout = Fanout::new(4, 4);
        assert_eq!(fanout.leaf, 4);
        assert_eq!(fanout.internal, 4);
    }

    #[test]
    fn test_fanout_clamped_to_capacity() {
        let fanout = Fanout::new(100_000, 100_000);
        assert_eq!(fanout.leaf, LEAF_CAPACITY);
        assert_eq!(fanout.internal, INTERNAL_CAPACITY);
    }

    #[test]
    #[should_panic(expected = "leaf fan-out")]
    fn test_fanout_too_small_panics() {
        Fanout::new(1, 4);
    }
}
