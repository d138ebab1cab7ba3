//! Storage engine for bramble.
//!
//! This crate provides:
//! - Disk manager for page-level I/O over named files
//! - Pager tying the buffer pool to the disk manager with pinned-page guards
//! - Heap files for record storage and forward file scanning
//! - A B+ tree index over a fixed-length string prefix of each record

mod btree;
mod disk;
mod heap;
mod pager;

pub use btree::{
    compare_keys, extract_key, BTreeIndex, Fanout, Key, ScanOp, TreeStats, INTERNAL_CAPACITY,
    KEY_SIZE, LEAF_CAPACITY,
};
pub use disk::{DiskManager, DiskManagerConfig};
pub use heap::{FileScanner, HeapFile, RecordPage};
pub use pager::{Pager, PinnedPage};
