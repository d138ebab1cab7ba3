//! B+ tree index on a fixed-length string prefix.
//!
//! The tree maps 10-byte key prefixes, extracted from base-relation records
//! at a configurable byte offset, to the RecordId of the record in the heap
//! file. Nodes are 8 KiB pages accessed in place through the buffer pool;
//! inserts split bottom-up and grow a new root when the spine itself splits;
//! scans descend once and then ride the leaf sibling chain.
//!
//! ```text
//!               +-------------------+
//!               |  internal (root)  |   level >= 1
//!               +-------------------+
//!              /          |          \
//!        +--------+  +--------+  +--------+
//!        |  leaf  |->|  leaf  |->|  leaf  |->  INVALID
//!        +--------+  +--------+  +--------+
//!          (key, rid) pairs, ascending across the chain
//! ```

mod constants;
mod index;
mod node;
mod scan;
mod types;

pub use constants::{Fanout, INTERNAL_CAPACITY, KEY_SIZE, LEAF_CAPACITY};
pub use index::{BTreeIndex, TreeStats};
pub use types::{compare_keys, extract_key, Key, ScanOp};
