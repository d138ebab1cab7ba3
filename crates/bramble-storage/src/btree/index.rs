//! B+ tree index over a fixed-length string prefix of heap-file records.

use super::constants::Fanout;
use super::node::{InternalNode, LeafNode};
use super::scan::ScanState;
use super::types::{compare_keys, extract_key, IndexHeader, Key, Split};
use crate::disk::DiskManager;
use crate::heap::HeapFile;
use crate::pager::Pager;
use bramble_buffer::BufferPool;
use bramble_common::page::{RecordId, INVALID_PAGE_NUM};
use bramble_common::{BrambleError, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// Page number of the index metadata page. It is the first page allocated in
/// a fresh index file.
const HEADER_PAGE_NUM: u32 = 1;

/// Structural summary of a tree, produced by `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of internal levels above the leaves (0 for an empty tree).
    pub depth: u32,
    /// Number of leaf pages reachable from the root.
    pub leaf_pages: usize,
    /// Number of (key, rid) entries across all leaves.
    pub entries: usize,
}

/// A B+ tree index on a single string-prefix attribute of a relation.
///
/// The index file is named `"<relation>.<attr_byte_offset>"`. Opening an
/// existing file validates its stored metadata against the caller's
/// arguments; creating a fresh one bulk-loads every record of the relation
/// through a file scanner. At most one scan is live per index instance.
pub struct BTreeIndex {
    pub(crate) pager: Pager,
    index_name: String,
    relation_name: String,
    attr_byte_offset: usize,
    header_page_num: u32,
    pub(crate) root_page_num: u32,
    fanout: Fanout,
    pub(crate) scan: ScanState,
}

impl BTreeIndex {
    /// Derives the index file name for a relation and attribute offset.
    pub fn index_file_name(relation_name: &str, attr_byte_offset: usize) -> String {
        format!("{}.{}", relation_name, attr_byte_offset)
    }

    /// Opens or creates the index with the default (page-filling) fan-out.
    pub fn open(
        relation_name: &str,
        attr_byte_offset: usize,
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        Self::open_with_fanout(relation_name, attr_byte_offset, disk, pool, Fanout::default())
    }

    /// Opens an existing index file, or creates one and bulk-loads it from
    /// the relation.
    ///
    /// Fails with `BadIndexInfo` when an existing index file's stored
    /// relation name or attribute offset disagrees with the arguments; no
    /// state is mutated in that case.
    pub fn open_with_fanout(
        relation_name: &str,
        attr_byte_offset: usize,
        disk: Arc<DiskManager>,
        pool: Arc<BufferPool>,
        fanout: Fanout,
    ) -> Result<Self> {
        let index_name = Self::index_file_name(relation_name, attr_byte_offset);

        match disk.open_file(&index_name, false) {
            Ok(file_id) => {
                let pager = Pager::new(disk, pool, file_id);
                let header = {
                    let guard = pager.read_page(HEADER_PAGE_NUM)?;
                    let data = guard.data();
                    IndexHeader::from_bytes(&data[..])
                };

                if header.relation_name != relation_name {
                    return Err(BrambleError::BadIndexInfo(format!(
                        "index {} was built for relation {:?}, not {:?}",
                        index_name, header.relation_name, relation_name
                    )));
                }
                if header.attr_byte_offset as usize != attr_byte_offset {
                    return Err(BrambleError::BadIndexInfo(format!(
                        "index {} was built at attribute offset {}, not {}",
                        index_name, header.attr_byte_offset, attr_byte_offset
                    )));
                }

                Ok(Self {
                    pager,
                    index_name,
                    relation_name: relation_name.to_string(),
                    attr_byte_offset,
                    header_page_num: HEADER_PAGE_NUM,
                    root_page_num: header.root_page_num,
                    fanout,
                    scan: ScanState::default(),
                })
            }
            Err(BrambleError::FileNotFound(_)) => {
                let file_id = disk.open_file(&index_name, true)?;
                let pager = Pager::new(disk.clone(), pool.clone(), file_id);

                // The header must land on page 1 of the fresh file
                let (page_num, guard) = pager.allocate_page()?;
                if page_num != HEADER_PAGE_NUM {
                    return Err(BrambleError::Internal(format!(
                        "header page allocated at {} in fresh index file",
                        page_num
                    )));
                }
                let header = IndexHeader {
                    relation_name: relation_name.to_string(),
                    attr_byte_offset: attr_byte_offset as u32,
                    root_page_num: INVALID_PAGE_NUM,
                };
                guard.data_mut()[..IndexHeader::SIZE].copy_from_slice(&header.to_bytes());
                guard.mark_dirty();
                drop(guard);

                let mut index = Self {
                    pager,
                    index_name,
                    relation_name: relation_name.to_string(),
                    attr_byte_offset,
                    header_page_num: HEADER_PAGE_NUM,
                    root_page_num: INVALID_PAGE_NUM,
                    fanout,
                    scan: ScanState::default(),
                };

                // Bulk load: one insert per record of the base relation
                let relation = HeapFile::open(relation_name, disk, pool)?;
                let mut scanner = relation.scan();
                loop {
                    match scanner.scan_next() {
                        Ok((record, rid)) => {
                            let key = extract_key(&record, attr_byte_offset)?;
                            index.insert(&key, rid)?;
                        }
                        Err(BrambleError::EndOfFile) => break,
                        Err(e) => return Err(e),
                    }
                }

                Ok(index)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the derived index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the relation this index was built over.
    pub fn relation_name(&self) -> &str {
        &self.relation_name
    }

    /// Returns the attribute byte offset the keys are extracted at.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    /// Inserts a (key, rid) entry.
    ///
    /// Descends to the proper leaf, splitting bottom-up as nodes fill; a
    /// split that reaches the root grows the tree by one level and rewrites
    /// the header's root pointer.
    pub fn insert(&mut self, key: &Key, rid: RecordId) -> Result<()> {
        if self.root_page_num == INVALID_PAGE_NUM {
            return self.bootstrap(key, rid);
        }

        // Descend internal levels, remembering the spine. Each node is
        // unpinned before its child is touched.
        let mut path: Vec<u32> = Vec::new();
        let mut page_num = self.root_page_num;
        let leaf_num = loop {
            let guard = self.pager.read_page(page_num)?;
            let data = guard.data();
            let level = InternalNode::level(&data[..]);
            let child_index = InternalNode::descend_index(&data[..], key);
            let child = InternalNode::child_at(&data[..], child_index);
            drop(data);
            drop(guard);

            path.push(page_num);
            if level == 1 {
                break child;
            }
            page_num = child;
        };

        let mut pending = self.insert_in_leaf(leaf_num, key, rid)?;
        while let Some(split) = pending {
            pending = match path.pop() {
                Some(parent) => self.insert_in_internal(parent, split)?,
                None => {
                    self.grow_root(split)?;
                    None
                }
            };
        }
        Ok(())
    }

    /// First insert into an empty tree.
    ///
    /// Seeds an internal root with one separator equal to the inserted key
    /// and two leaf children, the left one empty, the right one holding the
    /// entry. The root is an internal node from here on, which keeps every
    /// later split uniform.
    fn bootstrap(&mut self, key: &Key, rid: RecordId) -> Result<()> {
        let (root_num, root_guard) = self.pager.allocate_page()?;
        let (left_num, left_guard) = self.pager.allocate_page()?;
        let (right_num, right_guard) = self.pager.allocate_page()?;

        {
            let mut root = root_guard.data_mut();
            InternalNode::init(&mut root[..], 1);
            InternalNode::set_child_at(&mut root[..], 0, left_num);
            InternalNode::insert_sorted(&mut root[..], key, right_num);
        }
        root_guard.mark_dirty();

        {
            let mut left = left_guard.data_mut();
            LeafNode::init(&mut left[..]);
            LeafNode::set_right_sibling(&mut left[..], right_num);
        }
        left_guard.mark_dirty();

        {
            let mut right = right_guard.data_mut();
            LeafNode::init(&mut right[..]);
            LeafNode::insert_sorted(&mut right[..], key, rid);
        }
        right_guard.mark_dirty();

        drop(root_guard);
        drop(left_guard);
        drop(right_guard);

        self.root_page_num = root_num;
        self.write_root_to_header()
    }

    /// Inserts into a leaf, splitting it when full.
    ///
    /// Returns the copied-up (key, page) pair when a split occurred.
    fn insert_in_leaf(&mut self, leaf_num: u32, key: &Key, rid: RecordId) -> Result<Option<Split>> {
        let guard = self.pager.read_page(leaf_num)?;

        let len = LeafNode::num_keys(&guard.data()[..]);
        if len < self.fanout.leaf {
            LeafNode::insert_sorted(&mut guard.data_mut()[..], key, rid);
            guard.mark_dirty();
            return Ok(None);
        }

        // Full: move the upper half to a fresh sibling
        let (new_num, new_guard) = self.pager.allocate_page()?;
        let split_key;
        {
            let mut old = guard.data_mut();
            let mut new = new_guard.data_mut();
            LeafNode::init(&mut new[..]);
            LeafNode::split_upper_half(&mut old[..], &mut new[..], self.fanout.leaf / 2);

            // Both halves are roomy now; the incoming entry picks its side
            if compare_keys(key, &LeafNode::key_at(&new[..], 0)) == Ordering::Less {
                LeafNode::insert_sorted(&mut old[..], key, rid);
            } else {
                LeafNode::insert_sorted(&mut new[..], key, rid);
            }

            // Splice the new leaf into the sibling chain
            LeafNode::set_right_sibling(&mut new[..], LeafNode::right_sibling(&old[..]));
            LeafNode::set_right_sibling(&mut old[..], new_num);

            split_key = LeafNode::key_at(&new[..], 0);
        }
        guard.mark_dirty();
        new_guard.mark_dirty();

        Ok(Some(Split {
            key: split_key,
            page_num: new_num,
        }))
    }

    /// Folds a child split into an internal node, splitting it when full.
    ///
    /// Returns the pushed-up (key, page) pair when this node split too.
    fn insert_in_internal(&mut self, page_num: u32, split: Split) -> Result<Option<Split>> {
        let guard = self.pager.read_page(page_num)?;

        let len = InternalNode::num_keys(&guard.data()[..]);
        if len < self.fanout.internal {
            InternalNode::insert_sorted(&mut guard.data_mut()[..], &split.key, split.page_num);
            guard.mark_dirty();
            return Ok(None);
        }

        let (new_num, new_guard) = self.pager.allocate_page()?;
        let push_up;
        {
            let mut old = guard.data_mut();
            let mut new = new_guard.data_mut();
            InternalNode::split_upper_half(&mut old[..], &mut new[..], self.fanout.internal / 2);

            // Unlike leaves, the separator chosen here moves up and leaves
            // this level entirely.
            if compare_keys(&split.key, &InternalNode::key_at(&new[..], 0)) == Ordering::Less {
                InternalNode::insert_sorted(&mut old[..], &split.key, split.page_num);
                let (mid_key, trailing_child) = InternalNode::remove_last(&mut old[..]);
                InternalNode::set_child_at(&mut new[..], 0, trailing_child);
                push_up = mid_key;
            } else {
                InternalNode::insert_sorted(&mut new[..], &split.key, split.page_num);
                push_up = InternalNode::remove_first(&mut new[..]);
            }
        }
        guard.mark_dirty();
        new_guard.mark_dirty();

        Ok(Some(Split {
            key: push_up,
            page_num: new_num,
        }))
    }

    /// Grows a new root above a split that propagated past the old root.
    fn grow_root(&mut self, split: Split) -> Result<()> {
        let old_root = self.root_page_num;
        let old_level = {
            let guard = self.pager.read_page(old_root)?;
            let data = guard.data();
            InternalNode::level(&data[..])
        };

        let (new_root_num, guard) = self.pager.allocate_page()?;
        {
            let mut data = guard.data_mut();
            InternalNode::init(&mut data[..], old_level + 1);
            InternalNode::set_child_at(&mut data[..], 0, old_root);
            InternalNode::insert_sorted(&mut data[..], &split.key, split.page_num);
        }
        guard.mark_dirty();
        drop(guard);

        self.root_page_num = new_root_num;
        self.write_root_to_header()
    }

    /// Persists the current root page number into the header page.
    fn write_root_to_header(&self) -> Result<()> {
        let guard = self.pager.read_page(self.header_page_num)?;
        IndexHeader::write_root(&mut guard.data_mut()[..], self.root_page_num);
        guard.mark_dirty();
        Ok(())
    }

    /// Walks the whole tree checking its structural invariants.
    ///
    /// Verifies that all leaves sit at the same depth, that the sibling
    /// chain visits every leaf exactly once in ascending key order, and
    /// that keys are non-decreasing along the chain. Returns a summary.
    pub fn validate(&self) -> Result<TreeStats> {
        if self.root_page_num == INVALID_PAGE_NUM {
            return Ok(TreeStats {
                depth: 0,
                leaf_pages: 0,
                entries: 0,
            });
        }

        let mut leaves_in_tree_order = Vec::new();
        let depth = self.collect_leaves(self.root_page_num, &mut leaves_in_tree_order)?;

        // The sibling chain from the leftmost leaf must visit the same
        // leaves in the same order.
        let mut entries = 0;
        let mut chain = Vec::new();
        let mut previous_key: Option<Key> = None;
        let mut page_num = leaves_in_tree_order[0];
        while page_num != INVALID_PAGE_NUM {
            if chain.len() > leaves_in_tree_order.len() {
                return Err(BrambleError::Internal(
                    "sibling chain longer than the set of reachable leaves".to_string(),
                ));
            }
            chain.push(page_num);
            let guard = self.pager.read_page(page_num)?;
            let data = guard.data();
            let len = LeafNode::num_keys(&data[..]);
            for slot in 0..len {
                let key = LeafNode::key_at(&data[..], slot);
                if let Some(prev) = previous_key {
                    if compare_keys(&prev, &key) == Ordering::Greater {
                        return Err(BrambleError::Internal(format!(
                            "keys out of order across the sibling chain at page {}",
                            page_num
                        )));
                    }
                }
                previous_key = Some(key);
            }
            entries += len;
            page_num = LeafNode::right_sibling(&data[..]);
        }

        if chain != leaves_in_tree_order {
            return Err(BrambleError::Internal(
                "sibling chain disagrees with tree order".to_string(),
            ));
        }

        Ok(TreeStats {
            depth,
            leaf_pages: chain.len(),
            entries,
        })
    }

    /// Depth-first walk collecting leaves left to right. Returns the number
    /// of internal levels above the leaves, and fails if subtrees disagree.
    fn collect_leaves(&self, page_num: u32, leaves: &mut Vec<u32>) -> Result<u32> {
        let (level, children) = {
            let guard = self.pager.read_page(page_num)?;
            let data = guard.data();
            let len = InternalNode::num_keys(&data[..]);
            let children: Vec<u32> = (0..=len)
                .map(|i| InternalNode::child_at(&data[..], i))
                .collect();
            (InternalNode::level(&data[..]), children)
        };

        let mut depth = None;
        for child in children {
            let child_depth = if level == 1 {
                leaves.push(child);
                0
            } else {
                self.collect_leaves(child, leaves)?
            };
            match depth {
                None => depth = Some(child_depth),
                Some(d) if d != child_depth => {
                    return Err(BrambleError::Internal(format!(
                        "leaves at unequal depth under page {}",
                        page_num
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(depth.unwrap_or(0) + 1)
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        // End any live scan, flush, and release the file; failures are
        // absorbed.
        if self.scan.executing {
            let _ = self.end_scan();
        }
        let _ = self.pager.flush();
        let _ = self.pager.close();
    }
}
