//! Range scan engine for the B+ tree index.
//!
//! A scan seeks the first qualifying leaf by a root-to-leaf descent, then
//! advances along the leaf sibling chain. The current leaf stays pinned
//! between `scan_next` calls; it is the only pin that outlives a public
//! operation.

use super::index::BTreeIndex;
use super::node::{InternalNode, LeafNode};
use super::types::{compare_keys, Key, ScanOp};
use bramble_common::page::{RecordId, INVALID_PAGE_NUM};
use bramble_common::{BrambleError, Result};
use std::cmp::Ordering;

/// State of the (at most one) live scan of an index instance.
#[derive(Debug)]
pub(crate) struct ScanState {
    pub executing: bool,
    pub low_val: Key,
    pub high_val: Key,
    pub low_op: ScanOp,
    pub high_op: ScanOp,
    /// Leaf currently pinned by the scan; INVALID past the rightmost leaf.
    pub current_page_num: u32,
    /// Slot of the next entry to return in the current leaf.
    pub next_entry: usize,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            executing: false,
            low_val: Default::default(),
            high_val: Default::default(),
            low_op: ScanOp::Gte,
            high_op: ScanOp::Lte,
            current_page_num: INVALID_PAGE_NUM,
            next_entry: 0,
        }
    }
}

/// Where the leaf seek landed.
enum SeekOutcome {
    /// Slot of the first qualifying entry.
    Found(usize),
    /// A key beyond the high bound appeared; no entry can qualify.
    PastRange,
    /// Nothing here yet; continue to this right sibling (INVALID at the end).
    Continue(u32),
}

impl BTreeIndex {
    /// Begins a range scan over `[low, high]` under the given operators.
    ///
    /// Any scan already in progress is ended first. Fails with
    /// `BadScanRange` when low > high, `BadOpcodes` unless the operators are
    /// GT/GTE and LT/LTE, and `NoSuchKeyFound` when no entry qualifies; in
    /// every failure case no scan is left executing.
    pub fn start_scan(
        &mut self,
        low: &Key,
        low_op: ScanOp,
        high: &Key,
        high_op: ScanOp,
    ) -> Result<()> {
        if self.scan.executing {
            self.end_scan()?;
        }

        if compare_keys(low, high) == Ordering::Greater {
            return Err(BrambleError::BadScanRange);
        }
        if !matches!(low_op, ScanOp::Gt | ScanOp::Gte) || !matches!(high_op, ScanOp::Lt | ScanOp::Lte)
        {
            return Err(BrambleError::BadOpcodes);
        }

        self.scan.low_val = *low;
        self.scan.high_val = *high;
        self.scan.low_op = low_op;
        self.scan.high_op = high_op;
        self.scan.next_entry = 0;
        self.scan.current_page_num = INVALID_PAGE_NUM;

        if self.root_page_num == INVALID_PAGE_NUM {
            return Err(BrambleError::NoSuchKeyFound);
        }

        // Descend to the first leaf that may hold a qualifying key
        let inclusive = matches!(low_op, ScanOp::Gte);
        let mut page_num = self.root_page_num;
        let mut leaf_num = loop {
            let guard = self.pager.read_page(page_num)?;
            let data = guard.data();
            let level = InternalNode::level(&data[..]);
            let index = InternalNode::seek_index(&data[..], low, inclusive);
            let child = InternalNode::child_at(&data[..], index);
            drop(data);
            drop(guard);

            if level == 1 {
                break child;
            }
            page_num = child;
        };

        // Walk the sibling chain until a qualifying entry appears or the
        // range is provably empty.
        loop {
            self.pager.pin(leaf_num)?;

            let outcome = {
                let guard = self.pager.read_page(leaf_num)?;
                let data = guard.data();
                self.seek_in_leaf(&data[..])
            };

            match outcome {
                SeekOutcome::Found(slot) => {
                    self.scan.current_page_num = leaf_num;
                    self.scan.next_entry = slot;
                    self.scan.executing = true;
                    return Ok(());
                }
                SeekOutcome::PastRange => {
                    self.pager.unpin(leaf_num, false);
                    return Err(BrambleError::NoSuchKeyFound);
                }
                SeekOutcome::Continue(sibling) => {
                    self.pager.unpin(leaf_num, false);
                    if sibling == INVALID_PAGE_NUM {
                        return Err(BrambleError::NoSuchKeyFound);
                    }
                    leaf_num = sibling;
                }
            }
        }
    }

    /// Scans one leaf for the first qualifying entry.
    fn seek_in_leaf(&self, data: &[u8]) -> SeekOutcome {
        let len = LeafNode::num_keys(data);
        for slot in 0..len {
            let key = LeafNode::key_at(data, slot);
            if self.match_range(&key) {
                return SeekOutcome::Found(slot);
            }
            // Keys ascend within and across leaves, so once a key fails the
            // high bound the range is exhausted.
            if !self.fits_high(&key) {
                return SeekOutcome::PastRange;
            }
        }
        SeekOutcome::Continue(LeafNode::right_sibling(data))
    }

    /// Returns the RecordId of the next entry matching the scan.
    ///
    /// Fails with `ScanNotInitialized` when no scan is live and with
    /// `IndexScanCompleted` once the range is exhausted; completion tears the
    /// scan down before failing.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        if !self.scan.executing {
            return Err(BrambleError::ScanNotInitialized);
        }

        if self.scan.current_page_num == INVALID_PAGE_NUM {
            self.teardown_scan();
            return Err(BrambleError::IndexScanCompleted);
        }

        let current = self.scan.current_page_num;
        let (rid, at_last_slot, sibling) = {
            let guard = self.pager.read_page(current)?;
            let data = guard.data();
            let len = LeafNode::num_keys(&data[..]);

            if self.scan.next_entry >= len
                || !self.match_range(&LeafNode::key_at(&data[..], self.scan.next_entry))
            {
                drop(data);
                drop(guard);
                self.teardown_scan();
                return Err(BrambleError::IndexScanCompleted);
            }

            (
                LeafNode::rid_at(&data[..], self.scan.next_entry),
                self.scan.next_entry + 1 == len,
                LeafNode::right_sibling(&data[..]),
            )
        };

        if at_last_slot {
            // Hand the pin over to the right sibling
            self.pager.unpin(current, false);
            self.scan.current_page_num = sibling;
            self.scan.next_entry = 0;
            if sibling != INVALID_PAGE_NUM {
                self.pager.pin(sibling)?;
            }
        } else {
            self.scan.next_entry += 1;
        }

        Ok(rid)
    }

    /// Terminates the current scan, releasing the pinned leaf.
    ///
    /// Fails with `ScanNotInitialized` when no scan is executing.
    pub fn end_scan(&mut self) -> Result<()> {
        if !self.scan.executing {
            return Err(BrambleError::ScanNotInitialized);
        }
        self.teardown_scan();
        Ok(())
    }

    /// Clears scan state unconditionally, unpinning the current leaf.
    fn teardown_scan(&mut self) {
        if self.scan.current_page_num != INVALID_PAGE_NUM {
            self.pager.unpin(self.scan.current_page_num, false);
            self.scan.current_page_num = INVALID_PAGE_NUM;
        }
        self.scan.executing = false;
        self.scan.next_entry = 0;
    }

    /// True if the key satisfies both bounds of the live range.
    fn match_range(&self, key: &Key) -> bool {
        let low_fit = match self.scan.low_op {
            ScanOp::Gt => compare_keys(key, &self.scan.low_val) == Ordering::Greater,
            _ => compare_keys(key, &self.scan.low_val) != Ordering::Less,
        };
        low_fit && self.fits_high(key)
    }

    /// True if the key satisfies the high bound.
    fn fits_high(&self, key: &Key) -> bool {
        match self.scan.high_op {
            ScanOp::Lt => compare_keys(key, &self.scan.high_val) == Ordering::Less,
            _ => compare_keys(key, &self.scan.high_val) != Ordering::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::constants::{Fanout, KEY_SIZE};
    use crate::btree::index::tests::test_env;
    use crate::heap::HeapFile;

    fn key(i: usize) -> Key {
        let mut k = [0u8; KEY_SIZE];
        k.copy_from_slice(&format!("{:05} stri", i).as_bytes()[..KEY_SIZE]);
        k
    }

    fn build_index(entries: usize, fanout: Fanout) -> (BTreeIndex, tempfile::TempDir) {
        let (disk, pool, dir) = test_env(200);
        HeapFile::create("relA", disk.clone(), pool.clone()).unwrap();
        let mut index =
            BTreeIndex::open_with_fanout("relA", 0, disk, pool, fanout).unwrap();
        for i in 0..entries {
            index
                .insert(&key(i), RecordId::new(1 + (i / 100) as u32, (i % 100) as u16))
                .unwrap();
        }
        (index, dir)
    }

    fn drain(index: &mut BTreeIndex) -> Vec<RecordId> {
        let mut rids = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => rids.push(rid),
                Err(BrambleError::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected scan error: {}", e),
            }
        }
        rids
    }

    #[test]
    fn test_scan_gt_lt_excludes_bounds() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        index
            .start_scan(&key(5), ScanOp::Gt, &key(15), ScanOp::Lt)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids.len(), 9); // 6..=14
    }

    #[test]
    fn test_scan_gte_lte_includes_bounds() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        index
            .start_scan(&key(20), ScanOp::Gte, &key(35), ScanOp::Lte)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids.len(), 16); // 20..=35
    }

    #[test]
    fn test_scan_point_lookup() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        index
            .start_scan(&key(10), ScanOp::Gte, &key(10), ScanOp::Lte)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids, vec![RecordId::new(1, 10)]);
    }

    #[test]
    fn test_scan_empty_range_fails() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        // (0, 1) exclusive on both integer neighbors holds nothing
        let result = index.start_scan(&key(0), ScanOp::Gt, &key(1), ScanOp::Lt);
        assert!(matches!(result, Err(BrambleError::NoSuchKeyFound)));
        assert!(!index.scan.executing);

        // scan_next afterwards reports no live scan
        assert!(matches!(
            index.scan_next(),
            Err(BrambleError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_scan_bad_range() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        let result = index.start_scan(&key(10), ScanOp::Gt, &key(5), ScanOp::Lt);
        assert!(matches!(result, Err(BrambleError::BadScanRange)));
    }

    #[test]
    fn test_scan_bad_opcodes() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        for (low_op, high_op) in [
            (ScanOp::Lt, ScanOp::Lt),
            (ScanOp::Lte, ScanOp::Lt),
            (ScanOp::Gt, ScanOp::Gt),
            (ScanOp::Gt, ScanOp::Gte),
        ] {
            let result = index.start_scan(&key(5), low_op, &key(15), high_op);
            assert!(matches!(result, Err(BrambleError::BadOpcodes)));
        }
    }

    #[test]
    fn test_scan_not_initialized() {
        let (mut index, _dir) = build_index(10, Fanout::new(4, 4));

        assert!(matches!(
            index.end_scan(),
            Err(BrambleError::ScanNotInitialized)
        ));
        assert!(matches!(
            index.scan_next(),
            Err(BrambleError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_scan_on_empty_tree() {
        let (disk, pool, _dir) = test_env(50);
        HeapFile::create("relA", disk.clone(), pool.clone()).unwrap();
        let mut index =
            BTreeIndex::open_with_fanout("relA", 0, disk, pool, Fanout::new(4, 4)).unwrap();

        let result = index.start_scan(&key(0), ScanOp::Gte, &key(100), ScanOp::Lte);
        assert!(matches!(result, Err(BrambleError::NoSuchKeyFound)));
    }

    #[test]
    fn test_scan_full_range() {
        let (mut index, _dir) = build_index(300, Fanout::new(4, 4));

        index
            .start_scan(&key(0), ScanOp::Gte, &key(300), ScanOp::Lt)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids.len(), 300);

        // Ascending key order maps to ascending construction order here
        for (i, rid) in rids.iter().enumerate() {
            assert_eq!(*rid, RecordId::new(1 + (i / 100) as u32, (i % 100) as u16));
        }
    }

    #[test]
    fn test_scan_yields_non_decreasing_keys_within_operators() {
        // Covered indirectly by the rid order above; here duplicates are in
        // play, so the rid sequence for one key follows insertion order.
        let (disk, pool, _dir) = test_env(100);
        HeapFile::create("relA", disk.clone(), pool.clone()).unwrap();
        let mut index =
            BTreeIndex::open_with_fanout("relA", 0, disk, pool, Fanout::new(4, 4)).unwrap();

        for slot in 0..20u16 {
            index.insert(&key(3), RecordId::new(1, slot)).unwrap();
        }

        index
            .start_scan(&key(3), ScanOp::Gte, &key(3), ScanOp::Lte)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids.len(), 20);
        for (slot, rid) in rids.iter().enumerate() {
            assert_eq!(*rid, RecordId::new(1, slot as u16));
        }
    }

    #[test]
    fn test_second_start_scan_overrides_first() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        index
            .start_scan(&key(0), ScanOp::Gte, &key(99), ScanOp::Lte)
            .unwrap();
        let _ = index.scan_next().unwrap();

        // Starting again without end_scan is allowed and resets the range
        index
            .start_scan(&key(50), ScanOp::Gte, &key(52), ScanOp::Lte)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids.len(), 3);
    }

    #[test]
    fn test_end_scan_then_not_initialized() {
        let (mut index, _dir) = build_index(100, Fanout::new(4, 4));

        index
            .start_scan(&key(0), ScanOp::Gte, &key(99), ScanOp::Lte)
            .unwrap();
        index.end_scan().unwrap();

        assert!(matches!(
            index.end_scan(),
            Err(BrambleError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_scan_exhaustion_tears_down() {
        let (mut index, _dir) = build_index(10, Fanout::new(4, 4));

        index
            .start_scan(&key(0), ScanOp::Gte, &key(9), ScanOp::Lte)
            .unwrap();
        let rids = drain(&mut index);
        assert_eq!(rids.len(), 10);

        // Completion ended the scan internally
        assert!(matches!(
            index.scan_next(),
            Err(BrambleError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_scan_across_many_leaves_default_fanout() {
        let (mut index, _dir) = build_index(2000, Fanout::default());

        index
            .start_scan(&key(100), ScanOp::Gt, &key(150), ScanOp::Lt)
            .unwrap();
        assert_eq!(drain(&mut index).len(), 49);

        index
            .start_scan(&key(0), ScanOp::Gte, &key(2000), ScanOp::Lt)
            .unwrap();
        assert_eq!(drain(&mut index).len(), 2000);
    }
}
