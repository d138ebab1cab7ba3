//! Heap file: append-only record storage for a base relation.

use crate::disk::DiskManager;
use crate::heap::page::RecordPage;
use crate::pager::Pager;
use bramble_buffer::BufferPool;
use bramble_common::page::{RecordId, INVALID_PAGE_NUM};
use bramble_common::{BrambleError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// A heap file holding the records of one relation.
///
/// Records are appended to the tail page, spilling onto a freshly allocated
/// page when the tail cannot fit them. Each record is identified by the
/// (page, slot) pair it landed on.
pub struct HeapFile {
    pager: Pager,
    name: String,
    /// Page records are currently appended to (INVALID before the first
    /// append of a new file).
    tail_page: u32,
}

impl HeapFile {
    /// Creates a new heap file. Fails with `FileExists` if the name is taken.
    pub fn create(name: &str, disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Result<Self> {
        let file_id = disk.open_file(name, true)?;
        let pager = Pager::new(disk, pool, file_id);
        Ok(Self {
            pager,
            name: name.to_string(),
            tail_page: INVALID_PAGE_NUM,
        })
    }

    /// Opens an existing heap file. Fails with `FileNotFound` if missing.
    pub fn open(name: &str, disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Result<Self> {
        let file_id = disk.open_file(name, false)?;
        let pager = Pager::new(disk, pool, file_id);
        let tail_page = pager.num_pages()?; // 0 = INVALID when empty
        Ok(Self {
            pager,
            name: name.to_string(),
            tail_page,
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        self.pager.num_pages()
    }

    /// Appends a record, returning its RecordId.
    pub fn append(&mut self, record: &[u8]) -> Result<RecordId> {
        if self.tail_page != INVALID_PAGE_NUM {
            let guard = self.pager.read_page(self.tail_page)?;
            let fits = RecordPage::can_fit(&guard.data()[..], record.len());
            if fits {
                let slot = RecordPage::insert_record(&mut guard.data_mut()[..], record)?;
                guard.mark_dirty();
                return Ok(RecordId::new(self.tail_page, slot));
            }
        }

        // Tail missing or full: start a fresh page
        let (page_num, guard) = self.pager.allocate_page()?;
        let slot = RecordPage::insert_record(&mut guard.data_mut()[..], record)?;
        guard.mark_dirty();
        self.tail_page = page_num;
        Ok(RecordId::new(page_num, slot))
    }

    /// Fetches the record stored at the given RecordId.
    pub fn record(&self, rid: RecordId) -> Result<Bytes> {
        let guard = self.pager.read_page(rid.page_num)?;
        let data = guard.data();
        RecordPage::record(&data[..], rid.slot)
            .map(Bytes::copy_from_slice)
            .ok_or_else(|| BrambleError::RecordNotFound(rid.to_string()))
    }

    /// Returns a scanner positioned before the first record.
    pub fn scan(&self) -> FileScanner<'_> {
        FileScanner {
            heap: self,
            current_page: 1,
            current_slot: 0,
        }
    }

    /// Writes dirty pages to disk and syncs the file.
    pub fn flush(&self) -> Result<()> {
        self.pager.flush()
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        let _ = self.pager.flush();
    }
}

/// Forward scanner over every record of a heap file, in (page, slot) order.
///
/// `scan_next` yields `(record bytes, RecordId)` pairs and fails with
/// `EndOfFile` once the relation is exhausted.
pub struct FileScanner<'a> {
    heap: &'a HeapFile,
    current_page: u32,
    current_slot: u16,
}

impl<'a> FileScanner<'a> {
    /// Advances to the next record.
    pub fn scan_next(&mut self) -> Result<(Bytes, RecordId)> {
        loop {
            if self.current_page > self.heap.num_pages()? {
                return Err(BrambleError::EndOfFile);
            }

            let guard = self.heap.pager.read_page(self.current_page)?;
            let data = guard.data();

            if self.current_slot < RecordPage::slot_count(&data[..]) {
                let slot = self.current_slot;
                let record = RecordPage::record(&data[..], slot)
                    .map(Bytes::copy_from_slice)
                    .ok_or_else(|| {
                        BrambleError::Internal(format!(
                            "slot {} vanished from page {}",
                            slot, self.current_page
                        ))
                    })?;
                let rid = RecordId::new(self.current_page, slot);
                self.current_slot += 1;
                return Ok((record, rid));
            }

            drop(data);
            drop(guard);
            self.current_page += 1;
            self.current_slot = 0;
        }
    }
}
