//! Pager: pinned-page access for one file, tying the buffer pool to disk.

use crate::disk::DiskManager;
use bramble_buffer::{BufferPool, EvictedPage, FrameView};
use bramble_common::page::{PageId, PAGE_SIZE};
use bramble_common::Result;
use std::cell::Cell;
use std::sync::Arc;

/// Per-file façade over the buffer pool and the disk manager.
///
/// Every page access goes through here: reads pin the page (loading it from
/// disk on a pool miss), allocations extend the file and pin the fresh page,
/// and dirty pages evicted by the pool are written back before the evicting
/// operation continues.
pub struct Pager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    file_id: u32,
}

impl Pager {
    /// Creates a pager for one open file.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>, file_id: u32) -> Self {
        Self {
            disk,
            pool,
            file_id,
        }
    }

    /// Returns the file ID this pager serves.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        self.disk.num_pages(self.file_id)
    }

    fn page_id(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    /// Writes an evicted dirty page back to its file.
    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(ev) = evicted {
            self.disk.write_page(ev.page_id, &ev.data)?;
        }
        Ok(())
    }

    /// Pins a page and leaves it pinned, without handing out a guard.
    ///
    /// Used for the scan's current leaf, the one pin that outlives a public
    /// operation. Pair with `unpin`.
    pub fn pin(&self, page_num: u32) -> Result<()> {
        let pid = self.page_id(page_num);
        if self.pool.fetch_page(pid).is_some() {
            return Ok(());
        }
        let data = self.disk.read_page(pid)?;
        let (_view, evicted) = self.pool.load_page(pid, &data)?;
        self.write_back(evicted)
    }

    /// Releases a pin taken with `pin`.
    pub fn unpin(&self, page_num: u32, dirty: bool) {
        self.pool.unpin_page(self.page_id(page_num), dirty);
    }

    /// Reads a page, pinning it for the lifetime of the returned guard.
    pub fn read_page(&self, page_num: u32) -> Result<PinnedPage<'_>> {
        let pid = self.page_id(page_num);
        let view = match self.pool.fetch_page(pid) {
            Some(view) => view,
            None => {
                let data = self.disk.read_page(pid)?;
                let (view, evicted) = self.pool.load_page(pid, &data)?;
                self.write_back(evicted)?;
                view
            }
        };
        Ok(PinnedPage {
            pool: &self.pool,
            page_id: pid,
            view,
            dirty: Cell::new(false),
        })
    }

    /// Allocates a fresh zeroed page at the end of the file, pinned.
    pub fn allocate_page(&self) -> Result<(u32, PinnedPage<'_>)> {
        let page_num = self.disk.allocate_page(self.file_id)?;
        let pid = self.page_id(page_num);
        let (view, evicted) = self.pool.new_page(pid)?;
        self.write_back(evicted)?;
        Ok((
            page_num,
            PinnedPage {
                pool: &self.pool,
                page_id: pid,
                view,
                dirty: Cell::new(false),
            },
        ))
    }

    /// Closes the underlying file handle, syncing it first.
    pub fn close(&self) -> Result<()> {
        self.disk.close_file(self.file_id)
    }

    /// Writes this file's dirty pages to disk and syncs the file.
    pub fn flush(&self) -> Result<()> {
        self.pool
            .flush_file(self.file_id, |pid, data| {
                let mut page = [0u8; PAGE_SIZE];
                page.copy_from_slice(data);
                self.disk.write_page(pid, &page)
            })?;
        self.disk.sync(self.file_id)
    }
}

/// RAII pin on a single page.
///
/// Dropping the guard unpins the page; the dirty flag handed to the pool is
/// whether `mark_dirty` was called while the guard was alive.
pub struct PinnedPage<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    view: FrameView<'a>,
    dirty: Cell<bool>,
}

impl<'a> PinnedPage<'a> {
    /// Returns the page number within the file.
    pub fn page_num(&self) -> u32 {
        self.page_id.page_num
    }

    /// Returns read access to the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.view.read()
    }

    /// Returns write access to the page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.view.write()
    }

    /// Records that this page was written; the unpin on drop will carry the
    /// dirty flag.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty.get());
    }
}
