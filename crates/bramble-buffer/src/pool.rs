//! Buffer pool manager.
//!
//! The pool is split in two: a single mutex guards all bookkeeping (which
//! page sits in which frame, pin counts, dirty and referenced bits, the free
//! list and the clock hand), while the page bytes live in a per-frame
//! `RwLock` array outside it. Operations take the bookkeeping lock briefly
//! to pin or place a page, then touch bytes through a [`FrameView`] without
//! holding it. Lock order is bookkeeping before bytes, never the reverse.
//!
//! Eviction never does I/O. When a dirty page loses its frame, its bytes are
//! handed back to the caller as an [`EvictedPage`] to be written out; the
//! pager is the place that knows which file they belong to.

use crate::frame::FrameMeta;
use crate::replacer::ClockSweep;
use bramble_common::config::StorageConfig;
use bramble_common::page::{PageId, PAGE_SIZE};
use bramble_common::{BrambleError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use sysinfo::System;

/// Floor for `auto_sized` pools, so caching stays useful on small machines.
const MIN_AUTO_FRAMES: usize = 1_000;

/// A dirty page that lost its frame. The caller must write it to disk.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 4096 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

/// Bookkeeping half of the pool, all under one lock.
struct PoolState {
    /// One record per frame, parallel to the byte array.
    metas: Vec<FrameMeta>,
    /// Which frame each resident page occupies.
    resident: HashMap<PageId, usize>,
    /// Frames that have never held a page since their last release.
    free: Vec<usize>,
    /// Eviction policy state.
    sweep: ClockSweep,
}

/// Buffer pool manager.
///
/// Pages are pinned on every fetch and on placement of a new page; a pinned
/// page keeps its frame until every pin is released. Unpinned pages stay
/// cached and are reclaimed by a clock sweep when a frame is needed.
pub struct BufferPool {
    state: Mutex<PoolState>,
    /// Page bytes, one slot per frame.
    pages: Vec<RwLock<Box<[u8; PAGE_SIZE]>>>,
}

impl BufferPool {
    /// Creates a pool with a fixed number of frames.
    pub fn new(config: BufferPoolConfig) -> Self {
        let n = config.num_frames;
        Self {
            state: Mutex::new(PoolState {
                metas: (0..n).map(|_| FrameMeta::default()).collect(),
                resident: HashMap::with_capacity(n),
                // Popped from the back, so low frame indexes go out first
                free: (0..n).rev().collect(),
                sweep: ClockSweep::new(),
            }),
            pages: (0..n)
                .map(|_| RwLock::new(Box::new([0u8; PAGE_SIZE])))
                .collect(),
        }
    }

    /// Creates a pool sized to a quarter of currently available memory,
    /// never fewer than `MIN_AUTO_FRAMES` frames.
    pub fn auto_sized() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let budget = sys.available_memory() as usize / 4;
        let num_frames = (budget / PAGE_SIZE).max(MIN_AUTO_FRAMES);
        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.pages.len()
    }

    /// Returns the number of frames that have never been occupied.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns the number of resident pages.
    pub fn page_count(&self) -> usize {
        self.state.lock().resident.len()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().resident.contains_key(&page_id)
    }

    /// Pins a resident page and returns a view of its bytes. Returns None on
    /// a miss; loading from disk is the caller's business.
    pub fn fetch_page(&self, page_id: PageId) -> Option<FrameView<'_>> {
        let mut state = self.state.lock();
        let idx = match state.resident.get(&page_id) {
            Some(&idx) => idx,
            None => return None,
        };
        state.metas[idx].pin_count += 1;
        state.metas[idx].referenced = true;
        Some(FrameView {
            bytes: &self.pages[idx],
        })
    }

    /// Places a fresh page, zeroed and pinned once. If the page is already
    /// resident it is pinned and returned as-is.
    ///
    /// The second half of the result is a dirty page that lost its frame to
    /// make room; the caller must write it out.
    pub fn new_page(&self, page_id: PageId) -> Result<(FrameView<'_>, Option<EvictedPage>)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(&idx) = state.resident.get(&page_id) {
            state.metas[idx].pin_count += 1;
            state.metas[idx].referenced = true;
            return Ok((
                FrameView {
                    bytes: &self.pages[idx],
                },
                None,
            ));
        }

        let (idx, evicted) = self.take_frame(state)?;

        self.pages[idx].write().fill(0);
        state.metas[idx] = FrameMeta {
            page: Some(page_id),
            pin_count: 1,
            dirty: false,
            referenced: true,
        };
        state.resident.insert(page_id, idx);

        Ok((
            FrameView {
                bytes: &self.pages[idx],
            },
            evicted,
        ))
    }

    /// Places a page read from disk, copying its bytes in. Pinned once.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(FrameView<'_>, Option<EvictedPage>)> {
        let (view, evicted) = self.new_page(page_id)?;
        {
            let mut bytes = view.write();
            let len = data.len().min(PAGE_SIZE);
            bytes[..len].copy_from_slice(&data[..len]);
        }
        Ok((view, evicted))
    }

    /// Finds a frame for a new page: the free list first, then the sweep.
    fn take_frame(&self, state: &mut PoolState) -> Result<(usize, Option<EvictedPage>)> {
        if let Some(idx) = state.free.pop() {
            return Ok((idx, None));
        }

        let idx = state
            .sweep
            .victim(&mut state.metas)
            .ok_or(BrambleError::BufferPoolFull)?;

        let outgoing = state.metas[idx].page.take();
        let dirty = state.metas[idx].dirty;
        let evicted = match outgoing {
            Some(page_id) => {
                state.resident.remove(&page_id);
                if dirty {
                    let mut data = Box::new([0u8; PAGE_SIZE]);
                    data.copy_from_slice(&self.pages[idx].read()[..]);
                    Some(EvictedPage { page_id, data })
                } else {
                    None
                }
            }
            None => None,
        };

        Ok((idx, evicted))
    }

    /// Releases one pin. A true dirty flag sticks to the frame until the
    /// next flush; unpinning clean never launders an earlier write.
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let mut state = self.state.lock();
        let idx = match state.resident.get(&page_id) {
            Some(&idx) => idx,
            None => return false,
        };
        let meta = &mut state.metas[idx];
        if dirty {
            meta.dirty = true;
        }
        meta.pin_count = meta.pin_count.saturating_sub(1);
        true
    }

    /// Writes one page through the callback if it is resident and dirty.
    /// Returns true if it was written.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let idx = match state.resident.get(&page_id) {
            Some(&idx) => idx,
            None => return Ok(false),
        };
        if !state.metas[idx].dirty {
            return Ok(false);
        }
        flush_fn(page_id, &self.pages[idx].read()[..])?;
        state.metas[idx].dirty = false;
        Ok(true)
    }

    /// Writes every dirty page of one file through the callback.
    /// Returns the number of pages written.
    pub fn flush_file<F>(&self, file_id: u32, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        self.flush_matching(|page_id| page_id.file_id == file_id, &mut flush_fn)
    }

    /// Writes every dirty page through the callback.
    /// Returns the number of pages written.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        self.flush_matching(|_| true, &mut flush_fn)
    }

    fn flush_matching<P, F>(&self, keep: P, flush_fn: &mut F) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut flushed = 0;
        for (idx, meta) in state.metas.iter_mut().enumerate() {
            let page_id = match meta.page {
                Some(page_id) if meta.dirty && keep(page_id) => page_id,
                _ => continue,
            };
            flush_fn(page_id, &self.pages[idx].read()[..])?;
            meta.dirty = false;
            flushed += 1;
        }

        Ok(flushed)
    }

    /// Returns a snapshot of the pool's occupancy.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut stats = BufferPoolStats {
            total_frames: self.pages.len(),
            free_frames: state.free.len(),
            used_frames: 0,
            pinned_frames: 0,
            dirty_frames: 0,
        };
        for meta in &state.metas {
            if meta.page.is_none() {
                continue;
            }
            stats.used_frames += 1;
            if meta.pin_count > 0 {
                stats.pinned_frames += 1;
            }
            if meta.dirty {
                stats.dirty_frames += 1;
            }
        }
        stats
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of never-occupied frames.
    pub free_frames: usize,
    /// Number of frames holding a page.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// Access to the bytes of a pinned page.
///
/// The view itself holds no pin; the pin taken when the page was fetched or
/// placed does, and whoever took it is responsible for `unpin_page`. Byte
/// locks are taken per read/write call, not for the view's lifetime.
pub struct FrameView<'a> {
    bytes: &'a RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl<'a> FrameView<'a> {
    /// Read access to the page bytes.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>> {
        self.bytes.read()
    }

    /// Write access to the page bytes.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>> {
        self.bytes.write()
    }
}
