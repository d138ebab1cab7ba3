//! Disk manager for page-level file I/O.

use bramble_common::config::StorageConfig;
use bramble_common::page::{PageId, INVALID_PAGE_NUM, PAGE_SIZE};
use bramble_common::{BrambleError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Handle for an open data file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// File name inside the data directory.
    name: String,
    /// Number of pages in the file.
    num_pages: u32,
}

struct DiskInner {
    /// Open file handles keyed by file ID.
    files: HashMap<u32, FileHandle>,
    /// File IDs keyed by name.
    by_name: HashMap<String, u32>,
    /// Next file ID to hand out.
    next_file_id: u32,
}

/// Manages reading and writing pages of named files.
///
/// Files are identified by name on open and by a process-local file ID
/// afterwards. Page numbers within a file are dense and monotonically
/// increasing, starting at 1; 0 is the INVALID sentinel and is never
/// allocated.
pub struct DiskManager {
    config: DiskManagerConfig,
    inner: Mutex<DiskInner>,
}

impl DiskManager {
    /// Creates a new disk manager rooted at the configured data directory.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                files: HashMap::new(),
                by_name: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Generates the path for a named file.
    fn file_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(name)
    }

    /// Returns true if a file with the given name exists on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    /// Opens a file by name, returning its file ID.
    ///
    /// With `create` set, the file must not already exist (`FileExists`
    /// otherwise); without it, the file must exist (`FileNotFound`
    /// otherwise). Opening an already-open file returns the existing ID.
    pub fn open_file(&self, name: &str, create: bool) -> Result<u32> {
        let mut inner = self.inner.lock();

        if let Some(&file_id) = inner.by_name.get(name) {
            if create {
                return Err(BrambleError::FileExists(name.to_string()));
            }
            return Ok(file_id);
        }

        let path = self.file_path(name);
        if create && path.exists() {
            return Err(BrambleError::FileExists(name.to_string()));
        }
        if !create && !path.exists() {
            return Err(BrambleError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        inner.by_name.insert(name.to_string(), file_id);

        Ok(file_id)
    }

    /// Closes a file by ID, syncing it first.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.files.remove(&file_id) {
            inner.by_name.remove(&handle.name);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        for (_, handle) in inner.files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Removes a named file from disk, closing it if open.
    pub fn remove_file(&self, name: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if let Some(file_id) = inner.by_name.remove(name) {
                inner.files.remove(&file_id);
            }
        }
        let path = self.file_path(name);
        if !path.exists() {
            return Err(BrambleError::FileNotFound(name.to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = Self::handle_mut(&mut inner, page_id.file_id)?;

        if page_id.page_num == INVALID_PAGE_NUM || page_id.page_num > handle.num_pages {
            return Err(BrambleError::PageNotFound {
                file_id: page_id.file_id,
                page_num: page_id.page_num,
            });
        }

        let offset = (page_id.page_num as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = Self::handle_mut(&mut inner, page_id.file_id)?;

        if page_id.page_num == INVALID_PAGE_NUM || page_id.page_num > handle.num_pages {
            return Err(BrambleError::PageNotFound {
                file_id: page_id.file_id,
                page_num: page_id.page_num,
            });
        }

        let offset = (page_id.page_num as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        Ok(())
    }

    /// Allocates a new page at the end of the file.
    ///
    /// The file is extended with a zeroed page. Returns the new page number.
    pub fn allocate_page(&self, file_id: u32) -> Result<u32> {
        let mut inner = self.inner.lock();
        let handle = Self::handle_mut(&mut inner, file_id)?;

        let page_num = handle.num_pages + 1;
        let offset = (page_num as u64 - 1) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_num;

        Ok(page_num)
    }

    /// Returns the number of pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let mut inner = self.inner.lock();
        let handle = Self::handle_mut(&mut inner, file_id)?;
        Ok(handle.num_pages)
    }

    /// Syncs a file's contents to disk.
    pub fn sync(&self, file_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = Self::handle_mut(&mut inner, file_id)?;
        handle.file.sync_all()?;
        Ok(())
    }

    fn handle_mut(inner: &mut DiskInner, file_id: u32) -> Result<&mut FileHandle> {
        inner
            .files
            .get_mut(&file_id)
            .ok_or_else(|| BrambleError::Internal(format!("file {} not open", file_id)))
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
