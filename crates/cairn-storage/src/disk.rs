//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use cairn_buffer::DiskManager;
use cairn_common::page::{PageId, PAGE_SIZE};
use cairn_common::Result;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for the data file.
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

/// Manages reading and writing pages of a single data file.
///
/// Pages live at `page_id * PAGE_SIZE` offsets. Reads past the end of the
/// file yield a zeroed page, so freshly allocated pages need no eager
/// write. Page 0 is reserved for the index header page; allocation hands
/// out ids starting at 1 and reuses deallocated ids first.
pub struct FileDiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// File handle and allocation state.
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    /// The data file.
    file: File,
    /// Number of pages the file currently spans.
    num_pages: u32,
    /// Deallocated ids available for reuse.
    free: BTreeSet<PageId>,
}

impl FileDiskManager {
    /// Data file name within the data directory.
    const DATA_FILE: &'static str = "cairn.dat";

    /// Creates a new disk manager, creating the data file if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(Self::DATA_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free: BTreeSet::new(),
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the number of pages the data file spans.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        // Pages beyond the file end have never been written: all zeroes.
        if page_id.0 >= inner.num_pages {
            buf.fill(0);
            return Ok(());
        }

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(buf)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        // Track the extension if we wrote past the old end.
        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_id) = inner.free.iter().next().copied() {
            inner.free.remove(&page_id);
            tracing::trace!("allocate_page reused {}", page_id);
            return Ok(page_id);
        }

        // Page 0 is the reserved header page.
        let page_id = PageId(inner.num_pages.max(1));

        // Extend the file with a zeroed page so later reads succeed.
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.num_pages = page_id.0 + 1;
        tracing::trace!("allocate_page extended file to {}", page_id);
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.free.insert(page_id);
        tracing::trace!("deallocate_page {}", page_id);
        Ok(())
    }
}
