//! Disk manager interface consumed by the buffer pool.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use cairn_common::page::{PageId, PAGE_SIZE};
use cairn_common::Result;

/// Page-granular storage backing the buffer pool.
///
/// The pool is the only caller: it reads a page's contents on fetch, writes
/// dirty contents back on eviction or flush, and allocates/deallocates pages
/// as the index grows and shrinks. Page 0 is reserved for the index header
/// page and is never handed out by `allocate_page`.
pub trait DiskManager: Send + Sync {
    /// Fills `buf` with the on-disk contents of `page_id`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Persists `buf` as the contents of `page_id`.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Returns a fresh page id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Marks `page_id` reusable by a later allocation.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
}

/// In-memory disk manager.
///
/// Backs the buffer pool with a plain map of page images. Used by unit
/// tests and tools that do not need a data file; reads of never-written
/// pages yield zeroes, matching the file-backed implementation.
pub struct MemDiskManager {
    inner: Mutex<MemDiskInner>,
}

struct MemDiskInner {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    /// Deallocated ids, reused before the counter is bumped.
    free: BTreeSet<PageId>,
    next_page: u32,
}

impl MemDiskManager {
    /// Creates an empty in-memory disk manager.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemDiskInner {
                pages: HashMap::new(),
                free: BTreeSet::new(),
                // Page 0 is the reserved header page.
                next_page: 1,
            }),
        }
    }

    /// Number of pages ever written.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl Default for MemDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let inner = self.inner.lock();
        match inner.pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(&**data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let data = inner
            .pages
            .entry(page_id)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        data.copy_from_slice(buf);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        if let Some(page_id) = inner.free.iter().next().copied() {
            inner.free.remove(&page_id);
            return Ok(page_id);
        }
        let page_id = PageId(inner.next_page);
        inner.next_page += 1;
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pages.remove(&page_id);
        inner.free.insert(page_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_disk_allocate_starts_at_one() {
        let disk = MemDiskManager::new();
        assert_eq!(disk.allocate_page().unwrap(), PageId(1));
        assert_eq!(disk.allocate_page().unwrap(), PageId(2));
    }

    #[test]
    fn test_mem_disk_write_read() {
        let disk = MemDiskManager::new();
        let page_id = disk.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;
        disk.write_page(page_id, &data).unwrap();

        let mut read_back = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back[0], 0xAB);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_mem_disk_read_unwritten_is_zeroed() {
        let disk = MemDiskManager::new();
        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(PageId(99), &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_mem_disk_deallocate_reuses_id() {
        let disk = MemDiskManager::new();
        let p1 = disk.allocate_page().unwrap();
        let _p2 = disk.allocate_page().unwrap();

        disk.deallocate_page(p1).unwrap();
        assert_eq!(disk.allocate_page().unwrap(), p1);
    }

    #[test]
    fn test_mem_disk_deallocate_clears_contents() {
        let disk = MemDiskManager::new();
        let p1 = disk.allocate_page().unwrap();

        let data = [0x11u8; PAGE_SIZE];
        disk.write_page(p1, &data).unwrap();
        disk.deallocate_page(p1).unwrap();

        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(p1, &mut buf).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
    }
}
