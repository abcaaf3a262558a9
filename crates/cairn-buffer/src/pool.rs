//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, VecDeque};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use sysinfo::System;
use cairn_common::page::{PageId, PAGE_SIZE};
use cairn_common::{CairnError, Result};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page id to frame id mapping
/// - Free frame list for unused frames
/// - LRU replacement for eviction, with write-back of dirty victims
/// - Pin counting for concurrent access
///
/// The page table, free list, and frame metadata transitions are protected
/// by a single mutex; disk I/O on the fetch/eviction path happens under it.
/// Page latches are independent of that mutex and are never held by the
/// pool across a public operation.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page table and free list.
    inner: Mutex<PoolInner>,
    /// Page replacement policy.
    replacer: LruReplacer,
    /// Backing storage.
    disk: Arc<dyn DiskManager>,
}

struct PoolInner {
    /// Maps resident page ids to the frames holding them.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page.
    free_list: VecDeque<FrameId>,
}

impl BufferPool {
    /// Creates a new buffer pool backed by `disk`.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskManager>) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: VecDeque<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(num_frames),
                free_list,
            }),
            replacer: LruReplacer::new(num_frames),
            disk,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Queries the system for available memory and allocates 25% of it
    /// for the buffer pool. Minimum 1,000 frames to ensure useful caching
    /// even on low-memory systems.
    pub fn auto_sized(disk: Arc<dyn DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4; // 25% of available RAM
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames }, disk)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Picks a frame to hold a new page: free list first, then eviction.
    ///
    /// A dirty victim is written back before its frame is reused. Any stale
    /// page table entry for the victim is removed. Returns `PoolExhausted`
    /// when every frame is pinned.
    fn take_victim(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self.replacer.victim().ok_or(CairnError::PoolExhausted)?;
        let frame = &self.frames[frame_id.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                // Victims have pin count 0, so the latch is uncontended.
                let data = frame.read_data();
                if let Err(e) = self.disk.write_page(old_page_id, &data) {
                    drop(data);
                    // Frame is untouched; hand it back to the replacer.
                    self.replacer.unpin(frame_id);
                    return Err(e);
                }
                frame.set_dirty(false);
            }
            inner.page_table.remove(&old_page_id);
            tracing::debug!("evicted page {} from {}", old_page_id, frame_id);
        }

        Ok(frame_id)
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The returned frame is pinned; every successful fetch must be matched
    /// by exactly one [`BufferPool::unpin_page`]. Fails with `PoolExhausted`
    /// when the page is absent and every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if !page_id.is_valid() {
            return Err(CairnError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.pin(frame_id);
            return Ok(frame);
        }

        let frame_id = self.take_victim(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        let read_result = {
            let mut data = frame.write_data();
            self.disk.read_page(page_id, &mut data)
        };
        if let Err(e) = read_result {
            inner.page_table.remove(&page_id);
            frame.reset();
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        Ok(frame)
    }

    /// Allocates a new page on disk and pins it into a zeroed frame.
    ///
    /// Victim selection happens before allocation, so an exhausted pool
    /// never consumes a disk page id.
    pub fn new_page(&self) -> Result<(PageId, &BufferFrame)> {
        let mut inner = self.inner.lock();

        let frame_id = self.take_victim(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];
        let page_id = match self.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                frame.reset();
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, frame_id);

        tracing::debug!("new page {} in {}", page_id, frame_id);
        Ok((page_id, frame))
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident or not pinned. When the
    /// pin count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a page's current contents to disk and clears its dirty flag.
    ///
    /// Returns false if the page id is the sentinel or not resident. The
    /// pin state is ignored; callers coordinate with writers themselves.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(false);
        }

        // Pin the frame so it cannot be evicted or remapped while the
        // flush waits for the latch outside the pool mutex.
        let frame = {
            let inner = self.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.pin(frame_id);
            frame
        };

        let result = {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)
        };
        if result.is_ok() {
            frame.set_dirty(false);
        }

        self.unpin_page(page_id, false);
        result.map(|_| true)
    }

    /// Flushes every resident page. Returns the number of pages written.
    pub fn flush_all_pages(&self) -> Result<usize> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        let mut flushed = 0;
        for page_id in page_ids {
            if self.flush_page(page_id)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the pool and deallocates it on disk.
    ///
    /// Returns true if the page was deleted or was not resident at all;
    /// false if the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            // Not resident: vacuous success, but still release the disk page.
            self.disk.deallocate_page(page_id)?;
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_pinned() {
            return Ok(false);
        }

        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        self.disk.deallocate_page(page_id)?;
        tracing::debug!("deleted page {}", page_id);
        Ok(true)
    }

    /// Fetches a page and acquires its latch in shared mode.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        let latch = frame.read_data();
        Ok(PageReadGuard {
            pool: self,
            page_id,
            latch: ManuallyDrop::new(latch),
        })
    }

    /// Fetches a page and acquires its latch in exclusive mode.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        let latch = frame.write_data();
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            latch: ManuallyDrop::new(latch),
            dirty: false,
        })
    }

    /// Fetches a page holding only a pin, no latch.
    ///
    /// Used by iterators that park on a leaf between steps and take short
    /// read latches per access.
    pub fn fetch_page_pin(&self, page_id: PageId) -> Result<PagePin<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PagePin {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Allocates a new page and acquires its latch in exclusive mode.
    pub fn new_page_write(&self) -> Result<PageWriteGuard<'_>> {
        let (page_id, frame) = self.new_page()?;
        let latch = frame.write_data();
        Ok(PageWriteGuard {
            pool: self,
            page_id,
            latch: ManuallyDrop::new(latch),
            dirty: false,
        })
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();

        let mut pinned_count = 0;
        let mut dirty_count = 0;
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII guard holding a pin and a shared latch on a page.
///
/// On drop the latch is released first, then the pin, so a frame only
/// becomes evictable once no latch is held on it.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    latch: ManuallyDrop<RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl PageReadGuard<'_> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page payload.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.latch
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        // Latch before pin; see struct docs.
        unsafe { ManuallyDrop::drop(&mut self.latch) };
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard holding a pin and an exclusive latch on a page.
///
/// Mutable payload access marks the guard dirty; the dirty hint is passed
/// to the pool when the guard drops.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    latch: ManuallyDrop<RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>>,
    dirty: bool,
}

impl PageWriteGuard<'_> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page payload.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.latch
    }

    /// Returns the page payload for modification and marks the page dirty.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.dirty = true;
        &mut self.latch
    }

    /// Returns true if this guard has handed out mutable access.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        let dirty = self.dirty;
        // Latch before pin; see PageReadGuard.
        unsafe { ManuallyDrop::drop(&mut self.latch) };
        self.pool.unpin_page(self.page_id, dirty);
    }
}

/// RAII pin on a page without a latch.
pub struct PagePin<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PagePin<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the page latch in shared mode for the returned guard's
    /// lifetime.
    pub fn read_data(&self) -> RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PagePin<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}
