//! Buffer pool management for Cairn.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU eviction policy for cache management
//! - Pin counting and per-frame read/write latches for concurrent access
//! - Dirty page tracking with write-back on eviction

mod disk;
mod frame;
mod pool;
mod replacer;

pub use disk::{DiskManager, MemDiskManager};
pub use frame::{BufferFrame, FrameId};
pub use pool::{
    BufferPool, BufferPoolConfig, BufferPoolStats, PagePin, PageReadGuard, PageWriteGuard,
};
pub use replacer::{LruReplacer, Replacer};
