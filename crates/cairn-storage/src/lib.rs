//! Storage engine core for Cairn.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O
//! - The index header page mapping index names to root pages
//! - A disk-resident B+ tree index with latch-coupled concurrent access

mod btree;
mod disk;
mod header;

pub use btree::{
    BPlusTree, IndexEntry, IndexIterator, InternalView, InternalViewMut, LeafView, LeafViewMut,
};
pub use disk::{DiskManagerConfig, FileDiskManager};
pub use header::{HeaderRecord, HeaderView, HeaderViewMut, MAX_INDEX_NAME_LEN};
