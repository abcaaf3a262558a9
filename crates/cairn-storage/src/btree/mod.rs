//! Disk-resident B+ tree index.
//!
//! Tree nodes are buffer-pool pages reinterpreted in place. Leaves hold
//! `(key, record id)` pairs and chain left-to-right for range scans;
//! internal nodes hold `(key, child page id)` pairs whose index-0 key is
//! ignored. Concurrent access uses latch coupling over the pool's page
//! latches.

mod context;
mod iterator;
mod node;
mod tree;

pub use iterator::{IndexEntry, IndexIterator};
pub use node::{InternalView, InternalViewMut, LeafView, LeafViewMut};
pub use tree::BPlusTree;
