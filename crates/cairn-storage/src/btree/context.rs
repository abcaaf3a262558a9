//! Held-latch bookkeeping for tree write operations.

use std::collections::VecDeque;

use parking_lot::RwLockWriteGuard;
use cairn_buffer::PageWriteGuard;
use cairn_common::page::PageId;

/// Tracks the latches a write operation holds while descending.
///
/// Ancestor write guards accumulate front-to-back on the way down and are
/// released top-down, either early once a safe child guarantees the
/// mutation cannot propagate further up, or when the operation completes.
/// The root-pointer guard rides along so a root change can be installed
/// while the path above it is still pinned down.
pub(crate) struct Context<'a> {
    /// Write guard on the tree's root pointer, held while a root change
    /// is still possible.
    pub root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    /// Write-latched ancestors of the current node, root-most first.
    pub write_set: VecDeque<PageWriteGuard<'a>>,
    /// Pages emptied during rebalancing; deleted only after every latch
    /// on them is released.
    pub deleted: Vec<PageId>,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Self {
            root_guard: None,
            write_set: VecDeque::new(),
            deleted: Vec::new(),
        }
    }

    /// Releases every held ancestor latch, top-down, along with the root
    /// pointer guard. Called when the newly latched child is safe.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        self.write_set.clear();
    }
}
