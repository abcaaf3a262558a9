//! B+ tree operations: lookup, insert with splits, remove with
//! rebalancing, and iterator construction.
//!
//! Concurrency follows latch coupling over the buffer pool's page latches.
//! Readers couple shared latches parent-to-child and hold at most two at a
//! time. Writers take the root pointer's write lock, descend with
//! exclusive latches, and release everything above the current node as
//! soon as that node is safe: an insert cannot split past a node with
//! room, and a remove cannot merge past a node above its minimum.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use cairn_buffer::{BufferPool, PageReadGuard, PageWriteGuard};
use cairn_common::key::{IndexKey, KeyComparator, RecordId};
use cairn_common::page::{PageId, HEADER_PAGE_ID};
use cairn_common::{CairnError, Result};

use crate::btree::context::Context;
use crate::btree::iterator::IndexIterator;
use crate::btree::node::{
    node_max_size, node_size, node_type_of, set_node_parent, InternalView, InternalViewMut,
    LeafView, LeafViewMut, NodeType,
};
use crate::header::{HeaderView, HeaderViewMut};

/// A disk-resident B+ tree mapping fixed-width keys to record ids.
///
/// Keys are unique. The tree owns nothing but its root pointer; every
/// node lives in the buffer pool and is addressed by page id. The root
/// pointer is persisted in the header page under the index name and
/// rewritten on every root change.
pub struct BPlusTree<K: IndexKey, C: KeyComparator<K>> {
    index_name: String,
    bpm: Arc<BufferPool>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    root_page_id: RwLock<PageId>,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Opens or creates the index named `index_name`.
    ///
    /// `leaf_max_size` bounds entries per leaf, `internal_max_size`
    /// bounds children per internal node. An existing root recorded in
    /// the header page is picked up; otherwise the tree starts empty.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPool>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        if leaf_max_size < 2 || leaf_max_size + 1 > LeafView::<K>::capacity() {
            return Err(CairnError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: leaf_max_size.to_string(),
            });
        }
        if internal_max_size < 3 || internal_max_size + 1 > InternalView::<K>::capacity() {
            return Err(CairnError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: internal_max_size.to_string(),
            });
        }

        let index_name = index_name.into();
        let root = {
            let guard = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            HeaderView::attach(guard.data())
                .get_record(&index_name)
                .unwrap_or(PageId::INVALID)
        };

        Ok(Self {
            index_name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: RwLock::new(root),
            _marker: std::marker::PhantomData,
        })
    }

    /// Returns the name this index is registered under.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns the current root page id, or the invalid sentinel.
    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// True iff the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id.read().is_valid()
    }

    fn leaf_min_size(&self) -> usize {
        (self.leaf_max_size + 1) / 2
    }

    fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    /// Rewrites this index's root record in the header page.
    fn sync_header_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut header = HeaderViewMut::attach(guard.data_mut());
        if !header.update_record(&self.index_name, root)
            && !header.insert_record(&self.index_name, root)
        {
            return Err(CairnError::TreeCorrupted(
                "header page has no room for root record".to_string(),
            ));
        }
        Ok(())
    }

    /// Rewrites the parent pointer of an arbitrary node.
    fn adopt_child(&self, child: PageId, parent: PageId) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(child)?;
        set_node_parent(guard.data_mut(), parent);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Descends with shared latch coupling to the leaf covering `target`,
    /// or the leftmost leaf when `target` is None. Returns None for an
    /// empty tree.
    fn find_leaf_read(&self, target: Option<&K>) -> Result<Option<PageReadGuard<'_>>> {
        let root_lock = self.root_page_id.read();
        let root = *root_lock;
        if !root.is_valid() {
            return Ok(None);
        }
        let mut guard = self.bpm.fetch_page_read(root)?;
        drop(root_lock);

        loop {
            let child = {
                let data = guard.data();
                match node_type_of(data)? {
                    NodeType::Leaf => break,
                    NodeType::Internal => {
                        let node = InternalView::<K>::attach(data);
                        match target {
                            Some(key) => node.lookup(key, &self.comparator),
                            None => node.child_at(0),
                        }
                    }
                }
            };
            // Child latch is acquired before the parent guard is replaced.
            guard = self.bpm.fetch_page_read(child)?;
        }
        Ok(Some(guard))
    }

    /// Point lookup. Returns the value stored under `key`, if any.
    /// Never allocates a page.
    pub fn get_value(&self, key: &K) -> Result<Option<RecordId>> {
        let Some(guard) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        Ok(LeafView::<K>::attach(guard.data()).lookup(key, &self.comparator))
    }

    /// Number of levels from root to leaves. Zero for an empty tree.
    pub fn height(&self) -> Result<u32> {
        let root_lock = self.root_page_id.read();
        let root = *root_lock;
        if !root.is_valid() {
            return Ok(0);
        }
        let mut guard = self.bpm.fetch_page_read(root)?;
        drop(root_lock);

        let mut height = 1;
        loop {
            let child = {
                let data = guard.data();
                match node_type_of(data)? {
                    NodeType::Leaf => break,
                    NodeType::Internal => InternalView::<K>::attach(data).child_at(0),
                }
            };
            height += 1;
            guard = self.bpm.fetch_page_read(child)?;
        }
        Ok(height)
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Inserts a unique key. Returns false, leaving the tree unchanged,
    /// if the key is already present. Splits propagate upward as far as
    /// needed; a root split grows the tree by one level.
    pub fn insert(&self, key: &K, value: RecordId) -> Result<bool> {
        let mut ctx = Context::new();

        let mut root_lock = self.root_page_id.write();
        if !root_lock.is_valid() {
            self.start_new_tree(&mut root_lock, key, value)?;
            return Ok(true);
        }
        let root = *root_lock;
        ctx.root_guard = Some(root_lock);

        let mut guard = self.bpm.fetch_page_write(root)?;
        loop {
            let (node_type, size, max_size) = {
                let data = guard.data();
                (node_type_of(data)?, node_size(data), node_max_size(data))
            };
            // A node with room absorbs any split below it.
            if size < max_size {
                ctx.release_ancestors();
            }
            if node_type == NodeType::Leaf {
                break;
            }
            let child =
                InternalView::<K>::attach(guard.data()).lookup(key, &self.comparator);
            ctx.write_set.push_back(guard);
            guard = self.bpm.fetch_page_write(child)?;
        }

        let position = match LeafView::<K>::attach(guard.data()).search(key, &self.comparator) {
            Ok(_) => return Ok(false),
            Err(position) => position,
        };
        let new_size = {
            let mut leaf = LeafViewMut::<K>::attach(guard.data_mut());
            leaf.insert_at(position, key, value)
        };

        if new_size > self.leaf_max_size {
            self.split_leaf(&mut ctx, guard)?;
        }
        Ok(true)
    }

    /// Creates a single-leaf tree holding one entry and registers the
    /// root in the header page.
    fn start_new_tree(
        &self,
        root_lock: &mut parking_lot::RwLockWriteGuard<'_, PageId>,
        key: &K,
        value: RecordId,
    ) -> Result<()> {
        let mut guard = self.bpm.new_page_write()?;
        let root_id = guard.page_id();
        {
            let mut leaf = LeafViewMut::<K>::attach(guard.data_mut());
            leaf.init(root_id, PageId::INVALID, self.leaf_max_size);
            leaf.insert_at(0, key, value);
        }
        **root_lock = root_id;
        self.sync_header_root(root_id)?;
        tracing::debug!("started tree '{}' at root {}", self.index_name, root_id);
        Ok(())
    }

    /// Splits an overflowing leaf and links the new sibling into the
    /// parent and the leaf chain.
    fn split_leaf(&self, ctx: &mut Context<'_>, mut leaf_guard: PageWriteGuard<'_>) -> Result<()> {
        let mut new_guard = self.bpm.new_page_write()?;
        let new_id = new_guard.page_id();
        let leaf_id = leaf_guard.page_id();

        let middle = {
            let mut new_leaf = LeafViewMut::<K>::attach(new_guard.data_mut());
            let mut leaf = LeafViewMut::<K>::attach(leaf_guard.data_mut());
            new_leaf.init(new_id, leaf.parent_page_id(), self.leaf_max_size);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_id);
            new_leaf.key_at(0)
        };

        tracing::debug!("split leaf {} into {}", leaf_id, new_id);
        self.insert_into_parent(ctx, &mut leaf_guard, &middle, &mut new_guard)
    }

    /// Links a freshly split pair `(old, new)` under their parent,
    /// splitting upward recursively. Creates a new root when `old` was
    /// the root.
    fn insert_into_parent(
        &self,
        ctx: &mut Context<'_>,
        old: &mut PageWriteGuard<'_>,
        middle: &K,
        new: &mut PageWriteGuard<'_>,
    ) -> Result<()> {
        let Some(mut parent_guard) = ctx.write_set.pop_back() else {
            // `old` was the root: grow the tree by one level.
            let Some(mut root_lock) = ctx.root_guard.take() else {
                return Err(CairnError::TreeCorrupted(
                    "root split without root pointer guard".to_string(),
                ));
            };
            let mut root_guard = self.bpm.new_page_write()?;
            let root_id = root_guard.page_id();
            {
                let mut root_node = InternalViewMut::<K>::attach(root_guard.data_mut());
                root_node.init(root_id, PageId::INVALID, self.internal_max_size);
                root_node.populate_new_root(old.page_id(), middle, new.page_id());
            }
            set_node_parent(old.data_mut(), root_id);
            set_node_parent(new.data_mut(), root_id);
            *root_lock = root_id;
            self.sync_header_root(root_id)?;
            tracing::debug!("root split, new root {}", root_id);
            return Ok(());
        };

        let new_size = {
            let mut parent = InternalViewMut::<K>::attach(parent_guard.data_mut());
            parent.insert_node_after(old.page_id(), middle, new.page_id())
        };

        if new_size > self.internal_max_size {
            let mut sibling_guard = self.bpm.new_page_write()?;
            let sibling_id = sibling_guard.page_id();
            let parent_id = parent_guard.page_id();

            let middle_up = {
                let mut sibling = InternalViewMut::<K>::attach(sibling_guard.data_mut());
                let mut parent = InternalViewMut::<K>::attach(parent_guard.data_mut());
                sibling.init(sibling_id, parent.parent_page_id(), self.internal_max_size);
                parent.move_half_to(&mut sibling);
                sibling.key_at(0)
            };

            // Children that migrated to the sibling change parents. The
            // split pair's latches are already held here, so those two
            // are updated through their guards.
            let moved: Vec<PageId> = {
                let sibling = InternalView::<K>::attach(sibling_guard.data());
                (0..sibling.size()).map(|i| sibling.child_at(i)).collect()
            };
            for child in moved {
                if child == old.page_id() {
                    set_node_parent(old.data_mut(), sibling_id);
                } else if child == new.page_id() {
                    set_node_parent(new.data_mut(), sibling_id);
                } else {
                    self.adopt_child(child, sibling_id)?;
                }
            }

            tracing::debug!("split internal {} into {}", parent_id, sibling_id);
            self.insert_into_parent(ctx, &mut parent_guard, &middle_up, &mut sibling_guard)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Removes `key` if present; absent keys are a no-op. Underfull
    /// nodes are redistributed or coalesced; the tree may shrink.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut ctx = Context::new();

        let root_lock = self.root_page_id.write();
        if !root_lock.is_valid() {
            return Ok(());
        }
        let root = *root_lock;
        ctx.root_guard = Some(root_lock);

        let mut guard = self.bpm.fetch_page_write(root)?;
        let mut is_root = true;
        loop {
            let (node_type, size) = {
                let data = guard.data();
                (node_type_of(data)?, node_size(data))
            };
            // A node above its minimum absorbs any merge below it. The
            // root is kept latched until it clearly cannot change.
            let safe = if is_root {
                size > 2
            } else {
                match node_type {
                    NodeType::Leaf => size > self.leaf_min_size(),
                    NodeType::Internal => size > self.internal_min_size(),
                }
            };
            if safe {
                ctx.release_ancestors();
            }
            if node_type == NodeType::Leaf {
                break;
            }
            let child =
                InternalView::<K>::attach(guard.data()).lookup(key, &self.comparator);
            ctx.write_set.push_back(guard);
            guard = self.bpm.fetch_page_write(child)?;
            is_root = false;
        }

        if LeafView::<K>::attach(guard.data())
            .search(key, &self.comparator)
            .is_err()
        {
            return Ok(());
        }
        let new_size = {
            let mut leaf = LeafViewMut::<K>::attach(guard.data_mut());
            leaf.remove(key, &self.comparator);
            leaf.size()
        };

        let leaf_is_root = ctx.write_set.is_empty();
        let min = if leaf_is_root { 1 } else { self.leaf_min_size() };
        if new_size < min {
            self.rebalance_leaf(&mut ctx, guard)?;
        } else {
            drop(guard);
        }

        // Emptied pages are handed back only after their latches dropped.
        let deleted = std::mem::take(&mut ctx.deleted);
        drop(ctx);
        for page_id in deleted {
            if !self.bpm.delete_page(page_id)? {
                tracing::warn!("page {} still pinned, delete deferred", page_id);
            }
        }
        Ok(())
    }

    /// Handles an underfull leaf: root shrink, redistribution from a
    /// sibling, or coalescing into the left of the pair.
    fn rebalance_leaf(&self, ctx: &mut Context<'_>, leaf_guard: PageWriteGuard<'_>) -> Result<()> {
        let leaf_id = leaf_guard.page_id();

        if ctx.write_set.is_empty() {
            // Root leaf: removing the last entry clears the tree.
            if node_size(leaf_guard.data()) == 0 {
                let Some(mut root_lock) = ctx.root_guard.take() else {
                    return Err(CairnError::TreeCorrupted(
                        "root change without root pointer guard".to_string(),
                    ));
                };
                *root_lock = PageId::INVALID;
                self.sync_header_root(PageId::INVALID)?;
                ctx.deleted.push(leaf_id);
                drop(leaf_guard);
                tracing::debug!("tree '{}' emptied", self.index_name);
            }
            return Ok(());
        }

        let mut parent_guard = ctx.write_set.pop_back().ok_or_else(|| {
            CairnError::TreeCorrupted("underfull leaf with no latched parent".to_string())
        })?;
        let index = InternalView::<K>::attach(parent_guard.data())
            .value_index(leaf_id)
            .ok_or_else(|| {
                CairnError::TreeCorrupted(format!("leaf {} missing from its parent", leaf_id))
            })?;

        // Prefer the left sibling; the leftmost child borrows from the right.
        let sibling_index = if index > 0 { index - 1 } else { 1 };
        let sibling_id = InternalView::<K>::attach(parent_guard.data()).child_at(sibling_index);
        let sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

        let total = node_size(sibling_guard.data()) + node_size(leaf_guard.data());
        if total > self.leaf_max_size {
            self.redistribute_leaf(&mut parent_guard, leaf_guard, sibling_guard, index)
        } else {
            self.coalesce_leaf(ctx, parent_guard, leaf_guard, sibling_guard, index)
        }
    }

    /// Moves one entry from the sibling into the underfull leaf and
    /// refreshes the parent separator.
    fn redistribute_leaf(
        &self,
        parent_guard: &mut PageWriteGuard<'_>,
        mut leaf_guard: PageWriteGuard<'_>,
        mut sibling_guard: PageWriteGuard<'_>,
        index: usize,
    ) -> Result<()> {
        let (separator, separator_index) = {
            let mut leaf = LeafViewMut::<K>::attach(leaf_guard.data_mut());
            let mut sibling = LeafViewMut::<K>::attach(sibling_guard.data_mut());
            if index > 0 {
                (sibling.move_last_to_front_of(&mut leaf), index)
            } else {
                (sibling.move_first_to_end_of(&mut leaf), 1)
            }
        };
        let mut parent = InternalViewMut::<K>::attach(parent_guard.data_mut());
        parent.set_key_at(separator_index, &separator);
        tracing::debug!("redistributed into leaf {}", leaf_guard.page_id());
        Ok(())
    }

    /// Merges the leaf pair into its left member, unlinks the right from
    /// the parent, and rebalances the parent if it underflowed.
    fn coalesce_leaf(
        &self,
        ctx: &mut Context<'_>,
        mut parent_guard: PageWriteGuard<'_>,
        leaf_guard: PageWriteGuard<'_>,
        sibling_guard: PageWriteGuard<'_>,
        index: usize,
    ) -> Result<()> {
        // Normalize so the surviving node is the left of the pair.
        let (mut left_guard, mut right_guard, right_index) = if index > 0 {
            (sibling_guard, leaf_guard, index)
        } else {
            (leaf_guard, sibling_guard, 1)
        };

        {
            let mut left = LeafViewMut::<K>::attach(left_guard.data_mut());
            let mut right = LeafViewMut::<K>::attach(right_guard.data_mut());
            right.move_all_to(&mut left);
        }
        let right_id = right_guard.page_id();
        ctx.deleted.push(right_id);
        tracing::debug!("coalesced leaf {} into {}", right_id, left_guard.page_id());
        drop(right_guard);
        drop(left_guard);

        {
            let mut parent = InternalViewMut::<K>::attach(parent_guard.data_mut());
            parent.remove_at(right_index);
        }

        let parent_size = node_size(parent_guard.data());
        let parent_is_root = ctx.write_set.is_empty();
        let parent_min = if parent_is_root { 2 } else { self.internal_min_size() };
        if parent_size < parent_min {
            self.rebalance_internal(ctx, parent_guard)?;
        }
        Ok(())
    }

    /// Handles an underfull internal node, mirroring the leaf logic with
    /// separator-key plumbing and child adoption.
    fn rebalance_internal(
        &self,
        ctx: &mut Context<'_>,
        node_guard: PageWriteGuard<'_>,
    ) -> Result<()> {
        let node_id = node_guard.page_id();

        if ctx.write_set.is_empty() {
            // Internal root with a single child: promote the child.
            if node_size(node_guard.data()) == 1 {
                let child = InternalView::<K>::attach(node_guard.data()).child_at(0);
                let Some(mut root_lock) = ctx.root_guard.take() else {
                    return Err(CairnError::TreeCorrupted(
                        "root change without root pointer guard".to_string(),
                    ));
                };
                *root_lock = child;
                self.adopt_child(child, PageId::INVALID)?;
                self.sync_header_root(child)?;
                ctx.deleted.push(node_id);
                drop(node_guard);
                tracing::debug!("root collapsed into {}", child);
            }
            return Ok(());
        }

        let mut parent_guard = ctx.write_set.pop_back().ok_or_else(|| {
            CairnError::TreeCorrupted("underfull node with no latched parent".to_string())
        })?;
        let index = InternalView::<K>::attach(parent_guard.data())
            .value_index(node_id)
            .ok_or_else(|| {
                CairnError::TreeCorrupted(format!("node {} missing from its parent", node_id))
            })?;

        let sibling_index = if index > 0 { index - 1 } else { 1 };
        let sibling_id = InternalView::<K>::attach(parent_guard.data()).child_at(sibling_index);
        let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;

        let total = node_size(sibling_guard.data()) + node_size(node_guard.data());
        if total > self.internal_max_size {
            // Redistribute one child across the boundary.
            let mut node_guard = node_guard;
            let (separator, separator_index, adopted) = {
                let mut node = InternalViewMut::<K>::attach(node_guard.data_mut());
                let mut sibling = InternalViewMut::<K>::attach(sibling_guard.data_mut());
                let parent = InternalView::<K>::attach(parent_guard.data());
                if index > 0 {
                    let old_separator = parent.key_at(index);
                    let separator = sibling.move_last_to_front_of(&mut node, &old_separator);
                    let adopted = node.child_at(0);
                    (separator, index, adopted)
                } else {
                    let old_separator = parent.key_at(1);
                    let separator = sibling.move_first_to_end_of(&mut node, &old_separator);
                    let adopted = node.child_at(node.size() - 1);
                    (separator, 1, adopted)
                }
            };
            {
                let mut parent = InternalViewMut::<K>::attach(parent_guard.data_mut());
                parent.set_key_at(separator_index, &separator);
            }
            self.adopt_child(adopted, node_id)?;
            tracing::debug!("redistributed into internal {}", node_id);
            return Ok(());
        }

        // Coalesce: the surviving node is the left of the pair.
        let (mut left_guard, mut right_guard, right_index) = if index > 0 {
            (sibling_guard, node_guard, index)
        } else {
            (node_guard, sibling_guard, 1)
        };

        let left_id = left_guard.page_id();
        let (moved_from, moved_to) = {
            let middle = InternalView::<K>::attach(parent_guard.data()).key_at(right_index);
            let mut left = InternalViewMut::<K>::attach(left_guard.data_mut());
            let mut right = InternalViewMut::<K>::attach(right_guard.data_mut());
            let moved_from = left.size();
            right.move_all_to(&mut left, &middle);
            (moved_from, left.size())
        };
        let right_id = right_guard.page_id();
        ctx.deleted.push(right_id);
        tracing::debug!("coalesced internal {} into {}", right_id, left_id);
        drop(right_guard);

        // Merged-in children now answer to the left node.
        let moved: Vec<PageId> = {
            let left = InternalView::<K>::attach(left_guard.data());
            (moved_from..moved_to).map(|i| left.child_at(i)).collect()
        };
        drop(left_guard);
        for child in moved {
            self.adopt_child(child, left_id)?;
        }

        {
            let mut parent = InternalViewMut::<K>::attach(parent_guard.data_mut());
            parent.remove_at(right_index);
        }

        let parent_size = node_size(parent_guard.data());
        let parent_is_root = ctx.write_set.is_empty();
        let parent_min = if parent_is_root { 2 } else { self.internal_min_size() };
        if parent_size < parent_min {
            self.rebalance_internal(ctx, parent_guard)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    /// Iterator positioned at the first entry of the tree.
    pub fn begin(&self) -> Result<IndexIterator<'_, K>> {
        match self.find_leaf_read(None)? {
            None => Ok(IndexIterator::end(&self.bpm)),
            Some(guard) => {
                let pin = self.bpm.fetch_page_pin(guard.page_id())?;
                drop(guard);
                Ok(IndexIterator::new(&self.bpm, pin, 0))
            }
        }
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_at(&self, key: &K) -> Result<IndexIterator<'_, K>> {
        let Some(guard) = self.find_leaf_read(Some(key))? else {
            return Ok(IndexIterator::end(&self.bpm));
        };

        let (index, size, next) = {
            let leaf = LeafView::<K>::attach(guard.data());
            let index = match leaf.search(key, &self.comparator) {
                Ok(index) => index,
                Err(index) => index,
            };
            (index, leaf.size(), leaf.next_page_id())
        };

        if index < size {
            let pin = self.bpm.fetch_page_pin(guard.page_id())?;
            drop(guard);
            Ok(IndexIterator::new(&self.bpm, pin, index))
        } else if next.is_valid() {
            // Every key of this leaf is below `key`: start at the next one.
            let pin = self.bpm.fetch_page_pin(next)?;
            drop(guard);
            Ok(IndexIterator::new(&self.bpm, pin, 0))
        } else {
            Ok(IndexIterator::end(&self.bpm))
        }
    }

    /// The detached end iterator.
    pub fn end(&self) -> IndexIterator<'_, K> {
        IndexIterator::end(&self.bpm)
    }

    // ------------------------------------------------------------------
    // Test utilities and debug output
    // ------------------------------------------------------------------

    /// Reads whitespace-separated integers from a file and inserts each
    /// as a key whose record id encodes the same integer.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let Ok(value) = token.parse::<i64>() else {
                continue;
            };
            self.insert(&K::from_integer(value), RecordId::from_integer(value))?;
        }
        Ok(())
    }

    /// Reads whitespace-separated integers from a file and removes each.
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for token in contents.split_whitespace() {
            let Ok(value) = token.parse::<i64>() else {
                continue;
            };
            self.remove(&K::from_integer(value))?;
        }
        Ok(())
    }

    /// Graphviz dump of the tree structure.
    pub fn to_graph(&self) -> Result<String> {
        let mut out = String::from("digraph BPlusTree {\n");
        let root = *self.root_page_id.read();
        if root.is_valid() {
            self.graph_page(root, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn graph_page(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        match node_type_of(guard.data())? {
            NodeType::Leaf => {
                let leaf = LeafView::<K>::attach(guard.data());
                let keys: Vec<String> =
                    (0..leaf.size()).map(|i| leaf.key_at(i).to_string()).collect();
                out.push_str(&format!(
                    "  leaf{} [shape=record, label=\"{}\"];\n",
                    page_id.0,
                    keys.join("|")
                ));
                if leaf.next_page_id().is_valid() {
                    out.push_str(&format!(
                        "  leaf{} -> leaf{} [style=dashed];\n",
                        page_id.0,
                        leaf.next_page_id().0
                    ));
                }
                Ok(())
            }
            NodeType::Internal => {
                let node = InternalView::<K>::attach(guard.data());
                let keys: Vec<String> =
                    (1..node.size()).map(|i| node.key_at(i).to_string()).collect();
                let children: Vec<PageId> = (0..node.size()).map(|i| node.child_at(i)).collect();
                out.push_str(&format!(
                    "  int{} [shape=record, label=\"{}\"];\n",
                    page_id.0,
                    keys.join("|")
                ));
                drop(guard);

                for child in children {
                    let child_type = {
                        let child_guard = self.bpm.fetch_page_read(child)?;
                        node_type_of(child_guard.data())?
                    };
                    let prefix = match child_type {
                        NodeType::Leaf => "leaf",
                        NodeType::Internal => "int",
                    };
                    out.push_str(&format!("  int{} -> {}{};\n", page_id.0, prefix, child.0));
                    self.graph_page(child, out)?;
                }
                Ok(())
            }
        }
    }

    /// Human-readable dump of the tree, one node per line.
    pub fn to_text(&self) -> Result<String> {
        let mut out = String::new();
        let root = *self.root_page_id.read();
        if root.is_valid() {
            self.text_page(root, 0, &mut out)?;
        } else {
            out.push_str("(empty tree)\n");
        }
        Ok(out)
    }

    fn text_page(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        let indent = "  ".repeat(depth);
        match node_type_of(guard.data())? {
            NodeType::Leaf => {
                let leaf = LeafView::<K>::attach(guard.data());
                let keys: Vec<String> =
                    (0..leaf.size()).map(|i| leaf.key_at(i).to_string()).collect();
                out.push_str(&format!(
                    "{}leaf {} parent={} next={} [{}]\n",
                    indent,
                    page_id,
                    leaf.parent_page_id(),
                    leaf.next_page_id(),
                    keys.join(", ")
                ));
                Ok(())
            }
            NodeType::Internal => {
                let node = InternalView::<K>::attach(guard.data());
                let keys: Vec<String> =
                    (1..node.size()).map(|i| node.key_at(i).to_string()).collect();
                let children: Vec<PageId> = (0..node.size()).map(|i| node.child_at(i)).collect();
                out.push_str(&format!(
                    "{}internal {} parent={} [{}]\n",
                    indent,
                    page_id,
                    node.parent_page_id(),
                    keys.join(", ")
                ));
                drop(guard);
                for child in children {
                    self.text_page(child, depth + 1, out)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_buffer::{BufferPoolConfig, MemDiskManager};
    use cairn_common::key::{GenericComparator, GenericKey};

    type Key = GenericKey<8>;
    type Tree = BPlusTree<Key, GenericComparator<8>>;

    fn key(v: i64) -> Key {
        Key::from_integer(v)
    }

    fn rid(v: i64) -> RecordId {
        RecordId::from_integer(v)
    }

    fn test_tree(num_frames: usize, leaf_max: usize, internal_max: usize) -> Tree {
        let disk = Arc::new(MemDiskManager::new());
        let bpm = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }, disk));
        BPlusTree::new("test_index", bpm, GenericComparator::<8>, leaf_max, internal_max).unwrap()
    }

    #[test]
    fn test_tree_starts_empty() {
        let tree = test_tree(16, 3, 3);
        assert!(tree.is_empty());
        assert!(!tree.root_page_id().is_valid());
        assert_eq!(tree.height().unwrap(), 0);
        assert_eq!(tree.get_value(&key(1)).unwrap(), None);
    }

    #[test]
    fn test_tree_invalid_parameters() {
        let disk = Arc::new(MemDiskManager::new());
        let bpm = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 16 }, disk));

        let result: Result<Tree> =
            BPlusTree::new("t", bpm.clone(), GenericComparator::<8>, 1, 3);
        assert!(matches!(result, Err(CairnError::InvalidParameter { .. })));

        let result: Result<Tree> = BPlusTree::new("t", bpm, GenericComparator::<8>, 3, 2);
        assert!(matches!(result, Err(CairnError::InvalidParameter { .. })));
    }

    #[test]
    fn test_tree_single_insert_and_lookup() {
        let tree = test_tree(16, 3, 3);

        assert!(tree.insert(&key(42), rid(42)).unwrap());
        assert!(!tree.is_empty());
        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.get_value(&key(42)).unwrap(), Some(rid(42)));
        assert_eq!(tree.get_value(&key(7)).unwrap(), None);
    }

    #[test]
    fn test_tree_duplicate_insert_rejected() {
        let tree = test_tree(16, 3, 3);

        assert!(tree.insert(&key(1), rid(1)).unwrap());
        assert!(!tree.insert(&key(1), rid(99)).unwrap());
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_tree_leaf_split_grows_height() {
        let tree = test_tree(16, 3, 3);

        for v in 1..=5 {
            assert!(tree.insert(&key(v), rid(v)).unwrap());
        }

        assert_eq!(tree.height().unwrap(), 2);
        for v in 1..=5 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {v}");
        }
    }

    #[test]
    fn test_tree_multi_level_growth() {
        let tree = test_tree(64, 3, 3);

        for v in 1..=100 {
            assert!(tree.insert(&key(v), rid(v)).unwrap());
        }
        assert!(tree.height().unwrap() >= 3);
        for v in 1..=100 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {v}");
        }
        assert_eq!(tree.get_value(&key(0)).unwrap(), None);
        assert_eq!(tree.get_value(&key(101)).unwrap(), None);
    }

    #[test]
    fn test_tree_remove_absent_is_noop() {
        let tree = test_tree(16, 3, 3);
        tree.remove(&key(5)).unwrap();

        tree.insert(&key(1), rid(1)).unwrap();
        tree.remove(&key(5)).unwrap();
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_tree_remove_to_empty() {
        let tree = test_tree(16, 3, 3);

        for v in 1..=5 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        for v in 1..=5 {
            tree.remove(&key(v)).unwrap();
        }

        assert!(tree.is_empty());
        assert_eq!(tree.height().unwrap(), 0);
        for v in 1..=5 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), None);
        }
    }

    #[test]
    fn test_tree_remove_with_redistribute_and_coalesce() {
        let tree = test_tree(64, 3, 3);

        for v in 1..=10 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        tree.remove(&key(5)).unwrap();

        assert_eq!(tree.get_value(&key(5)).unwrap(), None);
        for v in (1..=10).filter(|v| *v != 5) {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {v}");
        }
    }

    #[test]
    fn test_tree_height_shrinks_after_drain() {
        let tree = test_tree(64, 3, 3);

        for v in 1..=20 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        let tall = tree.height().unwrap();
        assert!(tall >= 2);

        for v in 1..=19 {
            tree.remove(&key(v)).unwrap();
        }
        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.get_value(&key(20)).unwrap(), Some(rid(20)));
    }

    #[test]
    fn test_tree_reinsert_after_remove() {
        let tree = test_tree(16, 3, 3);

        tree.insert(&key(1), rid(1)).unwrap();
        tree.remove(&key(1)).unwrap();
        assert!(tree.is_empty());

        assert!(tree.insert(&key(1), rid(1)).unwrap());
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_tree_root_persisted_in_header() {
        let disk = Arc::new(MemDiskManager::new());
        let bpm = Arc::new(BufferPool::new(BufferPoolConfig { num_frames: 16 }, disk));
        let tree: Tree =
            BPlusTree::new("persisted", bpm.clone(), GenericComparator::<8>, 3, 3).unwrap();

        tree.insert(&key(1), rid(1)).unwrap();
        let root = tree.root_page_id();

        // A second handle to the same index sees the same root.
        let reopened: Tree =
            BPlusTree::new("persisted", bpm, GenericComparator::<8>, 3, 3).unwrap();
        assert_eq!(reopened.root_page_id(), root);
        assert_eq!(reopened.get_value(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_tree_pool_exhaustion_is_fatal() {
        // Two frames: header bootstrap works, but a descent plus a split
        // cannot hold enough pages.
        let tree = test_tree(2, 3, 3);

        let mut result = Ok(true);
        for v in 1..=50 {
            result = tree.insert(&key(v), rid(v));
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(CairnError::PoolExhausted)));
    }

    #[test]
    fn test_tree_to_text_and_graph() {
        let tree = test_tree(16, 3, 3);
        for v in 1..=5 {
            tree.insert(&key(v), rid(v)).unwrap();
        }

        let text = tree.to_text().unwrap();
        assert!(text.contains("internal"));
        assert!(text.contains("leaf"));

        let graph = tree.to_graph().unwrap();
        assert!(graph.starts_with("digraph BPlusTree {"));
        assert!(graph.contains("->"));
    }

    #[test]
    fn test_tree_insert_and_remove_from_file() {
        use std::io::Write;

        let tree = test_tree(64, 3, 3);
        let dir = tempfile::tempdir().unwrap();

        let insert_path = dir.path().join("insert.txt");
        let mut f = std::fs::File::create(&insert_path).unwrap();
        writeln!(f, "3\n1\n2\n5\n4").unwrap();
        drop(f);
        tree.insert_from_file(&insert_path).unwrap();

        for v in 1..=5 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
        }

        let remove_path = dir.path().join("remove.txt");
        let mut f = std::fs::File::create(&remove_path).unwrap();
        writeln!(f, "2 4").unwrap();
        drop(f);
        tree.remove_from_file(&remove_path).unwrap();

        assert_eq!(tree.get_value(&key(2)).unwrap(), None);
        assert_eq!(tree.get_value(&key(4)).unwrap(), None);
        assert_eq!(tree.get_value(&key(3)).unwrap(), Some(rid(3)));
    }
}
