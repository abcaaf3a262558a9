//! Forward iterator over the leaf level.

use std::marker::PhantomData;

use cairn_buffer::{BufferPool, PagePin};
use cairn_common::key::{IndexKey, RecordId};
use cairn_common::Result;

use crate::btree::node::LeafView;

/// A `(key, record id)` pair yielded by the iterator.
pub type IndexEntry<K> = (K, RecordId);

/// Forward iterator over the tree's leaf chain in ascending key order.
///
/// Between steps the iterator holds only a pin on its current leaf; the
/// leaf's read latch is taken per access, and the next-leaf pointer is
/// re-read under that latch so concurrent splits of the current leaf are
/// followed rather than crossed. The iterator is not snapshot-consistent:
/// entries inserted or removed while it runs may or may not be observed.
///
/// `is_end` reports true while positioned on the final entry, not one
/// past it; callers consume the current entry first and test `is_end`
/// afterwards. The detached end iterator holds no leaf at all.
pub struct IndexIterator<'a, K: IndexKey> {
    bpm: &'a BufferPool,
    leaf: Option<PagePin<'a>>,
    index: usize,
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> IndexIterator<'a, K> {
    pub(crate) fn new(bpm: &'a BufferPool, leaf: PagePin<'a>, index: usize) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            index,
            _key: PhantomData,
        }
    }

    /// The detached end iterator.
    pub(crate) fn end(bpm: &'a BufferPool) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
            _key: PhantomData,
        }
    }

    /// True once no further entry lies beyond the current position:
    /// detached, or at the last slot of the last leaf.
    pub fn is_end(&self) -> bool {
        match &self.leaf {
            None => true,
            Some(pin) => {
                let data = pin.read_data();
                let leaf = LeafView::<K>::attach(&data);
                self.index + 1 >= leaf.size() && !leaf.next_page_id().is_valid()
            }
        }
    }

    /// The entry at the current position, or None when detached.
    pub fn entry(&self) -> Option<IndexEntry<K>> {
        let pin = self.leaf.as_ref()?;
        let data = pin.read_data();
        let leaf = LeafView::<K>::attach(&data);
        if leaf.size() == 0 {
            return None;
        }
        // A concurrent remove may have shrunk the leaf under our index.
        let index = self.index.min(leaf.size() - 1);
        Some((leaf.key_at(index), leaf.value_at(index)))
    }

    /// Steps to the next entry, crossing to the next leaf when the
    /// current one is exhausted. Stepping an end iterator detaches it.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            self.leaf = None;
            self.index = 0;
            return Ok(());
        }
        let Some(pin) = self.leaf.as_ref() else {
            return Ok(());
        };

        self.index += 1;
        let (size, next) = {
            let data = pin.read_data();
            let leaf = LeafView::<K>::attach(&data);
            (leaf.size(), leaf.next_page_id())
        };

        if self.index >= size {
            if next.is_valid() {
                // The new leaf is pinned before the old pin is released.
                let next_pin = self.bpm.fetch_page_pin(next)?;
                self.leaf = Some(next_pin);
                self.index = 0;
            } else {
                self.leaf = None;
                self.index = 0;
            }
        }
        Ok(())
    }
}

impl<'a, K: IndexKey> Iterator for IndexIterator<'a, K> {
    type Item = IndexEntry<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entry()?;
        if self.is_end() {
            self.leaf = None;
            self.index = 0;
        } else if self.advance().is_err() {
            self.leaf = None;
        }
        Some(entry)
    }
}
