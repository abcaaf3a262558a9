//! The index header page.
//!
//! A distinguished page at page id 0 records, for every index in
//! the file, the page id of its current root. Each record is fixed-width:
//! a zero-padded index name and the root page id. The B+ tree reads its
//! record at bootstrap and rewrites it on every root change.
//!
//! Page layout:
//! ```text
//! +---------------------+ 0
//! | record_count (4)    |
//! +---------------------+ 4
//! | name[32] root(4)    |  record 0
//! +---------------------+ 40
//! | name[32] root(4)    |  record 1
//! +---------------------+ ...
//! ```

use cairn_common::page::{PageId, PAGE_SIZE};

/// Maximum length of an index name in bytes.
pub const MAX_INDEX_NAME_LEN: usize = 32;

const COUNT_SIZE: usize = 4;
const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

/// One `(index name, root page id)` entry of the header page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    /// Name of the index.
    pub name: String,
    /// Page id of the index root, possibly the invalid sentinel.
    pub root_page_id: PageId,
}

/// Read-only view over the header page payload.
pub struct HeaderView<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> HeaderView<'a> {
    /// Attaches a view to a header page payload.
    pub fn attach(data: &'a [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    /// Number of records on the page.
    pub fn record_count(&self) -> usize {
        u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]) as usize
    }

    /// Returns the root page id recorded for `name`, if any.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let index = find_record(self.data, name)?;
        Some(read_root(self.data, index))
    }

    /// Returns every record on the page.
    pub fn records(&self) -> Vec<HeaderRecord> {
        (0..self.record_count())
            .map(|i| HeaderRecord {
                name: read_name(self.data, i),
                root_page_id: read_root(self.data, i),
            })
            .collect()
    }
}

/// Mutable view over the header page payload.
pub struct HeaderViewMut<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeaderViewMut<'a> {
    /// Attaches a mutable view to a header page payload.
    pub fn attach(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    /// Number of records on the page.
    pub fn record_count(&self) -> usize {
        HeaderView::attach(&*self.data).record_count()
    }

    /// Returns the root page id recorded for `name`, if any.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        HeaderView::attach(&*self.data).get_record(name)
    }

    /// Appends a record. Returns false if the name is too long, already
    /// present, or the page is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.len() > MAX_INDEX_NAME_LEN || name.is_empty() {
            return false;
        }
        if find_record(self.data, name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = record_offset(count);
        self.data[offset..offset + MAX_INDEX_NAME_LEN].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.data[offset + MAX_INDEX_NAME_LEN..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.0.to_le_bytes());
        self.data[0..COUNT_SIZE].copy_from_slice(&((count + 1) as u32).to_le_bytes());
        true
    }

    /// Rewrites the root page id of an existing record. Returns false if
    /// the name is absent.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(index) = find_record(self.data, name) else {
            return false;
        };
        let offset = record_offset(index) + MAX_INDEX_NAME_LEN;
        self.data[offset..offset + 4].copy_from_slice(&root_page_id.0.to_le_bytes());
        true
    }
}

fn record_offset(index: usize) -> usize {
    COUNT_SIZE + index * RECORD_SIZE
}

fn read_name(data: &[u8; PAGE_SIZE], index: usize) -> String {
    let offset = record_offset(index);
    let raw = &data[offset..offset + MAX_INDEX_NAME_LEN];
    let len = raw.iter().position(|b| *b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
    String::from_utf8_lossy(&raw[..len]).into_owned()
}

fn read_root(data: &[u8; PAGE_SIZE], index: usize) -> PageId {
    let offset = record_offset(index) + MAX_INDEX_NAME_LEN;
    PageId(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

fn find_record(data: &[u8; PAGE_SIZE], name: &str) -> Option<usize> {
    let count =
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    (0..count).find(|&i| read_name(data, i) == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_empty_page() {
        let data = [0u8; PAGE_SIZE];
        let view = HeaderView::attach(&data);

        assert_eq!(view.record_count(), 0);
        assert!(view.get_record("missing").is_none());
        assert!(view.records().is_empty());
    }

    #[test]
    fn test_header_insert_and_get() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        assert!(view.insert_record("orders_pk", PageId(7)));
        assert_eq!(view.record_count(), 1);
        assert_eq!(view.get_record("orders_pk"), Some(PageId(7)));
        assert!(view.get_record("other").is_none());
    }

    #[test]
    fn test_header_insert_duplicate_rejected() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        assert!(view.insert_record("idx", PageId(1)));
        assert!(!view.insert_record("idx", PageId(2)));
        assert_eq!(view.get_record("idx"), Some(PageId(1)));
    }

    #[test]
    fn test_header_insert_name_too_long() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        let long_name = "x".repeat(MAX_INDEX_NAME_LEN + 1);
        assert!(!view.insert_record(&long_name, PageId(1)));
        assert_eq!(view.record_count(), 0);
    }

    #[test]
    fn test_header_update_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        assert!(view.insert_record("idx", PageId(3)));
        assert!(view.update_record("idx", PageId(9)));
        assert_eq!(view.get_record("idx"), Some(PageId(9)));

        assert!(view.update_record("idx", PageId::INVALID));
        assert_eq!(view.get_record("idx"), Some(PageId::INVALID));
    }

    #[test]
    fn test_header_update_absent_record() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        assert!(!view.update_record("ghost", PageId(9)));
    }

    #[test]
    fn test_header_multiple_records() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        assert!(view.insert_record("a", PageId(1)));
        assert!(view.insert_record("b", PageId(2)));
        assert!(view.insert_record("c", PageId(3)));

        let read = HeaderView::attach(&data);
        let records = read.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].name, "b");
        assert_eq!(records[1].root_page_id, PageId(2));
    }

    #[test]
    fn test_header_page_full() {
        let mut data = [0u8; PAGE_SIZE];
        let mut view = HeaderViewMut::attach(&mut data);

        for i in 0..MAX_RECORDS {
            assert!(view.insert_record(&format!("idx_{i}"), PageId(i as u32)));
        }
        assert!(!view.insert_record("one_too_many", PageId(0)));
        assert_eq!(view.record_count(), MAX_RECORDS);
    }
}
