use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use parking_lot::RwLock;
use std::sync::Arc;

pub type PageRef = Arc<RwLock<Page>>;

/// A cached page frame: the raw on-disk bytes plus the transaction that last
/// dirtied them and a snapshot of the last committed image.
///
/// Typed pages (heap page, B+-tree pages) are codec views over `data`; the
/// frame itself is the unit of caching, locking attribution and write-back.
#[derive(Debug)]
pub struct Page {
    pid: PageId,
    data: Vec<u8>,
    dirty: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl Page {
    pub fn new(pid: PageId, data: Vec<u8>) -> Self {
        let before_image = data.clone();
        Self {
            pid,
            data,
            dirty: None,
            before_image,
        }
    }

    pub fn pid(&self) -> PageId {
        self.pid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        debug_assert_eq!(data.len(), self.data.len());
        self.data = data;
    }

    /// Record `tid` as the transaction owning this frame's uncommitted bytes.
    pub fn mark_dirty(&mut self, tid: TransactionId) {
        self.dirty = Some(tid);
    }

    pub fn mark_clean(&mut self) {
        self.dirty = None;
    }

    /// The transaction that last dirtied this page, or `None` if clean.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    /// Snapshot the current bytes as the last committed image.
    pub fn set_before_image(&mut self) {
        self.before_image = self.data.clone();
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::HeapPageId;

    #[test]
    fn dirty_tracking_remembers_the_owner() {
        let pid = PageId::Heap(HeapPageId::new(1, 0));
        let mut page = Page::new(pid, vec![0u8; 16]);
        assert_eq!(page.is_dirty(), None);

        let tid = TransactionId::new();
        page.mark_dirty(tid);
        assert_eq!(page.is_dirty(), Some(tid));

        page.mark_clean();
        assert_eq!(page.is_dirty(), None);
    }

    #[test]
    fn before_image_tracks_commits() {
        let pid = PageId::Heap(HeapPageId::new(1, 0));
        let mut page = Page::new(pid, vec![1u8; 4]);
        assert_eq!(page.before_image(), &[1, 1, 1, 1]);

        page.set_data(vec![2u8; 4]);
        assert_eq!(page.before_image(), &[1, 1, 1, 1]);

        page.set_before_image();
        assert_eq!(page.before_image(), &[2, 2, 2, 2]);
    }
}
