use crate::buffer::BufferPool;
use crate::catalog::{DataType, TupleDescRef};
use crate::config::DbConfig;
use crate::error::{VellumError, VellumResult};
use crate::execution::predicate::{IndexPredicate, Op};
use crate::execution::TupleIterator;
use crate::storage::codec::{
    BTreeHeaderPageCodec, BTreeInternalPageCodec, BTreeLeafPageCodec, BTreeRootPtrPageCodec,
};
use crate::storage::page::{
    BTreeEntry, BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePageCategory, BTreePageId,
    BTreeRootPtrPage, PageId, TableId, ROOT_PTR_PAGE_SIZE,
};
use crate::storage::tuple::{Field, Tuple};
use crate::storage::{table_id_for_path, DbFile};
use crate::transaction::{LockMode, TransactionId};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pages a tree operation has modified, in first-touched order.
#[derive(Debug, Default)]
struct DirtyPages(Vec<PageId>);

impl DirtyPages {
    fn record(&mut self, pid: BTreePageId) {
        let pid = PageId::BTree(pid);
        if !self.0.contains(&pid) {
            self.0.push(pid);
        }
    }

    fn into_vec(self) -> Vec<PageId> {
        self.0
    }
}

/// A page that can fall below minimum occupancy.
enum TreePage {
    Leaf(BTreeLeafPage),
    Internal(BTreeInternalPage),
}

impl TreePage {
    fn pid(&self) -> BTreePageId {
        match self {
            TreePage::Leaf(page) => page.pid,
            TreePage::Internal(page) => page.pid,
        }
    }

    fn parent_id(&self) -> BTreePageId {
        match self {
            TreePage::Leaf(page) => page.parent_id(),
            TreePage::Internal(page) => page.parent_id(),
        }
    }
}

/// An ordered index over one key field, stored as a B+-tree.
///
/// Byte 0 of the file is the root-pointer page; data pages are numbered from
/// 1 and live at `ROOT_PTR_PAGE_SIZE + (page_no - 1) * page_size`. Freed
/// pages are recorded in the header-page chain and reused; the file is never
/// truncated.
///
/// All page access goes through the buffer pool: internal nodes are locked
/// SHARED during descent and only the leaf is taken in the caller's mode.
pub struct BTreeFile {
    path: PathBuf,
    table_id: TableId,
    desc: TupleDescRef,
    key_field: usize,
    key_type: DataType,
    page_size: usize,
    // Guards the backing file, separate from page-level locks.
    io_lock: RwLock<()>,
    // Serializes file extension and first-time initialization.
    alloc_lock: Mutex<()>,
}

impl BTreeFile {
    pub fn open(
        path: impl AsRef<Path>,
        key_field: usize,
        desc: TupleDescRef,
        config: &DbConfig,
    ) -> VellumResult<Arc<Self>> {
        let path = std::path::absolute(path.as_ref())
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        let key_type = desc.field_type(key_field)?;
        if BTreeLeafPage::max_tuples_for(config.page_size, &desc) == 0
            || BTreeInternalPage::max_entries_for(config.page_size, key_type) < 2
        {
            return Err(VellumError::Storage(format!(
                "tuple width {} does not fit a {}-byte b+tree page",
                desc.size(),
                config.page_size
            )));
        }
        let table_id = table_id_for_path(&path);
        debug!("opened b+tree file {:?} as table {}", path, table_id);
        Ok(Arc::new(Self {
            path,
            table_id,
            desc,
            key_field,
            key_type,
            page_size: config.page_size,
            io_lock: RwLock::new(()),
            alloc_lock: Mutex::new(()),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_field(&self) -> usize {
        self.key_field
    }

    fn root_ptr_pid(&self) -> BTreePageId {
        BTreeRootPtrPage::id_for(self.table_id)
    }

    fn pid(&self, page_no: u32, category: BTreePageCategory) -> BTreePageId {
        BTreePageId::new(self.table_id, page_no, category)
    }

    fn file_len(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Create the root pointer and the initial (empty) leaf page on first use.
    fn ensure_initialized(&self) -> VellumResult<()> {
        let _alloc = self.alloc_lock.lock();
        if self.file_len() == 0 {
            let _io = self.io_lock.write();
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&self.path)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&vec![0u8; ROOT_PTR_PAGE_SIZE])?;
            file.write_all(&vec![0u8; self.page_size])?;
            file.flush()?;
            debug!("initialized b+tree file {:?}", self.path);
        }
        Ok(())
    }

    fn page_location(&self, pid: &BTreePageId) -> VellumResult<(u64, usize)> {
        match pid.category {
            BTreePageCategory::RootPtr => Ok((0, ROOT_PTR_PAGE_SIZE)),
            _ if pid.page_no == 0 => Err(VellumError::Storage(format!(
                "data page number 0 is reserved for the root pointer ({})",
                pid
            ))),
            _ => Ok((
                ROOT_PTR_PAGE_SIZE as u64 + (pid.page_no as u64 - 1) * self.page_size as u64,
                self.page_size,
            )),
        }
    }

    fn btree_pid(&self, pid: &PageId) -> VellumResult<BTreePageId> {
        match pid {
            PageId::BTree(bpid) if bpid.table_id == self.table_id => Ok(*bpid),
            _ => Err(VellumError::Storage(format!(
                "page {} does not belong to b+tree file {}",
                pid, self.table_id
            ))),
        }
    }

    // ---- typed page access through the buffer pool ----

    fn frame(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        pid: BTreePageId,
        mode: LockMode,
    ) -> VellumResult<crate::buffer::PageRef> {
        pool.get_page(tid, PageId::BTree(pid), mode)
    }

    fn read_root_ptr(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        mode: LockMode,
    ) -> VellumResult<BTreeRootPtrPage> {
        let pid = self.root_ptr_pid();
        let frame = self.frame(pool, tid, pid, mode)?;
        let guard = frame.read();
        let (page, _) = BTreeRootPtrPageCodec::decode(pid, guard.data())?;
        Ok(page)
    }

    fn save_root_ptr(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: &BTreeRootPtrPage,
    ) -> VellumResult<()> {
        let frame = self.frame(pool, tid, page.pid, LockMode::Exclusive)?;
        let mut guard = frame.write();
        guard.set_data(BTreeRootPtrPageCodec::encode(page));
        guard.mark_dirty(tid);
        dirty.record(page.pid);
        Ok(())
    }

    fn read_leaf(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        pid: BTreePageId,
        mode: LockMode,
    ) -> VellumResult<BTreeLeafPage> {
        let frame = self.frame(pool, tid, pid, mode)?;
        let guard = frame.read();
        let (page, _) = BTreeLeafPageCodec::decode(
            pid,
            guard.data(),
            self.desc.clone(),
            self.key_field,
            self.page_size,
        )?;
        Ok(page)
    }

    fn save_leaf(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: &BTreeLeafPage,
    ) -> VellumResult<()> {
        let frame = self.frame(pool, tid, page.pid, LockMode::Exclusive)?;
        let mut guard = frame.write();
        guard.set_data(BTreeLeafPageCodec::encode(page, self.page_size)?);
        guard.mark_dirty(tid);
        dirty.record(page.pid);
        Ok(())
    }

    fn read_internal(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        pid: BTreePageId,
        mode: LockMode,
    ) -> VellumResult<BTreeInternalPage> {
        let frame = self.frame(pool, tid, pid, mode)?;
        let guard = frame.read();
        let (page, _) =
            BTreeInternalPageCodec::decode(pid, guard.data(), self.key_type, self.page_size)?;
        Ok(page)
    }

    fn save_internal(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: &BTreeInternalPage,
    ) -> VellumResult<()> {
        let frame = self.frame(pool, tid, page.pid, LockMode::Exclusive)?;
        let mut guard = frame.write();
        guard.set_data(BTreeInternalPageCodec::encode(page, self.page_size)?);
        guard.mark_dirty(tid);
        dirty.record(page.pid);
        Ok(())
    }

    fn read_header(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        pid: BTreePageId,
        mode: LockMode,
    ) -> VellumResult<BTreeHeaderPage> {
        let frame = self.frame(pool, tid, pid, mode)?;
        let guard = frame.read();
        let (page, _) = BTreeHeaderPageCodec::decode(pid, guard.data(), self.page_size)?;
        Ok(page)
    }

    fn save_header(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: &BTreeHeaderPage,
    ) -> VellumResult<()> {
        let frame = self.frame(pool, tid, page.pid, LockMode::Exclusive)?;
        let mut guard = frame.write();
        guard.set_data(BTreeHeaderPageCodec::encode(page, self.page_size)?);
        guard.mark_dirty(tid);
        dirty.record(page.pid);
        Ok(())
    }

    // ---- search ----

    /// Descend from `pid` to the left-most leaf that may contain `field`,
    /// locking internal nodes SHARED and the leaf in `mode`. A `None` field
    /// always takes the leftmost child (full scans).
    fn find_leaf(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        pid: BTreePageId,
        mode: LockMode,
        field: Option<&Field>,
    ) -> VellumResult<BTreeLeafPage> {
        match pid.category {
            BTreePageCategory::RootPtr => {
                let root_ptr = self.read_root_ptr(pool, tid, LockMode::Shared)?;
                let root = root_ptr.root().ok_or_else(|| {
                    VellumError::Storage("the tree is empty, no leaf to find".to_string())
                })?;
                self.find_leaf(pool, tid, root, mode, field)
            }
            BTreePageCategory::Leaf => self.read_leaf(pool, tid, pid, mode),
            BTreePageCategory::Internal => {
                let page = self.read_internal(pool, tid, pid, LockMode::Shared)?;
                if page.num_entries() == 0 {
                    return Err(VellumError::Storage(format!(
                        "internal page {} has no entries",
                        pid
                    )));
                }
                for index in 0..page.num_entries() {
                    let entry = page.entry(index)?;
                    let descend_left = match field {
                        None => true,
                        Some(f) => f.compare(Op::LessThanOrEq, &entry.key)?,
                    };
                    if descend_left {
                        return self.find_leaf(pool, tid, entry.left_child, mode, field);
                    }
                }
                let last = page.entry(page.num_entries() - 1)?;
                self.find_leaf(pool, tid, last.right_child, mode, field)
            }
            BTreePageCategory::Header => Err(VellumError::Storage(
                "cannot search from a header page".to_string(),
            )),
        }
    }

    // ---- insert / split ----

    /// Split a full leaf: allocate a new right-hand leaf, move the upper half
    /// of the tuples there, splice it into the sibling chain, and copy the
    /// new leaf's first key up into the parent. Returns the side that should
    /// receive `key`.
    fn split_leaf(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut page: BTreeLeafPage,
        key: &Field,
    ) -> VellumResult<BTreeLeafPage> {
        let new_pid = self.get_empty_page(pool, tid, dirty, BTreePageCategory::Leaf)?;
        debug!("splitting leaf {} into {}", page.pid, new_pid);
        let mut new_leaf = self.read_leaf(pool, tid, new_pid, LockMode::Exclusive)?;

        let moved = page.split_off_back(page.num_tuples() / 2);
        for mut tuple in moved {
            new_leaf.insert_tuple(&mut tuple)?;
        }

        if let Some(right_pid) = page.right_sibling_id() {
            let mut right = self.read_leaf(pool, tid, right_pid, LockMode::Exclusive)?;
            right.set_left_sibling(new_pid.page_no);
            self.save_leaf(pool, tid, dirty, &right)?;
            new_leaf.set_right_sibling(right_pid.page_no);
        }
        new_leaf.set_left_sibling(page.pid.page_no);
        page.set_right_sibling(new_pid.page_no);

        let split_key = new_leaf.key(0)?.clone();
        let original_parent = page.parent_id();
        // Both halves must be durable in their frames before the parent walk,
        // which may itself split pages and rewrite parent pointers.
        self.save_leaf(pool, tid, dirty, &page)?;
        self.save_leaf(pool, tid, dirty, &new_leaf)?;

        let mut parent =
            self.get_parent_with_empty_slots(pool, tid, dirty, original_parent, &split_key)?;
        parent.insert_entry(BTreeEntry::new(split_key.clone(), page.pid, new_pid))?;
        self.save_internal(pool, tid, dirty, &parent)?;

        let mut left = self.read_leaf(pool, tid, page.pid, LockMode::Exclusive)?;
        left.set_parent(parent.pid.page_no);
        self.save_leaf(pool, tid, dirty, &left)?;
        let mut right = self.read_leaf(pool, tid, new_pid, LockMode::Exclusive)?;
        right.set_parent(parent.pid.page_no);
        self.save_leaf(pool, tid, dirty, &right)?;

        if key.compare(Op::LessThanOrEq, &split_key)? {
            Ok(left)
        } else {
            Ok(right)
        }
    }

    /// Split a full internal page. Unlike a leaf split the middle entry is
    /// pushed up: its key moves into the parent and its children become the
    /// boundary between the two halves.
    fn split_internal(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut page: BTreeInternalPage,
        key: &Field,
    ) -> VellumResult<BTreeInternalPage> {
        let new_pid = self.get_empty_page(pool, tid, dirty, BTreePageCategory::Internal)?;
        debug!("splitting internal {} into {}", page.pid, new_pid);
        let mut new_page = self.read_internal(pool, tid, new_pid, LockMode::Exclusive)?;
        if let Some(category) = page.child_category() {
            new_page.set_child_category(category);
        }

        let move_count = page.num_entries() / 2;
        for _ in 0..move_count {
            let last = page.num_entries() - 1;
            let entry = page.entry(last)?;
            page.delete_key_and_right_child(last)?;
            new_page.insert_entry(entry)?;
        }

        let last = page.num_entries() - 1;
        let center = page.entry(last)?;
        page.delete_key_and_right_child(last)?;

        let original_parent = page.parent_id();
        self.save_internal(pool, tid, dirty, &page)?;
        self.save_internal(pool, tid, dirty, &new_page)?;

        let mut parent =
            self.get_parent_with_empty_slots(pool, tid, dirty, original_parent, &center.key)?;
        parent.insert_entry(BTreeEntry::new(center.key.clone(), page.pid, new_pid))?;
        self.save_internal(pool, tid, dirty, &parent)?;

        let mut left = self.read_internal(pool, tid, page.pid, LockMode::Exclusive)?;
        left.set_parent(parent.pid.page_no);
        self.save_internal(pool, tid, dirty, &left)?;
        let mut right = self.read_internal(pool, tid, new_pid, LockMode::Exclusive)?;
        right.set_parent(parent.pid.page_no);
        self.save_internal(pool, tid, dirty, &right)?;

        // Entries changed pages, so their children's parent pointers must be
        // rewritten on both sides.
        self.update_parent_pointers(pool, tid, dirty, &left)?;
        self.update_parent_pointers(pool, tid, dirty, &right)?;

        if key.compare(Op::LessThanOrEq, &center.key)? {
            Ok(left)
        } else {
            Ok(right)
        }
    }

    /// Fetch a parent guaranteed to have room for one more entry: a brand-new
    /// internal root when the split reaches the root pointer, the existing
    /// parent otherwise (split recursively if full).
    fn get_parent_with_empty_slots(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        parent_id: BTreePageId,
        key: &Field,
    ) -> VellumResult<BTreeInternalPage> {
        if parent_id.category == BTreePageCategory::RootPtr {
            let new_root_pid =
                self.get_empty_page(pool, tid, dirty, BTreePageCategory::Internal)?;
            debug!("growing tree: new internal root {}", new_root_pid);
            let mut root_ptr = self.read_root_ptr(pool, tid, LockMode::Exclusive)?;
            let prev_root = root_ptr.root().ok_or_else(|| {
                VellumError::Internal("splitting the root of an empty tree".to_string())
            })?;
            root_ptr.set_root(Some(new_root_pid));
            self.save_root_ptr(pool, tid, dirty, &root_ptr)?;
            self.set_parent_if_needed(pool, tid, dirty, prev_root, new_root_pid.page_no)?;

            let mut new_root = self.read_internal(pool, tid, new_root_pid, LockMode::Exclusive)?;
            new_root.set_child_category(prev_root.category);
            Ok(new_root)
        } else {
            let parent = self.read_internal(pool, tid, parent_id, LockMode::Exclusive)?;
            if parent.num_empty_slots() == 0 {
                self.split_internal(pool, tid, dirty, parent, key)
            } else {
                Ok(parent)
            }
        }
    }

    /// Point every child of `page` back at it.
    fn update_parent_pointers(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: &BTreeInternalPage,
    ) -> VellumResult<()> {
        let Some(category) = page.child_category() else {
            return Ok(());
        };
        for child_no in page.children() {
            let child_pid = self.pid(*child_no, category);
            self.set_parent_if_needed(pool, tid, dirty, child_pid, page.pid.page_no)?;
        }
        Ok(())
    }

    /// Rewrite a child's parent pointer when it disagrees. Checked under a
    /// SHARED lock first so unchanged children are not write-locked.
    fn set_parent_if_needed(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        child_pid: BTreePageId,
        parent_no: u32,
    ) -> VellumResult<()> {
        match child_pid.category {
            BTreePageCategory::Leaf => {
                let current = self.read_leaf(pool, tid, child_pid, LockMode::Shared)?;
                if current.parent_no() != parent_no {
                    let mut child = self.read_leaf(pool, tid, child_pid, LockMode::Exclusive)?;
                    child.set_parent(parent_no);
                    self.save_leaf(pool, tid, dirty, &child)?;
                }
                Ok(())
            }
            BTreePageCategory::Internal => {
                let current = self.read_internal(pool, tid, child_pid, LockMode::Shared)?;
                if current.parent_no() != parent_no {
                    let mut child =
                        self.read_internal(pool, tid, child_pid, LockMode::Exclusive)?;
                    child.set_parent(parent_no);
                    self.save_internal(pool, tid, dirty, &child)?;
                }
                Ok(())
            }
            _ => Err(VellumError::Internal(format!(
                "page {} cannot have a parent pointer",
                child_pid
            ))),
        }
    }

    // ---- free-page management ----

    /// Pick a reusable page number from the header chain, or extend the file
    /// by one zeroed page.
    fn get_empty_page_no(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
    ) -> VellumResult<u32> {
        self.ensure_initialized()?;
        let root_ptr = self.read_root_ptr(pool, tid, LockMode::Shared)?;
        let slots_per_header = BTreeHeaderPage::num_slots_for(self.page_size) as u32;

        let mut header_index: u32 = 0;
        let mut next = root_ptr.header();
        while let Some(header_pid) = next {
            let header = self.read_header(pool, tid, header_pid, LockMode::Shared)?;
            if header.get_empty_slot().is_some() {
                let mut header = self.read_header(pool, tid, header_pid, LockMode::Exclusive)?;
                if let Some(slot) = header.get_empty_slot() {
                    header.mark_slot_used(slot, true);
                    self.save_header(pool, tid, dirty, &header)?;
                    let page_no = header_index * slots_per_header + slot as u32;
                    debug!("reusing freed page {}", page_no);
                    return Ok(page_no);
                }
            }
            next = header.next_page_id();
            header_index += 1;
        }

        // Nothing to reuse: append a zeroed page at the end of the file.
        let _alloc = self.alloc_lock.lock();
        let page_no = self.num_pages() + 1;
        self.write_page(
            &PageId::BTree(self.pid(page_no, BTreePageCategory::Leaf)),
            &vec![0u8; self.page_size],
        )?;
        debug!("extended b+tree file with page {}", page_no);
        Ok(page_no)
    }

    /// Allocate a page of the given category: pick a page number, wipe it on
    /// disk and in the cache, and lock it EXCLUSIVE.
    fn get_empty_page(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        category: BTreePageCategory,
    ) -> VellumResult<BTreePageId> {
        let page_no = self.get_empty_page_no(pool, tid, dirty)?;
        let pid = self.pid(page_no, category);
        self.write_page(&PageId::BTree(pid), &vec![0u8; self.page_size])?;
        // A reused page may still be cached under its previous life.
        self.drop_cached_page(pool, page_no);
        let _ = self.frame(pool, tid, pid, LockMode::Exclusive)?;
        Ok(pid)
    }

    /// Mark `page_no` free in its header page, extending the header chain to
    /// cover it if necessary.
    fn free_page(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page_no: u32,
    ) -> VellumResult<()> {
        debug!("freeing b+tree page {}", page_no);
        let slots_per_header = BTreeHeaderPage::num_slots_for(self.page_size) as u32;

        let root_ptr = self.read_root_ptr(pool, tid, LockMode::Shared)?;
        let mut current = match root_ptr.header() {
            Some(header_pid) => header_pid,
            None => {
                let mut root_ptr = self.read_root_ptr(pool, tid, LockMode::Exclusive)?;
                let header_pid =
                    self.get_empty_page(pool, tid, dirty, BTreePageCategory::Header)?;
                let mut header = self.read_header(pool, tid, header_pid, LockMode::Exclusive)?;
                header.init();
                self.save_header(pool, tid, dirty, &header)?;
                root_ptr.set_header(Some(header_pid));
                self.save_root_ptr(pool, tid, dirty, &root_ptr)?;
                header_pid
            }
        };

        let target_index = page_no / slots_per_header;
        let mut header_index: u32 = 0;
        while header_index < target_index {
            let header = self.read_header(pool, tid, current, LockMode::Shared)?;
            match header.next_page_id() {
                Some(next) => {
                    current = next;
                }
                None => {
                    let new_pid =
                        self.get_empty_page(pool, tid, dirty, BTreePageCategory::Header)?;
                    let mut new_header =
                        self.read_header(pool, tid, new_pid, LockMode::Exclusive)?;
                    new_header.init();
                    new_header.set_prev(current.page_no);
                    self.save_header(pool, tid, dirty, &new_header)?;
                    let mut prev = self.read_header(pool, tid, current, LockMode::Exclusive)?;
                    prev.set_next(new_pid.page_no);
                    self.save_header(pool, tid, dirty, &prev)?;
                    current = new_pid;
                }
            }
            header_index += 1;
        }

        let mut header = self.read_header(pool, tid, current, LockMode::Exclusive)?;
        header.mark_slot_used((page_no % slots_per_header) as usize, false);
        self.save_header(pool, tid, dirty, &header)?;

        // The freed page's cached bytes are meaningless now; a stale dirty
        // frame must never flush over a reused page.
        self.drop_cached_page(pool, page_no);
        Ok(())
    }

    fn drop_cached_page(&self, pool: &BufferPool, page_no: u32) {
        for category in [
            BTreePageCategory::Leaf,
            BTreePageCategory::Internal,
            BTreePageCategory::Header,
        ] {
            pool.remove_page(PageId::BTree(self.pid(page_no, category)));
        }
    }

    // ---- delete / steal / merge ----

    fn handle_min_occupancy(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: TreePage,
    ) -> VellumResult<()> {
        let parent_id = page.parent_id();
        if parent_id.category == BTreePageCategory::RootPtr {
            // The root may be any occupancy.
            return Ok(());
        }
        let parent = self.read_internal(pool, tid, parent_id, LockMode::Exclusive)?;
        let (left_idx, right_idx) = parent.entry_indexes_around(page.pid().page_no);
        match page {
            TreePage::Leaf(leaf) => {
                self.handle_min_occupancy_leaf(pool, tid, dirty, leaf, parent, left_idx, right_idx)
            }
            TreePage::Internal(internal) => self.handle_min_occupancy_internal(
                pool, tid, dirty, internal, parent, left_idx, right_idx,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_min_occupancy_leaf(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: BTreeLeafPage,
        parent: BTreeInternalPage,
        left_idx: Option<usize>,
        right_idx: Option<usize>,
    ) -> VellumResult<()> {
        let max = page.max_tuples();
        let threshold = max - max / 2;
        if let Some(entry_idx) = left_idx {
            let sibling_pid = parent.entry(entry_idx)?.left_child;
            let sibling = self.read_leaf(pool, tid, sibling_pid, LockMode::Exclusive)?;
            if sibling.num_empty_slots() >= threshold {
                self.merge_leaf_pages(pool, tid, dirty, sibling, page, parent, entry_idx)
            } else {
                self.steal_from_leaf_page(pool, tid, dirty, page, sibling, parent, entry_idx, false)
            }
        } else if let Some(entry_idx) = right_idx {
            let sibling_pid = parent.entry(entry_idx)?.right_child;
            let sibling = self.read_leaf(pool, tid, sibling_pid, LockMode::Exclusive)?;
            if sibling.num_empty_slots() >= threshold {
                self.merge_leaf_pages(pool, tid, dirty, page, sibling, parent, entry_idx)
            } else {
                self.steal_from_leaf_page(pool, tid, dirty, page, sibling, parent, entry_idx, true)
            }
        } else {
            Ok(())
        }
    }

    /// Redistribute tuples so both leaves end up at least half full, and
    /// rewrite the parent's separator to the first key of the right-hand
    /// page.
    #[allow(clippy::too_many_arguments)]
    fn steal_from_leaf_page(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut page: BTreeLeafPage,
        mut sibling: BTreeLeafPage,
        mut parent: BTreeInternalPage,
        entry_idx: usize,
        is_right_sibling: bool,
    ) -> VellumResult<()> {
        let own = page.num_tuples() as i64;
        let spare = sibling.num_tuples() as i64;
        if own >= spare {
            return Ok(());
        }
        let to_steal = (spare + (own - spare) / 2 - own) as usize;
        debug!(
            "leaf {} steals {} tuples from sibling {}",
            page.pid, to_steal, sibling.pid
        );

        if is_right_sibling {
            for mut tuple in sibling.split_off_front(to_steal) {
                page.insert_tuple(&mut tuple)?;
            }
            parent.set_key(entry_idx, sibling.key(0)?.clone())?;
        } else {
            for mut tuple in sibling.split_off_back(to_steal) {
                page.insert_tuple(&mut tuple)?;
            }
            parent.set_key(entry_idx, page.key(0)?.clone())?;
        }

        self.save_leaf(pool, tid, dirty, &page)?;
        self.save_leaf(pool, tid, dirty, &sibling)?;
        self.save_internal(pool, tid, dirty, &parent)?;
        Ok(())
    }

    /// Fold the right leaf into the left one, unlink it from the sibling
    /// chain, free it, and delete the separating entry from the parent.
    #[allow(clippy::too_many_arguments)]
    fn merge_leaf_pages(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut left: BTreeLeafPage,
        mut right: BTreeLeafPage,
        parent: BTreeInternalPage,
        entry_idx: usize,
    ) -> VellumResult<()> {
        if left.num_tuples() + right.num_tuples() > left.max_tuples() {
            return Ok(());
        }
        debug!("merging leaf {} into {}", right.pid, left.pid);

        for mut tuple in right.split_off_front(right.num_tuples()) {
            left.insert_tuple(&mut tuple)?;
        }

        if let Some(far_right_pid) = right.right_sibling_id() {
            let mut far_right = self.read_leaf(pool, tid, far_right_pid, LockMode::Exclusive)?;
            far_right.set_left_sibling(left.pid.page_no);
            self.save_leaf(pool, tid, dirty, &far_right)?;
        }
        left.set_right_sibling(
            right
                .right_sibling_id()
                .map(|pid| pid.page_no)
                .unwrap_or(0),
        );
        self.save_leaf(pool, tid, dirty, &left)?;

        self.free_page(pool, tid, dirty, right.pid.page_no)?;
        self.delete_parent_entry(pool, tid, dirty, TreePage::Leaf(left), parent, entry_idx)
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_min_occupancy_internal(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        page: BTreeInternalPage,
        parent: BTreeInternalPage,
        left_idx: Option<usize>,
        right_idx: Option<usize>,
    ) -> VellumResult<()> {
        let max = page.max_entries();
        let threshold = max - max / 2;
        if let Some(entry_idx) = left_idx {
            let sibling_pid = parent.entry(entry_idx)?.left_child;
            let sibling = self.read_internal(pool, tid, sibling_pid, LockMode::Exclusive)?;
            if sibling.num_empty_slots() >= threshold {
                self.merge_internal_pages(pool, tid, dirty, sibling, page, parent, entry_idx)
            } else {
                self.steal_from_left_internal_page(
                    pool, tid, dirty, page, sibling, parent, entry_idx,
                )
            }
        } else if let Some(entry_idx) = right_idx {
            let sibling_pid = parent.entry(entry_idx)?.right_child;
            let sibling = self.read_internal(pool, tid, sibling_pid, LockMode::Exclusive)?;
            if sibling.num_empty_slots() >= threshold {
                self.merge_internal_pages(pool, tid, dirty, page, sibling, parent, entry_idx)
            } else {
                self.steal_from_right_internal_page(
                    pool, tid, dirty, page, sibling, parent, entry_idx,
                )
            }
        } else {
            Ok(())
        }
    }

    /// Rotate entries through the parent from the left sibling: the parent's
    /// separator comes down into `page`, the sibling's last key goes up, and
    /// the orphaned child pointer becomes the new left edge of `page`.
    #[allow(clippy::too_many_arguments)]
    fn steal_from_left_internal_page(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut page: BTreeInternalPage,
        mut sibling: BTreeInternalPage,
        mut parent: BTreeInternalPage,
        entry_idx: usize,
    ) -> VellumResult<()> {
        let own = page.num_entries() as i64;
        let spare = sibling.num_entries() as i64;
        if own >= spare {
            return Ok(());
        }
        let to_steal = (spare + (own - spare) / 2 - own) as usize;
        debug!(
            "internal {} steals {} entries from left sibling {}",
            page.pid, to_steal, sibling.pid
        );

        let mut page_first_child = *page.children().first().ok_or_else(|| {
            VellumError::Internal(format!("internal page {} has no children", page.pid))
        })?;
        for _ in 0..to_steal {
            let last = sibling.num_entries() - 1;
            let moved = sibling.entry(last)?;
            sibling.delete_key_and_right_child(last)?;

            let down_key = parent.key_at(entry_idx)?.clone();
            parent.set_key(entry_idx, moved.key.clone())?;
            let right_child = self.pid(page_first_child, moved.right_child.category);
            page.insert_entry(BTreeEntry::new(down_key, moved.right_child, right_child))?;
            page_first_child = moved.right_child.page_no;
        }

        self.save_internal(pool, tid, dirty, &page)?;
        self.save_internal(pool, tid, dirty, &sibling)?;
        self.save_internal(pool, tid, dirty, &parent)?;
        self.update_parent_pointers(pool, tid, dirty, &page)?;
        self.update_parent_pointers(pool, tid, dirty, &sibling)?;
        Ok(())
    }

    /// Mirror image of `steal_from_left_internal_page`.
    #[allow(clippy::too_many_arguments)]
    fn steal_from_right_internal_page(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut page: BTreeInternalPage,
        mut sibling: BTreeInternalPage,
        mut parent: BTreeInternalPage,
        entry_idx: usize,
    ) -> VellumResult<()> {
        let own = page.num_entries() as i64;
        let spare = sibling.num_entries() as i64;
        if own >= spare {
            return Ok(());
        }
        let to_steal = (spare + (own - spare) / 2 - own) as usize;
        debug!(
            "internal {} steals {} entries from right sibling {}",
            page.pid, to_steal, sibling.pid
        );

        let mut page_last_child = *page.children().last().ok_or_else(|| {
            VellumError::Internal(format!("internal page {} has no children", page.pid))
        })?;
        for _ in 0..to_steal {
            let moved = sibling.entry(0)?;
            sibling.delete_key_and_left_child(0)?;

            let down_key = parent.key_at(entry_idx)?.clone();
            parent.set_key(entry_idx, moved.key.clone())?;
            let left_child = self.pid(page_last_child, moved.left_child.category);
            page.insert_entry(BTreeEntry::new(down_key, left_child, moved.left_child))?;
            page_last_child = moved.left_child.page_no;
        }

        self.save_internal(pool, tid, dirty, &page)?;
        self.save_internal(pool, tid, dirty, &sibling)?;
        self.save_internal(pool, tid, dirty, &parent)?;
        self.update_parent_pointers(pool, tid, dirty, &page)?;
        self.update_parent_pointers(pool, tid, dirty, &sibling)?;
        Ok(())
    }

    /// Fold the right internal page into the left one: the parent's separator
    /// is pulled down between them, then the right page's entries follow.
    #[allow(clippy::too_many_arguments)]
    fn merge_internal_pages(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        mut left: BTreeInternalPage,
        mut right: BTreeInternalPage,
        parent: BTreeInternalPage,
        entry_idx: usize,
    ) -> VellumResult<()> {
        if left.num_entries() + right.num_entries() + 1 > left.max_entries() {
            return Ok(());
        }
        debug!("merging internal {} into {}", right.pid, left.pid);

        let category = left.child_category().or(right.child_category()).ok_or_else(|| {
            VellumError::Internal(format!("merge of childless internal page {}", left.pid))
        })?;
        let down_key = parent.key_at(entry_idx)?.clone();
        let left_last = self.pid(
            *left.children().last().ok_or_else(|| {
                VellumError::Internal(format!("internal page {} has no children", left.pid))
            })?,
            category,
        );
        let right_first = self.pid(
            *right.children().first().ok_or_else(|| {
                VellumError::Internal(format!("internal page {} has no children", right.pid))
            })?,
            category,
        );
        left.insert_entry(BTreeEntry::new(down_key, left_last, right_first))?;

        while right.num_entries() > 0 {
            let moved = right.entry(0)?;
            right.delete_key_and_left_child(0)?;
            left.insert_entry(moved)?;
        }

        self.save_internal(pool, tid, dirty, &left)?;
        self.update_parent_pointers(pool, tid, dirty, &left)?;
        self.free_page(pool, tid, dirty, right.pid.page_no)?;
        self.delete_parent_entry(pool, tid, dirty, TreePage::Internal(left), parent, entry_idx)
    }

    /// Delete the separating entry (key + right child pointer) from the
    /// parent. An emptied root hands the tree to its single remaining child;
    /// an under-full non-root parent steals or merges recursively.
    fn delete_parent_entry(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        left: TreePage,
        mut parent: BTreeInternalPage,
        entry_idx: usize,
    ) -> VellumResult<()> {
        parent.delete_key_and_right_child(entry_idx)?;
        if parent.num_entries() == 0 {
            if parent.parent_id().category != BTreePageCategory::RootPtr {
                return Err(VellumError::Storage(
                    "attempting to delete a non-root node".to_string(),
                ));
            }
            debug!("collapsing root {} onto {}", parent.pid, left.pid());
            let mut root_ptr = self.read_root_ptr(pool, tid, LockMode::Exclusive)?;
            root_ptr.set_root(Some(left.pid()));
            self.save_root_ptr(pool, tid, dirty, &root_ptr)?;
            self.set_parent_unconditional(pool, tid, dirty, left.pid(), 0)?;
            self.free_page(pool, tid, dirty, parent.pid.page_no)?;
            Ok(())
        } else {
            self.save_internal(pool, tid, dirty, &parent)?;
            let max = parent.max_entries();
            let threshold = max - max / 2;
            if parent.num_empty_slots() > threshold {
                self.handle_min_occupancy(pool, tid, dirty, TreePage::Internal(parent))?;
            }
            Ok(())
        }
    }

    fn set_parent_unconditional(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        dirty: &mut DirtyPages,
        child_pid: BTreePageId,
        parent_no: u32,
    ) -> VellumResult<()> {
        match child_pid.category {
            BTreePageCategory::Leaf => {
                let mut child = self.read_leaf(pool, tid, child_pid, LockMode::Exclusive)?;
                child.set_parent(parent_no);
                self.save_leaf(pool, tid, dirty, &child)
            }
            BTreePageCategory::Internal => {
                let mut child = self.read_internal(pool, tid, child_pid, LockMode::Exclusive)?;
                child.set_parent(parent_no);
                self.save_internal(pool, tid, dirty, &child)
            }
            _ => Err(VellumError::Internal(format!(
                "page {} cannot have a parent pointer",
                child_pid
            ))),
        }
    }

    /// Range/point scan driven by a predicate over the key field.
    pub fn index_iterator(
        self: &Arc<Self>,
        pool: Arc<BufferPool>,
        tid: TransactionId,
        predicate: IndexPredicate,
    ) -> BTreeSearchIterator {
        BTreeSearchIterator::new(self.clone(), pool, tid, predicate)
    }
}

impl DbFile for BTreeFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }

    fn num_pages(&self) -> u32 {
        (self.file_len().saturating_sub(ROOT_PTR_PAGE_SIZE as u64) / self.page_size as u64) as u32
    }

    fn read_page(&self, pid: &PageId) -> VellumResult<Vec<u8>> {
        let bpid = self.btree_pid(pid)?;
        let (offset, size) = self.page_location(&bpid)?;
        let _guard = self.io_lock.read();
        let mut buf = vec![0u8; size];
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            // A file that does not exist yet reads as zeros.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(buf),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < size {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buf)
    }

    fn write_page(&self, pid: &PageId, data: &[u8]) -> VellumResult<()> {
        let bpid = self.btree_pid(pid)?;
        let (offset, size) = self.page_location(&bpid)?;
        if data.len() != size {
            return Err(VellumError::Internal(format!(
                "page size is {} instead of {}",
                data.len(),
                size
            )));
        }
        let _guard = self.io_lock.write();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Insert keeping key order, splitting the target leaf (and recursively
    /// its ancestors) when full.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> VellumResult<Vec<PageId>> {
        let mut dirty = DirtyPages::default();
        self.ensure_initialized()?;

        let root_pid = {
            let root_ptr = self.read_root_ptr(pool, tid, LockMode::Shared)?;
            match root_ptr.root() {
                Some(root) => root,
                None => {
                    let mut root_ptr = self.read_root_ptr(pool, tid, LockMode::Exclusive)?;
                    match root_ptr.root() {
                        Some(root) => root,
                        None => {
                            // Adopt the pre-created empty page as the root
                            // leaf.
                            let root =
                                self.pid(self.num_pages(), BTreePageCategory::Leaf);
                            root_ptr.set_root(Some(root));
                            self.save_root_ptr(pool, tid, &mut dirty, &root_ptr)?;
                            root
                        }
                    }
                }
            }
        };

        let key = tuple.field(self.key_field)?.clone();
        let mut leaf = self.find_leaf(pool, tid, root_pid, LockMode::Exclusive, Some(&key))?;
        if leaf.num_empty_slots() == 0 {
            leaf = self.split_leaf(pool, tid, &mut dirty, leaf, &key)?;
        }
        leaf.insert_tuple(tuple)?;
        self.save_leaf(pool, tid, &mut dirty, &leaf)?;
        Ok(dirty.into_vec())
    }

    /// Delete by record id; a leaf left less than half full steals from or
    /// merges with a sibling, possibly cascading up to the root.
    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> VellumResult<Vec<PageId>> {
        let mut dirty = DirtyPages::default();
        let record_id = tuple
            .record_id
            .ok_or_else(|| VellumError::Storage("tuple has no record id".to_string()))?;
        let located = self.btree_pid(&record_id.page_id)?;
        let leaf_pid = self.pid(located.page_no, BTreePageCategory::Leaf);

        let mut leaf = self.read_leaf(pool, tid, leaf_pid, LockMode::Exclusive)?;
        leaf.delete_tuple(tuple)?;
        self.save_leaf(pool, tid, &mut dirty, &leaf)?;

        let max = leaf.max_tuples();
        let threshold = max - max / 2;
        if leaf.num_empty_slots() > threshold {
            self.handle_min_occupancy(pool, tid, &mut dirty, TreePage::Leaf(leaf))?;
        }
        Ok(dirty.into_vec())
    }

    fn iterator(
        self: Arc<Self>,
        pool: Arc<BufferPool>,
        tid: TransactionId,
    ) -> Box<dyn TupleIterator> {
        Box::new(BTreeFileIterator::new(self, pool, tid))
    }
}

/// Forward scan over every tuple: seek the leftmost leaf, then follow right
/// sibling pointers.
pub struct BTreeFileIterator {
    file: Arc<BTreeFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    started: bool,
    current: VecDeque<Tuple>,
    next_leaf: Option<BTreePageId>,
}

impl BTreeFileIterator {
    pub fn new(file: Arc<BTreeFile>, pool: Arc<BufferPool>, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            started: false,
            current: VecDeque::new(),
            next_leaf: None,
        }
    }

    fn open(&mut self) -> VellumResult<()> {
        self.started = true;
        let root_ptr = self
            .file
            .read_root_ptr(&self.pool, self.tid, LockMode::Shared)?;
        let Some(root) = root_ptr.root() else {
            self.next_leaf = None;
            return Ok(());
        };
        let leaf = self
            .file
            .find_leaf(&self.pool, self.tid, root, LockMode::Shared, None)?;
        self.current.extend(leaf.iter().cloned());
        self.next_leaf = leaf.right_sibling_id();
        Ok(())
    }
}

impl TupleIterator for BTreeFileIterator {
    fn rewind(&mut self) -> VellumResult<()> {
        self.started = false;
        self.current.clear();
        self.next_leaf = None;
        Ok(())
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        if !self.started {
            self.open()?;
        }
        loop {
            if let Some(tuple) = self.current.pop_front() {
                return Ok(Some(tuple));
            }
            let Some(pid) = self.next_leaf else {
                return Ok(None);
            };
            let leaf = self
                .file
                .read_leaf(&self.pool, self.tid, pid, LockMode::Shared)?;
            self.current.extend(leaf.iter().cloned());
            self.next_leaf = leaf.right_sibling_id();
        }
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.file.tuple_desc()
    }
}

/// Predicate-driven scan: seeks for `=`, `>`, `>=`; scans from the left for
/// everything else, stopping as soon as the predicate can no longer match.
pub struct BTreeSearchIterator {
    file: Arc<BTreeFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    predicate: IndexPredicate,
    started: bool,
    done: bool,
    current: VecDeque<Tuple>,
    next_leaf: Option<BTreePageId>,
}

impl BTreeSearchIterator {
    pub fn new(
        file: Arc<BTreeFile>,
        pool: Arc<BufferPool>,
        tid: TransactionId,
        predicate: IndexPredicate,
    ) -> Self {
        Self {
            file,
            pool,
            tid,
            predicate,
            started: false,
            done: false,
            current: VecDeque::new(),
            next_leaf: None,
        }
    }

    fn open(&mut self) -> VellumResult<()> {
        self.started = true;
        let root_ptr = self
            .file
            .read_root_ptr(&self.pool, self.tid, LockMode::Shared)?;
        let Some(root) = root_ptr.root() else {
            self.done = true;
            return Ok(());
        };
        let seek_field = match self.predicate.op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => Some(&self.predicate.operand),
            _ => None,
        };
        let leaf = self
            .file
            .find_leaf(&self.pool, self.tid, root, LockMode::Shared, seek_field)?;
        self.current.extend(leaf.iter().cloned());
        self.next_leaf = leaf.right_sibling_id();
        Ok(())
    }
}

impl TupleIterator for BTreeSearchIterator {
    fn rewind(&mut self) -> VellumResult<()> {
        self.started = false;
        self.done = false;
        self.current.clear();
        self.next_leaf = None;
        Ok(())
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        if !self.started {
            self.open()?;
        }
        if self.done {
            return Ok(None);
        }
        loop {
            let Some(tuple) = self.current.pop_front() else {
                let Some(pid) = self.next_leaf else {
                    self.done = true;
                    return Ok(None);
                };
                let leaf = self
                    .file
                    .read_leaf(&self.pool, self.tid, pid, LockMode::Shared)?;
                self.current.extend(leaf.iter().cloned());
                self.next_leaf = leaf.right_sibling_id();
                continue;
            };

            let key = tuple.field(self.file.key_field)?;
            if key.compare(self.predicate.op, &self.predicate.operand)? {
                return Ok(Some(tuple));
            }
            match self.predicate.op {
                // Keys only grow to the right; below-range operators are
                // finished at the first failure.
                Op::LessThan | Op::LessThanOrEq => {
                    self.done = true;
                    return Ok(None);
                }
                Op::Equals
                    if key.compare(Op::GreaterThan, &self.predicate.operand)? =>
                {
                    self.done = true;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.file.tuple_desc()
    }
}
