use crate::buffer::BufferPool;
use crate::catalog::TupleDescRef;
use crate::config::DbConfig;
use crate::error::{VellumError, VellumResult};
use crate::execution::TupleIterator;
use crate::storage::codec::HeapPageCodec;
use crate::storage::page::{HeapPage, HeapPageId, PageId, TableId};
use crate::storage::tuple::Tuple;
use crate::storage::{table_id_for_path, DbFile};
use crate::transaction::{LockMode, TransactionId};
use log::debug;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A collection of slotted pages in no particular order, stored back to back
/// in one file.
///
/// `num_pages` is `ceil(file_length / page_size)` and grows when the
/// one-past-end page is first read: that page materializes as all zeros (no
/// used slots) before any byte of it exists on disk, which is how new pages
/// are appended.
pub struct HeapFile {
    path: PathBuf,
    table_id: TableId,
    desc: TupleDescRef,
    page_size: usize,
    // Guards the backing file, separate from page-level locks.
    io_lock: RwLock<()>,
    num_pages: AtomicU32,
}

impl HeapFile {
    pub fn open(
        path: impl AsRef<Path>,
        desc: TupleDescRef,
        config: &DbConfig,
    ) -> VellumResult<Arc<Self>> {
        let path = std::path::absolute(path.as_ref())
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        if HeapPage::num_slots_for(config.page_size, &desc) == 0 {
            return Err(VellumError::Storage(format!(
                "tuple width {} does not fit a {}-byte page",
                desc.size(),
                config.page_size
            )));
        }
        let table_id = table_id_for_path(&path);
        let file_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let num_pages = file_len.div_ceil(config.page_size as u64) as u32;
        debug!(
            "opened heap file {:?} as table {}, {} pages",
            path, table_id, num_pages
        );
        Ok(Arc::new(Self {
            path,
            table_id,
            desc,
            page_size: config.page_size,
            io_lock: RwLock::new(()),
            num_pages: AtomicU32::new(num_pages),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn heap_pid(&self, pid: &PageId) -> VellumResult<HeapPageId> {
        match pid {
            PageId::Heap(hpid) if hpid.table_id == self.table_id => Ok(*hpid),
            _ => Err(VellumError::Storage(format!(
                "page {} does not belong to heap file {}",
                pid, self.table_id
            ))),
        }
    }

    fn page_id(&self, page_no: u32) -> PageId {
        PageId::Heap(HeapPageId::new(self.table_id, page_no))
    }

    fn decode_page(&self, pid: HeapPageId, bytes: &[u8]) -> VellumResult<HeapPage> {
        let (page, _) = HeapPageCodec::decode(pid, bytes, self.desc.clone(), self.page_size)?;
        Ok(page)
    }
}

impl DbFile for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }

    fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::SeqCst)
    }

    fn read_page(&self, pid: &PageId) -> VellumResult<Vec<u8>> {
        let hpid = self.heap_pid(pid)?;
        let _guard = self.io_lock.read();
        if hpid.page_no >= self.num_pages() {
            // One past the end: materialize a fresh empty page and grow the
            // logical page count so the next append lands after it.
            self.num_pages
                .fetch_max(hpid.page_no + 1, Ordering::SeqCst);
            debug!("materialized empty heap page {}", hpid);
            return Ok(vec![0u8; self.page_size]);
        }
        let mut buf = vec![0u8; self.page_size];
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            // Pages this file has materialized but never flushed read as
            // zeros until the first write creates the file.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(buf),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(hpid.page_no as u64 * self.page_size as u64))?;
        let mut filled = 0;
        while filled < self.page_size {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buf)
    }

    fn write_page(&self, pid: &PageId, data: &[u8]) -> VellumResult<()> {
        let hpid = self.heap_pid(pid)?;
        if data.len() != self.page_size {
            return Err(VellumError::Internal(format!(
                "page size is {} instead of {}",
                data.len(),
                self.page_size
            )));
        }
        let _guard = self.io_lock.write();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(hpid.page_no as u64 * self.page_size as u64))?;
        file.write_all(data)?;
        file.flush()?;
        self.num_pages
            .fetch_max(hpid.page_no + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Scan for the first page with a free slot, acquiring each page SHARED
    /// first and upgrading to EXCLUSIVE only once it reports room; the scan
    /// includes the one-past-end page, which always materializes empty.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> VellumResult<Vec<PageId>> {
        let mut page_no = 0u32;
        // `num_pages` is re-read every round: reading the one-past-end page
        // grows it, so the virtual append page always exists.
        while page_no <= self.num_pages() {
            let pid = self.page_id(page_no);
            let frame = pool.get_page(tid, pid, LockMode::Shared)?;
            let free_slots = {
                let guard = frame.read();
                let page = self.decode_page(HeapPageId::new(self.table_id, page_no), guard.data())?;
                page.num_unused_slots()
            };
            if free_slots > 0 {
                debug!("inserting tuple into heap page {}: tid={}", pid, tid);
                let frame = pool.get_page(tid, pid, LockMode::Exclusive)?;
                let mut guard = frame.write();
                let mut page =
                    self.decode_page(HeapPageId::new(self.table_id, page_no), guard.data())?;
                page.insert_tuple(tuple)?;
                guard.set_data(HeapPageCodec::encode(&page)?);
                guard.mark_dirty(tid);
                return Ok(vec![pid]);
            }
            page_no += 1;
        }
        // Unreachable in practice: the one-past-end page is always fresh.
        Err(VellumError::Storage("failed to insert tuple".to_string()))
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> VellumResult<Vec<PageId>> {
        let record_id = tuple
            .record_id
            .ok_or_else(|| VellumError::Storage("tuple has no record id".to_string()))?;
        let hpid = self.heap_pid(&record_id.page_id)?;
        let pid = record_id.page_id;
        let frame = pool.get_page(tid, pid, LockMode::Exclusive)?;
        let mut guard = frame.write();
        let mut page = self.decode_page(hpid, guard.data())?;
        page.delete_tuple(tuple)?;
        guard.set_data(HeapPageCodec::encode(&page)?);
        guard.mark_dirty(tid);
        Ok(vec![pid])
    }

    fn iterator(
        self: Arc<Self>,
        pool: Arc<BufferPool>,
        tid: TransactionId,
    ) -> Box<dyn TupleIterator> {
        Box::new(HeapFileIterator::new(self, pool, tid))
    }
}

/// Restartable cursor over every tuple of a heap file.
///
/// State is `(next page number, tuples remaining on the current page)`; each
/// page is re-acquired through the buffer pool when the cursor reaches it, so
/// eviction between steps is harmless.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    num_pages: u32,
    next_page_no: u32,
    current: VecDeque<Tuple>,
}

impl HeapFileIterator {
    pub fn new(file: Arc<HeapFile>, pool: Arc<BufferPool>, tid: TransactionId) -> Self {
        let num_pages = file.num_pages();
        Self {
            file,
            pool,
            tid,
            num_pages,
            next_page_no: 0,
            current: VecDeque::new(),
        }
    }
}

impl TupleIterator for HeapFileIterator {
    fn rewind(&mut self) -> VellumResult<()> {
        self.num_pages = self.file.num_pages();
        self.next_page_no = 0;
        self.current.clear();
        Ok(())
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        loop {
            if let Some(tuple) = self.current.pop_front() {
                return Ok(Some(tuple));
            }
            if self.next_page_no >= self.num_pages {
                return Ok(None);
            }
            let page_no = self.next_page_no;
            self.next_page_no += 1;
            let pid = self.file.page_id(page_no);
            let frame = self.pool.get_page(self.tid, pid, LockMode::Shared)?;
            let guard = frame.read();
            let page = self
                .file
                .decode_page(HeapPageId::new(self.file.table_id(), page_no), guard.data())?;
            drop(guard);
            self.current.extend(page.iter().cloned());
        }
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.file.tuple_desc()
    }
}
