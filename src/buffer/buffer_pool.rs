use crate::buffer::page::{Page, PageRef};
use crate::catalog::Catalog;
use crate::config::DbConfig;
use crate::error::{VellumError, VellumResult};
use crate::storage::page::PageId;
use crate::transaction::{LockManager, LockMode, TransactionId};
use hashlink::LinkedHashMap;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Bounded page cache with a midpoint-insertion LRU, modeled on the InnoDB
/// young/old split.
///
/// Newly loaded pages enter the head of the old list; a page re-accessed after
/// sitting on the old list longer than the old-block time is promoted to the
/// young list. Eviction scans oldest-first across old then young and only ever
/// takes clean pages (NO-STEAL): a dirty page stays in the pool until its
/// owning transaction commits (flush) or aborts (discard).
///
/// In both lists the back of the `LinkedHashMap` is the most recent entry, so
/// the front is the eviction end.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
    config: Arc<DbConfig>,
    old_capacity: usize,
    young_capacity: usize,
}

struct PoolInner {
    young: LinkedHashMap<PageId, PageRef>,
    old: LinkedHashMap<PageId, PageRef>,
    last_used: HashMap<PageId, Instant>,
}

impl BufferPool {
    pub fn new(
        config: Arc<DbConfig>,
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
    ) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                young: LinkedHashMap::new(),
                old: LinkedHashMap::new(),
                last_used: HashMap::new(),
            }),
            lock_manager,
            catalog,
            old_capacity: config.old_list_capacity(),
            young_capacity: config.young_list_capacity(),
            config,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn config(&self) -> &Arc<DbConfig> {
        &self.config
    }

    /// Retrieve the page under the requested lock mode. Blocks (or aborts) in
    /// the lock manager; a failure after the lock was granted releases it
    /// again before propagating.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
    ) -> VellumResult<PageRef> {
        self.lock_manager.acquire(tid, pid, mode)?;
        match self.load_page(pid) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                warn!("releasing lock after failed page load: tid={}, pid={}", tid, pid);
                self.lock_manager.release(tid, pid);
                Err(e)
            }
        }
    }

    fn load_page(&self, pid: PageId) -> VellumResult<PageRef> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let frame = if let Some(frame) = inner.young.remove(&pid) {
            // Hit in young: move to the head of young.
            inner.young.insert(pid, frame.clone());
            frame
        } else if let Some(frame) = inner.old.remove(&pid) {
            // Hit in old: promote only if it survived the old-block time and
            // young has room.
            let last_used = inner.last_used.get(&pid).copied().unwrap_or(now);
            if now.duration_since(last_used) > self.config.old_block_time
                && inner.young.len() < self.young_capacity
            {
                debug!("promoting page {} to the young list", pid);
                inner.young.insert(pid, frame.clone());
            } else {
                inner.old.insert(pid, frame.clone());
            }
            frame
        } else {
            let file = self.catalog.get_file(pid.table_id())?;
            let data = file.read_page(&pid)?;
            let frame: PageRef = Arc::new(RwLock::new(Page::new(pid, data)));
            self.admit(&mut inner, pid, frame.clone())?;
            frame
        };
        inner.last_used.insert(pid, now);
        Ok(frame)
    }

    /// Admission for a freshly loaded page: old list first, then make room by
    /// shifting the oldest old entry into young, then evict.
    fn admit(&self, inner: &mut PoolInner, pid: PageId, frame: PageRef) -> VellumResult<()> {
        if inner.young.contains_key(&pid) || inner.old.contains_key(&pid) {
            return Ok(());
        }
        loop {
            if inner.old.len() < self.old_capacity {
                inner.old.insert(pid, frame);
                return Ok(());
            }
            if inner.young.len() < self.young_capacity {
                if let Some((moved_pid, moved_frame)) = inner.old.pop_front() {
                    inner.young.insert(moved_pid, moved_frame);
                    inner.old.insert(pid, frame);
                } else {
                    inner.young.insert(pid, frame);
                }
                return Ok(());
            }
            self.evict_one(inner)?;
        }
    }

    /// Evict the oldest clean page, scanning old then young. Refuses to evict
    /// dirty pages (NO-STEAL); if everything is dirty the pool is stuck.
    fn evict_one(&self, inner: &mut PoolInner) -> VellumResult<()> {
        let victim = inner
            .old
            .iter()
            .chain(inner.young.iter())
            .find(|(_, frame)| frame.read().is_dirty().is_none())
            .map(|(pid, frame)| (*pid, frame.clone()));
        let Some((pid, frame)) = victim else {
            return Err(VellumError::Storage(
                "all pages are dirty, can not evict any page".to_string(),
            ));
        };
        // Flushing a page locked by another transaction would violate
        // isolation; under NO-STEAL the victim is clean so this is a no-op
        // either way.
        if !self.lock_manager.is_locked(pid) {
            self.flush_frame(pid, &frame)?;
        }
        debug!("evicting page {}", pid);
        inner.young.remove(&pid);
        inner.old.remove(&pid);
        inner.last_used.remove(&pid);
        Ok(())
    }

    fn flush_frame(&self, pid: PageId, frame: &PageRef) -> VellumResult<()> {
        let mut page = frame.write();
        if page.is_dirty().is_some() {
            debug!("flushing page {}", pid);
            let file = self.catalog.get_file(pid.table_id())?;
            file.write_page(&pid, page.data())?;
            page.mark_clean();
            page.set_before_image();
        }
        Ok(())
    }

    /// Write the page through its owning file if dirty; no-op otherwise.
    pub fn flush_page(&self, pid: PageId) -> VellumResult<()> {
        let frame = self.cached_page(pid);
        if let Some(frame) = frame {
            self.flush_frame(pid, &frame)?;
        }
        Ok(())
    }

    /// Flush every dirty page. Unsafe while transactions are in flight: it
    /// writes uncommitted data and breaks NO-STEAL.
    pub fn flush_all_pages(&self) -> VellumResult<()> {
        let entries = self.snapshot();
        for (pid, frame) in entries {
            self.flush_frame(pid, &frame)?;
        }
        Ok(())
    }

    /// Drop the page from the pool without flushing. Used when a B+-tree page
    /// is freed and on abort.
    pub fn remove_page(&self, pid: PageId) {
        let mut inner = self.inner.lock();
        inner.young.remove(&pid);
        inner.old.remove(&pid);
        inner.last_used.remove(&pid);
    }

    /// Commit or abort `tid` and release its locks.
    ///
    /// On commit every page locked by the transaction is flushed (FORCE); on
    /// abort every page dirtied by it is discarded so the next reader re-reads
    /// the committed on-disk image. Locks on pages that were evicted while
    /// clean are swept up by the final `release_all`.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> VellumResult<()> {
        if commit {
            debug!("commit transaction {}", tid);
        } else {
            debug!("abort transaction {}", tid);
        }
        let entries = self.snapshot();
        for (pid, frame) in entries {
            if !self.lock_manager.holds_lock(tid, pid) {
                continue;
            }
            if commit {
                self.flush_frame(pid, &frame)?;
            } else if frame.read().is_dirty() == Some(tid) {
                // A dirty page is owned by exactly one writer, so discarding
                // here can only drop this transaction's own changes.
                self.remove_page(pid);
            }
            self.lock_manager.release(tid, pid);
        }
        self.lock_manager.release_all(tid);
        Ok(())
    }

    /// Insert the tuple into the table on behalf of `tid`, marking every
    /// dirtied page.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: crate::storage::page::TableId,
        tuple: &mut crate::storage::tuple::Tuple,
    ) -> VellumResult<()> {
        let file = self.catalog.get_file(table_id)?;
        let dirtied = file.insert_tuple(self, tid, tuple)?;
        self.mark_dirtied(tid, &dirtied);
        Ok(())
    }

    /// Delete the tuple (located by its record id) on behalf of `tid`.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        tuple: &crate::storage::tuple::Tuple,
    ) -> VellumResult<()> {
        let record_id = tuple
            .record_id
            .ok_or_else(|| VellumError::Storage("tuple has no record id".to_string()))?;
        let file = self.catalog.get_file(record_id.page_id.table_id())?;
        let dirtied = file.delete_tuple(self, tid, tuple)?;
        self.mark_dirtied(tid, &dirtied);
        Ok(())
    }

    fn mark_dirtied(&self, tid: TransactionId, pids: &[PageId]) {
        for pid in pids {
            if let Some(frame) = self.cached_page(*pid) {
                frame.write().mark_dirty(tid);
            }
        }
    }

    pub fn cached_page(&self, pid: PageId) -> Option<PageRef> {
        let inner = self.inner.lock();
        inner
            .young
            .get(&pid)
            .or_else(|| inner.old.get(&pid))
            .cloned()
    }

    fn snapshot(&self) -> Vec<(PageId, PageRef)> {
        let inner = self.inner.lock();
        inner
            .old
            .iter()
            .chain(inner.young.iter())
            .map(|(pid, frame)| (*pid, frame.clone()))
            .collect()
    }

    // Inspection helpers for tests and stats.

    pub fn young_len(&self) -> usize {
        self.inner.lock().young.len()
    }

    pub fn old_len(&self) -> usize {
        self.inner.lock().old.len()
    }

    pub fn is_young(&self, pid: PageId) -> bool {
        self.inner.lock().young.contains_key(&pid)
    }

    pub fn is_old(&self, pid: PageId) -> bool {
        self.inner.lock().old.contains_key(&pid)
    }

    /// Page ids of frames currently dirtied by `tid`.
    pub fn pages_dirtied_by(&self, tid: TransactionId) -> Vec<PageId> {
        self.snapshot()
            .into_iter()
            .filter(|(_, frame)| frame.read().is_dirty() == Some(tid))
            .map(|(pid, _)| pid)
            .collect()
    }
}
