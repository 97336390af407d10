use crate::config::DbConfig;
use crate::error::{VellumError, VellumResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use dashmap::DashMap;
use log::{debug, error};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Lock {
    tid: TransactionId,
    mode: LockMode,
}

/// Two-mode page lock table with a waits-for graph.
///
/// Each page id maps to the set of `(tid, mode)` entries currently granted on
/// it. A blocked request records the holders it is waiting on, backs off for a
/// random interval, and retries; deadlock detection runs on the first retry
/// and a retry-count timeout aborts the transaction as a fallback.
#[derive(Debug)]
pub struct LockManager {
    lock_table: DashMap<PageId, HashSet<Lock>>,
    waits_for: Mutex<HashMap<TransactionId, HashSet<TransactionId>>>,
    config: Arc<DbConfig>,
}

impl LockManager {
    pub fn new(config: Arc<DbConfig>) -> Self {
        Self {
            lock_table: DashMap::new(),
            waits_for: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Acquire `mode` on `pid` for `tid`, blocking through sleep-retry rounds.
    ///
    /// Returns immediately if the transaction already holds an entry that
    /// covers the request (same mode, or X dominating a new S request). A
    /// single-holder S entry is upgraded to X in place.
    pub fn acquire(
        &self,
        tid: TransactionId,
        pid: PageId,
        mode: LockMode,
    ) -> VellumResult<()> {
        debug!("acquire lock: tid={}, pid={:?}, mode={:?}", tid, pid, mode);
        let mut retries = 0u32;
        loop {
            let blockers = {
                let mut locks = self.lock_table.entry(pid).or_default();
                if locks.contains(&Lock { tid, mode }) {
                    self.clear_wait_edges(tid);
                    return Ok(());
                }
                if mode == LockMode::Shared
                    && locks.contains(&Lock {
                        tid,
                        mode: LockMode::Exclusive,
                    })
                {
                    // X dominates S.
                    self.clear_wait_edges(tid);
                    return Ok(());
                }
                if locks.is_empty()
                    || (mode == LockMode::Shared
                        && locks.iter().all(|l| l.mode == LockMode::Shared))
                {
                    locks.insert(Lock { tid, mode });
                    drop(locks);
                    debug!("lock granted: tid={}, pid={:?}, mode={:?}", tid, pid, mode);
                    self.clear_wait_edges(tid);
                    return Ok(());
                }
                if mode == LockMode::Exclusive && locks.len() == 1 {
                    let only = *locks.iter().next().expect("non-empty lock set");
                    if only.tid == tid && only.mode == LockMode::Shared {
                        locks.remove(&only);
                        locks.insert(Lock { tid, mode });
                        drop(locks);
                        debug!("lock upgraded: tid={}, pid={:?}", tid, pid);
                        self.clear_wait_edges(tid);
                        return Ok(());
                    }
                }
                locks
                    .iter()
                    .map(|l| l.tid)
                    .filter(|holder| *holder != tid)
                    .collect::<HashSet<TransactionId>>()
            };

            if !blockers.is_empty() {
                self.waits_for.lock().insert(tid, blockers);
            }

            if retries >= self.config.lock_retry_limit {
                error!("lock timeout, aborting: tid={}, pid={:?}", tid, pid);
                self.clear_wait_edges(tid);
                self.release(tid, pid);
                return Err(VellumError::TransactionAborted(format!(
                    "lock timeout: {} gave up waiting for {:?} on {:?}",
                    tid, mode, pid
                )));
            }
            if retries == self.config.deadlock_check_retry {
                if let Err(e) = self.detect_deadlock(tid) {
                    self.release(tid, pid);
                    return Err(e);
                }
            }
            retries += 1;
            debug!(
                "lock busy, backing off: tid={}, pid={:?}, retry={}",
                tid, pid, retries
            );
            std::thread::sleep(self.retry_interval());
        }
    }

    /// Remove every lock entry `tid` owns on `pid`.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        debug!("release lock: tid={}, pid={:?}", tid, pid);
        if let Some(mut locks) = self.lock_table.get_mut(&pid) {
            locks.retain(|l| l.tid != tid);
        }
        self.lock_table.remove_if(&pid, |_, locks| locks.is_empty());
    }

    /// Remove every lock entry `tid` owns anywhere. Used at transaction end to
    /// cover pages that were evicted from the buffer pool while locked.
    pub fn release_all(&self, tid: TransactionId) {
        let pids: Vec<PageId> = self
            .lock_table
            .iter()
            .filter(|entry| entry.value().iter().any(|l| l.tid == tid))
            .map(|entry| *entry.key())
            .collect();
        for pid in pids {
            self.release(tid, pid);
        }
        self.clear_wait_edges(tid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_table
            .get(&pid)
            .map(|locks| locks.iter().any(|l| l.tid == tid))
            .unwrap_or(false)
    }

    /// True when any transaction holds a lock on `pid`. Safe to call during
    /// eviction.
    pub fn is_locked(&self, pid: PageId) -> bool {
        self.lock_table
            .get(&pid)
            .map(|locks| !locks.is_empty())
            .unwrap_or(false)
    }

    fn retry_interval(&self) -> std::time::Duration {
        let min = self.config.lock_retry_min.as_millis() as u64;
        let max = self.config.lock_retry_max.as_millis() as u64;
        std::time::Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn clear_wait_edges(&self, tid: TransactionId) {
        self.waits_for.lock().remove(&tid);
    }

    /// Topological elimination over a snapshot of the waits-for graph: strip
    /// zero-in-degree nodes until none remain. Anything left is on a cycle and
    /// the requesting transaction aborts. Runs under the graph mutex so that
    /// the victim removes its own edges before a concurrent detector looks.
    fn detect_deadlock(&self, requester: TransactionId) -> VellumResult<()> {
        let mut graph = self.waits_for.lock();

        let mut in_degree: HashMap<TransactionId, usize> = HashMap::new();
        for (from, edges) in graph.iter() {
            in_degree.entry(*from).or_insert(0);
            for to in edges {
                *in_degree.entry(*to).or_insert(0) += 1;
            }
        }

        let mut ready: VecDeque<TransactionId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(tid, _)| *tid)
            .collect();
        let mut eliminated = 0usize;
        while let Some(node) = ready.pop_front() {
            eliminated += 1;
            if let Some(edges) = graph.get(&node) {
                for to in edges {
                    let degree = in_degree
                        .get_mut(to)
                        .expect("edge target present in in-degree map");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*to);
                    }
                }
            }
        }

        if eliminated < in_degree.len() {
            graph.remove(&requester);
            error!("deadlock detected, aborting: tid={}", requester);
            return Err(VellumError::TransactionAborted(format!(
                "deadlock detected while {} waited in the lock manager",
                requester
            )));
        }
        Ok(())
    }
}
