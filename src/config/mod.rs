use std::time::Duration;

/// Engine tunables. A single `DbConfig` is shared by the catalog, buffer pool
/// and lock manager of one `Database`. The page size must not change after the
/// first file has been opened; everything else is read on each use.
#[derive(Debug, Clone, Copy)]
pub struct DbConfig {
    /// Bytes per page, including the slot header.
    pub page_size: usize,
    /// Maximum number of pages cached by the buffer pool.
    pub buffer_pool_pages: usize,
    /// Fraction of the pool reserved for the old (cold) list.
    pub old_list_fraction: f64,
    /// How long a page must sit on the old list before a re-access promotes it.
    pub old_block_time: Duration,
    /// Lower bound of the random lock retry sleep.
    pub lock_retry_min: Duration,
    /// Upper bound of the random lock retry sleep.
    pub lock_retry_max: Duration,
    /// Retry count at which a lock request gives up and aborts.
    pub lock_retry_limit: u32,
    /// Retry count at which deadlock detection runs.
    pub deadlock_check_retry: u32,
}

impl DbConfig {
    pub fn old_list_capacity(&self) -> usize {
        (self.buffer_pool_pages as f64 * self.old_list_fraction) as usize
    }

    pub fn young_list_capacity(&self) -> usize {
        self.buffer_pool_pages - self.old_list_capacity()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            page_size: 4096,
            buffer_pool_pages: 50,
            old_list_fraction: 0.2,
            old_block_time: Duration::from_millis(1000),
            lock_retry_min: Duration::from_millis(200),
            lock_retry_max: Duration::from_millis(500),
            lock_retry_limit: 5,
            deadlock_check_retry: 1,
        }
    }
}
