use crate::buffer::BufferPool;
use crate::catalog::{Catalog, TupleDescRef};
use crate::config::DbConfig;
use crate::error::VellumResult;
use crate::storage::page::TableId;
use crate::storage::{BTreeFile, HeapFile};
use crate::transaction::LockManager;
use std::path::Path;
use std::sync::Arc;

/// The engine context: one `Database` owns the catalog, the lock manager and
/// the buffer pool, and every operation reaches storage through it. There is
/// no global state; independent databases are fully isolated.
pub struct Database {
    config: Arc<DbConfig>,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    buffer_pool: Arc<BufferPool>,
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(DbConfig::default())
    }

    pub fn with_config(config: DbConfig) -> Self {
        let config = Arc::new(config);
        let catalog = Arc::new(Catalog::new());
        let lock_manager = Arc::new(LockManager::new(config.clone()));
        let buffer_pool = Arc::new(BufferPool::new(
            config.clone(),
            catalog.clone(),
            lock_manager.clone(),
        ));
        Self {
            config,
            catalog,
            lock_manager,
            buffer_pool,
        }
    }

    pub fn config(&self) -> &Arc<DbConfig> {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    /// Open (or create) a heap table backed by `path` and register it.
    pub fn open_heap_table(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        desc: TupleDescRef,
    ) -> VellumResult<TableId> {
        let file = HeapFile::open(path, desc, &self.config)?;
        Ok(self.catalog.add_table(name, file))
    }

    /// Open (or create) a B+-tree table keyed on `key_field` and register it.
    pub fn open_btree_table(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        key_field: usize,
        desc: TupleDescRef,
    ) -> VellumResult<TableId> {
        let file = BTreeFile::open(path, key_field, desc, &self.config)?;
        Ok(self.catalog.add_table(name, file))
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
