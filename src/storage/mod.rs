pub mod btree_file;
pub mod codec;
pub mod heap_file;
pub mod page;
pub mod tuple;

pub use btree_file::BTreeFile;
pub use heap_file::HeapFile;

use crate::buffer::BufferPool;
use crate::catalog::TupleDescRef;
use crate::error::VellumResult;
use crate::execution::TupleIterator;
use crate::storage::page::{PageId, TableId};
use crate::storage::tuple::Tuple;
use crate::transaction::TransactionId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

/// A table's on-disk backing store: a heap of pages or a B+-tree.
///
/// Files never retain page references across calls; every page access goes
/// through the buffer pool handed in by the caller.
pub trait DbFile: Send + Sync {
    /// Stable id of this table, hashed from the backing file's absolute path.
    fn table_id(&self) -> TableId;

    fn tuple_desc(&self) -> TupleDescRef;

    fn num_pages(&self) -> u32;

    /// Read the raw bytes of one page from disk. Called by the buffer pool on
    /// a cache miss, never by operators.
    fn read_page(&self, pid: &PageId) -> VellumResult<Vec<u8>>;

    /// Write the raw bytes of one page to disk. Called by the buffer pool
    /// when flushing.
    fn write_page(&self, pid: &PageId, data: &[u8]) -> VellumResult<()>;

    /// Insert the tuple, returning every page dirtied by the operation.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> VellumResult<Vec<PageId>>;

    /// Delete the tuple located by its record id, returning every dirtied
    /// page.
    fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> VellumResult<Vec<PageId>>;

    /// A restartable lazy sequence over all tuples in the file.
    fn iterator(
        self: Arc<Self>,
        pool: Arc<BufferPool>,
        tid: TransactionId,
    ) -> Box<dyn TupleIterator>;
}

/// Stable table id for a backing file: a hash of its absolute path.
pub fn table_id_for_path(path: &Path) -> TableId {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    absolute.hash(&mut hasher);
    hasher.finish() as TableId
}
