use crate::catalog::TupleDescRef;
use crate::database::Database;
use crate::error::VellumResult;
use crate::execution::TupleIterator;
use crate::storage::page::TableId;
use crate::storage::tuple::Tuple;
use crate::transaction::TransactionId;

/// Full-table scan over a heap or B+-tree file.
pub struct SeqScan {
    inner: Box<dyn TupleIterator>,
    desc: TupleDescRef,
}

impl SeqScan {
    pub fn new(db: &Database, tid: TransactionId, table_id: TableId) -> VellumResult<Self> {
        let file = db.catalog().get_file(table_id)?;
        let desc = file.tuple_desc();
        let inner = file.iterator(db.buffer_pool().clone(), tid);
        Ok(Self { inner, desc })
    }
}

impl TupleIterator for SeqScan {
    fn rewind(&mut self) -> VellumResult<()> {
        self.inner.rewind()
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        self.inner.next()
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }
}
