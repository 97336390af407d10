use crate::buffer::BufferPool;
use crate::catalog::{Column, DataType, TupleDesc, TupleDescRef};
use crate::error::VellumResult;
use crate::execution::TupleIterator;
use crate::storage::page::TableId;
use crate::storage::tuple::Tuple;
use crate::transaction::TransactionId;
use std::sync::Arc;

/// Inserts every child tuple into the target table and yields a single
/// one-field tuple holding the insert count.
pub struct Insert {
    tid: TransactionId,
    table_id: TableId,
    pool: Arc<BufferPool>,
    child: Box<dyn TupleIterator>,
    desc: TupleDescRef,
    done: bool,
}

impl Insert {
    pub fn new(
        tid: TransactionId,
        table_id: TableId,
        pool: Arc<BufferPool>,
        child: Box<dyn TupleIterator>,
    ) -> Self {
        Self {
            tid,
            table_id,
            pool,
            child,
            desc: Arc::new(TupleDesc::new(vec![Column::new("inserted", DataType::Int)])),
            done: false,
        }
    }
}

impl TupleIterator for Insert {
    fn rewind(&mut self) -> VellumResult<()> {
        self.child.rewind()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i32;
        while let Some(mut tuple) = self.child.next()? {
            self.pool.insert_tuple(self.tid, self.table_id, &mut tuple)?;
            count += 1;
        }
        Ok(Some(Tuple::new(self.desc.clone(), vec![count.into()])))
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }
}
