use crate::buffer::BufferPool;
use crate::catalog::{Column, DataType, TupleDesc, TupleDescRef};
use crate::error::VellumResult;
use crate::execution::TupleIterator;
use crate::storage::tuple::Tuple;
use crate::transaction::TransactionId;
use std::sync::Arc;

/// Deletes every child tuple (located by record id) and yields a single
/// one-field tuple holding the delete count.
pub struct Delete {
    tid: TransactionId,
    pool: Arc<BufferPool>,
    child: Box<dyn TupleIterator>,
    desc: TupleDescRef,
    done: bool,
}

impl Delete {
    pub fn new(tid: TransactionId, pool: Arc<BufferPool>, child: Box<dyn TupleIterator>) -> Self {
        Self {
            tid,
            pool,
            child,
            desc: Arc::new(TupleDesc::new(vec![Column::new("deleted", DataType::Int)])),
            done: false,
        }
    }
}

impl TupleIterator for Delete {
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
        while let Some(tuple) = self.child.next()? {
            self.pool.delete_tuple(self.tid, &tuple)?;
            count += 1;
        }
        Ok(Some(Tuple::new(self.desc.clone(), vec![count.into()])))
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }
}
