use crate::catalog::TupleDescRef;
use crate::error::VellumResult;
use crate::execution::predicate::Predicate;
use crate::execution::TupleIterator;
use crate::storage::tuple::Tuple;

/// Passes through only the tuples satisfying the predicate.
pub struct Filter {
    predicate: Predicate,
    child: Box<dyn TupleIterator>,
}

impl Filter {
    pub fn new(predicate: Predicate, child: Box<dyn TupleIterator>) -> Self {
        Self { predicate, child }
    }
}

impl TupleIterator for Filter {
    fn rewind(&mut self) -> VellumResult<()> {
        self.child.rewind()
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            if self.predicate.eval(&tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.child.tuple_desc()
    }
}
