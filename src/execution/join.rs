use crate::catalog::{TupleDesc, TupleDescRef};
use crate::error::VellumResult;
use crate::execution::predicate::JoinPredicate;
use crate::execution::TupleIterator;
use crate::storage::tuple::Tuple;
use std::sync::Arc;

/// Nested-loop join: for every left tuple the right child is rewound and
/// scanned in full.
pub struct Join {
    predicate: JoinPredicate,
    left: Box<dyn TupleIterator>,
    right: Box<dyn TupleIterator>,
    desc: TupleDescRef,
    current_left: Option<Tuple>,
}

impl Join {
    pub fn new(
        predicate: JoinPredicate,
        left: Box<dyn TupleIterator>,
        right: Box<dyn TupleIterator>,
    ) -> Self {
        let desc = Arc::new(TupleDesc::combine(&left.tuple_desc(), &right.tuple_desc()));
        Self {
            predicate,
            left,
            right,
            desc,
            current_left: None,
        }
    }
}

impl TupleIterator for Join {
    fn rewind(&mut self) -> VellumResult<()> {
        self.left.rewind()?;
        self.right.rewind()?;
        self.current_left = None;
        Ok(())
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        loop {
            if self.current_left.is_none() {
                match self.left.next()? {
                    Some(tuple) => {
                        self.current_left = Some(tuple);
                        self.right.rewind()?;
                    }
                    None => return Ok(None),
                }
            }
            let left = self
                .current_left
                .as_ref()
                .expect("left tuple set above")
                .clone();
            while let Some(right) = self.right.next()? {
                if self.predicate.eval(&left, &right)? {
                    return Ok(Some(Tuple::combine(&left, &right, self.desc.clone())));
                }
            }
            self.current_left = None;
        }
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }
}
