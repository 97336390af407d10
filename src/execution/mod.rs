pub mod aggregate;
pub mod delete;
pub mod filter;
pub mod insert;
pub mod join;
pub mod predicate;
pub mod seq_scan;

pub use aggregate::{Aggregate, AggregateOp, IntegerAggregator, StringAggregator};
pub use delete::Delete;
pub use filter::Filter;
pub use insert::Insert;
pub use join::Join;
pub use predicate::{IndexPredicate, JoinPredicate, Op, Predicate};
pub use seq_scan::SeqScan;

use crate::catalog::TupleDescRef;
use crate::error::VellumResult;
use crate::storage::tuple::Tuple;

/// Volcano-style cursor shared by file scans and operators: a restartable
/// lazy sequence of tuples.
///
/// Implementations that read pages re-acquire them through the buffer pool on
/// each step rather than holding page references across calls.
pub trait TupleIterator {
    /// Restart the sequence from the beginning.
    fn rewind(&mut self) -> VellumResult<()>;

    /// The next tuple, or `None` when exhausted.
    fn next(&mut self) -> VellumResult<Option<Tuple>>;

    /// Schema of the produced tuples.
    fn tuple_desc(&self) -> TupleDescRef;
}

/// Drain an iterator into a vector. Convenience for operators and tests.
pub fn collect_tuples(iter: &mut dyn TupleIterator) -> VellumResult<Vec<Tuple>> {
    let mut tuples = Vec::new();
    while let Some(tuple) = iter.next()? {
        tuples.push(tuple);
    }
    Ok(tuples)
}
