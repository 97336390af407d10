use crate::error::VellumResult;
use crate::storage::tuple::{Field, Tuple};
use std::fmt::{Display, Formatter};

/// Comparison operators usable in predicates and index scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Op::Equals => "=",
            Op::NotEquals => "<>",
            Op::GreaterThan => ">",
            Op::GreaterThanOrEq => ">=",
            Op::LessThan => "<",
            Op::LessThanOrEq => "<=",
        };
        write!(f, "{}", symbol)
    }
}

/// Compares one tuple field against a constant.
#[derive(derive_new::new, Debug, Clone)]
pub struct Predicate {
    pub field_index: usize,
    pub op: Op,
    pub operand: Field,
}

impl Predicate {
    pub fn eval(&self, tuple: &Tuple) -> VellumResult<bool> {
        tuple.field(self.field_index)?.compare(self.op, &self.operand)
    }
}

/// Compares a field of one tuple against a field of another. Used by joins.
#[derive(derive_new::new, Debug, Clone, Copy)]
pub struct JoinPredicate {
    pub left_index: usize,
    pub op: Op,
    pub right_index: usize,
}

impl JoinPredicate {
    pub fn eval(&self, left: &Tuple, right: &Tuple) -> VellumResult<bool> {
        left.field(self.left_index)?
            .compare(self.op, right.field(self.right_index)?)
    }
}

/// A predicate over the key field of a B+-tree file.
#[derive(derive_new::new, Debug, Clone)]
pub struct IndexPredicate {
    pub op: Op,
    pub operand: Field,
}
