use crate::catalog::TupleDescRef;
use crate::error::{VellumError, VellumResult};
use crate::execution::predicate::Op;
use crate::storage::page::PageId;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Varchar(String),
}

impl Field {
    /// Evaluate `self op other`. Comparing fields of different types is an
    /// error.
    pub fn compare(&self, op: Op, other: &Field) -> VellumResult<bool> {
        let ordering = self.partial_cmp(other).ok_or_else(|| {
            VellumError::Internal(format!("cannot compare {:?} with {:?}", self, other))
        })?;
        Ok(match op {
            Op::Equals => ordering == Ordering::Equal,
            Op::NotEquals => ordering != Ordering::Equal,
            Op::GreaterThan => ordering == Ordering::Greater,
            Op::GreaterThanOrEq => ordering != Ordering::Less,
            Op::LessThan => ordering == Ordering::Less,
            Op::LessThanOrEq => ordering != Ordering::Greater,
        })
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Some(a.cmp(b)),
            (Field::Varchar(a), Field::Varchar(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<i32> for Field {
    fn from(value: i32) -> Self {
        Field::Int(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Varchar(value.to_string())
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Varchar(v) => write!(f, "{}", v),
        }
    }
}

/// Location of a tuple: the page holding it and the slot index within that
/// page.
#[derive(derive_new::new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

/// A row of typed fields plus the slot it currently occupies, if stored.
///
/// Equality compares schema types and field values; the record id is a
/// location, not part of the value.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub desc: TupleDescRef,
    pub fields: Vec<Field>,
    pub record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDescRef, fields: Vec<Field>) -> Self {
        debug_assert_eq!(desc.num_fields(), fields.len());
        Self {
            desc,
            fields,
            record_id: None,
        }
    }

    pub fn field(&self, index: usize) -> VellumResult<&Field> {
        self.fields.get(index).ok_or_else(|| {
            VellumError::Internal(format!("no field at index {} in tuple {}", index, self))
        })
    }

    pub fn set_field(&mut self, index: usize, field: Field) -> VellumResult<()> {
        if index >= self.fields.len() {
            return Err(VellumError::Internal(format!(
                "no field at index {} in tuple {}",
                index, self
            )));
        }
        self.fields[index] = field;
        Ok(())
    }

    /// Concatenate two tuples, left fields first. The result carries no
    /// record id.
    pub fn combine(left: &Tuple, right: &Tuple, desc: TupleDescRef) -> Tuple {
        let mut fields = left.fields.clone();
        fields.extend(right.fields.iter().cloned());
        Tuple::new(desc, fields)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl Display for Tuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let values = self
            .fields
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "({})", values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, TupleDesc};
    use std::sync::Arc;

    fn two_ints() -> TupleDescRef {
        Arc::new(TupleDesc::new(vec![
            Column::new("a", DataType::Int),
            Column::new("b", DataType::Int),
        ]))
    }

    #[test]
    fn field_comparisons() {
        let three = Field::Int(3);
        let five = Field::Int(5);
        assert!(three.compare(Op::LessThan, &five).unwrap());
        assert!(five.compare(Op::GreaterThanOrEq, &five).unwrap());
        assert!(!three.compare(Op::Equals, &five).unwrap());

        let a = Field::Varchar("apple".to_string());
        let b = Field::Varchar("banana".to_string());
        assert!(a.compare(Op::LessThan, &b).unwrap());

        assert!(a.compare(Op::Equals, &three).is_err());
    }

    #[test]
    fn tuple_equality_ignores_record_id() {
        let desc = two_ints();
        let mut t1 = Tuple::new(desc.clone(), vec![1.into(), 2.into()]);
        let t2 = Tuple::new(desc, vec![1.into(), 2.into()]);
        t1.record_id = Some(RecordId::new(
            PageId::Heap(crate::storage::page::HeapPageId::new(1, 0)),
            3,
        ));
        assert_eq!(t1, t2);
    }

    #[test]
    fn combine_merges_fields() {
        let desc = two_ints();
        let left = Tuple::new(desc.clone(), vec![1.into(), 2.into()]);
        let right = Tuple::new(desc.clone(), vec![3.into(), 4.into()]);
        let combined_desc = Arc::new(TupleDesc::combine(&desc, &desc));
        let joined = Tuple::combine(&left, &right, combined_desc);
        assert_eq!(
            joined.fields,
            vec![
                Field::Int(1),
                Field::Int(2),
                Field::Int(3),
                Field::Int(4)
            ]
        );
    }
}
