use crate::catalog::DataType;
use crate::error::{VellumError, VellumResult};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type TupleDescRef = Arc<TupleDesc>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered schema of a tuple. Immutable after construction.
///
/// Two descriptors are equal when they have the same length and pairwise equal
/// field types; names are ignored.
#[derive(Debug, Clone, Eq)]
pub struct TupleDesc {
    pub columns: Vec<Column>,
}

impl TupleDesc {
    pub fn new(columns: Vec<Column>) -> Self {
        debug_assert!(!columns.is_empty(), "a tuple descriptor needs at least one field");
        Self { columns }
    }

    /// Total width in bytes of a record with this schema.
    pub fn size(&self) -> usize {
        self.columns.iter().map(|c| c.data_type.len()).sum()
    }

    pub fn num_fields(&self) -> usize {
        self.columns.len()
    }

    pub fn field_type(&self, index: usize) -> VellumResult<DataType> {
        self.columns
            .get(index)
            .map(|c| c.data_type)
            .ok_or_else(|| {
                VellumError::NotFound(format!("no field at index {} in {}", index, self))
            })
    }

    pub fn field_name(&self, index: usize) -> VellumResult<&str> {
        self.columns
            .get(index)
            .map(|c| c.name.as_str())
            .ok_or_else(|| {
                VellumError::NotFound(format!("no field at index {} in {}", index, self))
            })
    }

    /// Find the index of the field with the given name.
    pub fn index_of(&self, name: &str) -> VellumResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| VellumError::NotFound(format!("no field named \"{}\" in {}", name, self)))
    }

    /// Concatenate two descriptors, left fields first. Used by joins.
    pub fn combine(left: &TupleDesc, right: &TupleDesc) -> TupleDesc {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        TupleDesc { columns }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.data_type == b.data_type)
    }
}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "({})", fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_names() {
        let a = TupleDesc::new(vec![
            Column::new("x", DataType::Int),
            Column::new("y", DataType::Int),
        ]);
        let b = TupleDesc::new(vec![
            Column::new("p", DataType::Int),
            Column::new("q", DataType::Int),
        ]);
        let c = TupleDesc::new(vec![Column::new("x", DataType::Int)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn size_sums_field_widths() {
        let desc = TupleDesc::new(vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::Varchar(16)),
        ]);
        assert_eq!(desc.size(), 4 + 4 + 16);
    }

    #[test]
    fn combine_concatenates() {
        let a = TupleDesc::new(vec![Column::new("a", DataType::Int)]);
        let b = TupleDesc::new(vec![Column::new("b", DataType::Varchar(8))]);
        let joined = TupleDesc::combine(&a, &b);
        assert_eq!(joined.num_fields(), 2);
        assert_eq!(joined.field_name(0).unwrap(), "a");
        assert_eq!(joined.field_name(1).unwrap(), "b");
    }
}
