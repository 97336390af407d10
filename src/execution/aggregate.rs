use crate::catalog::{Column, DataType, TupleDesc, TupleDescRef};
use crate::error::{VellumError, VellumResult};
use crate::execution::TupleIterator;
use crate::storage::tuple::{Field, Tuple};
use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl Display for AggregateOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct GroupState {
    count: i64,
    sum: i64,
    min: i32,
    max: i32,
}

/// Computes MIN/MAX/SUM/AVG/COUNT over an integer field, optionally grouped
/// by one other field.
pub struct IntegerAggregator {
    group_field: Option<usize>,
    aggregate_field: usize,
    op: AggregateOp,
    groups: HashMap<Option<Field>, GroupState>,
}

impl IntegerAggregator {
    pub fn new(group_field: Option<usize>, aggregate_field: usize, op: AggregateOp) -> Self {
        Self {
            group_field,
            aggregate_field,
            op,
            groups: HashMap::new(),
        }
    }

    pub fn merge(&mut self, tuple: &Tuple) -> VellumResult<()> {
        let group = match self.group_field {
            Some(index) => Some(tuple.field(index)?.clone()),
            None => None,
        };
        let Field::Int(value) = tuple.field(self.aggregate_field)? else {
            return Err(VellumError::Execution(
                "integer aggregator over a non-integer field".to_string(),
            ));
        };
        let state = self.groups.entry(group).or_insert(GroupState {
            count: 0,
            sum: 0,
            min: i32::MAX,
            max: i32::MIN,
        });
        state.count += 1;
        state.sum += *value as i64;
        state.min = state.min.min(*value);
        state.max = state.max.max(*value);
        Ok(())
    }

    pub fn results(&self) -> Vec<(Option<Field>, Field)> {
        self.groups
            .iter()
            .map(|(group, state)| {
                let value = match self.op {
                    AggregateOp::Min => state.min,
                    AggregateOp::Max => state.max,
                    AggregateOp::Sum => state.sum as i32,
                    AggregateOp::Avg => (state.sum / state.count) as i32,
                    AggregateOp::Count => state.count as i32,
                };
                (group.clone(), Field::Int(value))
            })
            .collect()
    }
}

/// Counts string fields, optionally grouped. COUNT is the only supported
/// aggregate for strings.
pub struct StringAggregator {
    group_field: Option<usize>,
    aggregate_field: usize,
    counts: HashMap<Option<Field>, i64>,
}

impl StringAggregator {
    pub fn new(
        group_field: Option<usize>,
        aggregate_field: usize,
        op: AggregateOp,
    ) -> VellumResult<Self> {
        if op != AggregateOp::Count {
            return Err(VellumError::Execution(format!(
                "{} is not supported over string fields",
                op
            )));
        }
        Ok(Self {
            group_field,
            aggregate_field,
            counts: HashMap::new(),
        })
    }

    pub fn merge(&mut self, tuple: &Tuple) -> VellumResult<()> {
        let group = match self.group_field {
            Some(index) => Some(tuple.field(index)?.clone()),
            None => None,
        };
        let Field::Varchar(_) = tuple.field(self.aggregate_field)? else {
            return Err(VellumError::Execution(
                "string aggregator over a non-string field".to_string(),
            ));
        };
        *self.counts.entry(group).or_insert(0) += 1;
        Ok(())
    }

    pub fn results(&self) -> Vec<(Option<Field>, Field)> {
        self.counts
            .iter()
            .map(|(group, count)| (group.clone(), Field::Int(*count as i32)))
            .collect()
    }
}

enum AggregatorKind {
    Integer(IntegerAggregator),
    String(StringAggregator),
}

/// Blocking aggregate operator: drains its child on the first `next`, then
/// yields one tuple per group (`(group, aggregate)`) or a single aggregate
/// tuple when ungrouped.
pub struct Aggregate {
    child: Box<dyn TupleIterator>,
    group_field: Option<usize>,
    aggregate_field: usize,
    op: AggregateOp,
    desc: TupleDescRef,
    results: Option<VecDeque<Tuple>>,
}

impl Aggregate {
    pub fn new(
        child: Box<dyn TupleIterator>,
        group_field: Option<usize>,
        aggregate_field: usize,
        op: AggregateOp,
    ) -> VellumResult<Self> {
        let child_desc = child.tuple_desc();
        let aggregate_name = format!("{}({})", op, child_desc.field_name(aggregate_field)?);
        let columns = match group_field {
            Some(index) => vec![
                Column::new(
                    child_desc.field_name(index)?,
                    child_desc.field_type(index)?,
                ),
                Column::new(aggregate_name, DataType::Int),
            ],
            None => vec![Column::new(aggregate_name, DataType::Int)],
        };
        Ok(Self {
            child,
            group_field,
            aggregate_field,
            op,
            desc: Arc::new(TupleDesc::new(columns)),
            results: None,
        })
    }

    fn compute(&mut self) -> VellumResult<VecDeque<Tuple>> {
        let field_type = self.child.tuple_desc().field_type(self.aggregate_field)?;
        let mut kind = match field_type {
            DataType::Int => AggregatorKind::Integer(IntegerAggregator::new(
                self.group_field,
                self.aggregate_field,
                self.op,
            )),
            DataType::Varchar(_) => AggregatorKind::String(StringAggregator::new(
                self.group_field,
                self.aggregate_field,
                self.op,
            )?),
        };
        while let Some(tuple) = self.child.next()? {
            match &mut kind {
                AggregatorKind::Integer(agg) => agg.merge(&tuple)?,
                AggregatorKind::String(agg) => agg.merge(&tuple)?,
            }
        }
        let mut pairs = match kind {
            AggregatorKind::Integer(agg) => agg.results(),
            AggregatorKind::String(agg) => agg.results(),
        };
        // Deterministic output order for grouped results.
        pairs.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mut tuples = VecDeque::new();
        for (group, value) in pairs {
            let fields = match (&self.group_field, group) {
                (Some(_), Some(group_value)) => vec![group_value, value],
                _ => vec![value],
            };
            tuples.push_back(Tuple::new(self.desc.clone(), fields));
        }
        Ok(tuples)
    }
}

impl TupleIterator for Aggregate {
    fn rewind(&mut self) -> VellumResult<()> {
        self.child.rewind()?;
        self.results = None;
        Ok(())
    }

    fn next(&mut self) -> VellumResult<Option<Tuple>> {
        if self.results.is_none() {
            let computed = self.compute()?;
            self.results = Some(computed);
        }
        Ok(self
            .results
            .as_mut()
            .expect("results computed above")
            .pop_front())
    }

    fn tuple_desc(&self) -> TupleDescRef {
        self.desc.clone()
    }
}
