#[allow(clippy::module_inception)]
mod catalog;
mod data_type;
mod schema;

pub use catalog::Catalog;
pub use data_type::{DataType, STRING_LEN};
pub use schema::{Column, TupleDesc, TupleDescRef};
